//! One client connection
//!
//! A connection is created from an SDP-style offer, answered with the data
//! channel endpoint, and then carries JSON frames in both directions. The
//! bot task consumes `ConnectionEvent`s; the socket pump drains outbound
//! `ServerFrame`s.

use crate::error::{AgentError, Result};
use crate::protocol::{Answer, ClientFrame, ServerFrame, SessionDescription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Negotiated, no socket attached
    New,
    Connected,
    Closed,
}

/// What the bot task sees
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Frame(ClientFrame),
    Disconnected,
}

/// Handed to the socket pump on attach
#[derive(Debug, Clone)]
pub struct Attachment {
    pub generation: u64,
    /// Fires on close or when a restart supersedes this attachment
    pub token: CancellationToken,
}

struct Inner {
    remote: SessionDescription,
    state: ConnectionState,
    generation: u64,
    attached: bool,
    attachment_token: CancellationToken,
}

pub struct Connection {
    pc_id: String,
    inner: Mutex<Inner>,
    events_tx: UnboundedSender<ConnectionEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<ConnectionEvent>>>,
    outbound_tx: UnboundedSender<ServerFrame>,
    outbound_rx: tokio::sync::Mutex<UnboundedReceiver<ServerFrame>>,
    next_event_id: AtomicU64,
    closed: CancellationToken,
}

fn validate_offer(offer: &SessionDescription) -> Result<()> {
    if offer.sdp_type != "offer" {
        return Err(AgentError::InvalidInput {
            message: format!("expected an offer, got '{}'", offer.sdp_type),
        });
    }
    if offer.sdp.trim().is_empty() {
        return Err(AgentError::InvalidInput {
            message: "offer has an empty sdp".to_string(),
        });
    }
    Ok(())
}

impl Connection {
    /// Accept an offer and create a fresh connection with a new `pc_id`
    pub fn initialize(offer: SessionDescription) -> Result<Self> {
        validate_offer(&offer)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let connection = Self {
            pc_id: Uuid::new_v4().to_string(),
            inner: Mutex::new(Inner {
                remote: offer,
                state: ConnectionState::New,
                generation: 0,
                attached: false,
                attachment_token: closed.child_token(),
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            next_event_id: AtomicU64::new(1),
            closed,
        };
        tracing::debug!(pc_id = %connection.pc_id, "connection initialized");
        Ok(connection)
    }

    pub fn pc_id(&self) -> &str {
        &self.pc_id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn remote_description(&self) -> SessionDescription {
        self.inner.lock().remote.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token that fires once when the connection closes
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Apply a new offer from the same client.
    ///
    /// With `restart_pc` the current socket is superseded and a new one may
    /// attach.
    pub fn renegotiate(&self, offer: SessionDescription, restart_pc: bool) -> Result<()> {
        validate_offer(&offer)?;
        if self.is_closed() {
            return Err(AgentError::SessionClosed {
                pc_id: self.pc_id.clone(),
            });
        }

        let mut inner = self.inner.lock();
        inner.remote = offer;
        if restart_pc {
            inner.generation += 1;
            inner.attachment_token.cancel();
            inner.attachment_token = self.closed.child_token();
            inner.attached = false;
            if inner.state == ConnectionState::Connected {
                inner.state = ConnectionState::New;
            }
            tracing::info!(pc_id = %self.pc_id, generation = inner.generation, "connection restarted");
        } else {
            tracing::debug!(pc_id = %self.pc_id, "connection renegotiated");
        }
        Ok(())
    }

    /// Answer naming the data channel endpoint
    pub fn answer(&self, ws_url: &str) -> Answer {
        let generation = self.generation();
        let session_id = self.pc_id.replace('-', "");
        let sdp = format!(
            "v=0\r\n\
             o=- {session} {generation} IN IP4 0.0.0.0\r\n\
             s=delegated-agent\r\n\
             t=0 0\r\n\
             m=application 0 TCP/WS *\r\n\
             a=mid:0\r\n\
             a=setup:passive\r\n\
             a=ws-url:{ws_url}\r\n",
            session = &session_id[..16.min(session_id.len())],
            generation = generation,
            ws_url = ws_url,
        );

        Answer {
            pc_id: self.pc_id.clone(),
            sdp,
            sdp_type: "answer".to_string(),
            ws_url: ws_url.to_string(),
        }
    }

    /// Bind a socket to this connection. Only one socket per generation.
    pub fn attach(&self) -> Result<Attachment> {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return Err(AgentError::SessionClosed {
                pc_id: self.pc_id.clone(),
            });
        }
        if inner.attached {
            return Err(AgentError::InvalidInput {
                message: format!("connection {} already has a socket", self.pc_id),
            });
        }

        inner.attached = true;
        inner.state = ConnectionState::Connected;
        let _ = self.events_tx.send(ConnectionEvent::Connected);
        tracing::info!(pc_id = %self.pc_id, generation = inner.generation, "client connected");

        Ok(Attachment {
            generation: inner.generation,
            token: inner.attachment_token.clone(),
        })
    }

    /// Socket went away without closing; a new socket may attach
    pub fn detach(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state == ConnectionState::Closed {
            return;
        }
        inner.attached = false;
        inner.state = ConnectionState::New;
        let _ = self.events_tx.send(ConnectionEvent::Disconnected);
        tracing::info!(pc_id = %self.pc_id, "client disconnected");
    }

    /// Forward a frame from the client to the bot
    pub fn dispatch(&self, frame: ClientFrame) {
        if self.events_tx.send(ConnectionEvent::Frame(frame)).is_err() {
            tracing::debug!(pc_id = %self.pc_id, "dropping frame, bot has stopped");
        }
    }

    /// The bot's event stream. Can be taken once.
    pub fn take_events(&self) -> Option<UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.lock().take()
    }

    /// Queue a frame for the client
    pub fn send(&self, frame: ServerFrame) {
        if self.outbound_tx.send(frame).is_err() {
            tracing::debug!(pc_id = %self.pc_id, "outbound channel closed");
        }
    }

    /// Next queued frame for the client
    pub async fn next_outbound(&self) -> Option<ServerFrame> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Frames queued but not yet sent
    pub fn drain_outbound(&self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        if let Ok(mut rx) = self.outbound_rx.try_lock() {
            while let Ok(frame) = rx.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }

    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Close the connection. The closed notification fires exactly once.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return;
        }
        inner.state = ConnectionState::Closed;
        inner.attached = false;
        drop(inner);

        self.closed.cancel();
        tracing::info!(pc_id = %self.pc_id, "connection closed");
    }
}
