//! HTTP runner
//!
//! `POST /api/offer` negotiates a connection and starts a bot session for it.
//! The answer names a WebSocket endpoint (`/api/ws/:pc_id`) that carries the
//! data channel frames in both directions.

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use console::Style;
use delegated_agent_core::agent::run_bot;
use delegated_agent_core::protocol::{
    parse_client_frame, Answer, MessageEnvelope, OfferRequest, ServerFrame, ServerInfo,
};
use delegated_agent_core::error::OptionExt;
use delegated_agent_core::session::{Connection, ConnectionRegistry};
use delegated_agent_core::{AgentError, BotContext, Config};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

const CLIENT_PAGE: &str = include_str!("client.html");

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<BotContext>,
    pub registry: ConnectionRegistry,
    pub shutdown: CancellationToken,
    /// Public host name used in place of the request's Host header
    pub proxy: Option<String>,
    /// host:port for requests without a Host header
    pub local_host: String,
}

impl AppState {
    pub fn new(bot: Arc<BotContext>, proxy: Option<String>, local_host: impl Into<String>) -> Self {
        Self {
            bot,
            registry: ConnectionRegistry::new(),
            shutdown: CancellationToken::new(),
            proxy,
            local_host: local_host.into(),
        }
    }

    fn ws_url(&self, headers: &HeaderMap, pc_id: &str) -> String {
        match &self.proxy {
            Some(proxy) => format!("wss://{}/api/ws/{}", proxy, pc_id),
            None => {
                let host = headers
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or(&self.local_host);
                format!("ws://{}/api/ws/{}", host, pc_id)
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/client/") }))
        .route("/client/", get(|| async { Html(CLIENT_PAGE) }))
        .route("/api/offer", post(offer))
        .route("/api/ws/:pc_id", get(data_channel))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `bot` until Ctrl+C, then close every session and the delegate agent
pub async fn run(config: &Config, bot: Arc<BotContext>) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let port = listener.local_addr()?.port();
    let local_host = format!("{}:{}", config.server.host, port);

    let state = AppState::new(bot.clone(), config.server.proxy.clone(), local_host.clone());
    let shutdown = state.shutdown.clone();
    let registry = state.registry.clone();

    let green = Style::new().green().bold();
    let cyan = Style::new().cyan();
    println!();
    println!("{}", green.apply_to(format!("Bot '{}' ready!", bot.name)));
    println!("   → Open {} in your browser", cyan.apply_to(format!("http://{}/client/", local_host)));
    if let Some(proxy) = &config.server.proxy {
        println!("   → Public endpoint {}", cyan.apply_to(format!("https://{}/client/", proxy)));
    }
    println!();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    registry.close_all().await;
    bot.handler.agent().close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("failed to listen for Ctrl+C: {}", e);
                return;
            }
            tracing::info!("shutting down");
        }
        _ = shutdown.cancelled() => {}
    }
    // ends every bot session, which closes the sockets
    shutdown.cancel();
}

/// Error body returned by the API
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AgentError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            AgentError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            AgentError::SessionClosed { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn offer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OfferRequest>,
) -> Result<Json<Answer>, ApiError> {
    let existing = match &request.pc_id {
        Some(pc_id) => state.registry.get(pc_id).await,
        None => None,
    };

    let connection = match existing {
        Some(connection) => {
            tracing::info!(pc_id = %connection.pc_id(), restart = request.restart_pc, "reusing connection");
            connection.renegotiate(request.description(), request.restart_pc)?;
            connection
        }
        None => {
            let connection = Arc::new(Connection::initialize(request.description())?);
            state.registry.insert(connection.clone()).await;
            state.registry.remove_on_close(&connection);
            tokio::spawn(run_bot(
                connection.clone(),
                state.bot.clone(),
                state.shutdown.child_token(),
            ));
            connection
        }
    };

    let ws_url = state.ws_url(&headers, connection.pc_id());
    Ok(Json(connection.answer(&ws_url)))
}

async fn health(State(state): State<AppState>) -> Json<ServerInfo> {
    Json(ServerInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bot: state.bot.name.clone(),
        connections: state.registry.len().await,
    })
}

async fn data_channel(
    State(state): State<AppState>,
    Path(pc_id): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let connection = match state.registry.get(&pc_id).await.ok_or_session(pc_id) {
        Ok(connection) => connection,
        Err(e) => return ApiError(e).into_response(),
    };
    let Some(ws) = ws else {
        return (
            StatusCode::UPGRADE_REQUIRED,
            Json(json!({ "error": "expected a WebSocket upgrade" })),
        )
            .into_response();
    };
    ws.on_upgrade(move |socket| pump(socket, connection))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_frame(sender: &mut WsSender, connection: &Connection, frame: ServerFrame) -> Result<(), axum::Error> {
    tracing::trace!(pc_id = %connection.pc_id(), kind = frame.kind(), "sending frame");
    let envelope = MessageEnvelope::<ServerFrame>::event(connection.next_event_id(), frame);
    let text = serde_json::to_string(&envelope).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

/// Move frames between one socket and its connection until either side ends
async fn pump(socket: WebSocket, connection: Arc<Connection>) {
    let (mut sender, mut receiver) = socket.split();

    let attachment = match connection.attach() {
        Ok(attachment) => attachment,
        Err(e) => {
            tracing::warn!(pc_id = %connection.pc_id(), "rejecting socket: {}", e);
            let _ = send_frame(&mut sender, &connection, ServerFrame::error("attach_failed", e.to_string())).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = attachment.token.cancelled() => {
                // flush the session's last frames; a superseded socket leaves them for its successor
                if connection.is_closed() {
                    for frame in connection.drain_outbound() {
                        if send_frame(&mut sender, &connection, frame).await.is_err() {
                            break;
                        }
                    }
                }
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            frame = connection.next_outbound() => {
                let Some(frame) = frame else { break };
                if let Err(e) = send_frame(&mut sender, &connection, frame).await {
                    tracing::debug!(pc_id = %connection.pc_id(), "send failed: {}", e);
                    connection.detach(attachment.generation);
                    break;
                }
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_client_frame(&text) {
                    Ok(frame) => connection.dispatch(frame),
                    Err(e) => {
                        tracing::debug!(pc_id = %connection.pc_id(), "bad frame: {}", e);
                        let frame = ServerFrame::error("invalid_frame", e.to_string());
                        if send_frame(&mut sender, &connection, frame).await.is_err() {
                            connection.detach(attachment.generation);
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    connection.close();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(pc_id = %connection.pc_id(), "socket error: {}", e);
                    connection.detach(attachment.generation);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use delegated_agent_core::agent::{QueryHandler, ToolRegistry, HANDLE_QUERY};
    use delegated_agent_core::config::BotConfig;
    use delegated_agent_core::llm::{ChatResponse, ScriptedModel};
    use delegated_agent_core::DelegateAgent;
    use serde_json::Value;
    use std::future::IntoFuture;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    fn test_state(bot_responses: Vec<ChatResponse>, agent_responses: Vec<ChatResponse>) -> AppState {
        let agent = DelegateAgent::new(Arc::new(ScriptedModel::new(agent_responses)), ToolRegistry::new());
        let bot = Arc::new(BotContext {
            name: "agent_delegated".to_string(),
            model: Arc::new(ScriptedModel::new(bot_responses)),
            handler: QueryHandler::new(Arc::new(agent)),
            config: BotConfig::default(),
        });
        AppState::new(bot, None, "localhost:7860")
    }

    fn offer_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/offer")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::HOST, "localhost:7860")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_redirects_to_client() {
        let app = router(test_state(vec![], vec![]));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/client/");

        let response = app
            .oneshot(Request::builder().uri("/client/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/offer"));
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(test_state(vec![], vec![]))
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["bot"], "agent_delegated");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_offer_rejects_non_offer() {
        let response = router(test_state(vec![], vec![]))
            .oneshot(offer_request(json!({"sdp": "v=0", "type": "answer"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].as_str().unwrap().contains("offer"));
    }

    #[tokio::test]
    async fn test_offer_creates_then_reuses_connection() {
        let state = test_state(vec![], vec![]);
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(offer_request(json!({"sdp": "v=0", "type": "offer"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first: Answer = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(first.sdp_type, "answer");
        assert_eq!(first.ws_url, format!("ws://localhost:7860/api/ws/{}", first.pc_id));
        assert!(first.sdp.contains("a=ws-url:"));

        let response = app
            .oneshot(offer_request(json!({
                "pc_id": first.pc_id,
                "sdp": "v=0",
                "type": "offer",
                "restart_pc": true
            })))
            .await
            .unwrap();
        let second: Answer = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(second.pc_id, first.pc_id);
        assert_eq!(state.registry.len().await, 1);
        assert_eq!(state.registry.get(&first.pc_id).await.unwrap().generation(), 1);

        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_proxy_answer_uses_wss() {
        let mut state = test_state(vec![], vec![]);
        state.proxy = Some("abc.ngrok.app".to_string());
        let response = router(state.clone())
            .oneshot(offer_request(json!({"sdp": "v=0", "type": "offer"})))
            .await
            .unwrap();
        let answer: Answer = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(answer.ws_url, format!("wss://abc.ngrok.app/api/ws/{}", answer.pc_id));
        state.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_offers_are_closed() {
        let state = test_state(vec![], vec![]);
        let app = router(state.clone());
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(offer_request(json!({"sdp": "v=0", "type": "offer"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(state.registry.len().await, 3);

        tokio::time::sleep(Duration::from_secs(BotConfig::default().idle_timeout_secs + 1)).await;
        for _ in 0..50 {
            if state.registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_data_channel_unknown_and_plain_http() {
        let state = test_state(vec![], vec![]);
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/ws/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(offer_request(json!({"sdp": "v=0", "type": "offer"})))
            .await
            .unwrap();
        let answer: Answer = serde_json::from_value(json_body(response).await).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/ws/{}", answer.pc_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
        state.shutdown.cancel();
    }

    async fn next_event<S>(ws: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket ended")
                .unwrap();
            if let WsMessage::Text(text) = message {
                let envelope: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(envelope["v"], 1);
                assert_eq!(envelope["type"], "event");
                return envelope;
            }
        }
    }

    #[tokio::test]
    async fn test_live_session_delegates_and_closes() {
        let state = test_state(
            vec![
                ScriptedModel::text_response("Hi! How can I help with your health today?"),
                ScriptedModel::tool_use_response("c1", HANDLE_QUERY, json!({"query": "weather in Seattle"})),
                ScriptedModel::text_response("It's sunny in Seattle, a good day for a walk."),
            ],
            vec![ScriptedModel::text_response("<answer>Sunny, 21C</answer>")],
        );
        let registry = state.registry.clone();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router(state.clone())).into_future());

        let answer: Answer = reqwest::Client::new()
            .post(format!("http://{}/api/offer", addr))
            .json(&json!({"sdp": "v=0", "type": "offer"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(answer.ws_url, format!("ws://{}/api/ws/{}", addr, answer.pc_id));

        let (mut ws, _) = tokio_tungstenite::connect_async(answer.ws_url.as_str()).await.unwrap();

        let greeting = next_event(&mut ws).await;
        assert_eq!(greeting["event_id"], 1);
        assert_eq!(greeting["payload"]["type"], "assistant_text");
        assert_eq!(greeting["payload"]["text"], "Hi! How can I help with your health today?");

        ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
        let rejected = next_event(&mut ws).await;
        assert_eq!(rejected["payload"]["code"], "invalid_frame");

        ws.send(WsMessage::Text(
            json!({"type": "user_text", "text": "Should I go outside today?"}).to_string(),
        ))
        .await
        .unwrap();
        let call = next_event(&mut ws).await;
        assert_eq!(call["payload"]["type"], "tool_call");
        assert_eq!(call["payload"]["name"], HANDLE_QUERY);
        let result = next_event(&mut ws).await;
        assert_eq!(result["payload"]["type"], "tool_result");
        assert_eq!(result["payload"]["result"]["result"], "Sunny, 21C");
        let reply = next_event(&mut ws).await;
        assert_eq!(reply["payload"]["text"], "It's sunny in Seattle, a good day for a walk.");
        assert_eq!(reply["event_id"], 5);

        ws.send(WsMessage::Text(json!({"type": "close"}).to_string())).await.unwrap();
        let closed = next_event(&mut ws).await;
        assert_eq!(closed["payload"]["type"], "closed");

        for _ in 0..50 {
            if registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registry.is_empty().await);

        let response = reqwest::get(format!("http://{}/api/ws/{}", addr, answer.pc_id)).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_client_close_ends_session() {
        let state = test_state(vec![ScriptedModel::text_response("Hello again.")], vec![]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router(state.clone())).into_future());

        let answer: Answer = reqwest::Client::new()
            .post(format!("http://{}/api/offer", addr))
            .json(&json!({"sdp": "v=0", "type": "offer"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let (mut ws, _) = tokio_tungstenite::connect_async(answer.ws_url.as_str()).await.unwrap();
        assert_eq!(next_event(&mut ws).await["payload"]["text"], "Hello again.");
        ws.close(None).await.unwrap();

        // a clean close from the client ends the session
        for _ in 0..50 {
            if state.registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(state.registry.is_empty().await);
    }
}
