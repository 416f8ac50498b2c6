//! Stdio JSON-RPC transport to one MCP server process

use super::{McpCallResult, McpServerConfig, McpToolDefinition, PROTOCOL_VERSION};
use crate::config::AwsSettings;
use crate::error::{AgentError, Result};
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

/// Grace period for the child to exit after stdin closes
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const METHOD_NOT_FOUND: i64 = -32601;

struct Io {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Client for one stdio MCP server.
///
/// Requests are serialized by the I/O mutex; the child is killed when the
/// client is dropped.
pub struct McpClient {
    name: String,
    io: Mutex<Io>,
    next_id: AtomicU64,
    timeout: Duration,
    closed: AtomicBool,
    server_info: Value,
}

impl McpClient {
    /// Spawn the server and complete the `initialize` handshake
    pub async fn spawn(
        config: &McpServerConfig,
        aws: &AwsSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if config.inherit_aws_env {
            for (key, value) in aws.to_env() {
                cmd.env(key, value);
            }
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| AgentError::McpTransport {
            server: config.name.clone(),
            message: format!("failed to spawn '{}': {}", config.command, e),
        })?;
        let transport_err = |what: &str| AgentError::McpTransport {
            server: config.name.clone(),
            message: format!("child has no {}", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| transport_err("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| transport_err("stdout"))?;

        tracing::info!(server = %config.name, command = %config.command, "spawned MCP server");

        let mut client = Self {
            name: config.name.clone(),
            io: Mutex::new(Io {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
            timeout,
            closed: AtomicBool::new(false),
            server_info: Value::Null,
        };
        client.server_info = client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `serverInfo` reported during the handshake
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    async fn initialize(&self) -> Result<Value> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "delegated-agent",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
            .await?;

        self.notify("notifications/initialized", json!({})).await?;

        let info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        let protocol = result
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        tracing::debug!(
            server = %self.name,
            protocol = %protocol,
            "MCP handshake complete"
        );
        Ok(info)
    }

    /// All tools the server offers, following pagination
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let mut result = self.request("tools/list", params).await?;

            let page: Vec<McpToolDefinition> =
                serde_json::from_value(result.get_mut("tools").map(Value::take).unwrap_or(json!([])))
                    .map_err(|e| self.protocol_error(format!("invalid tools/list result: {}", e)))?;
            tools.extend(page);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(server = %self.name, count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpCallResult> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| self.protocol_error(format!("invalid tools/call result: {}", e)))
    }

    /// Close stdin, give the server a moment to exit, then kill it. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut io = self.io.lock().await;
        io.stdin.take();
        match tokio::time::timeout(SHUTDOWN_GRACE, io.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "MCP server exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.name, "failed to wait for MCP server: {}", e);
            }
            Err(_) => {
                tracing::debug!(server = %self.name, "MCP server did not exit, killing");
                io.child.kill().await?;
            }
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.transport_error("client is closed"));
        }

        let mut io = self.io.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::trace!(server = %self.name, id, method, "MCP request");
        self.write_line(&mut io, &message).await?;

        match tokio::time::timeout(self.timeout, self.read_response(&mut io, id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(server = %self.name, method, "MCP request timed out");
                Err(AgentError::Timeout {
                    duration: self.timeout,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let mut io = self.io.lock().await;
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.write_line(&mut io, &message).await
    }

    async fn write_line(&self, io: &mut Io, message: &Value) -> Result<()> {
        let stdin = io
            .stdin
            .as_mut()
            .ok_or_else(|| self.transport_error("stdin is closed"))?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("write failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("flush failed: {}", e)))
    }

    /// Read lines until the response for `id` arrives.
    ///
    /// Notifications and stale responses are skipped; server-initiated
    /// requests are answered so the server never blocks on us.
    async fn read_response(&self, io: &mut Io, id: u64) -> Result<Value> {
        loop {
            let line = io
                .stdout
                .next_line()
                .await
                .map_err(|e| self.transport_error(format!("read failed: {}", e)))?
                .ok_or_else(|| self.transport_error("server closed stdout"))?;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut message: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => {
                    tracing::debug!(server = %self.name, "ignoring non-JSON output: {}", line);
                    continue;
                }
            };

            if let Some(method) = message.get("method").and_then(Value::as_str) {
                match message.get("id").cloned() {
                    Some(request_id) => {
                        let reply = if method == "ping" {
                            json!({ "jsonrpc": "2.0", "id": request_id, "result": {} })
                        } else {
                            json!({
                                "jsonrpc": "2.0",
                                "id": request_id,
                                "error": { "code": METHOD_NOT_FOUND, "message": format!("method not supported: {}", method) }
                            })
                        };
                        self.write_line(io, &reply).await?;
                    }
                    None => {
                        tracing::trace!(server = %self.name, method, "skipping notification");
                    }
                }
                continue;
            }

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                tracing::debug!(server = %self.name, expected = id, "skipping response with foreign id");
                continue;
            }

            if let Some(error) = message.get("error") {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
                let text = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(self.protocol_error(format!("{} (code {})", text, code)));
            }

            return Ok(message
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null));
        }
    }

    fn transport_error(&self, message: impl Into<String>) -> AgentError {
        AgentError::McpTransport {
            server: self.name.clone(),
            message: message.into(),
        }
    }

    fn protocol_error(&self, message: impl Into<String>) -> AgentError {
        AgentError::McpProtocol {
            server: self.name.clone(),
            message: message.into(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const INIT_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1"}}}"#;

    fn fake_server(script: &str) -> McpServerConfig {
        McpServerConfig {
            name: "fake".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: BTreeMap::new(),
            inherit_aws_env: false,
        }
    }

    async fn spawn(script: &str, timeout: Duration) -> Result<McpClient> {
        McpClient::spawn(&fake_server(script), &AwsSettings::default(), timeout).await
    }

    #[tokio::test]
    async fn test_handshake_listing_and_calls() {
        let script = format!(
            r#"
read line
echo '{init}'
read line
read line
echo '{{"jsonrpc":"2.0","method":"notifications/message","params":{{"level":"info"}}}}'
echo 'starting up'
echo '{{"jsonrpc":"2.0","id":99,"result":{{}}}}'
echo '{{"jsonrpc":"2.0","id":2,"result":{{"tools":[{{"name":"search_places","description":"Search for places"}}],"nextCursor":"p2"}}}}'
read line
case "$line" in
  *'"cursor":"p2"'*) echo '{{"jsonrpc":"2.0","id":3,"result":{{"tools":[{{"name":"get_place","inputSchema":{{"type":"object","required":["place_id"]}}}}]}}}}' ;;
  *) echo '{{"jsonrpc":"2.0","id":3,"result":{{"tools":[]}}}}' ;;
esac
read line
echo '{{"jsonrpc":"2.0","id":"srv-1","method":"ping"}}'
read pong
case "$pong" in
  *'"id":"srv-1"'*) echo '{{"jsonrpc":"2.0","id":4,"result":{{"content":[{{"type":"text","text":"Woodland Park Zoo"}}]}}}}' ;;
  *) echo '{{"jsonrpc":"2.0","id":4,"error":{{"code":-1,"message":"no pong"}}}}' ;;
esac
read line
echo '{{"jsonrpc":"2.0","id":5,"error":{{"code":-32602,"message":"unknown tool"}}}}'
read line
"#,
            init = INIT_REPLY
        );

        let client = spawn(&script, Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.server_info()["name"], "fake");

        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search_places", "get_place"]);
        assert_eq!(tools[1].input_schema["required"], json!(["place_id"]));

        let result = client
            .call_tool("search_places", json!({"query": "zoo"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "Woodland Park Zoo");

        let err = client.call_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::McpProtocol { message, .. } if message.contains("unknown tool")));

        client.close().await.unwrap();
        client.close().await.unwrap();
        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, AgentError::McpTransport { .. }));
    }

    #[tokio::test]
    async fn test_server_exit_is_transport_error() {
        let err = spawn("exit 0", Duration::from_secs(5)).await.err().unwrap();
        assert!(matches!(err, AgentError::McpTransport { .. }));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let err = spawn("while read line; do :; done", Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let config = McpServerConfig {
            name: "missing".to_string(),
            command: "definitely-not-a-real-binary-4242".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            inherit_aws_env: false,
        };
        let err = McpClient::spawn(&config, &AwsSettings::default(), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::McpTransport { server, .. } if server == "missing"));
    }
}
