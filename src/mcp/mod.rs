//! Model Context Protocol client.
//!
//! Maintains connections to external tool servers over JSON-RPC 2.0. A
//! heartbeat task probes stale connections and reconnects (or marks the
//! server disconnected) according to each server's policy. Requests go to
//! the first connected server in registration order.

use crate::{
    config::McpConfig,
    events::{EventBus, SystemEvent},
    AssistError, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum McpServerType {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerInfo {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub server_type: McpServerType,
    #[serde(default)]
    pub supported_tools: Vec<String>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub keep_alive_interval_secs: u64,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default)]
    pub is_connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl McpRequest {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
    pub server_id: Option<String>,
}

/// JSON-RPC 2.0 request frame.
#[derive(Debug, Serialize)]
struct JsonRpcFrame<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<McpError>,
}

pub struct McpClient {
    servers: RwLock<HashMap<String, McpServerInfo>>,
    // Registration order; request routing picks the first connected entry.
    order: RwLock<Vec<String>>,
    heartbeats: RwLock<HashMap<String, Instant>>,
    http: reqwest::Client,
    bus: EventBus,
    config: McpConfig,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(config: McpConfig, bus: EventBus) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            heartbeats: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            bus,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn add_server(&self, mut server: McpServerInfo) -> Result<()> {
        url::Url::parse(&server.endpoint).map_err(|e| {
            AssistError::InvalidArgument(format!(
                "invalid MCP endpoint '{}': {e}",
                server.endpoint
            ))
        })?;

        if server.timeout_seconds == 0 {
            server.timeout_seconds = self.config.default_timeout.as_secs();
        }
        if server.keep_alive_interval_secs == 0 {
            server.keep_alive_interval_secs = self.config.default_keep_alive.as_secs();
        }
        server.is_connected = false;

        let mut servers = self.servers.write().await;
        if servers.contains_key(&server.id) {
            return Err(AssistError::AlreadyExists(format!(
                "MCP server '{}' already registered",
                server.id
            )));
        }
        info!("Added MCP server '{}' at {}", server.id, server.endpoint);
        self.order.write().await.push(server.id.clone());
        servers.insert(server.id.clone(), server);
        Ok(())
    }

    pub async fn remove_server(&self, id: &str) -> Result<()> {
        let mut servers = self.servers.write().await;
        servers
            .remove(id)
            .ok_or_else(|| AssistError::NotFound(format!("MCP server '{id}' is not registered")))?;
        self.order.write().await.retain(|s| s != id);
        self.heartbeats.write().await.remove(id);
        info!("Removed MCP server '{}'", id);
        Ok(())
    }

    pub async fn list_servers(&self) -> Vec<McpServerInfo> {
        let servers = self.servers.read().await;
        let order = self.order.read().await;
        order
            .iter()
            .filter_map(|id| servers.get(id).cloned())
            .collect()
    }

    pub async fn get_server(&self, id: &str) -> Option<McpServerInfo> {
        self.servers.read().await.get(id).cloned()
    }

    /// Probe the server with a `ping`; 2xx or 400 both count as reachable.
    pub async fn connect(&self, id: &str) -> Result<bool> {
        let server = self
            .get_server(id)
            .await
            .ok_or_else(|| AssistError::NotFound(format!("MCP server '{id}' is not registered")))?;

        let reachable = self.ping(&server).await;
        self.set_connected(id, reachable).await;

        if reachable {
            self.heartbeats.write().await.insert(id.to_string(), Instant::now());
        }
        Ok(reachable)
    }

    pub async fn disconnect(&self, id: &str) -> Result<()> {
        if self.get_server(id).await.is_none() {
            return Err(AssistError::NotFound(format!(
                "MCP server '{id}' is not registered"
            )));
        }
        self.set_connected(id, false).await;
        self.heartbeats.write().await.remove(id);
        Ok(())
    }

    /// Send a JSON-RPC request to the first connected server.
    ///
    /// With no connected server this fails fast with `ServiceUnavailable`
    /// and issues no HTTP call.
    pub async fn send_request(&self, request: &McpRequest) -> Result<McpResponse> {
        let server = match self.first_connected().await {
            Some(server) => server,
            None => {
                return Err(AssistError::ServiceUnavailable(
                    "no connected MCP server".to_string(),
                ))
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = JsonRpcFrame {
            jsonrpc: "2.0",
            id,
            method: &request.method,
            params: &request.params,
        };

        let outcome = self
            .request_builder(&server)
            .json(&frame)
            .timeout(Duration::from_secs(server.timeout_seconds))
            .send()
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("MCP request to '{}' timed out", server.id)
                } else {
                    format!("MCP request to '{}' failed: {e}", server.id)
                };
                warn!("{message}");
                return Ok(McpResponse {
                    success: false,
                    result: None,
                    error: Some(McpError {
                        code: -32000,
                        message,
                        data: None,
                    }),
                    server_id: Some(server.id),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(McpResponse {
                success: false,
                result: None,
                error: Some(McpError {
                    code: -32000,
                    message: format!("HTTP {}: {}", status.as_u16(), body),
                    data: None,
                }),
                server_id: Some(server.id),
            });
        }

        let reply: JsonRpcReply = response.json().await?;
        self.heartbeats
            .write()
            .await
            .insert(server.id.clone(), Instant::now());

        match (reply.result, reply.error) {
            (_, Some(error)) => Ok(McpResponse {
                success: false,
                result: None,
                error: Some(error),
                server_id: Some(server.id),
            }),
            (result, None) => Ok(McpResponse {
                success: true,
                result,
                error: None,
                server_id: Some(server.id),
            }),
        }
    }

    /// One heartbeat pass over every connected server. Stale connections
    /// are probed; probe failure triggers one reconnect attempt when the
    /// server opted in, then the server is marked disconnected.
    pub async fn heartbeat_sweep(&self) {
        let connected: Vec<McpServerInfo> = {
            let servers = self.servers.read().await;
            servers.values().filter(|s| s.is_connected).cloned().collect()
        };

        for server in connected {
            let stale = {
                let heartbeats = self.heartbeats.read().await;
                match heartbeats.get(&server.id) {
                    Some(last) => {
                        last.elapsed()
                            > Duration::from_secs(server.keep_alive_interval_secs * 2)
                    }
                    None => true,
                }
            };
            if !stale {
                continue;
            }

            debug!("MCP server '{}' heartbeat is stale, probing", server.id);
            let mut alive = self.ping(&server).await;
            if !alive && server.auto_reconnect {
                debug!("Retrying stale MCP server '{}'", server.id);
                alive = self.ping(&server).await;
            }

            if alive {
                self.heartbeats
                    .write()
                    .await
                    .insert(server.id.clone(), Instant::now());
            } else {
                warn!("MCP server '{}' is unreachable, marking disconnected", server.id);
                self.set_connected(&server.id, false).await;
                self.heartbeats.write().await.remove(&server.id);
            }
        }
    }

    /// Start the periodic heartbeat task. Runs until `shutdown` fires.
    pub fn spawn_heartbeat(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(client.config.heartbeat_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => client.heartbeat_sweep().await,
                    _ = shutdown.cancelled() => {
                        debug!("MCP heartbeat shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn first_connected(&self) -> Option<McpServerInfo> {
        let servers = self.servers.read().await;
        let order = self.order.read().await;
        order
            .iter()
            .filter_map(|id| servers.get(id))
            .find(|s| s.is_connected)
            .cloned()
    }

    async fn ping(&self, server: &McpServerInfo) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = serde_json::Value::Object(serde_json::Map::new());
        let frame = JsonRpcFrame {
            jsonrpc: "2.0",
            id,
            method: "ping",
            params: &params,
        };

        match self
            .request_builder(server)
            .json(&frame)
            .timeout(Duration::from_secs(server.timeout_seconds.min(10)))
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.as_u16() == 400
            }
            Err(e) => {
                debug!("Ping to MCP server '{}' failed: {}", server.id, e);
                false
            }
        }
    }

    fn request_builder(&self, server: &McpServerInfo) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(&server.endpoint);
        if server.requires_auth {
            if let Some(key) = &server.api_key {
                builder = builder.bearer_auth(key);
            }
        }
        builder
    }

    async fn set_connected(&self, id: &str, connected: bool) {
        let mut servers = self.servers.write().await;
        if let Some(server) = servers.get_mut(id) {
            if server.is_connected != connected {
                server.is_connected = connected;
                info!("MCP server '{}' connected={}", id, connected);
                self.bus.publish(SystemEvent::ServerStatusChanged {
                    server_id: id.to_string(),
                    connected,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_info(id: &str, endpoint: &str) -> McpServerInfo {
        McpServerInfo {
            id: id.to_string(),
            name: format!("{id} server"),
            endpoint: endpoint.to_string(),
            server_type: McpServerType::Remote,
            supported_tools: vec!["search".to_string()],
            requires_auth: false,
            api_key: None,
            timeout_seconds: 5,
            keep_alive_interval_secs: 60,
            auto_reconnect: true,
            is_connected: false,
        }
    }

    #[tokio::test]
    async fn test_send_without_connection_makes_no_http_call() {
        let mut http = mockito::Server::new_async().await;
        let mock = http
            .mock("POST", "/rpc")
            .expect(0)
            .create_async()
            .await;

        let client = McpClient::new(McpConfig::default(), EventBus::default());
        client
            .add_server(server_info("s1", &format!("{}/rpc", http.url())))
            .await
            .unwrap();

        let err = client
            .send_request(&McpRequest::new("tools/list", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ServiceUnavailable);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_accepts_400_as_reachable() {
        let mut http = mockito::Server::new_async().await;
        http.mock("POST", "/rpc")
            .with_status(400)
            .with_body(r#"{"error": "unknown method"}"#)
            .create_async()
            .await;

        let client = McpClient::new(McpConfig::default(), EventBus::default());
        client
            .add_server(server_info("s1", &format!("{}/rpc", http.url())))
            .await
            .unwrap();

        assert!(client.connect("s1").await.unwrap());
        assert!(client.get_server("s1").await.unwrap().is_connected);
    }

    #[tokio::test]
    async fn test_send_request_parses_result_and_error() {
        let mut http = mockito::Server::new_async().await;
        http.mock("POST", "/rpc")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":["search"]}}"#)
            .create_async()
            .await;

        let client = McpClient::new(McpConfig::default(), EventBus::default());
        client
            .add_server(server_info("s1", &format!("{}/rpc", http.url())))
            .await
            .unwrap();
        client.connect("s1").await.unwrap();

        let response = client
            .send_request(&McpRequest::new("tools/list", serde_json::json!({})))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(
            response.result.unwrap()["tools"][0],
            serde_json::json!("search")
        );

        http.reset();
        http.mock("POST", "/rpc")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found"}}"#)
            .create_async()
            .await;

        let response = client
            .send_request(&McpRequest::new("bogus", serde_json::json!({})))
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_first_connected_selection_follows_registration_order() {
        let mut http = mockito::Server::new_async().await;
        http.mock("POST", "/rpc")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let client = McpClient::new(McpConfig::default(), EventBus::default());
        client
            .add_server(server_info("first", &format!("{}/rpc", http.url())))
            .await
            .unwrap();
        client
            .add_server(server_info("second", &format!("{}/rpc", http.url())))
            .await
            .unwrap();
        client.connect("first").await.unwrap();
        client.connect("second").await.unwrap();

        let response = client
            .send_request(&McpRequest::new("ping", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.server_id.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_heartbeat_marks_unreachable_server_disconnected() {
        let mut http = mockito::Server::new_async().await;
        http.mock("POST", "/rpc")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .create_async()
            .await;

        let bus = EventBus::default();
        let mut stream = bus.subscribe(crate::events::Topic::ServerStatusChanged);
        let client = McpClient::new(McpConfig::default(), bus);
        let mut info = server_info("s1", &format!("{}/rpc", http.url()));
        info.keep_alive_interval_secs = 1;
        client.add_server(info).await.unwrap();
        client.connect("s1").await.unwrap();
        // Drain the connect event.
        while stream.try_recv().is_some() {}

        // Endpoint goes dark; drop the heartbeat record so the sweep sees
        // the connection as stale.
        http.reset();
        http.mock("POST", "/rpc").with_status(500).create_async().await;
        client.heartbeats.write().await.remove("s1");

        client.heartbeat_sweep().await;
        assert!(!client.get_server("s1").await.unwrap().is_connected);
        match stream.try_recv() {
            Some(SystemEvent::ServerStatusChanged { server_id, connected }) => {
                assert_eq!(server_id, "s1");
                assert!(!connected);
            }
            other => panic!("expected ServerStatusChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_server() {
        let client = McpClient::new(McpConfig::default(), EventBus::default());
        client
            .add_server(server_info("s1", "http://localhost:9/rpc"))
            .await
            .unwrap();
        client.remove_server("s1").await.unwrap();
        assert!(client.get_server("s1").await.is_none());
        assert!(matches!(
            client.remove_server("s1").await.unwrap_err(),
            AssistError::NotFound(_)
        ));
    }
}
