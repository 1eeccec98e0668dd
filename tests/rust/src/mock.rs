//! In-process upstream MCP servers
//!
//! [`MockUpstream`] is a real rmcp `ServerHandler` served over
//! `tokio::io::duplex`, so the connection layer under test speaks actual MCP
//! to it. Behaviour is driven by tool name:
//!
//! - `echo`: returns `arguments.text`
//! - `whoami`: returns the upstream name
//! - `slow`: sleeps `arguments.ms` (default 1000), honouring cancellation
//! - `fail`: JSON-RPC error -32042 "boom"
//! - anything else listed: returns "<name> called"
//!
//! `stall(true)` makes every tool call hang until cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rmcp::{
    model::*,
    service::{NotificationContext, Peer, RequestContext},
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use serde_json::{json, Value};
use slop_core::UpstreamConfig;
use slop_mcp::{LaunchError, Launcher, UpstreamTransport};
use tokio_util::sync::CancellationToken;

pub const FAIL_CODE: i32 = -32042;

/// Shared, observable state of one mock upstream across reconnects
#[derive(Default)]
pub struct MockState {
    pub tools: RwLock<Vec<String>>,
    pub prompts: RwLock<Vec<String>>,
    pub resources: RwLock<Vec<String>>,
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub launches: AtomicUsize,
    pub stall: AtomicBool,
    pub fail_launch: AtomicBool,
    peers: Mutex<Vec<Peer<RoleServer>>>,
    kills: Mutex<Vec<CancellationToken>>,
}

#[derive(Clone)]
pub struct MockUpstream {
    pub name: String,
    pub state: Arc<MockState>,
}

fn tool_schema() -> Arc<JsonObject> {
    Arc::new(
        serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "ms": {"type": "integer"}
            }
        }))
        .unwrap(),
    )
}

fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

impl MockUpstream {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(MockState::default()),
        }
    }

    pub fn with_tools(self, tools: &[&str]) -> Self {
        *self.state.tools.write() = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_prompts(self, prompts: &[&str]) -> Self {
        *self.state.prompts.write() = prompts.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_resources(self, uris: &[&str]) -> Self {
        *self.state.resources.write() = uris.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn stall(&self, stall: bool) {
        self.state.stall.store(stall, Ordering::SeqCst);
    }

    pub fn fail_launches(&self, fail: bool) {
        self.state.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> usize {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Replace the tool list and tell connected clients
    pub async fn set_tools(&self, tools: &[&str]) {
        *self.state.tools.write() = tools.iter().map(|t| t.to_string()).collect();
        let peers: Vec<Peer<RoleServer>> = self.state.peers.lock().clone();
        for peer in peers {
            let _ = peer.notify_tool_list_changed().await;
        }
    }

    /// Drop every live connection to this upstream
    pub fn disconnect(&self) {
        self.state.peers.lock().clear();
        for kill in self.state.kills.lock().drain(..) {
            kill.cancel();
        }
    }

    /// Start a server task and hand back the client end
    pub fn serve_duplex(&self) -> UpstreamTransport {
        let (ours, theirs) = tokio::io::duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(theirs);
        let kill = CancellationToken::new();
        self.state.kills.lock().push(kill.clone());

        let handler = self.clone();
        tokio::spawn(async move {
            let running = match handler.serve((server_read, server_write)).await {
                Ok(running) => running,
                Err(_) => return,
            };
            tokio::select! {
                _ = running.waiting() => {}
                _ = kill.cancelled() => {}
            }
        });

        let (read, write) = tokio::io::split(ours);
        UpstreamTransport::new(read, write, format!("duplex:{}", self.name))
    }

    async fn wait_or_cancel(&self, duration: Duration, ct: &CancellationToken) -> Result<(), McpError> {
        tokio::select! {
            _ = ct.cancelled() => {
                self.state.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(McpError::new(ErrorCode(-32800), "cancelled", None))
            }
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

impl ServerHandler for MockUpstream {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(true),
                })
                .enable_prompts()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: format!("mock-{}", self.name),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            instructions: None,
        }
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        self.state.peers.lock().push(context.peer);
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self
            .state
            .tools
            .read()
            .iter()
            .map(|name| Tool::new(name.clone(), format!("{} from {}", name, self.name), tool_schema()))
            .collect();
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.state.started.fetch_add(1, Ordering::SeqCst);
        let arguments = params.arguments.unwrap_or_default();

        if self.state.stall.load(Ordering::SeqCst) {
            self.wait_or_cancel(Duration::from_secs(3600), &context.ct).await?;
        }

        let result = match params.name.as_ref() {
            "echo" => text_result(
                arguments
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            ),
            "whoami" => text_result(self.name.clone()),
            "slow" => {
                let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(1000);
                self.wait_or_cancel(Duration::from_millis(ms), &context.ct).await?;
                text_result(format!("slept {ms}ms"))
            }
            "fail" => return Err(McpError::new(ErrorCode(FAIL_CODE), "boom", None)),
            other if self.state.tools.read().iter().any(|t| t == other) => {
                text_result(format!("{other} called"))
            }
            other => {
                return Err(McpError::invalid_params(format!("no tool {other}"), None));
            }
        };
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        let prompts = self
            .state
            .prompts
            .read()
            .iter()
            .map(|name| {
                serde_json::from_value(json!({
                    "name": name,
                    "description": format!("{} prompt", name),
                    "arguments": [{"name": "topic", "required": false}]
                }))
                .unwrap()
            })
            .collect();
        Ok(ListPromptsResult::with_all_items(prompts))
    }

    async fn get_prompt(
        &self,
        params: GetPromptRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        let topic = params
            .arguments
            .as_ref()
            .and_then(|a| a.get("topic"))
            .and_then(Value::as_str)
            .unwrap_or("nothing")
            .to_string();
        Ok(serde_json::from_value(json!({
            "description": format!("{} from {}", params.name, self.name),
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": format!("talk about {topic}")}
            }]
        }))
        .unwrap())
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources = self
            .state
            .resources
            .read()
            .iter()
            .map(|uri| {
                serde_json::from_value(json!({
                    "uri": uri,
                    "name": uri,
                    "mimeType": "text/plain"
                }))
                .unwrap()
            })
            .collect();
        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        Ok(serde_json::from_value(json!({
            "contents": [{
                "uri": params.uri,
                "mimeType": "text/plain",
                "text": format!("contents of {} from {}", params.uri, self.name)
            }]
        }))
        .unwrap())
    }
}

/// Launcher that serves registered mocks over in-memory pipes
#[derive(Clone, Default)]
pub struct DuplexLauncher {
    mocks: Arc<Mutex<HashMap<String, MockUpstream>>>,
}

impl DuplexLauncher {
    pub fn new(mocks: &[MockUpstream]) -> Self {
        let launcher = Self::default();
        for mock in mocks {
            launcher.add(mock.clone());
        }
        launcher
    }

    pub fn add(&self, mock: MockUpstream) {
        self.mocks.lock().insert(mock.name.clone(), mock);
    }
}

#[async_trait]
impl Launcher for DuplexLauncher {
    async fn launch(&self, config: &UpstreamConfig) -> Result<UpstreamTransport, LaunchError> {
        let mock = self.mocks.lock().get(&config.name).cloned();
        let Some(mock) = mock else {
            return Err(LaunchError::Unsupported {
                name: config.name.clone(),
                reason: "no mock registered".to_string(),
            });
        };
        mock.state.launches.fetch_add(1, Ordering::SeqCst);
        if mock.state.fail_launch.load(Ordering::SeqCst) {
            return Err(LaunchError::Connect {
                addr: format!("duplex:{}", config.name),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "launch disabled"),
            });
        }
        Ok(mock.serve_duplex())
    }
}
