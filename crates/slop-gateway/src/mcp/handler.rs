//! slop-mcp Gateway MCP Handler
//!
//! Implements the MCP ServerHandler trait on top of the [`SessionGateway`].
//! One handler instance serves one client session; dropping it closes the
//! session and cancels whatever the client still had in flight.

use std::sync::{Arc, OnceLock};

use rmcp::{
    model::*,
    service::{NotificationContext, Peer, RequestContext},
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use slop_core::{branding, CapabilityKind, OrchestratorError};
use tracing::{debug, info, warn};

use crate::registry::CapabilityRegistry;
use crate::session::{Session, SessionGateway};

/// Closes the session when the last handler clone goes away
struct SessionSlot {
    gateway: Arc<SessionGateway>,
    session: OnceLock<Arc<Session>>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if let Some(session) = self.session.get() {
            self.gateway.close(session.id);
        }
    }
}

#[derive(Clone)]
pub struct SlopGatewayHandler {
    gateway: Arc<SessionGateway>,
    slot: Arc<SessionSlot>,
}

/// Client-facing JSON-RPC error for an orchestrator failure
pub fn to_mcp_error(err: OrchestratorError) -> McpError {
    McpError::new(ErrorCode(err.code() as i32), err.to_string(), err.data())
}

/// Stable pending-table key for a client request id (`1` and `"1"` differ)
pub fn request_key(id: &RequestId) -> String {
    serde_json::to_string(id).unwrap_or_else(|_| format!("{id:?}"))
}

fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, McpError> {
    serde_json::from_value(value)
        .map_err(|e| McpError::internal_error(format!("Malformed {what} from upstream: {e}"), None))
}

impl SlopGatewayHandler {
    pub fn new(gateway: Arc<SessionGateway>) -> Self {
        Self {
            slot: Arc::new(SessionSlot {
                gateway: gateway.clone(),
                session: OnceLock::new(),
            }),
            gateway,
        }
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.slot.session.get()
    }

    fn require_session(&self) -> Result<&Arc<Session>, McpError> {
        self.session()
            .ok_or_else(|| McpError::invalid_request("Session not initialized", None))
    }

    /// Invoke under the session, abandoning the request if the client cancels
    async fn invoke(
        &self,
        context: &RequestContext<RoleServer>,
        kind: CapabilityKind,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, McpError> {
        let session = self.require_session()?;
        let request_id = request_key(&context.id);

        tokio::select! {
            _ = context.ct.cancelled() => {
                self.gateway.cancel(session, &request_id);
                debug!(session = %session.id, request_id = %request_id, "[Handler] Client cancelled request");
                Err(to_mcp_error(OrchestratorError::Cancelled))
            }
            result = self.gateway.invoke(session, request_id.clone(), kind, name, arguments) => {
                result.map_err(|e| {
                    debug!(session = %session.id, kind = %kind, name, error = %e, "[Handler] Request failed");
                    to_mcp_error(e)
                })
            }
        }
    }

    fn listed<T: DeserializeOwned>(&self, kind: CapabilityKind) -> Vec<T> {
        self.gateway
            .list_capabilities(kind)
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "[Handler] Skipping malformed definition");
                    None
                }
            })
            .collect()
    }
}

/// Forward registry changes to one client as per-kind `list_changed`
fn spawn_list_changed_forwarder(
    registry: Arc<CapabilityRegistry>,
    session: Arc<Session>,
    peer: Peer<RoleServer>,
) {
    let mut generations = registry.subscribe();
    let token = session.token().clone();
    tokio::spawn(async move {
        let snapshot = registry.snapshot();
        let mut seen: Vec<u64> = CapabilityKind::ALL
            .iter()
            .map(|k| snapshot.kind_generation(*k))
            .collect();
        drop(snapshot);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = generations.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let snapshot = registry.snapshot();
            for (i, kind) in CapabilityKind::ALL.iter().enumerate() {
                let generation = snapshot.kind_generation(*kind);
                if generation == seen[i] {
                    continue;
                }
                seen[i] = generation;
                let sent = match kind {
                    CapabilityKind::Tool => peer.notify_tool_list_changed().await,
                    CapabilityKind::Prompt => peer.notify_prompt_list_changed().await,
                    CapabilityKind::Resource => peer.notify_resource_list_changed().await,
                };
                if let Err(e) = sent {
                    debug!(session = %session.id, error = %e, "[Handler] Peer gone, stopping list_changed forwarding");
                    return;
                }
                debug!(session = %session.id, kind = %kind, generation, "[Handler] Sent list_changed");
            }
        }
    });
}

impl ServerHandler for SlopGatewayHandler {
    fn get_info(&self) -> ServerInfo {
        use rmcp::model::{PromptsCapability, ResourcesCapability, ToolsCapability};

        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(true),
                })
                .enable_prompts_with(PromptsCapability {
                    list_changed: Some(true),
                })
                .enable_resources_with(ResourcesCapability {
                    subscribe: Some(false),
                    list_changed: Some(true),
                })
                .build(),
            server_info: Implementation {
                name: branding::APP_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "slop-mcp aggregates multiple MCP servers. Tools, prompts and resources of \
                 every connected server are listed here; use search_tools to find a tool and \
                 execute_tool to call it on a specific server."
                    .to_string(),
            ),
        }
    }

    async fn initialize(
        &self,
        params: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        if self.slot.session.get().is_none() {
            let session = self.gateway.initialize().map_err(to_mcp_error)?;
            if let Err(duplicate) = self.slot.session.set(session) {
                // Lost a race with a concurrent initialize on the same handler
                self.gateway.close(duplicate.id);
            }
        }
        debug!(
            client = %params.client_info.name,
            protocol_version = %params.protocol_version,
            "[Handler] Client initializing"
        );
        Ok(self.get_info())
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        let Some(session) = self.session().cloned() else {
            warn!("[Handler] initialized notification before initialize");
            return;
        };
        info!(session = %session.id, "[Handler] Client initialized");
        spawn_list_changed_forwarder(self.gateway.registry().clone(), session, context.peer);
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.require_session()?;
        let tools: Vec<Tool> = self.listed(CapabilityKind::Tool);
        debug!(count = tools.len(), "list_tools");
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!(tool = %params.name, "call_tool");
        let arguments = params.arguments.map(Value::Object);
        let result = self
            .invoke(&context, CapabilityKind::Tool, &params.name, arguments)
            .await?;
        decode("tool result", result)
    }

    async fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        self.require_session()?;
        let prompts: Vec<Prompt> = self.listed(CapabilityKind::Prompt);
        debug!(count = prompts.len(), "list_prompts");
        Ok(ListPromptsResult::with_all_items(prompts))
    }

    async fn get_prompt(
        &self,
        params: GetPromptRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        debug!(prompt = %params.name, "get_prompt");
        let arguments = params.arguments.map(Value::Object);
        let result = self
            .invoke(&context, CapabilityKind::Prompt, &params.name, arguments)
            .await?;
        decode("prompt", result)
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        self.require_session()?;
        let resources: Vec<Resource> = self.listed(CapabilityKind::Resource);
        debug!(count = resources.len(), "list_resources");
        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        debug!(uri = %params.uri, "read_resource");
        let result = self
            .invoke(&context, CapabilityKind::Resource, &params.uri, None)
            .await?;
        decode("resource contents", result)
    }
}
