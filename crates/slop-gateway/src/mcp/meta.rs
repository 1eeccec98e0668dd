//! Gateway-owned tools
//!
//! - `search_tools`: ranked search over every available upstream's tools
//! - `execute_tool`: call a tool on a named upstream, skipping collision
//!   resolution
//! - `get_metadata`: per-upstream state and catalog
//! - `manage_mcps`: register, unregister, reconnect and check upstreams at
//!   runtime

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use slop_core::{
    CapabilityKind, ConfigSource, HealthCheckResult, HealthStatus, OrchestratorError,
    OrchestratorResult, UpstreamConfig, UpstreamState, UpstreamStatus,
};
use tracing::info;

use crate::registry::ToolHit;
use crate::session::{Session, SessionGateway};

pub const SEARCH_TOOLS: &str = "search_tools";
pub const EXECUTE_TOOL: &str = "execute_tool";
pub const GET_METADATA: &str = "get_metadata";
pub const MANAGE_MCPS: &str = "manage_mcps";

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

pub fn is_meta_tool(name: &str) -> bool {
    matches!(name, SEARCH_TOOLS | EXECUTE_TOOL | GET_METADATA | MANAGE_MCPS)
}

/// Tool definitions in `tools/list` shape
pub fn definitions() -> Vec<Value> {
    vec![
        json!({
            "name": SEARCH_TOOLS,
            "description": "Search tools across all connected MCP servers by name or description. \
                            Returns matching tools with the server that provides them.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query for tool names and descriptions"},
                    "mcp_name": {"type": "string", "description": "Filter to a specific MCP server"},
                    "limit": {"type": "integer", "description": "Maximum number of results (default 20, max 100)"},
                    "offset": {"type": "integer", "description": "Number of results to skip (default 0)"}
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": EXECUTE_TOOL,
            "description": "Execute a tool on a specific MCP server.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "mcp_name": {"type": "string", "description": "Target MCP server name"},
                    "tool_name": {"type": "string", "description": "Tool to execute on the MCP server"},
                    "parameters": {
                        "type": "object",
                        "description": "Tool parameters to pass through",
                        "additionalProperties": true
                    }
                },
                "required": ["mcp_name", "tool_name"],
                "additionalProperties": false
            }
        }),
        json!({
            "name": GET_METADATA,
            "description": "Get state, tools, prompts and resources of connected MCP servers. \
                            Input schemas are included with verbose=true or when both mcp_name \
                            and tool_name are given.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "mcp_name": {"type": "string", "description": "Filter to a specific MCP server"},
                    "tool_name": {"type": "string", "description": "Filter to a specific tool by name"},
                    "verbose": {"type": "boolean", "description": "Include full input schemas"}
                },
                "additionalProperties": false
            }
        }),
        json!({
            "name": MANAGE_MCPS,
            "description": "Register, unregister, reconnect, list or health-check MCP servers at runtime. \
                            Runtime registrations live in memory only.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": MANAGE_ACTIONS,
                        "description": "Action to perform"
                    },
                    "name": {"type": "string", "description": "MCP server name (required for register, unregister and reconnect)"},
                    "type": {"type": "string", "enum": ["command", "tcp"], "description": "Transport: command (default) or tcp"},
                    "command": {"type": "string", "description": "Executable for the command transport"},
                    "args": {"type": "array", "items": {"type": "string"}, "description": "Command arguments"},
                    "env": {"type": "object", "additionalProperties": {"type": "string"}, "description": "Environment variables"},
                    "url": {"type": "string", "description": "tcp://host:port for the tcp transport"}
                },
                "required": ["action"],
                "additionalProperties": false
            }
        }),
    ]
}

const MANAGE_ACTIONS: [&str; 6] = ["register", "unregister", "reconnect", "list", "status", "health_check"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchToolsArgs {
    query: String,
    mcp_name: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchToolsOutput {
    pub tools: Vec<ToolHit>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ExecuteToolArgs {
    mcp_name: String,
    tool_name: String,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GetMetadataArgs {
    mcp_name: Option<String>,
    tool_name: Option<String>,
    verbose: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManageMcpsArgs {
    action: String,
    name: String,
    #[serde(rename = "type")]
    transport: Option<String>,
    command: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    url: Option<String>,
}

impl ManageMcpsArgs {
    fn require_name(&self) -> OrchestratorResult<&str> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "name is required for {} action",
                self.action
            )));
        }
        Ok(&self.name)
    }

    /// Definition for a runtime registration
    fn upstream_config(&self) -> OrchestratorResult<UpstreamConfig> {
        let name = self.require_name()?;
        let config = match self.transport.as_deref().unwrap_or("command") {
            "command" | "stdio" => {
                let mut config = UpstreamConfig::stdio(
                    name,
                    self.command.clone().unwrap_or_default(),
                    self.args.clone(),
                );
                config.env = self.env.clone();
                config
            }
            "tcp" => UpstreamConfig::tcp(name, self.url.clone().unwrap_or_default()),
            other => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "unsupported transport type: {other} (must be command or tcp)"
                )))
            }
        }
        .with_source(ConfigSource::Runtime);
        config
            .validate()
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ManageMcpsOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcps: Option<Vec<McpSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<UpstreamStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_checks: Option<Vec<HealthCheckResult>>,
}

impl ManageMcpsOutput {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// One line of the `list` action
#[derive(Debug, Serialize)]
pub struct McpSummary {
    pub name: String,
    pub state: UpstreamState,
    pub source: String,
    pub tool_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct UpstreamMetadata {
    pub name: String,
    pub state: UpstreamState,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    pub tools: Vec<ToolMetadata>,
    pub prompts: Vec<Value>,
    pub resources: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetMetadataOutput {
    pub metadata: Vec<UpstreamMetadata>,
    pub total: usize,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Option<Value>) -> OrchestratorResult<T> {
    let arguments = arguments.unwrap_or_else(|| json!({}));
    serde_json::from_value(arguments)
        .map_err(|e| OrchestratorError::InvalidRequest(format!("invalid arguments for {tool}: {e}")))
}

/// `tools/call` result carrying `output` as text and structured content
pub fn tool_result<T: Serialize>(output: &T) -> OrchestratorResult<Value> {
    let structured = serde_json::to_value(output)
        .map_err(|e| OrchestratorError::Internal(format!("failed to encode result: {e}")))?;
    let text = serde_json::to_string_pretty(&structured)
        .map_err(|e| OrchestratorError::Internal(format!("failed to encode result: {e}")))?;
    Ok(json!({
        "content": [{"type": "text", "text": text}],
        "structuredContent": structured,
        "isError": false
    }))
}

pub(crate) async fn call(
    gateway: &SessionGateway,
    session: &Session,
    request_id: String,
    name: &str,
    arguments: Option<Value>,
) -> OrchestratorResult<Value> {
    match name {
        SEARCH_TOOLS => {
            let args: SearchToolsArgs = parse_args(name, arguments)?;
            tool_result(&search(gateway, args))
        }
        EXECUTE_TOOL => {
            let args: ExecuteToolArgs = parse_args(name, arguments)?;
            if args.mcp_name.is_empty() {
                return Err(OrchestratorError::InvalidRequest("mcp_name is required".into()));
            }
            if args.tool_name.is_empty() {
                return Err(OrchestratorError::InvalidRequest("tool_name is required".into()));
            }
            gateway
                .invoke_on(
                    session,
                    request_id,
                    &args.mcp_name,
                    CapabilityKind::Tool,
                    &args.tool_name,
                    args.parameters,
                )
                .await
        }
        GET_METADATA => {
            let args: GetMetadataArgs = parse_args(name, arguments)?;
            tool_result(&metadata(gateway, args))
        }
        MANAGE_MCPS => {
            let args: ManageMcpsArgs = parse_args(name, arguments)?;
            tool_result(&manage(gateway, args).await?)
        }
        other => Err(OrchestratorError::unknown(CapabilityKind::Tool, other)),
    }
}

fn search(gateway: &SessionGateway, args: SearchToolsArgs) -> SearchToolsOutput {
    let filter = args.mcp_name.as_deref().filter(|m| !m.is_empty());
    let hits = gateway.registry().search_tools(&args.query, filter);
    let total = hits.len();

    let limit = match args.limit {
        Some(l) if l > 0 => (l as usize).min(MAX_SEARCH_LIMIT),
        _ => DEFAULT_SEARCH_LIMIT,
    };
    let offset = args.offset.unwrap_or(0).max(0) as usize;

    let tools: Vec<ToolHit> = hits.into_iter().skip(offset).take(limit).collect();
    let has_more = offset + tools.len() < total;
    SearchToolsOutput {
        tools,
        total,
        limit,
        offset,
        has_more,
    }
}

async fn manage(gateway: &SessionGateway, args: ManageMcpsArgs) -> OrchestratorResult<ManageMcpsOutput> {
    let upstreams = gateway.upstreams();
    match args.action.as_str() {
        "register" => {
            let config = args.upstream_config()?;
            let name = config.name.clone();
            info!(upstream = %name, target = %config.target(), "[Meta] Registering upstream");
            upstreams.add_upstream(config).await?;
            Ok(ManageMcpsOutput::message(format!("Successfully registered MCP: {name}")))
        }
        "unregister" => {
            let name = args.require_name()?;
            if !upstreams.remove_upstream(name).await {
                return Err(OrchestratorError::InvalidRequest(format!("MCP not found: {name}")));
            }
            Ok(ManageMcpsOutput::message(format!("Unregistered MCP: {name}")))
        }
        "reconnect" => {
            let name = args.require_name()?;
            upstreams.reconnect(name).await?;
            Ok(ManageMcpsOutput::message(format!("Successfully reconnected MCP: {name}")))
        }
        "list" => {
            let mcps = upstreams
                .statuses()
                .into_iter()
                .map(|s| McpSummary {
                    name: s.name,
                    state: s.state,
                    source: s.source,
                    tool_count: s.tools,
                })
                .collect();
            Ok(ManageMcpsOutput {
                mcps: Some(mcps),
                ..Default::default()
            })
        }
        "status" => Ok(ManageMcpsOutput {
            status: Some(upstreams.statuses()),
            ..Default::default()
        }),
        "health_check" => {
            let target = Some(args.name.as_str()).filter(|n| !n.is_empty());
            let results = upstreams.health_check(target).await;
            let message = match (target, results.first()) {
                (Some(name), Some(result)) => {
                    format!("Health check for {name}: {}", health_label(result.status))
                }
                (Some(name), None) => format!("MCP {name} is not registered"),
                (None, _) => {
                    let healthy = results
                        .iter()
                        .filter(|r| r.status == HealthStatus::Healthy)
                        .count();
                    format!("Health check complete: {healthy}/{} MCPs healthy", results.len())
                }
            };
            Ok(ManageMcpsOutput {
                message: Some(message),
                health_checks: Some(results),
                ..Default::default()
            })
        }
        other => Err(OrchestratorError::InvalidRequest(format!(
            "invalid action: {other} (must be {})",
            MANAGE_ACTIONS.join(", ")
        ))),
    }
}

fn health_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Disconnected => "disconnected",
    }
}

fn metadata(gateway: &SessionGateway, args: GetMetadataArgs) -> GetMetadataOutput {
    let mcp_name = args.mcp_name.filter(|m| !m.is_empty());
    let tool_name = args.tool_name.filter(|t| !t.is_empty());
    let include_schemas = args.verbose || (mcp_name.is_some() && tool_name.is_some());

    let mut metadata = Vec::new();
    for status in gateway.upstreams().statuses() {
        if mcp_name.as_deref().is_some_and(|m| m != status.name) {
            continue;
        }
        let catalog = gateway.registry().catalog(&status.name).unwrap_or_default();

        let tools: Vec<ToolMetadata> = catalog
            .tools
            .iter()
            .filter(|t| tool_name.as_deref().map_or(true, |n| n == t.name))
            .map(|t| ToolMetadata {
                name: t.name.clone(),
                description: t.description.clone().unwrap_or_default(),
                input_schema: include_schemas.then(|| t.input_schema().cloned()).flatten(),
            })
            .collect();

        // A tool filter keeps only upstreams with a match, and only the tools
        if tool_name.is_some() && tools.is_empty() {
            continue;
        }
        let (prompts, resources) = if tool_name.is_some() {
            (Vec::new(), Vec::new())
        } else {
            (
                catalog.prompts.iter().map(|p| p.raw.clone()).collect(),
                catalog.resources.iter().map(|r| r.raw.clone()).collect(),
            )
        };

        metadata.push(UpstreamMetadata {
            name: status.name,
            state: status.state,
            source: status.source,
            server_name: status.server_name,
            tools,
            prompts,
            resources,
            last_error: status.last_error,
        });
    }

    let total = metadata.len();
    GetMetadataOutput { metadata, total }
}
