//! Configuration
//!
//! Claude-Desktop compatible JSON (`mcpServers`) plus a `gateway` section.
//! Sources are layered user → project → explicit files; later layers win per
//! upstream name, and gateway settings are merged field by field.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "fs": { "command": "npx", "args": ["-y", "@mcp/fs"], "timeout": "30s" },
//!     "remote": { "type": "tcp", "url": "tcp://127.0.0.1:7000" }
//!   },
//!   "gateway": { "collision_policy": "first_wins", "timeouts": { "tool_call": "2m" } }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::branding;

/// Connect timeout when neither the upstream nor the environment sets one
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for every request class
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("upstream '{name}': {reason}")]
    InvalidUpstream { name: String, reason: String },

    #[error("invalid duration '{value}' for {field}: {reason}")]
    InvalidDuration {
        field: String,
        value: String,
        reason: String,
    },

    #[error("invalid gateway setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
}

/// Where an upstream definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    User,
    Project,
    #[default]
    Explicit,
    /// Added while running (`UpstreamManager::add_upstream`)
    Runtime,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Explicit => "explicit",
            Self::Runtime => "runtime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON-RPC on stdio
    #[default]
    Stdio,
    /// `tcp://host:port` socket, same framing
    Tcp,
}

/// How duplicate `(kind, name)` pairs across upstreams are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The upstream registered first owns the name; later ones are fallbacks
    #[default]
    FirstWins,
    /// Tools and prompts are exposed as `<upstream><sep><name>`
    Prefix,
    /// Later conflicting entries are dropped and reported
    Reject,
}

impl CollisionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstWins => "first_wins",
            Self::Prefix => "prefix",
            Self::Reject => "reject",
        }
    }
}

/// Request classes with independently configurable timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    ToolCall,
    PromptGet,
    ResourceRead,
    /// `*/list` catalog fetches
    List,
    Ping,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::PromptGet => "prompt_get",
            Self::ResourceRead => "resource_read",
            Self::List => "list",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestTimeouts {
    pub tool_call: Duration,
    pub prompt_get: Duration,
    pub resource_read: Duration,
    pub list: Duration,
    pub ping: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            tool_call: DEFAULT_REQUEST_TIMEOUT,
            prompt_get: DEFAULT_REQUEST_TIMEOUT,
            resource_read: DEFAULT_REQUEST_TIMEOUT,
            list: DEFAULT_REQUEST_TIMEOUT,
            ping: Duration::from_secs(5),
        }
    }
}

impl RequestTimeouts {
    pub fn get(&self, class: RequestClass) -> Duration {
        match class {
            RequestClass::ToolCall => self.tool_call,
            RequestClass::PromptGet => self.prompt_get,
            RequestClass::ResourceRead => self.resource_read,
            RequestClass::List => self.list,
            RequestClass::Ping => self.ping,
        }
    }

    /// Same timeout for every class
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            tool_call: timeout,
            prompt_get: timeout,
            resource_read: timeout,
            list: timeout,
            ping: timeout,
        }
    }
}

/// Validated definition of one upstream
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub name: String,
    pub transport: TransportKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub url: Option<String>,
    /// Connect + handshake timeout
    pub connect_timeout: Option<Duration>,
    /// Overrides every per-class request timeout for this upstream
    pub request_timeout: Option<Duration>,
    /// Reconnect attempts before the upstream is closed; 0 disables recovery
    pub max_retries: u32,
    pub max_in_flight: usize,
    pub health_check_interval: Option<Duration>,
    pub disabled: bool,
    pub source: ConfigSource,
}

impl UpstreamConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some(command.into()),
            args,
            env: BTreeMap::new(),
            url: None,
            connect_timeout: None,
            request_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            health_check_interval: None,
            disabled: false,
            source: ConfigSource::Explicit,
        }
    }

    pub fn tcp(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: TransportKind::Tcp,
            command: None,
            url: Some(url.into()),
            ..Self::stdio(name, "", Vec::new())
        }
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.source = source;
        self
    }

    /// Connect timeout: upstream setting, then `SLOP_MCP_TIMEOUT`, then 30s
    pub fn effective_connect_timeout(&self) -> Duration {
        resolve_connect_timeout(
            self.connect_timeout,
            std::env::var(branding::ENV_CONNECT_TIMEOUT).ok().as_deref(),
        )
    }

    /// Human readable launch target for logs and status output
    pub fn target(&self) -> String {
        match self.transport {
            TransportKind::Stdio => {
                let mut parts = vec![self.command.clone().unwrap_or_default()];
                parts.extend(self.args.iter().cloned());
                parts.join(" ")
            }
            TransportKind::Tcp => self.url.clone().unwrap_or_default(),
        }
    }

    /// Check the definition is launchable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUpstream {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.max_in_flight == 0 {
            return Err(invalid("max_in_flight must be at least 1"));
        }
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(invalid("stdio upstream requires a command"));
                }
            }
            TransportKind::Tcp => {
                let raw = self.url.as_deref().ok_or_else(|| invalid("tcp upstream requires a url"))?;
                let parsed = url::Url::parse(raw).map_err(|e| invalid(&format!("invalid url: {e}")))?;
                if parsed.scheme() != "tcp" || parsed.host_str().is_none() || parsed.port().is_none() {
                    return Err(invalid("tcp url must look like tcp://host:port"));
                }
            }
        }
        Ok(())
    }
}

/// Pure precedence rule behind [`UpstreamConfig::effective_connect_timeout`]
pub fn resolve_connect_timeout(explicit: Option<Duration>, env_value: Option<&str>) -> Duration {
    if let Some(timeout) = explicit {
        return timeout;
    }
    if let Some(raw) = env_value {
        match parse_duration(raw) {
            Ok(timeout) => return timeout,
            Err(e) => debug!(value = raw, error = %e, "[Config] Ignoring invalid {}", branding::ENV_CONNECT_TIMEOUT),
        }
    }
    DEFAULT_CONNECT_TIMEOUT
}

/// Gateway-wide behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub collision_policy: CollisionPolicy,
    pub prefix_separator: String,
    pub timeouts: RequestTimeouts,
    /// Extra attempts on fallback upstreams after a transient failure
    pub retry_budget: u32,
    pub overload_retry_after: Duration,
    pub max_sessions: Option<usize>,
    pub cleanup_interval: Duration,
    /// Consecutive timeouts before an upstream is marked degraded
    pub degrade_after_timeouts: u32,
    pub close_grace: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub meta_tools: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::FirstWins,
            prefix_separator: ".".to_string(),
            timeouts: RequestTimeouts::default(),
            retry_budget: 1,
            overload_retry_after: Duration::from_secs(1),
            max_sessions: None,
            cleanup_interval: Duration::from_secs(1),
            degrade_after_timeouts: 3,
            close_grace: Duration::from_secs(5),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            meta_tools: true,
        }
    }
}

impl GatewaySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidSetting {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.collision_policy == CollisionPolicy::Prefix && self.prefix_separator.is_empty() {
            return Err(invalid("prefix_separator", "must not be empty with the prefix policy"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(invalid("cleanup_interval", "must be greater than zero"));
        }
        if self.max_sessions == Some(0) {
            return Err(invalid("max_sessions", "must be at least 1"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(invalid("initial_backoff", "must not exceed max_backoff"));
        }
        Ok(())
    }
}

/// Fully merged and validated configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlopConfig {
    pub upstreams: BTreeMap<String, UpstreamConfig>,
    pub gateway: GatewaySettings,
}

impl SlopConfig {
    /// Parse a single JSON document
    pub fn from_json_str(json: &str, source: ConfigSource) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        Self::merge(vec![(file, source)])
    }

    /// Load user config, project config and explicit files, in that precedence order
    ///
    /// Missing user/project files are skipped; a missing explicit file is an error.
    pub fn load(project_dir: Option<&Path>, explicit: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();

        if let Some(path) = branding::user_config_path() {
            if let Some(file) = ConfigFile::read_optional(&path)? {
                debug!(path = %path.display(), "[Config] Loaded user config");
                layers.push((file, ConfigSource::User));
            }
        }

        if let Some(dir) = project_dir {
            let path = branding::project_config_path(dir);
            if let Some(file) = ConfigFile::read_optional(&path)? {
                debug!(path = %path.display(), "[Config] Loaded project config");
                layers.push((file, ConfigSource::Project));
            }
        }

        for path in explicit {
            layers.push((ConfigFile::read(path)?, ConfigSource::Explicit));
        }

        Self::merge(layers)
    }

    /// Merge layers; later layers replace earlier upstreams with the same name
    pub fn merge(layers: Vec<(ConfigFile, ConfigSource)>) -> Result<Self, ConfigError> {
        let mut servers: BTreeMap<String, (UpstreamEntry, ConfigSource)> = BTreeMap::new();
        let mut gateway = GatewayEntry::default();

        for (file, source) in layers {
            for (name, entry) in file.servers {
                servers.insert(name, (entry, source));
            }
            gateway = gateway.overlay(file.gateway);
        }

        let mut upstreams = BTreeMap::new();
        for (name, (entry, source)) in servers {
            let upstream = entry.into_config(&name, source)?;
            upstream.validate()?;
            upstreams.insert(name, upstream);
        }

        let gateway = gateway.into_settings()?;
        gateway.validate()?;

        Ok(Self { upstreams, gateway })
    }

    /// Upstreams that should be connected at startup
    pub fn enabled_upstreams(&self) -> impl Iterator<Item = &UpstreamConfig> {
        self.upstreams.values().filter(|u| !u.disabled)
    }

    /// Back to the file representation (durations rendered as `30s`)
    pub fn to_file(&self) -> ConfigFile {
        ConfigFile {
            servers: self
                .upstreams
                .iter()
                .map(|(name, u)| (name.clone(), UpstreamEntry::from_config(u)))
                .collect(),
            gateway: GatewayEntry::from_settings(&self.gateway),
        }
    }
}

// ============================================================================
// FILE FORMAT
// ============================================================================

/// On-disk representation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, UpstreamEntry>,
    #[serde(default)]
    pub gateway: GatewayEntry,
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_optional(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::read(path).map(Some)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamEntry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl UpstreamEntry {
    fn into_config(self, name: &str, source: ConfigSource) -> Result<UpstreamConfig, ConfigError> {
        let field = |f: &str| format!("mcpServers.{name}.{f}");

        // No explicit type: a url means tcp, otherwise stdio
        let transport = match self.transport.as_deref() {
            None | Some("") => {
                if self.command.is_none() && self.url.is_some() {
                    TransportKind::Tcp
                } else {
                    TransportKind::Stdio
                }
            }
            Some("stdio") => TransportKind::Stdio,
            Some("tcp") => TransportKind::Tcp,
            Some(other) => {
                return Err(ConfigError::InvalidUpstream {
                    name: name.to_string(),
                    reason: format!("unsupported transport type '{other}' (expected stdio or tcp)"),
                })
            }
        };

        Ok(UpstreamConfig {
            name: name.to_string(),
            transport,
            command: self.command,
            args: self.args,
            env: self.env,
            url: self.url,
            connect_timeout: parse_optional_duration(&field("timeout"), self.timeout)?,
            request_timeout: parse_optional_duration(&field("request_timeout"), self.request_timeout)?,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            max_in_flight: self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            health_check_interval: parse_optional_duration(
                &field("health_check_interval"),
                self.health_check_interval,
            )?
            .filter(|d| !d.is_zero()),
            disabled: self.disabled,
            source,
        })
    }

    fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            transport: Some(
                match config.transport {
                    TransportKind::Stdio => "stdio",
                    TransportKind::Tcp => "tcp",
                }
                .to_string(),
            ),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            url: config.url.clone(),
            timeout: config.connect_timeout.map(format_duration),
            request_timeout: config.request_timeout.map(format_duration),
            max_retries: Some(config.max_retries),
            max_in_flight: Some(config.max_in_flight),
            health_check_interval: config.health_check_interval.map(format_duration),
            disabled: config.disabled,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutsEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_get: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<String>,
}

/// Gateway section; every field optional so layers can be merged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_policy: Option<CollisionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_separator: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutsEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_budget: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overload_retry_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degrade_after_timeouts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_grace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_backoff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_tools: Option<bool>,
}

impl GatewayEntry {
    /// Fields set in `top` win over `self`
    fn overlay(self, top: GatewayEntry) -> GatewayEntry {
        GatewayEntry {
            collision_policy: top.collision_policy.or(self.collision_policy),
            prefix_separator: top.prefix_separator.or(self.prefix_separator),
            timeouts: TimeoutsEntry {
                tool_call: top.timeouts.tool_call.or(self.timeouts.tool_call),
                prompt_get: top.timeouts.prompt_get.or(self.timeouts.prompt_get),
                resource_read: top.timeouts.resource_read.or(self.timeouts.resource_read),
                list: top.timeouts.list.or(self.timeouts.list),
                ping: top.timeouts.ping.or(self.timeouts.ping),
            },
            retry_budget: top.retry_budget.or(self.retry_budget),
            overload_retry_after: top.overload_retry_after.or(self.overload_retry_after),
            max_sessions: top.max_sessions.or(self.max_sessions),
            cleanup_interval: top.cleanup_interval.or(self.cleanup_interval),
            degrade_after_timeouts: top.degrade_after_timeouts.or(self.degrade_after_timeouts),
            close_grace: top.close_grace.or(self.close_grace),
            initial_backoff: top.initial_backoff.or(self.initial_backoff),
            max_backoff: top.max_backoff.or(self.max_backoff),
            meta_tools: top.meta_tools.or(self.meta_tools),
        }
    }

    fn into_settings(self) -> Result<GatewaySettings, ConfigError> {
        let d = GatewaySettings::default();
        let dur = |field: &str, value: Option<String>, default: Duration| {
            parse_optional_duration(&format!("gateway.{field}"), value).map(|v| v.unwrap_or(default))
        };

        Ok(GatewaySettings {
            collision_policy: self.collision_policy.unwrap_or(d.collision_policy),
            prefix_separator: self.prefix_separator.unwrap_or(d.prefix_separator),
            timeouts: RequestTimeouts {
                tool_call: dur("timeouts.tool_call", self.timeouts.tool_call, d.timeouts.tool_call)?,
                prompt_get: dur("timeouts.prompt_get", self.timeouts.prompt_get, d.timeouts.prompt_get)?,
                resource_read: dur(
                    "timeouts.resource_read",
                    self.timeouts.resource_read,
                    d.timeouts.resource_read,
                )?,
                list: dur("timeouts.list", self.timeouts.list, d.timeouts.list)?,
                ping: dur("timeouts.ping", self.timeouts.ping, d.timeouts.ping)?,
            },
            retry_budget: self.retry_budget.unwrap_or(d.retry_budget),
            overload_retry_after: dur(
                "overload_retry_after",
                self.overload_retry_after,
                d.overload_retry_after,
            )?,
            max_sessions: self.max_sessions,
            cleanup_interval: dur("cleanup_interval", self.cleanup_interval, d.cleanup_interval)?,
            degrade_after_timeouts: self.degrade_after_timeouts.unwrap_or(d.degrade_after_timeouts),
            close_grace: dur("close_grace", self.close_grace, d.close_grace)?,
            initial_backoff: dur("initial_backoff", self.initial_backoff, d.initial_backoff)?,
            max_backoff: dur("max_backoff", self.max_backoff, d.max_backoff)?,
            meta_tools: self.meta_tools.unwrap_or(d.meta_tools),
        })
    }

    fn from_settings(s: &GatewaySettings) -> Self {
        Self {
            collision_policy: Some(s.collision_policy),
            prefix_separator: Some(s.prefix_separator.clone()),
            timeouts: TimeoutsEntry {
                tool_call: Some(format_duration(s.timeouts.tool_call)),
                prompt_get: Some(format_duration(s.timeouts.prompt_get)),
                resource_read: Some(format_duration(s.timeouts.resource_read)),
                list: Some(format_duration(s.timeouts.list)),
                ping: Some(format_duration(s.timeouts.ping)),
            },
            retry_budget: Some(s.retry_budget),
            overload_retry_after: Some(format_duration(s.overload_retry_after)),
            max_sessions: s.max_sessions,
            cleanup_interval: Some(format_duration(s.cleanup_interval)),
            degrade_after_timeouts: Some(s.degrade_after_timeouts),
            close_grace: Some(format_duration(s.close_grace)),
            initial_backoff: Some(format_duration(s.initial_backoff)),
            max_backoff: Some(format_duration(s.max_backoff)),
            meta_tools: Some(s.meta_tools),
        }
    }
}

/// Parse `"30s"`, `"1m"`, `"1h 30m"`; a bare `"0"` means zero
pub fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    let trimmed = value.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed)
}

fn parse_optional_duration(field: &str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidDuration {
                field: field.to_string(),
                value: raw,
                reason: e.to_string(),
            }),
    }
}

fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}
