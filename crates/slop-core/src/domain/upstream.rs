//! Upstream lifecycle state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream lifecycle state
///
/// ```text
/// Starting ──► Ready ◄──► Degraded
///    │           │            │
///    └───────────┴────────────┴──► Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    /// Launching and handshaking
    #[default]
    Starting,
    /// Handshake done, catalog registered, routable
    Ready,
    /// Transient failure, excluded from routing while recovery runs
    Degraded,
    /// Shut down or out of retries; evicted from the registry
    Closed,
}

impl UpstreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }

    /// Only ready upstreams receive traffic
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: UpstreamState) -> bool {
        use UpstreamState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Starting, Ready) | (Ready, Degraded) | (Degraded, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one upstream, for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamStatus {
    pub name: String,
    pub state: UpstreamState,
    pub source: String,
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

/// Outcome of one on-demand liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Not Ready, so nothing was sent
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub state: UpstreamState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
