//! Domain Events
//!
//! Lifecycle facts emitted by the upstream manager, registry and session
//! gateway. Consumers subscribe through the [`EventBus`](crate::EventBus).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UpstreamState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An upstream moved between lifecycle states
    UpstreamStateChanged {
        upstream: String,
        from: UpstreamState,
        to: UpstreamState,
        reason: Option<String>,
    },
    /// An upstream's catalog was (re)registered
    UpstreamCatalogChanged {
        upstream: String,
        generation: u64,
        tools: usize,
        prompts: usize,
        resources: usize,
    },
    /// An upstream was removed from the registry for good
    UpstreamEvicted { upstream: String },
    /// A request exceeded its deadline
    RequestTimedOut {
        upstream: String,
        method: String,
        timeout_ms: u64,
    },
    SessionOpened { session_id: Uuid },
    /// Client went away; `cancelled` pending requests were torn down
    SessionClosed { session_id: Uuid, cancelled: usize },
}

impl DomainEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UpstreamStateChanged { .. } => "upstream_state_changed",
            Self::UpstreamCatalogChanged { .. } => "upstream_catalog_changed",
            Self::UpstreamEvicted { .. } => "upstream_evicted",
            Self::RequestTimedOut { .. } => "request_timed_out",
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionClosed { .. } => "session_closed",
        }
    }

    /// Get the upstream name if this event is upstream-scoped
    pub fn upstream(&self) -> Option<&str> {
        match self {
            Self::UpstreamStateChanged { upstream, .. }
            | Self::UpstreamCatalogChanged { upstream, .. }
            | Self::UpstreamEvicted { upstream }
            | Self::RequestTimedOut { upstream, .. } => Some(upstream),
            Self::SessionOpened { .. } | Self::SessionClosed { .. } => None,
        }
    }
}
