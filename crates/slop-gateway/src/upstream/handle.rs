use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use slop_core::{UpstreamConfig, UpstreamState};
use slop_mcp::UpstreamConnection;

/// Runtime state of one configured upstream (in-memory only)
pub struct UpstreamHandle {
    pub(crate) config: UpstreamConfig,
    pub(crate) inner: Mutex<HandleInner>,
    pub(crate) consecutive_timeouts: AtomicU32,
    pub(crate) recovering: AtomicBool,
    /// Bumped on every (re)connect and removal; background tasks for an
    /// older flow stop on their next wakeup
    pub(crate) flow_id: AtomicU64,
}

pub(crate) struct HandleInner {
    pub state: UpstreamState,
    pub connection: Option<UpstreamConnection>,
    pub last_error: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub server_name: Option<String>,
}

impl UpstreamHandle {
    pub(crate) fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HandleInner {
                state: UpstreamState::Starting,
                connection: None,
                last_error: None,
                connected_at: None,
                reconnect_attempts: 0,
                server_name: None,
            }),
            consecutive_timeouts: AtomicU32::new(0),
            recovering: AtomicBool::new(false),
            flow_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn state(&self) -> UpstreamState {
        self.inner.lock().state
    }

    pub fn connection(&self) -> Option<UpstreamConnection> {
        self.inner.lock().connection.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    pub(crate) fn flow(&self) -> u64 {
        self.flow_id.load(Ordering::Acquire)
    }

    pub(crate) fn next_flow(&self) -> u64 {
        self.flow_id.fetch_add(1, Ordering::AcqRel) + 1
    }
}
