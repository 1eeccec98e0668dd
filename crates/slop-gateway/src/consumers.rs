//! Event journal - the log-side consumer of domain events
//!
//! Subscribes to the event bus, writes each lifecycle fact to the log at a
//! level matching its severity and keeps the most recent ones in memory for
//! status reporting. Client-facing `list_changed` delivery does not go
//! through here; sessions watch registry generations directly.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use slop_core::{DomainEvent, EventReceiver, UpstreamState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_JOURNAL_CAPACITY: usize = 128;

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

pub struct EventJournal {
    capacity: usize,
    entries: Mutex<VecDeque<JournalEntry>>,
}

impl EventJournal {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Consume `events` until the bus closes or `shutdown` fires
    pub fn spawn(self: &Arc<Self>, mut events: EventReceiver, shutdown: CancellationToken) -> JoinHandle<()> {
        let journal = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    break;
                };
                journal.record(event);
            }
            debug!("[Events] Journal stopped");
        })
    }

    pub fn record(&self, event: DomainEvent) {
        log_event(&event);
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(JournalEntry { at: Utc::now(), event });
    }

    /// Up to `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::UpstreamStateChanged {
            upstream,
            from,
            to,
            reason,
        } => {
            let reason = reason.as_deref().unwrap_or("");
            if matches!(to, UpstreamState::Degraded | UpstreamState::Closed) {
                warn!(upstream = %upstream, %from, %to, reason, "[Events] Upstream state changed");
            } else {
                info!(upstream = %upstream, %from, %to, reason, "[Events] Upstream state changed");
            }
        }
        DomainEvent::UpstreamCatalogChanged {
            upstream,
            generation,
            tools,
            prompts,
            resources,
        } => info!(
            upstream = %upstream,
            generation,
            tools,
            prompts,
            resources,
            "[Events] Catalog registered"
        ),
        DomainEvent::UpstreamEvicted { upstream } => {
            warn!(upstream = %upstream, "[Events] Upstream evicted")
        }
        DomainEvent::RequestTimedOut {
            upstream,
            method,
            timeout_ms,
        } => warn!(upstream = %upstream, method = %method, timeout_ms, "[Events] Request timed out"),
        DomainEvent::SessionOpened { session_id } => {
            debug!(session = %session_id, "[Events] Session opened")
        }
        DomainEvent::SessionClosed {
            session_id,
            cancelled,
        } => debug!(session = %session_id, cancelled, "[Events] Session closed"),
    }
}
