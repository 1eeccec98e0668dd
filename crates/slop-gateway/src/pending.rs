//! Pending Request table
//!
//! Every routed client request has exactly one entry, keyed by
//! `(session, client request id)`, from dispatch until it resolves. Entries
//! are removed by their [`PendingGuard`] on every exit path; session close
//! and the reaper remove (and cancel) whatever is left.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use slop_core::{OrchestratorError, OrchestratorResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub type PendingKey = (Uuid, String);

#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Upstream currently serving the request (changes on fallback)
    pub upstream: String,
    pub method: String,
    pub created_at: Instant,
    pub deadline: Instant,
    pub cancel: CancellationToken,
    /// The upstream has replied; only delivery is outstanding
    pub answered: bool,
}

#[derive(Clone, Default)]
pub struct PendingTable {
    entries: Arc<DashMap<PendingKey, PendingRequest>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request. A request id still pending in the same session is rejected.
    pub fn insert(
        &self,
        session: Uuid,
        request_id: impl Into<String>,
        upstream: &str,
        method: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> OrchestratorResult<PendingGuard> {
        let key = (session, request_id.into());
        let now = Instant::now();
        match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "request id {} is already in flight",
                    key.1
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    upstream: upstream.to_string(),
                    method: method.to_string(),
                    created_at: now,
                    deadline: now + timeout,
                    cancel: cancel.clone(),
                    answered: false,
                });
            }
        }
        Ok(PendingGuard {
            table: self.clone(),
            key,
            cancel,
        })
    }

    pub fn get(&self, session: Uuid, request_id: &str) -> Option<PendingRequest> {
        self.entries
            .get(&(session, request_id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Cancel one request; its guard removes the entry. False if unknown.
    pub fn cancel(&self, session: Uuid, request_id: &str) -> bool {
        match self.entries.get(&(session, request_id.to_string())) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every entry of `session` before returning
    pub fn cancel_session(&self, session: Uuid) -> usize {
        let keys: Vec<PendingKey> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == session)
            .map(|e| e.key().clone())
            .collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, request)) = self.entries.remove(&key) {
                request.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(session = %session, cancelled, "[Pending] Session requests cancelled");
        }
        cancelled
    }

    /// Cancel and remove unanswered entries past `deadline + grace`
    pub fn reap_expired(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingKey> = self
            .entries
            .iter()
            .filter(|e| !e.value().answered && e.value().deadline + grace <= now)
            .map(|e| e.key().clone())
            .collect();
        let mut reaped = 0;
        for key in expired {
            if let Some((key, request)) = self.entries.remove(&key) {
                warn!(
                    session = %key.0,
                    request_id = %key.1,
                    upstream = %request.upstream,
                    method = %request.method,
                    age_ms = request.created_at.elapsed().as_millis() as u64,
                    "[Pending] Reaped expired request"
                );
                request.cancel.cancel();
                reaped += 1;
            }
        }
        reaped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn session_len(&self, session: Uuid) -> usize {
        self.entries.iter().filter(|e| e.key().0 == session).count()
    }
}

/// Removes its entry on drop
pub struct PendingGuard {
    table: PendingTable,
    key: PendingKey,
    cancel: CancellationToken,
}

impl PendingGuard {
    /// Point the entry at a fallback upstream with a fresh deadline
    pub fn retarget(&self, upstream: &str, timeout: Duration) {
        if let Some(mut entry) = self.table.entries.get_mut(&self.key) {
            entry.upstream = upstream.to_string();
            entry.deadline = Instant::now() + timeout;
            entry.answered = false;
        }
    }

    /// The upstream replied; the reaper leaves the entry alone from now on
    pub fn mark_answered(&self) {
        if let Some(mut entry) = self.table.entries.get_mut(&self.key) {
            entry.answered = true;
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn request_id(&self) -> &str {
        &self.key.1
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.entries.remove(&self.key);
    }
}
