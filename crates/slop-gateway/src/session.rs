//! Session Gateway
//!
//! One [`Session`] per connected client. Each session owns a cancellation
//! scope: every request it routes runs under a child token, so closing the
//! session cancels them all and the cancellation reaches the upstreams.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use slop_core::{
    CapabilityKind, DomainEvent, EventSender, GatewaySettings, OrchestratorError,
    OrchestratorResult,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::mcp::meta;
use crate::registry::CapabilityRegistry;
use crate::router::{DispatchRequest, Router};
use crate::upstream::UpstreamManager;

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    token: CancellationToken,
}

impl Session {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct SessionGateway {
    registry: Arc<CapabilityRegistry>,
    upstreams: Arc<UpstreamManager>,
    router: Arc<Router>,
    settings: Arc<GatewaySettings>,
    events: EventSender,
    sessions: DashMap<Uuid, Arc<Session>>,
    /// Serializes the limit check with the insert
    open_lock: Mutex<()>,
}

impl SessionGateway {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        upstreams: Arc<UpstreamManager>,
        router: Arc<Router>,
        settings: Arc<GatewaySettings>,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            upstreams,
            router,
            settings,
            events,
            sessions: DashMap::new(),
            open_lock: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Open a session, bounded by `max_sessions`
    pub fn initialize(&self) -> OrchestratorResult<Arc<Session>> {
        let _open = self.open_lock.lock();
        if let Some(max) = self.settings.max_sessions {
            if self.sessions.len() >= max {
                return Err(OrchestratorError::SessionLimit { max });
            }
        }
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            token: CancellationToken::new(),
        });
        self.sessions.insert(session.id, session.clone());
        info!(session = %session.id, active = self.sessions.len(), "[Session] Opened");
        self.events.emit(DomainEvent::SessionOpened {
            session_id: session.id,
        });
        Ok(session)
    }

    /// Merged listing of one kind, as clients see it
    ///
    /// Meta tools come first and shadow upstream tools of the same name.
    pub fn list_capabilities(&self, kind: CapabilityKind) -> Vec<Value> {
        let snapshot = self.registry.snapshot();
        let meta_enabled = kind == CapabilityKind::Tool && self.settings.meta_tools;

        let mut items = if meta_enabled {
            meta::definitions()
        } else {
            Vec::new()
        };
        items.extend(
            snapshot
                .entries(kind)
                .filter(|e| !(meta_enabled && meta::is_meta_tool(&e.exposed)))
                .map(|e| e.exposed_definition()),
        );
        items
    }

    /// Route one request under the session's cancellation scope
    pub async fn invoke(
        &self,
        session: &Session,
        request_id: impl Into<String>,
        kind: CapabilityKind,
        name: &str,
        arguments: Option<Value>,
    ) -> OrchestratorResult<Value> {
        if session.is_closed() {
            return Err(OrchestratorError::Cancelled);
        }
        let request_id = request_id.into();

        if kind == CapabilityKind::Tool && self.settings.meta_tools && meta::is_meta_tool(name) {
            debug!(session = %session.id, tool = name, "[Session] Meta tool");
            return meta::call(self, session, request_id, name, arguments).await;
        }

        let request = self.request(session, request_id, kind, name, arguments);
        self.router.dispatch(request).await
    }

    /// Explicitly routed tool call (`execute_tool`)
    pub async fn invoke_on(
        &self,
        session: &Session,
        request_id: impl Into<String>,
        upstream: &str,
        kind: CapabilityKind,
        name: &str,
        arguments: Option<Value>,
    ) -> OrchestratorResult<Value> {
        if session.is_closed() {
            return Err(OrchestratorError::Cancelled);
        }
        let request = self.request(session, request_id.into(), kind, name, arguments);
        self.router.dispatch_to(upstream, request).await
    }

    fn request(
        &self,
        session: &Session,
        request_id: String,
        kind: CapabilityKind,
        name: &str,
        arguments: Option<Value>,
    ) -> DispatchRequest {
        DispatchRequest::new(session.id, request_id, kind, name)
            .with_arguments(arguments)
            .with_cancel(session.token.child_token())
    }

    /// Client-initiated cancel of one in-flight request
    pub fn cancel(&self, session: &Session, request_id: &str) -> bool {
        let cancelled = self.router.pending().cancel(session.id, request_id);
        if cancelled {
            debug!(session = %session.id, request_id, "[Session] Request cancelled by client");
        }
        cancelled
    }

    /// Client went away: cancel and remove every pending request of the session
    ///
    /// Entries are gone when this returns. Closing twice is a no-op.
    pub fn close(&self, session_id: Uuid) -> usize {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return 0;
        };
        session.token.cancel();
        let cancelled = self.router.pending().cancel_session(session_id);
        info!(session = %session_id, cancelled, "[Session] Closed");
        self.events.emit(DomainEvent::SessionClosed {
            session_id,
            cancelled,
        });
        cancelled
    }

    pub fn session(&self, session_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&session_id).map(|s| s.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Periodically cancel and drop pending entries past their deadline
    pub fn start_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = self.settings.cleanup_interval;
        let gateway = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(gateway) = gateway.upgrade() else {
                    break;
                };
                let reaped = gateway.router.pending().reap_expired(interval);
                if reaped > 0 {
                    info!(reaped, "[Session] Reaper removed expired requests");
                }
            }
            debug!("[Session] Reaper stopped");
        })
    }
}
