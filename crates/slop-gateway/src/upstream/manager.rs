//! UpstreamManager - owns every upstream connection and its lifecycle
//!
//! ```text
//!              connect ok                 timeouts >= threshold,
//!   Starting ─────────────► Ready ◄────┐  connection lost, failed ping
//!      │                      │        │ recovered
//!      │ connect failed       ▼        │
//!      └──────────► Closed ◄─ Degraded ┘
//!                          retries exhausted
//! ```
//!
//! State changes are emitted on the event bus and mirrored into the
//! registry: Degraded upstreams are hidden, Closed ones are evicted.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use slop_core::{
    CapabilityKind, DomainEvent, EventSender, GatewaySettings, HealthCheckResult, HealthStatus,
    OrchestratorError, OrchestratorResult, UpstreamConfig, UpstreamState, UpstreamStatus,
};
use slop_mcp::{ConnectOptions, Connected, Launcher, UpstreamConnection, UpstreamNotice};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{backoff_for_attempt, UpstreamHandle};
use crate::registry::CapabilityRegistry;

pub struct UpstreamManager {
    launcher: Arc<dyn Launcher>,
    registry: Arc<CapabilityRegistry>,
    settings: Arc<GatewaySettings>,
    events: EventSender,
    upstreams: DashMap<String, Arc<UpstreamHandle>>,
    shutdown: CancellationToken,
}

impl UpstreamManager {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        registry: Arc<CapabilityRegistry>,
        settings: Arc<GatewaySettings>,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            registry,
            settings,
            events,
            upstreams: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Connect every upstream concurrently
    ///
    /// Failures are reported per upstream; they never abort the others.
    pub async fn start_all(
        self: &Arc<Self>,
        configs: impl IntoIterator<Item = UpstreamConfig>,
    ) -> Vec<(String, OrchestratorResult<()>)> {
        let attempts = configs.into_iter().map(|config| {
            let manager = self.clone();
            async move {
                let name = config.name.clone();
                let result = manager.add_upstream(config).await;
                (name, result)
            }
        });
        let results = futures::future::join_all(attempts).await;

        let ready = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!(
            ready,
            failed = results.len() - ready,
            "[UpstreamManager] Startup connect complete"
        );
        results
    }

    /// Register and connect one upstream
    ///
    /// An initial connect failure leaves the upstream `Closed` with its error
    /// recorded; it is not retried.
    pub async fn add_upstream(self: &Arc<Self>, config: UpstreamConfig) -> OrchestratorResult<()> {
        let name = config.name.clone();
        let handle = Arc::new(UpstreamHandle::new(config));

        match self.upstreams.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if !slot.get().state().is_terminal() {
                    return Err(OrchestratorError::InvalidRequest(format!(
                        "upstream '{name}' is already registered"
                    )));
                }
                slot.insert(handle.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }

        info!(upstream = %name, target = %handle.config.target(), "[UpstreamManager] Starting upstream");

        match self.connect_once(&handle.config).await {
            Ok(connected) => self.install(&handle, connected).await,
            Err(e) => {
                error!(upstream = %name, error = %e, "[UpstreamManager] Initial connect failed");
                handle.inner.lock().last_error = Some(e.to_string());
                self.transition(&handle, UpstreamState::Closed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Disconnect and forget an upstream
    pub async fn remove_upstream(&self, name: &str) -> bool {
        let Some((_, handle)) = self.upstreams.remove(name) else {
            return false;
        };
        handle.next_flow();
        self.transition(&handle, UpstreamState::Closed, Some("removed".to_string()));
        self.registry.unregister(name);
        let connection = handle.inner.lock().connection.take();
        if let Some(connection) = connection {
            connection.close(self.settings.close_grace).await;
        }
        info!(upstream = %name, "[UpstreamManager] Upstream removed");
        true
    }

    async fn connect_once(&self, config: &UpstreamConfig) -> OrchestratorResult<Connected> {
        let transport = self
            .launcher
            .launch(config)
            .await
            .map_err(|e| OrchestratorError::unavailable(&config.name, e))?;
        let options = ConnectOptions::for_upstream(config)
            .with_list_timeout(self.settings.timeouts.list)
            .with_retry_after(self.settings.overload_retry_after);
        slop_mcp::UpstreamConnection::connect(&config.name, transport, &options).await
    }

    /// Make a fresh connection live: Ready first, then visible in the registry
    async fn install(
        self: &Arc<Self>,
        handle: &Arc<UpstreamHandle>,
        connected: Connected,
    ) -> OrchestratorResult<()> {
        let Connected {
            connection,
            catalog,
            notices,
        } = connected;
        let name = handle.name().to_string();

        let flow = handle.next_flow();
        let (stale, replaced) = {
            let mut inner = handle.inner.lock();
            if inner.state.is_terminal() {
                (true, None)
            } else {
                let replaced = inner.connection.replace(connection.clone());
                inner.connected_at = Some(Utc::now());
                inner.last_error = None;
                inner.reconnect_attempts = 0;
                inner.server_name = connection.identity().map(|i| i.name.clone());
                (false, replaced)
            }
        };
        if stale {
            connection.close(Duration::ZERO).await;
            return Err(OrchestratorError::unavailable(&name, "upstream was removed"));
        }
        // A concurrent recovery and reconnect can both land a connection
        if let Some(replaced) = replaced {
            replaced.close(Duration::ZERO).await;
        }
        handle.consecutive_timeouts.store(0, Ordering::Release);

        self.transition(handle, UpstreamState::Ready, Some("connected".to_string()));

        let counts = (catalog.tools.len(), catalog.prompts.len(), catalog.resources.len());
        let report = self.registry.register(&name, catalog);
        self.registry.set_available(&name, true);
        self.events.emit(DomainEvent::UpstreamCatalogChanged {
            upstream: name.clone(),
            generation: report.generation,
            tools: counts.0,
            prompts: counts.1,
            resources: counts.2,
        });

        self.spawn_notice_loop(handle.clone(), connection.clone(), notices, flow);
        if let Some(interval) = handle.config.health_check_interval.filter(|i| !i.is_zero()) {
            self.spawn_health_check(handle.clone(), connection, flow, interval);
        }
        Ok(())
    }

    /// Apply a state change if the state machine allows it
    fn transition(&self, handle: &UpstreamHandle, to: UpstreamState, reason: Option<String>) -> bool {
        let from = {
            let mut inner = handle.inner.lock();
            let from = inner.state;
            if !from.can_transition_to(to) {
                debug!(upstream = %handle.name(), %from, %to, "[UpstreamManager] Transition ignored");
                return false;
            }
            inner.state = to;
            from
        };
        info!(
            upstream = %handle.name(),
            %from,
            %to,
            reason = reason.as_deref().unwrap_or(""),
            "[UpstreamManager] State changed"
        );
        self.events.emit(DomainEvent::UpstreamStateChanged {
            upstream: handle.name().to_string(),
            from,
            to,
            reason,
        });
        true
    }

    fn handle(&self, name: &str) -> Option<Arc<UpstreamHandle>> {
        self.upstreams.get(name).map(|h| h.value().clone())
    }

    /// Connection of a `Ready` upstream
    pub fn routable(&self, name: &str) -> Option<UpstreamConnection> {
        let handle = self.handle(name)?;
        let inner = handle.inner.lock();
        if inner.state.is_routable() {
            inner.connection.clone()
        } else {
            None
        }
    }

    pub fn state(&self, name: &str) -> Option<UpstreamState> {
        self.handle(name).map(|h| h.state())
    }

    /// Per-upstream override of every request-class timeout
    pub fn request_timeout(&self, name: &str) -> Option<Duration> {
        self.handle(name).and_then(|h| h.request_timeout())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.upstreams.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn record_success(&self, name: &str) {
        if let Some(handle) = self.handle(name) {
            handle.consecutive_timeouts.store(0, Ordering::Release);
        }
    }

    /// Count a timeout; degrade once the threshold of consecutive timeouts is hit
    pub fn record_timeout(self: &Arc<Self>, name: &str, method: &str, timeout: Duration) {
        self.events.emit(DomainEvent::RequestTimedOut {
            upstream: name.to_string(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        });
        let Some(handle) = self.handle(name) else {
            return;
        };
        let count = handle.consecutive_timeouts.fetch_add(1, Ordering::AcqRel) + 1;
        let threshold = self.settings.degrade_after_timeouts;
        if threshold > 0 && count >= threshold {
            self.mark_degraded(name, &format!("{count} consecutive timeouts"));
        }
    }

    /// A request failed because the channel is gone
    pub fn report_unavailable(self: &Arc<Self>, name: &str, reason: &str) {
        self.mark_degraded(name, reason);
    }

    /// Ready -> Degraded: hide from routing and start recovery
    pub fn mark_degraded(self: &Arc<Self>, name: &str, reason: &str) {
        let Some(handle) = self.handle(name) else {
            return;
        };
        if !self.transition(&handle, UpstreamState::Degraded, Some(reason.to_string())) {
            return;
        }
        handle.inner.lock().last_error = Some(reason.to_string());
        self.registry.set_available(name, false);
        self.spawn_recovery(handle);
    }

    fn spawn_recovery(self: &Arc<Self>, handle: Arc<UpstreamHandle>) {
        if handle.recovering.swap(true, Ordering::AcqRel) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                manager.recover(&handle).await;
                if !manager.end_recovery(&handle) {
                    break;
                }
                debug!(upstream = %handle.name(), "[UpstreamManager] Degraded again while recovering");
            }
        });
    }

    /// Release the recovery claim. True when the upstream was degraded again
    /// while the claim was held (that degrade could not start its own
    /// recovery), in which case the claim is taken back for another round.
    fn end_recovery(&self, handle: &UpstreamHandle) -> bool {
        handle.recovering.store(false, Ordering::Release);
        handle.state() == UpstreamState::Degraded
            && !self.shutdown.is_cancelled()
            && !handle.recovering.swap(true, Ordering::AcqRel)
    }

    /// Retry with backoff until Ready again or the retry budget is spent
    async fn recover(self: &Arc<Self>, handle: &Arc<UpstreamHandle>) {
        let name = handle.name().to_string();
        let max_retries = handle.config.max_retries;

        for attempt in 1..=max_retries {
            let delay =
                backoff_for_attempt(attempt, self.settings.initial_backoff, self.settings.max_backoff);
            handle.inner.lock().reconnect_attempts = attempt;
            debug!(upstream = %name, attempt, delay_ms = delay.as_millis() as u64, "[UpstreamManager] Recovery scheduled");

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if handle.state() != UpstreamState::Degraded {
                return;
            }

            match self.try_recover(handle).await {
                Ok(()) => {
                    info!(upstream = %name, attempt, "[UpstreamManager] Upstream recovered");
                    return;
                }
                Err(e) => {
                    debug!(upstream = %name, attempt, max_retries, error = %e, "[UpstreamManager] Recovery attempt failed");
                    handle.inner.lock().last_error = Some(e.to_string());
                }
            }
        }

        let reason = if max_retries == 0 {
            "recovery disabled".to_string()
        } else {
            format!("recovery failed after {max_retries} attempts")
        };
        self.evict(handle, reason).await;
    }

    async fn try_recover(self: &Arc<Self>, handle: &Arc<UpstreamHandle>) -> OrchestratorResult<()> {
        let name = handle.name().to_string();

        // The old channel may only have been slow
        if let Some(connection) = handle.connection().filter(|c| !c.is_closed()) {
            if connection.ping(self.settings.timeouts.ping).await.is_ok() {
                handle.consecutive_timeouts.store(0, Ordering::Release);
                handle.inner.lock().reconnect_attempts = 0;
                if self.transition(handle, UpstreamState::Ready, Some("ping succeeded".to_string())) {
                    self.registry.set_available(&name, true);
                }
                return Ok(());
            }
            connection.close(Duration::ZERO).await;
        }

        let connected = self.connect_once(&handle.config).await?;
        let previous = handle.inner.lock().connection.take();
        if let Some(previous) = previous {
            previous.close(Duration::ZERO).await;
        }
        self.install(handle, connected).await
    }

    /// Degraded -> Closed: drop from the registry for good
    async fn evict(&self, handle: &Arc<UpstreamHandle>, reason: String) {
        let name = handle.name().to_string();
        handle.next_flow();
        if !self.transition(handle, UpstreamState::Closed, Some(reason.clone())) {
            return;
        }
        handle.inner.lock().last_error = Some(reason.clone());
        self.registry.unregister(&name);
        let connection = handle.inner.lock().connection.take();
        if let Some(connection) = connection {
            connection.close(self.settings.close_grace).await;
        }
        warn!(upstream = %name, reason = %reason, "[UpstreamManager] Upstream evicted");
        self.events.emit(DomainEvent::UpstreamEvicted { upstream: name });
    }

    fn spawn_notice_loop(
        self: &Arc<Self>,
        handle: Arc<UpstreamHandle>,
        connection: UpstreamConnection,
        mut notices: mpsc::UnboundedReceiver<UpstreamNotice>,
        flow: u64,
    ) {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if handle.flow() != flow {
                    break;
                }
                match notice {
                    UpstreamNotice::ListChanged(kind) => {
                        manager.refresh_kind(&handle, &connection, kind).await;
                    }
                    UpstreamNotice::Closed { reason } => {
                        manager.mark_degraded(handle.name(), &format!("connection lost: {reason}"));
                        break;
                    }
                }
            }
        });
    }

    async fn refresh_kind(&self, handle: &UpstreamHandle, connection: &UpstreamConnection, kind: CapabilityKind) {
        let name = handle.name();
        match connection.list(kind, self.settings.timeouts.list).await {
            Ok(items) => {
                debug!(upstream = %name, kind = %kind, count = items.len(), "[UpstreamManager] Catalog refreshed");
                if let Some(report) = self.registry.update_kind(name, kind, items) {
                    self.emit_catalog(name, report.generation);
                }
            }
            Err(e) => warn!(upstream = %name, kind = %kind, error = %e, "[UpstreamManager] Catalog refresh failed"),
        }
    }

    fn emit_catalog(&self, name: &str, generation: u64) {
        if let Some(catalog) = self.registry.catalog(name) {
            self.events.emit(DomainEvent::UpstreamCatalogChanged {
                upstream: name.to_string(),
                generation,
                tools: catalog.tools.len(),
                prompts: catalog.prompts.len(),
                resources: catalog.resources.len(),
            });
        }
    }

    /// Re-fetch every capability family of a Ready upstream
    pub async fn refresh(&self, name: &str) -> OrchestratorResult<()> {
        let connection = self
            .routable(name)
            .ok_or_else(|| OrchestratorError::unavailable(name, "not ready"))?;
        let catalog = connection.fetch_catalog(self.settings.timeouts.list).await?;
        let report = self.registry.register(name, catalog);
        self.emit_catalog(name, report.generation);
        Ok(())
    }

    /// Swap in a fresh connection, keeping the upstream's registry position
    ///
    /// The old connection stays in service until the new one is up. A
    /// `Closed` upstream is started again from its stored definition.
    pub async fn reconnect(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        let handle = self
            .handle(name)
            .ok_or_else(|| OrchestratorError::InvalidRequest(format!("unknown upstream '{name}'")))?;
        match handle.state() {
            UpstreamState::Closed => return self.add_upstream(handle.config.clone()).await,
            UpstreamState::Starting => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "upstream '{name}' is still starting"
                )))
            }
            UpstreamState::Ready | UpstreamState::Degraded => {}
        }

        info!(upstream = %name, "[UpstreamManager] Reconnecting");
        let connected = self.connect_once(&handle.config).await?;

        if self.transition(&handle, UpstreamState::Degraded, Some("reconnecting".to_string())) {
            self.registry.set_available(name, false);
        }
        let previous = handle.inner.lock().connection.take();
        if let Some(previous) = previous {
            previous.close(self.settings.close_grace).await;
        }
        self.install(&handle, connected).await
    }

    /// Ping one upstream, or every upstream when `name` is `None`
    pub async fn health_check(&self, name: Option<&str>) -> Vec<HealthCheckResult> {
        let names = match name {
            Some(name) if self.upstreams.contains_key(name) => vec![name.to_string()],
            Some(_) => Vec::new(),
            None => self.names(),
        };
        let timeout = self.settings.timeouts.ping;

        let checks = names.into_iter().filter_map(|name| {
            let handle = self.handle(&name)?;
            Some(async move {
                let state = handle.state();
                let connection = handle.connection().filter(|_| state.is_routable());
                let Some(connection) = connection else {
                    return HealthCheckResult {
                        name,
                        status: HealthStatus::Disconnected,
                        state,
                        latency_ms: None,
                        error: handle.last_error(),
                    };
                };
                let started = std::time::Instant::now();
                let outcome = connection.ping(timeout).await;
                let latency_ms = Some(started.elapsed().as_millis() as u64);
                match outcome {
                    Ok(()) => HealthCheckResult {
                        name,
                        status: HealthStatus::Healthy,
                        state,
                        latency_ms,
                        error: None,
                    },
                    Err(e) => {
                        debug!(upstream = %name, error = %e, "[UpstreamManager] Health check failed");
                        HealthCheckResult {
                            name,
                            status: HealthStatus::Unhealthy,
                            state,
                            latency_ms,
                            error: Some(e.to_string()),
                        }
                    }
                }
            })
        });
        futures::future::join_all(checks).await
    }

    fn spawn_health_check(
        self: &Arc<Self>,
        handle: Arc<UpstreamHandle>,
        connection: UpstreamConnection,
        flow: u64,
        interval: Duration,
    ) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        debug!(upstream = %handle.name(), interval_ms = interval.as_millis() as u64, "[UpstreamManager] Health check started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if handle.flow() != flow {
                    break;
                }
                if handle.state() != UpstreamState::Ready {
                    continue;
                }
                match connection.ping(manager.settings.timeouts.ping).await {
                    Ok(()) => debug!(upstream = %handle.name(), "[UpstreamManager] Health check passed"),
                    // Busy is not dead
                    Err(OrchestratorError::Overloaded { .. }) => {}
                    Err(e) => {
                        manager.mark_degraded(handle.name(), &format!("health check failed: {e}"));
                    }
                }
            }
        });
    }

    pub fn status(&self, name: &str) -> Option<UpstreamStatus> {
        self.handle(name).map(|h| self.status_of(&h))
    }

    /// Status of every upstream, sorted by name
    pub fn statuses(&self) -> Vec<UpstreamStatus> {
        let mut statuses: Vec<UpstreamStatus> = self
            .upstreams
            .iter()
            .map(|e| self.status_of(e.value()))
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    fn status_of(&self, handle: &UpstreamHandle) -> UpstreamStatus {
        let catalog = self.registry.catalog(handle.name());
        let count = |kind: CapabilityKind| catalog.as_ref().map_or(0, |c| c.of_kind(kind).len());
        let inner = handle.inner.lock();
        UpstreamStatus {
            name: handle.name().to_string(),
            state: inner.state,
            source: handle.config.source.as_str().to_string(),
            tools: count(CapabilityKind::Tool),
            prompts: count(CapabilityKind::Prompt),
            resources: count(CapabilityKind::Resource),
            in_flight: inner.connection.as_ref().map_or(0, |c| c.in_flight()),
            server_name: inner.server_name.clone(),
            last_error: inner.last_error.clone(),
            connected_at: inner.connected_at,
            reconnect_attempts: inner.reconnect_attempts,
        }
    }

    /// Stop background tasks and close every connection
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let connections: Vec<UpstreamConnection> = self
            .upstreams
            .iter()
            .filter_map(|e| {
                e.value().next_flow();
                e.value().inner.lock().connection.take()
            })
            .collect();
        let grace = self.settings.close_grace;
        futures::future::join_all(connections.iter().map(|c| c.close(grace))).await;
        info!(closed = connections.len(), "[UpstreamManager] Shutdown complete");
    }
}
