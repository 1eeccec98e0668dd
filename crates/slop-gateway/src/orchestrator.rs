//! Orchestrator - wires registry, upstreams, router and sessions together
//!
//! Everything is constructed from one [`SlopConfig`]. The launcher is
//! injectable so tests can run upstreams in-process.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use slop_core::{EventBus, EventReceiver, GatewaySettings, SlopConfig};
use slop_mcp::{DefaultLauncher, Launcher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::consumers::{EventJournal, JournalEntry};
use crate::mcp::SlopGatewayHandler;
use crate::pending::PendingTable;
use crate::registry::CapabilityRegistry;
use crate::router::Router;
use crate::server::{self, HttpConfig};
use crate::session::SessionGateway;
use crate::upstream::UpstreamManager;

/// Outcome of the startup connect round
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub ready: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Orchestrator {
    config: SlopConfig,
    settings: Arc<GatewaySettings>,
    events: EventBus,
    registry: Arc<CapabilityRegistry>,
    upstreams: Arc<UpstreamManager>,
    gateway: Arc<SessionGateway>,
    shutdown: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
    journal: Arc<EventJournal>,
    /// Subscribed at construction so startup events are journaled too
    journal_feed: Mutex<Option<EventReceiver>>,
}

impl Orchestrator {
    pub fn new(config: SlopConfig) -> Self {
        Self::with_launcher(config, Arc::new(DefaultLauncher::new()))
    }

    pub fn with_launcher(config: SlopConfig, launcher: Arc<dyn Launcher>) -> Self {
        let settings = Arc::new(config.gateway.clone());
        let events = EventBus::new();
        let journal_feed = events.subscribe();
        let registry = Arc::new(CapabilityRegistry::new(&settings));
        let upstreams = UpstreamManager::new(
            launcher,
            registry.clone(),
            settings.clone(),
            events.sender(),
        );
        let router = Arc::new(Router::new(
            registry.clone(),
            upstreams.clone(),
            PendingTable::new(),
            settings.clone(),
        ));
        let gateway = SessionGateway::new(
            registry.clone(),
            upstreams.clone(),
            router,
            settings.clone(),
            events.sender(),
        );

        Self {
            config,
            settings,
            events,
            registry,
            upstreams,
            gateway,
            shutdown: CancellationToken::new(),
            reaper: Mutex::new(None),
            journal: Arc::new(EventJournal::default()),
            journal_feed: Mutex::new(Some(journal_feed)),
        }
    }

    /// Connect every enabled upstream and start the background consumers
    /// (event journal, pending-request reaper)
    ///
    /// Upstreams that fail to connect are reported, never fatal.
    pub async fn start(&self) -> StartupReport {
        if let Some(feed) = self.journal_feed.lock().take() {
            self.journal.spawn(feed, self.shutdown.clone());
        }
        {
            let mut reaper = self.reaper.lock();
            if reaper.is_none() {
                *reaper = Some(self.gateway.start_reaper(self.shutdown.clone()));
            }
        }

        let configs: Vec<_> = self.config.enabled_upstreams().cloned().collect();
        info!(
            upstreams = configs.len(),
            policy = %self.settings.collision_policy.as_str(),
            "[Orchestrator] Starting"
        );

        let mut report = StartupReport::default();
        for (name, result) in self.upstreams.start_all(configs).await {
            match result {
                Ok(()) => report.ready.push(name),
                Err(e) => {
                    warn!(upstream = %name, error = %e, "[Orchestrator] Upstream failed to start");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    /// A fresh handler for one client session
    pub fn handler(&self) -> SlopGatewayHandler {
        SlopGatewayHandler::new(self.gateway.clone())
    }

    pub async fn serve_stdio(&self) -> Result<()> {
        server::run_stdio(self.gateway.clone(), self.shutdown.clone()).await
    }

    pub async fn serve_http(&self, config: HttpConfig) -> Result<()> {
        server::run_http(self.gateway.clone(), config, self.shutdown.clone()).await
    }

    /// Stop serving, close every session and upstream
    pub async fn shutdown(&self) {
        info!("[Orchestrator] Shutting down");
        self.shutdown.cancel();
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.upstreams.shutdown().await;
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &SlopConfig {
        &self.config
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn upstreams(&self) -> &Arc<UpstreamManager> {
        &self.upstreams
    }

    pub fn gateway(&self) -> &Arc<SessionGateway> {
        &self.gateway
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Most recent domain events, newest first
    pub fn recent_events(&self, limit: usize) -> Vec<JournalEntry> {
        self.journal.recent(limit)
    }
}
