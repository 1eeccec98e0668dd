//! Capability Registry
//!
//! Merges the catalogs of every registered upstream into one namespace per
//! capability kind.
//!
//! ```text
//!   register / unregister / set_available
//!              │  (writer mutex: rebuild only)
//!              ▼
//!   build RegistrySnapshot{generation + 1} ──► ArcSwap::store ──► watch(generation)
//!                                                   │
//!   lookup / snapshot / search ◄── ArcSwap::load ───┘   (lock free)
//! ```

mod search;
mod snapshot;

pub use search::{search_tools, suggest, ToolHit};
pub use snapshot::{Conflict, RegistryEntry, RegistrySnapshot, ResolvedCapability, UpstreamCatalog};

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use slop_core::{
    Capability, CapabilityKind, Catalog, CollisionPolicy, GatewaySettings, OrchestratorError,
    OrchestratorResult,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome of a registration
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterReport {
    pub generation: u64,
    /// Entries of the registering upstream dropped under the reject policy
    pub conflicts: Vec<Conflict>,
}

struct Registered {
    /// First registration order; kept across re-registration
    seq: u64,
    catalog: Arc<Catalog>,
    available: bool,
}

#[derive(Default)]
struct WriterState {
    next_seq: u64,
    generation: u64,
    upstreams: HashMap<String, Registered>,
}

pub struct CapabilityRegistry {
    policy: CollisionPolicy,
    separator: String,
    writer: Mutex<WriterState>,
    current: ArcSwap<RegistrySnapshot>,
    generation_tx: watch::Sender<u64>,
}

impl CapabilityRegistry {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self::with_policy(settings.collision_policy, &settings.prefix_separator)
    }

    pub fn with_policy(policy: CollisionPolicy, separator: &str) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            policy,
            separator: separator.to_string(),
            writer: Mutex::new(WriterState::default()),
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            generation_tx,
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Replace `upstream`'s catalog and publish a new snapshot
    ///
    /// A new upstream is available immediately. Re-registering keeps the
    /// upstream's original merge position and availability.
    pub fn register(&self, upstream: &str, catalog: Catalog) -> RegisterReport {
        let mut state = self.writer.lock();
        let catalog = Arc::new(catalog);
        match state.upstreams.get_mut(upstream) {
            Some(existing) => existing.catalog = catalog,
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.upstreams.insert(
                    upstream.to_string(),
                    Registered {
                        seq,
                        catalog,
                        available: true,
                    },
                );
            }
        }
        let snapshot = self.publish(&mut state);

        let conflicts: Vec<Conflict> = snapshot
            .conflicts()
            .iter()
            .filter(|c| c.rejected == upstream)
            .cloned()
            .collect();
        for conflict in &conflicts {
            warn!(
                upstream,
                kind = %conflict.kind,
                name = %conflict.name,
                owner = %conflict.owner,
                "[Registry] Name already registered, entry rejected"
            );
        }
        info!(
            upstream,
            generation = snapshot.generation(),
            tools = snapshot.len(CapabilityKind::Tool),
            prompts = snapshot.len(CapabilityKind::Prompt),
            resources = snapshot.len(CapabilityKind::Resource),
            "[Registry] Catalog registered"
        );
        RegisterReport {
            generation: snapshot.generation(),
            conflicts,
        }
    }

    /// Replace one capability family of an already registered upstream
    pub fn update_kind(
        &self,
        upstream: &str,
        kind: CapabilityKind,
        items: Vec<Capability>,
    ) -> Option<RegisterReport> {
        let mut catalog = self.catalog(upstream)?.as_ref().clone();
        catalog.set_kind(kind, items);
        Some(self.register(upstream, catalog))
    }

    /// Forget an upstream entirely. Returns false if it was not registered.
    pub fn unregister(&self, upstream: &str) -> bool {
        let mut state = self.writer.lock();
        if state.upstreams.remove(upstream).is_none() {
            return false;
        }
        let snapshot = self.publish(&mut state);
        info!(upstream, generation = snapshot.generation(), "[Registry] Upstream unregistered");
        true
    }

    /// Include or exclude an upstream's entries without dropping its catalog
    pub fn set_available(&self, upstream: &str, available: bool) -> bool {
        let mut state = self.writer.lock();
        match state.upstreams.get_mut(upstream) {
            Some(entry) if entry.available != available => entry.available = available,
            Some(_) => return true,
            None => return false,
        }
        let snapshot = self.publish(&mut state);
        debug!(upstream, available, generation = snapshot.generation(), "[Registry] Availability changed");
        true
    }

    fn publish(&self, state: &mut WriterState) -> Arc<RegistrySnapshot> {
        state.generation += 1;

        let mut ordered: Vec<(&String, &Registered)> = state.upstreams.iter().collect();
        ordered.sort_by_key(|(_, r)| r.seq);
        let upstreams = ordered
            .into_iter()
            .map(|(name, r)| UpstreamCatalog {
                name: name.clone(),
                catalog: r.catalog.clone(),
                available: r.available,
            })
            .collect();

        let previous = self.current.load();
        let snapshot = Arc::new(RegistrySnapshot::build(
            state.generation,
            upstreams,
            self.policy,
            &self.separator,
            &previous,
        ));
        self.current.store(snapshot.clone());
        self.generation_tx.send_replace(state.generation);
        snapshot
    }

    /// Resolve an exposed name to its owner and fallbacks
    pub fn lookup(&self, kind: CapabilityKind, name: &str) -> OrchestratorResult<ResolvedCapability> {
        let snapshot = self.current.load();
        snapshot.resolve(kind, name).ok_or_else(|| {
            OrchestratorError::UnknownCapability {
                kind,
                name: name.to_string(),
                suggestions: suggest(name, snapshot.exposed_names(kind)),
            }
        })
    }

    /// Current immutable view
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    /// Notified with the new generation on every publish
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    pub fn search_tools(&self, query: &str, upstream: Option<&str>) -> Vec<ToolHit> {
        search_tools(&self.current.load(), query, upstream)
    }

    /// Catalog last registered by `upstream`
    pub fn catalog(&self, upstream: &str) -> Option<Arc<Catalog>> {
        self.writer
            .lock()
            .upstreams
            .get(upstream)
            .map(|r| r.catalog.clone())
    }
}
