//! Immutable registry views
//!
//! A [`RegistrySnapshot`] is built off to the side by the registry writer and
//! published whole. Readers hold an `Arc` to one generation and never see a
//! mix of two.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use slop_core::{Capability, CapabilityKind, Catalog, CollisionPolicy};

/// One exposed name and who serves it
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Name as clients see it (prefixed under the prefix policy)
    pub exposed: String,
    /// The owner's definition; `capability.name` is the upstream's own name
    pub capability: Capability,
    pub owner: String,
    /// Other upstreams advertising the same name, in registration order
    pub fallbacks: Vec<String>,
}

impl RegistryEntry {
    /// Definition as sent to clients
    pub fn exposed_definition(&self) -> Value {
        self.capability.raw_with_name(&self.exposed)
    }
}

/// Result of a successful lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCapability {
    pub kind: CapabilityKind,
    pub exposed: String,
    /// Name to send upstream
    pub name: String,
    pub owner: String,
    pub fallbacks: Vec<String>,
}

impl ResolvedCapability {
    /// Owner first, then fallbacks
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// A `(kind, name)` dropped under the reject policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub kind: CapabilityKind,
    pub name: String,
    pub owner: String,
    pub rejected: String,
}

/// Registered upstream as captured by a snapshot
#[derive(Debug, Clone)]
pub struct UpstreamCatalog {
    pub name: String,
    pub catalog: Arc<Catalog>,
    pub available: bool,
}

#[derive(Debug, Default)]
struct KindTable {
    /// Exposed names in merge order
    order: Vec<String>,
    entries: HashMap<String, RegistryEntry>,
}

impl KindTable {
    fn same_listing(&self, other: &KindTable) -> bool {
        self.order == other.order
            && self.order.iter().all(|name| {
                match (self.entries.get(name), other.entries.get(name)) {
                    (Some(a), Some(b)) => a.owner == b.owner && a.capability.raw == b.capability.raw,
                    _ => false,
                }
            })
    }
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    tables: [KindTable; 3],
    /// Generation at which each kind's listing last changed
    kind_generations: [u64; 3],
    upstreams: Vec<UpstreamCatalog>,
    conflicts: Vec<Conflict>,
}

fn slot(kind: CapabilityKind) -> usize {
    match kind {
        CapabilityKind::Tool => 0,
        CapabilityKind::Prompt => 1,
        CapabilityKind::Resource => 2,
    }
}

impl RegistrySnapshot {
    /// Merge `upstreams` (already in registration order) under `policy`
    pub(crate) fn build(
        generation: u64,
        upstreams: Vec<UpstreamCatalog>,
        policy: CollisionPolicy,
        separator: &str,
        previous: &RegistrySnapshot,
    ) -> Self {
        let mut tables: [KindTable; 3] = Default::default();
        let mut conflicts = Vec::new();

        // Reject decides ownership across every registered upstream, so a
        // degraded owner hides the name instead of handing it to the loser
        let decide_all = policy == CollisionPolicy::Reject;
        for upstream in upstreams.iter().filter(|u| u.available || decide_all) {
            for capability in upstream.catalog.iter() {
                let kind = capability.kind;
                let prefixed = policy == CollisionPolicy::Prefix && kind != CapabilityKind::Resource;
                let exposed = if prefixed {
                    format!("{}{}{}", upstream.name, separator, capability.name)
                } else {
                    capability.name.clone()
                };

                let table = &mut tables[slot(kind)];
                match table.entries.get_mut(&exposed) {
                    None => {
                        table.order.push(exposed.clone());
                        table.entries.insert(
                            exposed.clone(),
                            RegistryEntry {
                                exposed,
                                capability: capability.clone(),
                                owner: upstream.name.clone(),
                                fallbacks: Vec::new(),
                            },
                        );
                    }
                    // Duplicate inside one catalog: first definition wins
                    Some(existing) if existing.owner == upstream.name => {}
                    Some(existing) => match policy {
                        CollisionPolicy::Reject => conflicts.push(Conflict {
                            kind,
                            name: exposed,
                            owner: existing.owner.clone(),
                            rejected: upstream.name.clone(),
                        }),
                        _ => {
                            if !existing.fallbacks.contains(&upstream.name) {
                                existing.fallbacks.push(upstream.name.clone());
                            }
                        }
                    },
                }
            }
        }

        if decide_all {
            let unavailable: HashSet<&str> = upstreams
                .iter()
                .filter(|u| !u.available)
                .map(|u| u.name.as_str())
                .collect();
            for table in tables.iter_mut() {
                table
                    .entries
                    .retain(|_, entry| !unavailable.contains(entry.owner.as_str()));
                let entries = &table.entries;
                table.order.retain(|name| entries.contains_key(name));
            }
        }

        let mut kind_generations = [generation; 3];
        for kind in CapabilityKind::ALL {
            let i = slot(kind);
            if tables[i].same_listing(&previous.tables[i]) {
                kind_generations[i] = previous.kind_generations[i];
            }
        }

        Self {
            generation,
            tables,
            kind_generations,
            upstreams,
            conflicts,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation at which the listing for `kind` last changed
    pub fn kind_generation(&self, kind: CapabilityKind) -> u64 {
        self.kind_generations[slot(kind)]
    }

    pub fn get(&self, kind: CapabilityKind, exposed: &str) -> Option<&RegistryEntry> {
        self.tables[slot(kind)].entries.get(exposed)
    }

    /// Entries of one kind in merge order
    pub fn entries(&self, kind: CapabilityKind) -> impl Iterator<Item = &RegistryEntry> {
        let table = &self.tables[slot(kind)];
        table.order.iter().filter_map(|name| table.entries.get(name))
    }

    pub fn len(&self, kind: CapabilityKind) -> usize {
        self.tables[slot(kind)].order.len()
    }

    pub fn exposed_names(&self, kind: CapabilityKind) -> impl Iterator<Item = &str> {
        self.tables[slot(kind)].order.iter().map(String::as_str)
    }

    /// Every registered upstream, available or not, in registration order
    pub fn upstreams(&self) -> &[UpstreamCatalog] {
        &self.upstreams
    }

    pub fn upstream(&self, name: &str) -> Option<&UpstreamCatalog> {
        self.upstreams.iter().find(|u| u.name == name)
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn resolve(&self, kind: CapabilityKind, exposed: &str) -> Option<ResolvedCapability> {
        self.get(kind, exposed).map(|entry| ResolvedCapability {
            kind,
            exposed: entry.exposed.clone(),
            name: entry.capability.name.clone(),
            owner: entry.owner.clone(),
            fallbacks: entry.fallbacks.clone(),
        })
    }
}
