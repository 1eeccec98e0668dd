//! Domain types

mod capability;
mod event;
mod upstream;

pub use capability::{Capability, CapabilityKind, Catalog};
pub use event::DomainEvent;
pub use upstream::{HealthCheckResult, HealthStatus, UpstreamState, UpstreamStatus};
