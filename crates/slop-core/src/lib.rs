//! # slop-mcp Core Library
//!
//! Domain types, configuration and the error taxonomy shared by the
//! upstream connection layer and the gateway.
//!
//! ## Modules
//!
//! - `branding` - Product naming, config locations and environment variables
//! - `domain` - Core entities (Upstream state, Capability entries, Catalogs, Events)
//! - `config` - Configuration loading, merging and validation
//! - `error` - Orchestrator error taxonomy and JSON-RPC error codes
//! - `event_bus` - Central event distribution system

pub mod branding;
pub mod config;
pub mod domain;
pub mod error;
pub mod event_bus;

pub use config::{
    CollisionPolicy, ConfigError, ConfigSource, GatewaySettings, RequestClass, RequestTimeouts,
    SlopConfig, TransportKind, UpstreamConfig,
};
pub use domain::*;
pub use error::{OrchestratorError, OrchestratorResult};
pub use event_bus::{EventBus, EventReceiver, EventSender};
