//! slop-mcp Gateway
//!
//! MCP server that fronts many upstream MCP servers:
//! - Capability registry merging every upstream's tools, prompts and resources
//! - Request routing with per-class timeouts, fallback and backpressure
//! - Upstream supervision (health checks, degrade, reconnect with backoff)
//! - Per-client sessions with cancellation propagation
//! - stdio and streamable HTTP serving via rmcp

pub mod consumers;
pub mod mcp;
pub mod orchestrator;
pub mod pending;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod upstream;

pub use consumers::{EventJournal, JournalEntry};
pub use mcp::SlopGatewayHandler;
pub use orchestrator::{Orchestrator, StartupReport};
pub use pending::{PendingGuard, PendingRequest, PendingTable};
pub use registry::{CapabilityRegistry, RegisterReport, RegistrySnapshot, ResolvedCapability, ToolHit};
pub use router::{DispatchRequest, Router};
pub use server::HttpConfig;
pub use session::{Session, SessionGateway};
pub use upstream::{UpstreamHandle, UpstreamManager};
