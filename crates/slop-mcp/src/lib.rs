//! # slop-mcp upstream library
//!
//! Everything needed to talk to one upstream MCP server:
//! - Launchers for stdio child processes and TCP sockets
//! - [`UpstreamConnection`]: an rmcp client session with per-request
//!   timeouts, cancellation, in-flight backpressure and in-order delivery
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   launch()   ┌──────────────────┐  connect()  ┌──────────────────────┐
//! │ UpstreamConfig│ ──────────► │ UpstreamTransport │ ──────────► │ UpstreamConnection    │
//! └──────────────┘   Launcher   │ child or stream   │  rmcp serve │ send / notify / close │
//!                               └──────────────────┘  + catalog   └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use slop_mcp::{ConnectOptions, DefaultLauncher, Launcher, UpstreamConnection};
//! use slop_core::UpstreamConfig;
//!
//! let config = UpstreamConfig::stdio("fs", "npx", vec![
//!     "-y".to_string(),
//!     "@modelcontextprotocol/server-filesystem".to_string(),
//! ]);
//! let transport = DefaultLauncher::new().launch(&config).await?;
//! let connected = UpstreamConnection::connect("fs", transport, &ConnectOptions::for_upstream(&config)).await?;
//!
//! let result = connected.connection.send(
//!     "tools/call",
//!     Some(json!({"name": "read_file", "arguments": {"path": "README.md"}})),
//!     Duration::from_secs(30),
//! ).await?;
//! ```

pub mod connection;
mod ordering;
pub mod transport;

pub use connection::{
    ConnectOptions, Connected, ServerIdentity, UpstreamClient, UpstreamConnection, UpstreamNotice,
};
pub use transport::{
    BoxedReader, BoxedWriter, DefaultLauncher, LaunchError, Launcher, ProcessLauncher,
    TcpLauncher, UpstreamTransport,
};
