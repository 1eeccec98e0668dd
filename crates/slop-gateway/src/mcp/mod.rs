//! MCP server surface
//!
//! - `handler`: rmcp ServerHandler bound to one client session
//! - `meta`: tools served by the gateway itself

pub mod handler;
pub mod meta;

pub use handler::{request_key, to_mcp_error, SlopGatewayHandler};
