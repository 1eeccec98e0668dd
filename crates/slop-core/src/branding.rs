//! Centralized branding constants
//!
//! All product naming and well-known locations come from this module.

use std::path::PathBuf;

/// Binary and server name advertised to MCP clients
pub const APP_NAME: &str = "slop-mcp";

/// Human readable product name
pub const DISPLAY_NAME: &str = "slop-mcp";

/// Directory name under the platform config/data dirs
pub const APP_DIR: &str = "slop-mcp";

/// User-level config file name
pub const USER_CONFIG_FILE: &str = "config.json";

/// Project-level config file name (looked up in the project directory)
pub const PROJECT_CONFIG_FILE: &str = ".slop-mcp.json";

/// Prefix for rotated log files (`slop-mcp.2026-01-22.log`)
pub const LOG_PREFIX: &str = "slop-mcp";

/// Environment variable overriding the default upstream connect timeout
pub const ENV_CONNECT_TIMEOUT: &str = "SLOP_MCP_TIMEOUT";

/// Default port for the streamable HTTP transport
pub const DEFAULT_HTTP_PORT: u16 = 8765;

/// Path the MCP service is mounted at in HTTP mode
pub const MCP_HTTP_PATH: &str = "/mcp";

/// `~/.config/slop-mcp/config.json` (platform equivalent)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(USER_CONFIG_FILE))
}

/// `<project>/.slop-mcp.json`
pub fn project_config_path(project_dir: &std::path::Path) -> PathBuf {
    project_dir.join(PROJECT_CONFIG_FILE)
}

/// Directory for rotated log files
///
/// Falls back to the system temp dir when no data dir is available.
pub fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("logs")
}
