use std::path::Path;

use slop_core::branding;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATES: [&str; 4] = ["slop_core", "slop_mcp", "slop_gateway", "slop_cli"];

/// Filter used when RUST_LOG is not set
fn default_filter(verbosity: u8) -> String {
    let (base, ours) = match verbosity {
        0 => return "info".to_string(),
        1 => ("info", "debug"),
        _ => ("debug", "trace"),
    };
    CRATES
        .iter()
        .fold(base.to_string(), |acc, krate| format!("{acc},{krate}={ours}"))
}

fn daily_appender(dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(branding::LOG_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Console logs go to stderr since stdout carries the stdio transport.
/// Files rotate daily under the user data dir
/// (`~/.local/share/slop-mcp/logs/slop-mcp.<date>.log` on Linux).
///
/// Keep the returned guard alive until exit so buffered lines get flushed.
pub fn init_tracing(verbosity: u8) -> Option<WorkerGuard> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let console = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true);

    let (file, guard) = match daily_appender(&branding::logs_dir()) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("warning: file logging disabled ({e})");
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    guard
}
