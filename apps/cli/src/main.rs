//! slop-mcp command line entry point

mod cli;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use slop_core::{CapabilityKind, SlopConfig};
use slop_gateway::{HttpConfig, Orchestrator};
use tracing::{error, info};

use cli::{Cli, Commands, Transport};

fn load_config(project: Option<&Path>, explicit: &[PathBuf]) -> Result<SlopConfig> {
    let project_dir = match project {
        Some(dir) => Some(dir.to_path_buf()),
        None => std::env::current_dir().ok(),
    };
    SlopConfig::load(project_dir.as_deref(), explicit).context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init_tracing(cli.verbose);

    let config = load_config(cli.project.as_deref(), &cli.configs)?;

    match cli.command {
        Commands::Config => {
            let rendered = serde_json::to_string_pretty(&config.to_file())
                .context("failed to render configuration")?;
            println!("{rendered}");
            Ok(())
        }
        Commands::List { json } => list(config, json).await,
        Commands::Serve {
            transport,
            host,
            port,
        } => serve(config, transport, HttpConfig {
            host,
            port,
            ..Default::default()
        })
        .await,
    }
}

async fn serve(config: SlopConfig, transport: Transport, http: HttpConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstreams = config.upstreams.len(),
        "Starting slop-mcp"
    );
    let orchestrator = Orchestrator::new(config);
    let report = orchestrator.start().await;
    info!(
        ready = report.ready.len(),
        failed = report.failed.len(),
        "Upstreams connected"
    );

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let served = match transport {
        Transport::Stdio => orchestrator.serve_stdio().await,
        Transport::Http => orchestrator.serve_http(http).await,
    };
    if let Err(e) = &served {
        error!(error = %e, "Server stopped with error");
    }
    orchestrator.shutdown().await;
    served
}

async fn list(config: SlopConfig, as_json: bool) -> Result<()> {
    let orchestrator = Orchestrator::new(config);
    orchestrator.start().await;

    let statuses = orchestrator.upstreams().statuses();
    let snapshot = orchestrator.registry().snapshot();

    if as_json {
        let listing = |kind: CapabilityKind| -> Vec<serde_json::Value> {
            snapshot
                .entries(kind)
                .map(|e| {
                    let mut definition = e.exposed_definition();
                    if let Some(obj) = definition.as_object_mut() {
                        obj.insert("upstream".to_string(), json!(e.owner));
                    }
                    definition
                })
                .collect()
        };
        let output = json!({
            "upstreams": statuses,
            "tools": listing(CapabilityKind::Tool),
            "prompts": listing(CapabilityKind::Prompt),
            "resources": listing(CapabilityKind::Resource),
            "conflicts": snapshot.conflicts().iter().map(|c| json!({
                "kind": c.kind.as_str(),
                "name": c.name,
                "owner": c.owner,
                "rejected": c.rejected,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{:<24} {:<10} {:>6} {:>8} {:>10}  ERROR", "UPSTREAM", "STATE", "TOOLS", "PROMPTS", "RESOURCES");
        for status in &statuses {
            println!(
                "{:<24} {:<10} {:>6} {:>8} {:>10}  {}",
                status.name,
                status.state.as_str(),
                status.tools,
                status.prompts,
                status.resources,
                status.last_error.as_deref().unwrap_or("")
            );
        }
        for kind in CapabilityKind::ALL {
            if snapshot.len(kind) == 0 {
                continue;
            }
            println!("\n{}s:", kind.as_str());
            for entry in snapshot.entries(kind) {
                println!("  {:<40} [{}]", entry.exposed, entry.owner);
            }
        }
        for conflict in snapshot.conflicts() {
            println!(
                "\nconflict: {} '{}' served by {}, also offered by {}",
                conflict.kind, conflict.name, conflict.owner, conflict.rejected
            );
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
