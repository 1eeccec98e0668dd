//! Command line structure

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use slop_core::branding;

/// slop-mcp - one MCP server in front of many
///
/// Connects to every configured upstream MCP server and serves their merged
/// tools, prompts and resources to a single client connection.
#[derive(Parser, Debug)]
#[command(name = "slop-mcp")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Extra configuration file, applied after user and project config (repeatable)
    #[arg(short, long = "config", global = true, value_name = "FILE")]
    pub configs: Vec<PathBuf>,

    /// Project directory holding .slop-mcp.json (defaults to the working directory)
    #[arg(long, global = true, value_name = "DIR", env = "SLOP_MCP_PROJECT")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    #[default]
    Stdio,
    Http,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the merged catalog over MCP
    Serve {
        #[arg(long, value_enum, default_value_t = Transport::Stdio)]
        transport: Transport,

        /// Listen host for the HTTP transport
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Listen port for the HTTP transport
        #[arg(long, default_value_t = branding::DEFAULT_HTTP_PORT)]
        port: u16,
    },

    /// Connect every upstream, print the merged catalog and exit
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the merged, validated configuration
    Config,
}
