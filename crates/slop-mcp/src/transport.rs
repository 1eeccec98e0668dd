//! Launchers turn an upstream definition into an rmcp client transport
//!
//! Child processes go through rmcp's [`TokioChildProcess`]; sockets and the
//! in-memory pipes used in tests are plain read/write halves that rmcp frames
//! itself. Either way the connection layer only ever sees an
//! [`UpstreamTransport`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use slop_core::{TransportKind, UpstreamConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("command not found: {command}. Ensure it's installed and in PATH.")]
    CommandNotFound { command: String },

    #[error("failed to parse command line '{command}': {reason}")]
    BadCommandLine { command: String, reason: String },

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream '{name}' has no launchable target: {reason}")]
    Unsupported { name: String, reason: String },
}

pub(crate) enum Channel {
    /// rmcp owns the child; it is killed when the client service stops
    Child(TokioChildProcess),
    Stream(BoxedReader, BoxedWriter),
}

/// A ready channel to one upstream, not yet handshaken
pub struct UpstreamTransport {
    pub(crate) channel: Channel,
    /// Child stderr, logged line by line
    pub(crate) diagnostics: Option<BoxedReader>,
    /// For logs: `stdio:npx`, `tcp://127.0.0.1:7000`, ...
    pub description: String,
}

impl UpstreamTransport {
    /// Newline-delimited JSON-RPC over any byte pipe
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        description: impl Into<String>,
    ) -> Self {
        Self {
            channel: Channel::Stream(Box::new(reader), Box::new(writer)),
            diagnostics: None,
            description: description.into(),
        }
    }

    pub fn child_pid(&self) -> Option<u32> {
        match &self.channel {
            Channel::Child(child) => child.id(),
            Channel::Stream(..) => None,
        }
    }
}

impl std::fmt::Debug for UpstreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamTransport")
            .field("description", &self.description)
            .field("pid", &self.child_pid())
            .finish()
    }
}

/// Turns an upstream definition into a transport
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, config: &UpstreamConfig) -> Result<UpstreamTransport, LaunchError>;
}

/// Default launcher: stdio child processes and `tcp://` sockets
#[derive(Debug, Clone, Default)]
pub struct DefaultLauncher {
    process: ProcessLauncher,
    tcp: TcpLauncher,
}

impl DefaultLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Launcher for DefaultLauncher {
    async fn launch(&self, config: &UpstreamConfig) -> Result<UpstreamTransport, LaunchError> {
        match config.transport {
            TransportKind::Stdio => self.process.launch(config).await,
            TransportKind::Tcp => self.tcp.launch(config).await,
        }
    }
}

/// Spawns the upstream as a child process and talks over its stdin/stdout
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Split `command` + `args` into program and argument list
    ///
    /// A command with embedded spaces and no args (`"npx -y pkg"`) is split
    /// with shell quoting rules.
    pub fn command_line(config: &UpstreamConfig) -> Result<(String, Vec<String>), LaunchError> {
        let command = config.command.clone().unwrap_or_default();
        if !config.args.is_empty() || !command.contains(char::is_whitespace) {
            return Ok((command, config.args.clone()));
        }
        let mut words = shell_words::split(&command).map_err(|e| LaunchError::BadCommandLine {
            command: command.clone(),
            reason: e.to_string(),
        })?;
        if words.is_empty() {
            return Err(LaunchError::BadCommandLine {
                command,
                reason: "empty command".to_string(),
            });
        }
        let program = words.remove(0);
        Ok((program, words))
    }

    fn resolve(program: &str) -> Result<PathBuf, LaunchError> {
        which::which(program)
            .or_else(|_| which::which(format!("{program}.exe")))
            .map_err(|_| LaunchError::CommandNotFound {
                command: program.to_string(),
            })
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, config: &UpstreamConfig) -> Result<UpstreamTransport, LaunchError> {
        let (program, args) = Self::command_line(config)?;
        let path = Self::resolve(&program)?;

        debug!(upstream = %config.name, path = ?path, args = ?args, "[Launcher] Spawning upstream");

        let env = config.env.clone();
        let command = Command::new(&path).configure(move |cmd| {
            cmd.args(&args).envs(&env).kill_on_drop(true);
            // Own process group so a Ctrl-C aimed at the gateway doesn't hit upstreams first
            #[cfg(unix)]
            cmd.process_group(0);
        });

        let (child, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(LaunchError::Spawn)?;

        info!(upstream = %config.name, pid = ?child.id(), "[Launcher] Upstream process started");

        Ok(UpstreamTransport {
            channel: Channel::Child(child),
            diagnostics: stderr.map(|s| Box::new(s) as BoxedReader),
            description: format!("stdio:{program}"),
        })
    }
}

/// Connects to an upstream already listening on `tcp://host:port`
#[derive(Debug, Clone, Default)]
pub struct TcpLauncher;

#[async_trait]
impl Launcher for TcpLauncher {
    async fn launch(&self, config: &UpstreamConfig) -> Result<UpstreamTransport, LaunchError> {
        let raw = config.url.as_deref().ok_or_else(|| LaunchError::Unsupported {
            name: config.name.clone(),
            reason: "missing url".to_string(),
        })?;
        let parsed = url::Url::parse(raw).map_err(|e| LaunchError::Unsupported {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;
        let (Some(host), Some(port)) = (parsed.host_str(), parsed.port()) else {
            return Err(LaunchError::Unsupported {
                name: config.name.clone(),
                reason: format!("'{raw}' is not tcp://host:port"),
            });
        };
        let addr = format!("{host}:{port}");

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| LaunchError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();

        info!(upstream = %config.name, addr = %addr, "[Launcher] Connected to upstream socket");

        let (reader, writer) = stream.into_split();
        Ok(UpstreamTransport::new(reader, writer, format!("tcp://{addr}")))
    }
}
