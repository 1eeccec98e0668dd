//! Gateway Server
//!
//! Client-facing transports: stdio (one session, ends on EOF) and
//! streamable HTTP at `/mcp` (stateful, one session per `Mcp-Session-Id`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use serde::Serialize;
use slop_core::{branding, UpstreamStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::mcp::SlopGatewayHandler;
use crate::session::SessionGateway;

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub sse_keep_alive: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: branding::DEFAULT_HTTP_PORT,
            sse_keep_alive: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

/// Serve one session over an arbitrary byte stream until EOF or shutdown
pub async fn serve_io<R, W>(
    gateway: Arc<SessionGateway>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let service = SlopGatewayHandler::new(gateway)
        .serve((reader, writer))
        .await
        .context("MCP handshake with client failed")?;

    tokio::select! {
        reason = service.waiting() => {
            let reason = reason.context("MCP session task failed")?;
            debug!(?reason, "[Server] Client session ended");
        }
        _ = shutdown.cancelled() => {
            debug!("[Server] Shutdown requested, dropping client session");
        }
    }
    Ok(())
}

/// Serve the single stdio client
pub async fn run_stdio(gateway: Arc<SessionGateway>, shutdown: CancellationToken) -> Result<()> {
    info!("[Server] Serving MCP over stdio");
    let (stdin, stdout) = rmcp::transport::stdio();
    serve_io(gateway, stdin, stdout, shutdown).await
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub upstreams: Vec<UpstreamStatus>,
}

async fn health(State(gateway): State<Arc<SessionGateway>>) -> Json<HealthResponse> {
    debug!("[Server] Health check");
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: gateway.session_count(),
        upstreams: gateway.upstreams().statuses(),
    })
}

/// `/mcp` (streamable HTTP) plus `/health`
pub fn http_router(
    gateway: Arc<SessionGateway>,
    config: &HttpConfig,
    shutdown: CancellationToken,
) -> Router {
    let factory_gateway = gateway.clone();
    let mcp_service = StreamableHttpService::new(
        move || {
            debug!("[Server] Creating handler instance for MCP session");
            Ok(SlopGatewayHandler::new(factory_gateway.clone()))
        },
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig {
            stateful_mode: true,
            sse_keep_alive: Some(config.sse_keep_alive),
            sse_retry: Some(Duration::from_secs(3)),
            cancellation_token: shutdown,
        },
    );

    Router::new()
        .route("/health", get(health))
        .with_state(gateway)
        .nest_service(branding::MCP_HTTP_PATH, mcp_service)
        .layer(TraceLayer::new_for_http())
}

/// Serve streamable HTTP until shutdown
pub async fn run_http(
    gateway: Arc<SessionGateway>,
    config: HttpConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = config.addr()?;
    let router = http_router(gateway, &config, shutdown.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "[Server] Serving MCP over HTTP at http://{}{}",
        addr,
        branding::MCP_HTTP_PATH
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;
    info!("[Server] HTTP server stopped");
    Ok(())
}
