//! Shared test utilities and fixtures for slop-mcp integration tests.

use std::future::Future;
use std::time::Duration;

/// Mock upstream servers and the in-memory launcher
pub mod mock;
pub use mock::{DuplexLauncher, MockUpstream};

/// Fail the test instead of hanging
pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("test step timed out")
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// First text block of a `tools/call` result, raw JSON or rmcp typed
pub fn text_of<T: serde::Serialize>(result: &T) -> String {
    let value = serde_json::to_value(result).unwrap();
    value["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Gateway fixtures
pub mod gateway {
    use std::sync::Arc;

    use rmcp::{
        model::*,
        service::{NotificationContext, RunningService},
        ClientHandler, RoleClient, ServiceExt,
    };
    use slop_core::{GatewaySettings, SlopConfig, UpstreamConfig};
    use slop_gateway::{server, Orchestrator, SessionGateway};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use crate::mock::{DuplexLauncher, MockUpstream};

    /// Upstream definition the duplex launcher can serve
    pub fn upstream_config(name: &str) -> UpstreamConfig {
        UpstreamConfig::stdio(name, format!("mock-{name}"), Vec::new())
    }

    pub fn config(upstreams: Vec<UpstreamConfig>, gateway: GatewaySettings) -> SlopConfig {
        SlopConfig {
            upstreams: upstreams.into_iter().map(|u| (u.name.clone(), u)).collect(),
            gateway,
        }
    }

    /// Orchestrator over `mocks`, already started
    pub async fn start(
        mocks: &[MockUpstream],
        upstreams: Vec<UpstreamConfig>,
        settings: GatewaySettings,
    ) -> Orchestrator {
        let launcher = Arc::new(DuplexLauncher::new(mocks));
        let orchestrator = Orchestrator::with_launcher(config(upstreams, settings), launcher);
        orchestrator.start().await;
        orchestrator
    }

    pub fn client_info(name: &str) -> ClientInfo {
        ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: name.to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A connected MCP client plus the token that stops its server side
    pub struct TestClient<H: ClientHandler> {
        pub client: RunningService<RoleClient, H>,
        pub server_shutdown: CancellationToken,
    }

    impl<H: ClientHandler> std::ops::Deref for TestClient<H> {
        type Target = RunningService<RoleClient, H>;
        fn deref(&self) -> &Self::Target {
            &self.client
        }
    }

    /// Connect `handler` as an MCP client to `gateway` over an in-memory pipe
    pub async fn connect_with<H: ClientHandler>(
        gateway: Arc<SessionGateway>,
        handler: H,
    ) -> Result<TestClient<H>, String> {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server_shutdown = CancellationToken::new();
        let shutdown = server_shutdown.clone();
        tokio::spawn(async move {
            let _ = server::serve_io(gateway, server_read, server_write, shutdown).await;
        });

        let (client_read, client_write) = tokio::io::split(client_io);
        let client = handler
            .serve((client_read, client_write))
            .await
            .map_err(|e| e.to_string())?;
        Ok(TestClient {
            client,
            server_shutdown,
        })
    }

    pub async fn connect(gateway: Arc<SessionGateway>) -> TestClient<ClientInfo> {
        connect_with(gateway, client_info("test-client"))
            .await
            .expect("client should connect")
    }

    /// Client that counts list_changed notifications
    #[derive(Clone, Default)]
    pub struct ListChangedClient {
        pub tools_changed: Arc<Notify>,
    }

    impl ClientHandler for ListChangedClient {
        fn get_info(&self) -> ClientInfo {
            client_info("list-changed-client")
        }

        fn on_tool_list_changed(
            &self,
            _context: NotificationContext<RoleClient>,
        ) -> impl std::future::Future<Output = ()> + Send + '_ {
            self.tools_changed.notify_one();
            async {}
        }
    }

    /// `tools/call` params for the rmcp client
    pub fn call(name: &str, arguments: serde_json::Value) -> CallToolRequestParams {
        serde_json::from_value(serde_json::json!({ "name": name, "arguments": arguments }))
            .expect("valid call params")
    }
}
