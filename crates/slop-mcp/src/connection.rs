//! Upstream Connection
//!
//! One rmcp client session to one upstream MCP server, plus the gateway's
//! own request discipline on top of it.
//!
//! ```text
//!   send() ──┐  submit lock             ┌──► rmcp RunningService<RoleClient>
//!            ├─ permit, ticket, handle ─┤      (framing, ids, handshake,
//!            │                          │       ping / roots answered)
//!            ◄── reply, in ticket order ┘
//!                                       UpstreamClient (ClientHandler)
//!                                        ├──► list_changed → UpstreamNotice
//!                                        └──► notifications/message → tracing
//! ```
//!
//! Backpressure is a per-connection semaphore with `max_in_flight` permits;
//! when none is free `send` fails fast with `Overloaded`. Replies are handed
//! to callers in submission order (see `ordering`), but never held past the
//! caller's own deadline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rmcp::model::{
    ClientInfo, ClientNotification, ClientRequest, ErrorCode, Implementation, InitializeResult,
    LoggingLevel, LoggingMessageNotificationParam,
};
use rmcp::service::{
    NotificationContext, Peer, PeerRequestOptions, QuitReason, RequestHandle, RunningService,
    ServiceError,
};
use rmcp::{ClientHandler, RoleClient, ServiceExt};
use serde_json::{Map, Value};
use slop_core::{Capability, CapabilityKind, Catalog, OrchestratorError, UpstreamConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ordering::OrderGate;
use crate::transport::{BoxedReader, Channel, UpstreamTransport};

/// How long `close` waits for rmcp to tear the session down
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type UpstreamService = RunningService<RoleClient, UpstreamClient>;

/// Knobs for [`UpstreamConnection::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bounds the whole handshake, catalog fetch included
    pub connect_timeout: Duration,
    /// Per-family timeout for `*/list`
    pub list_timeout: Duration,
    pub max_in_flight: usize,
    /// Hint returned with `Overloaded`
    pub retry_after: Duration,
    pub client_name: String,
    pub client_version: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: slop_core::config::DEFAULT_CONNECT_TIMEOUT,
            list_timeout: slop_core::config::DEFAULT_REQUEST_TIMEOUT,
            max_in_flight: slop_core::config::DEFAULT_MAX_IN_FLIGHT,
            retry_after: Duration::from_secs(1),
            client_name: slop_core::branding::APP_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ConnectOptions {
    pub fn for_upstream(config: &UpstreamConfig) -> Self {
        Self {
            connect_timeout: config.effective_connect_timeout(),
            max_in_flight: config.max_in_flight,
            ..Default::default()
        }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// What the upstream said about itself in `initialize`
#[derive(Debug, Clone, Default)]
pub struct ServerIdentity {
    pub name: String,
    pub version: Option<String>,
    pub protocol_version: String,
    pub capabilities: Value,
    pub instructions: Option<String>,
}

impl ServerIdentity {
    fn from_initialize(result: &InitializeResult) -> Self {
        Self {
            name: result.server_info.name.clone(),
            version: Some(result.server_info.version.clone()).filter(|v| !v.is_empty()),
            protocol_version: result.protocol_version.to_string(),
            capabilities: serde_json::to_value(&result.capabilities).unwrap_or(Value::Null),
            instructions: result.instructions.clone(),
        }
    }

    /// Whether the server declared the capability family
    pub fn supports(&self, kind: CapabilityKind) -> bool {
        self.capabilities
            .get(kind.list_field())
            .is_some_and(|v| !v.is_null())
    }
}

/// Out-of-band events from the upstream
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamNotice {
    /// `notifications/<kind>/list_changed`
    ListChanged(CapabilityKind),
    /// The session died without [`UpstreamConnection::close`] being called
    Closed { reason: String },
}

/// Result of a successful [`UpstreamConnection::connect`]
pub struct Connected {
    pub connection: UpstreamConnection,
    pub catalog: Catalog,
    pub notices: mpsc::UnboundedReceiver<UpstreamNotice>,
}

/// rmcp client handler: identifies the gateway and relays server notifications
#[derive(Clone)]
pub struct UpstreamClient {
    upstream: String,
    info: ClientInfo,
    notices: mpsc::UnboundedSender<UpstreamNotice>,
}

impl UpstreamClient {
    fn new(upstream: &str, options: &ConnectOptions, notices: mpsc::UnboundedSender<UpstreamNotice>) -> Self {
        Self {
            upstream: upstream.to_string(),
            info: ClientInfo {
                client_info: Implementation {
                    name: options.client_name.clone(),
                    version: options.client_version.clone(),
                    ..Default::default()
                },
                ..Default::default()
            },
            notices,
        }
    }

    fn list_changed(&self, kind: CapabilityKind) {
        debug!(upstream = %self.upstream, kind = %kind, "[Upstream] List changed");
        let _ = self.notices.send(UpstreamNotice::ListChanged(kind));
    }
}

impl ClientHandler for UpstreamClient {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.list_changed(CapabilityKind::Tool);
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.list_changed(CapabilityKind::Prompt);
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.list_changed(CapabilityKind::Resource);
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let upstream = self.upstream.as_str();
        let data = match params.data {
            Value::String(s) => s,
            other => other.to_string(),
        };
        match params.level {
            LoggingLevel::Debug => debug!(upstream, "[Upstream log] {}", data),
            LoggingLevel::Info | LoggingLevel::Notice => info!(upstream, "[Upstream log] {}", data),
            LoggingLevel::Warning => warn!(upstream, "[Upstream log] {}", data),
            level => error!(upstream, level = ?level, "[Upstream log] {}", data),
        }
    }
}

/// Handle to a live upstream session. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamConnection {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    description: String,
    peer: Peer<RoleClient>,
    identity: Option<ServerIdentity>,
    /// Held while a request is handed to rmcp and its ticket issued
    submit: tokio::sync::Mutex<()>,
    order: OrderGate,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    retry_after: Duration,
    /// Requests whose reply has not arrived yet
    awaiting: AtomicUsize,
    /// Set by `close()`; suppresses the `Closed` notice
    shutting_down: AtomicBool,
    close_reason: Mutex<Option<String>>,
    /// Tells the supervisor task to stop the rmcp service
    stop: CancellationToken,
    /// Cancelled once the rmcp service has fully stopped
    stopped: CancellationToken,
    notices: mpsc::UnboundedSender<UpstreamNotice>,
}

impl Shared {
    fn unavailable(&self, reason: impl ToString) -> OrchestratorError {
        OrchestratorError::unavailable(&self.name, reason)
    }

    fn closed_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Record why the session ended; first reason wins
    fn mark_closed(&self, reason: &str) {
        let mut slot = self.close_reason.lock();
        if slot.is_none() {
            *slot = Some(reason.to_string());
        }
    }

    fn translate(&self, err: ServiceError) -> OrchestratorError {
        match err {
            ServiceError::McpError(e) => OrchestratorError::UpstreamError {
                upstream: self.name.clone(),
                code: i64::from(e.code.0),
                message: e.message.into_owned(),
                data: e.data,
            },
            ServiceError::Timeout { timeout } => OrchestratorError::UpstreamTimeout {
                upstream: self.name.clone(),
                timeout,
            },
            other => self.unavailable(self.closed_reason().unwrap_or_else(|| other.to_string())),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// One outstanding request
///
/// Dropped before its reply arrives (timeout, caller cancelled) it tells the
/// upstream with `notifications/cancelled` through rmcp's request handle.
struct InFlight {
    shared: Arc<Shared>,
    handle: Option<RequestHandle<RoleClient>>,
    reason: &'static str,
    permit: Option<OwnedSemaphorePermit>,
}

impl InFlight {
    async fn reply(&mut self) -> Result<rmcp::model::ServerResult, ServiceError> {
        match self.handle.as_mut() {
            Some(handle) => (&mut handle.rx)
                .await
                .map_err(|_| ServiceError::TransportClosed)?,
            None => Err(ServiceError::TransportClosed),
        }
    }

    /// The reply is in: free the slot without cancelling anything
    fn answered(&mut self) {
        if self.handle.take().is_some() {
            self.shared.awaiting.fetch_sub(1, Ordering::AcqRel);
        }
        self.permit.take();
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.awaiting.fetch_sub(1, Ordering::AcqRel);
        if self.shared.closed_reason().is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let upstream = self.shared.name.clone();
        let reason = self.reason;
        let id = handle.id.clone();
        runtime.spawn(async move {
            match handle.cancel(Some(reason.to_string())).await {
                Ok(()) => debug!(upstream = %upstream, request_id = %id, reason, "[Upstream] Sent cancellation"),
                Err(e) => trace!(upstream = %upstream, request_id = %id, error = %e, "[Upstream] Cancellation not delivered"),
            }
        });
    }
}

/// Wrap `method` + `params` into the typed request rmcp sends
///
/// Methods rmcp has no type for travel as a custom request.
fn client_request(method: &str, params: Option<Value>) -> Result<ClientRequest, OrchestratorError> {
    let mut envelope = Map::new();
    envelope.insert("method".to_string(), Value::String(method.to_string()));
    if let Some(params) = params {
        envelope.insert("params".to_string(), params);
    }
    serde_json::from_value(Value::Object(envelope))
        .map_err(|e| OrchestratorError::InvalidRequest(format!("bad {method} request: {e}")))
}

impl UpstreamConnection {
    /// Run the MCP handshake over `transport` and fetch the catalog
    ///
    /// Any failure, including the connect timeout, is `UpstreamUnavailable`;
    /// the transport is torn down before returning.
    pub async fn connect(
        name: &str,
        transport: UpstreamTransport,
        options: &ConnectOptions,
    ) -> Result<Connected, OrchestratorError> {
        let UpstreamTransport {
            channel,
            diagnostics,
            description,
        } = transport;
        info!(upstream = %name, transport = %description, "[Upstream] Connecting");

        if let Some(stderr) = diagnostics {
            tokio::spawn(log_diagnostics(name.to_string(), stderr));
        }

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let client = UpstreamClient::new(name, options, notice_tx.clone());

        let handshake = async {
            let served = match channel {
                Channel::Child(child) => client.serve(child).await,
                Channel::Stream(reader, writer) => client.serve((reader, writer)).await,
            };
            let service = served.map_err(|e| {
                OrchestratorError::unavailable(name, format!("handshake failed: {e}"))
            })?;
            let connection = Self::start(name, description, service, options, notice_tx);
            match connection.fetch_catalog(options.list_timeout).await {
                Ok(catalog) => Ok((connection, catalog)),
                Err(e) => {
                    connection.close(Duration::ZERO).await;
                    Err(OrchestratorError::unavailable(
                        name,
                        format!("catalog fetch failed: {e}"),
                    ))
                }
            }
        };

        match tokio::time::timeout(options.connect_timeout, handshake).await {
            Ok(Ok((connection, catalog))) => {
                info!(
                    upstream = %name,
                    server = %connection.identity().map(|i| i.name.as_str()).unwrap_or("?"),
                    tools = catalog.tools.len(),
                    prompts = catalog.prompts.len(),
                    resources = catalog.resources.len(),
                    "[Upstream] Connected"
                );
                Ok(Connected {
                    connection,
                    catalog,
                    notices,
                })
            }
            Ok(Err(e)) => {
                error!(upstream = %name, error = %e, "[Upstream] Connect failed");
                Err(e)
            }
            Err(_) => {
                // Dropping the handshake future dropped the transport (and the child with it)
                let reason = format!(
                    "handshake timed out after {}ms",
                    options.connect_timeout.as_millis()
                );
                error!(upstream = %name, "[Upstream] {}", reason);
                Err(OrchestratorError::unavailable(name, reason))
            }
        }
    }

    /// Wrap a running rmcp session and hand it to a supervisor task
    fn start(
        name: &str,
        description: String,
        service: UpstreamService,
        options: &ConnectOptions,
        notices: mpsc::UnboundedSender<UpstreamNotice>,
    ) -> Self {
        let peer = service.peer().clone();
        let identity = peer.peer_info().map(ServerIdentity::from_initialize);
        if let Some(identity) = &identity {
            debug!(
                upstream = %name,
                server = %identity.name,
                protocol_version = %identity.protocol_version,
                "[Upstream] Initialized"
            );
        }
        let max_in_flight = options.max_in_flight.max(1);

        let shared = Arc::new(Shared {
            name: name.to_string(),
            description,
            peer,
            identity,
            submit: tokio::sync::Mutex::new(()),
            order: OrderGate::new(),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            retry_after: options.retry_after,
            awaiting: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            stop: CancellationToken::new(),
            stopped: CancellationToken::new(),
            notices,
        });

        tokio::spawn(supervise(
            Arc::downgrade(&shared),
            service,
            shared.stop.clone(),
            shared.stopped.clone(),
        ));

        Self { shared }
    }

    /// Fetch every capability family the server declared
    ///
    /// A family answered with "method not found" is treated as empty.
    pub async fn fetch_catalog(&self, timeout: Duration) -> Result<Catalog, OrchestratorError> {
        let mut catalog = Catalog::new();
        for kind in CapabilityKind::ALL {
            if !self.identity().is_some_and(|i| i.supports(kind)) {
                continue;
            }
            match self.list(kind, timeout).await {
                Ok(items) => catalog.set_kind(kind, items),
                Err(OrchestratorError::UpstreamError { code, message, .. })
                    if code == i64::from(ErrorCode::METHOD_NOT_FOUND.0) =>
                {
                    warn!(upstream = %self.shared.name, kind = %kind, message = %message, "[Upstream] Declared capability not listable");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(catalog)
    }

    /// Every item of one family; rmcp follows `nextCursor`
    pub async fn list(
        &self,
        kind: CapabilityKind,
        timeout: Duration,
    ) -> Result<Vec<Capability>, OrchestratorError> {
        let shared = &self.shared;
        if let Some(reason) = shared.closed_reason() {
            return Err(shared.unavailable(reason));
        }
        let peer = &shared.peer;

        let listing = async {
            let raw: Vec<Value> = match kind {
                CapabilityKind::Tool => to_values(peer.list_all_tools().await?),
                CapabilityKind::Prompt => to_values(peer.list_all_prompts().await?),
                CapabilityKind::Resource => to_values(peer.list_all_resources().await?),
            };
            Ok::<_, ServiceError>(raw)
        };

        let raw = match tokio::time::timeout(timeout, listing).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(shared.translate(e)),
            Err(_) => {
                return Err(OrchestratorError::UpstreamTimeout {
                    upstream: shared.name.clone(),
                    timeout,
                })
            }
        };
        Ok(raw
            .into_iter()
            .filter_map(|item| Capability::from_raw(kind, item))
            .collect())
    }

    /// Send one request and wait for its correlated response
    ///
    /// Fails fast with `Overloaded` when `max_in_flight` requests are already
    /// outstanding. Dropping the returned future cancels the request upstream.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, OrchestratorError> {
        self.send_tracked(method, params, timeout, || {}).await
    }

    /// [`send`](Self::send), calling `on_answer` the moment the upstream's
    /// reply arrives, before it waits for its delivery turn
    pub async fn send_tracked(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        on_answer: impl FnOnce() + Send,
    ) -> Result<Value, OrchestratorError> {
        let shared = &self.shared;
        if let Some(reason) = shared.closed_reason() {
            return Err(shared.unavailable(reason));
        }
        if shared.shutting_down.load(Ordering::Acquire) {
            return Err(shared.unavailable("connection closing"));
        }
        let deadline = Instant::now() + timeout;
        let request = client_request(method, params)?;

        let permit = shared
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| OrchestratorError::Overloaded {
                upstream: shared.name.clone(),
                retry_after: shared.retry_after,
            })?;

        let (handle, mut ticket) = {
            let _submit = shared.submit.lock().await;
            let handle = shared
                .peer
                .send_cancellable_request(request, PeerRequestOptions::no_options())
                .await
                .map_err(|e| shared.translate(e))?;
            (handle, shared.order.issue())
        };
        shared.awaiting.fetch_add(1, Ordering::AcqRel);
        trace!(upstream = %shared.name, request_id = %handle.id, method, "[Upstream] Request sent");

        let mut in_flight = InFlight {
            shared: shared.clone(),
            handle: Some(handle),
            reason: "request cancelled",
            permit: Some(permit),
        };

        let outcome = match tokio::time::timeout_at(deadline, in_flight.reply()).await {
            Ok(reply) => reply,
            Err(_) => {
                in_flight.reason = "timeout";
                warn!(
                    upstream = %shared.name,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "[Upstream] Request timed out"
                );
                return Err(OrchestratorError::UpstreamTimeout {
                    upstream: shared.name.clone(),
                    timeout,
                });
            }
        };
        in_flight.answered();
        on_answer();

        let outcome = match outcome {
            Ok(result) => serde_json::to_value(&result)
                .map_err(|e| shared.unavailable(format!("unreadable {method} result: {e}"))),
            Err(e) => Err(shared.translate(e)),
        };

        // Answers from the upstream keep submission order; local failures don't wait
        if matches!(
            outcome,
            Ok(_) | Err(OrchestratorError::UpstreamError { .. })
        ) && tokio::time::timeout_at(deadline, ticket.wait_turn())
            .await
            .is_err()
        {
            debug!(upstream = %shared.name, method, "[Upstream] Delivering ahead of an earlier request");
        }
        outcome
    }

    /// Fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), OrchestratorError> {
        let shared = &self.shared;
        if let Some(reason) = shared.closed_reason() {
            return Err(shared.unavailable(reason));
        }
        let mut envelope = Map::new();
        envelope.insert("method".to_string(), Value::String(method.to_string()));
        if let Some(params) = params {
            envelope.insert("params".to_string(), params);
        }
        let notification: ClientNotification = serde_json::from_value(Value::Object(envelope))
            .map_err(|e| OrchestratorError::InvalidRequest(format!("bad {method} notification: {e}")))?;
        shared
            .peer
            .send_notification(notification)
            .await
            .map_err(|e| shared.translate(e))
    }

    /// Liveness check
    pub async fn ping(&self, timeout: Duration) -> Result<(), OrchestratorError> {
        self.send("ping", None, timeout).await.map(|_| ())
    }

    /// Graceful shutdown
    ///
    /// Rejects new requests, gives in-flight ones up to `grace` to finish,
    /// then stops the rmcp session, which fails whatever is left and
    /// terminates the child process.
    pub async fn close(&self, grace: Duration) {
        let shared = &self.shared;
        if shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let in_flight = self.in_flight();
        if in_flight > 0 && !grace.is_zero() {
            debug!(upstream = %shared.name, in_flight, "[Upstream] Draining before close");
            let all = shared.max_in_flight as u32;
            if tokio::time::timeout(grace, shared.permits.acquire_many(all))
                .await
                .is_err()
            {
                warn!(upstream = %shared.name, "[Upstream] Grace period expired with requests in flight");
            }
        }

        shared.mark_closed("connection closed");
        shared.stop.cancel();
        if tokio::time::timeout(TEARDOWN_TIMEOUT, shared.stopped.cancelled())
            .await
            .is_err()
        {
            warn!(upstream = %shared.name, "[Upstream] Session did not stop in time");
        }
        info!(upstream = %shared.name, "[Upstream] Closed");
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn description(&self) -> &str {
        &self.shared.description
    }

    pub fn identity(&self) -> Option<&ServerIdentity> {
        self.shared.identity.as_ref()
    }

    /// Requests currently holding an in-flight slot
    pub fn in_flight(&self) -> usize {
        self.shared.max_in_flight - self.shared.permits.available_permits()
    }

    /// Requests still awaiting an upstream answer
    pub fn pending_responses(&self) -> usize {
        self.shared.awaiting.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutting_down.load(Ordering::Acquire) || self.shared.closed_reason().is_some()
    }
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("name", &self.shared.name)
            .field("transport", &self.shared.description)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

fn to_values<T: serde::Serialize>(items: Vec<T>) -> Vec<Value> {
    items
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect()
}

/// Owns the rmcp service until it stops on its own or is told to
async fn supervise(
    shared: Weak<Shared>,
    service: UpstreamService,
    stop: CancellationToken,
    stopped: CancellationToken,
) {
    let cancel_service = service.cancellation_token();
    let mut waiting = Box::pin(service.waiting());
    let quit = tokio::select! {
        quit = &mut waiting => quit,
        _ = stop.cancelled() => {
            cancel_service.cancel();
            waiting.await
        }
    };

    let reason = match quit {
        Ok(QuitReason::Closed) => "upstream closed the connection".to_string(),
        Ok(QuitReason::Cancelled) => "connection closed".to_string(),
        Ok(other) => format!("client session ended: {other:?}"),
        Err(e) => format!("client session failed: {e}"),
    };

    if let Some(shared) = shared.upgrade() {
        let deliberate = shared.shutting_down.load(Ordering::Acquire);
        shared.mark_closed(&reason);
        if !deliberate {
            warn!(upstream = %shared.name, reason = %reason, "[Upstream] Connection lost");
            let _ = shared.notices.send(UpstreamNotice::Closed { reason });
        }
    }
    stopped.cancel();
}

async fn log_diagnostics(upstream: String, stderr: BoxedReader) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(upstream = %upstream, "[stderr] {}", line);
    }
}
