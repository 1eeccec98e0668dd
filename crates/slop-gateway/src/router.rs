//! Router - resolve, translate, send, retry on a fallback
//!
//! Every dispatched request holds a Pending Request entry for its whole
//! life. Transient failures (`UpstreamTimeout`, `UpstreamUnavailable`) move
//! on to the next upstream advertising the same name, up to the retry
//! budget; everything else is surfaced as is.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use slop_core::{
    CapabilityKind, GatewaySettings, OrchestratorError, OrchestratorResult, RequestClass,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pending::{PendingGuard, PendingTable};
use crate::registry::{suggest, CapabilityRegistry};
use crate::upstream::UpstreamManager;

/// A client request on its way to an upstream
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub session: Uuid,
    pub request_id: String,
    pub kind: CapabilityKind,
    /// Exposed name (tool/prompt name or resource URI)
    pub name: String,
    pub arguments: Option<Value>,
    pub cancel: CancellationToken,
}

impl DispatchRequest {
    pub fn new(
        session: Uuid,
        request_id: impl Into<String>,
        kind: CapabilityKind,
        name: impl Into<String>,
    ) -> Self {
        Self {
            session,
            request_id: request_id.into(),
            kind,
            name: name.into(),
            arguments: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Option<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub fn request_class(kind: CapabilityKind) -> RequestClass {
    match kind {
        CapabilityKind::Tool => RequestClass::ToolCall,
        CapabilityKind::Prompt => RequestClass::PromptGet,
        CapabilityKind::Resource => RequestClass::ResourceRead,
    }
}

/// Upstream method and params for invoking `name` (the upstream's own name)
pub fn upstream_request(kind: CapabilityKind, name: &str, arguments: Option<Value>) -> (&'static str, Value) {
    match kind {
        CapabilityKind::Tool => (
            "tools/call",
            json!({ "name": name, "arguments": arguments.unwrap_or_else(|| json!({})) }),
        ),
        CapabilityKind::Prompt => {
            let mut params = json!({ "name": name });
            if let Some(arguments) = arguments {
                params["arguments"] = arguments;
            }
            ("prompts/get", params)
        }
        CapabilityKind::Resource => ("resources/read", json!({ "uri": name })),
    }
}

pub struct Router {
    registry: Arc<CapabilityRegistry>,
    upstreams: Arc<UpstreamManager>,
    pending: PendingTable,
    settings: Arc<GatewaySettings>,
}

impl Router {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        upstreams: Arc<UpstreamManager>,
        pending: PendingTable,
        settings: Arc<GatewaySettings>,
    ) -> Self {
        Self {
            registry,
            upstreams,
            pending,
            settings,
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Per-upstream override, else the class default
    pub fn timeout_for(&self, upstream: &str, class: RequestClass) -> Duration {
        self.upstreams
            .request_timeout(upstream)
            .unwrap_or_else(|| self.settings.timeouts.get(class))
    }

    /// Route through the registry
    pub async fn dispatch(&self, request: DispatchRequest) -> OrchestratorResult<Value> {
        let resolved = self.registry.lookup(request.kind, &request.name)?;
        let budget = self.settings.retry_budget as usize;
        let candidates: Vec<String> = resolved
            .candidates()
            .take(1 + budget)
            .map(str::to_string)
            .collect();
        debug!(
            kind = %request.kind,
            name = %request.name,
            owner = %resolved.owner,
            fallbacks = resolved.fallbacks.len(),
            "[Router] Resolved"
        );
        self.run(&request, &resolved.name, &candidates).await
    }

    /// Route to an explicit upstream, bypassing collision resolution
    pub async fn dispatch_to(&self, upstream: &str, request: DispatchRequest) -> OrchestratorResult<Value> {
        let catalog = self.registry.catalog(upstream).ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("unknown upstream '{upstream}'"))
        })?;
        let items = catalog.of_kind(request.kind);
        if !items.iter().any(|c| c.name == request.name) {
            return Err(OrchestratorError::UnknownCapability {
                kind: request.kind,
                name: request.name.clone(),
                suggestions: suggest(&request.name, items.iter().map(|c| c.name.as_str())),
            });
        }
        self.run(&request, &request.name, &[upstream.to_string()]).await
    }

    async fn run(
        &self,
        request: &DispatchRequest,
        upstream_name: &str,
        candidates: &[String],
    ) -> OrchestratorResult<Value> {
        let Some(first) = candidates.first() else {
            return Err(OrchestratorError::unknown(request.kind, &request.name));
        };
        let class = request_class(request.kind);
        let (method, params) = upstream_request(request.kind, upstream_name, request.arguments.clone());

        let guard = self.pending.insert(
            request.session,
            request.request_id.clone(),
            first,
            method,
            self.timeout_for(first, class),
            request.cancel.clone(),
        )?;

        let mut last_error = OrchestratorError::unavailable(first, "no attempt made");
        for (attempt, upstream) in candidates.iter().enumerate() {
            let timeout = self.timeout_for(upstream, class);
            if attempt > 0 {
                guard.retarget(upstream, timeout);
                info!(
                    upstream = %upstream,
                    name = %request.name,
                    previous_error = %last_error,
                    "[Router] Retrying on fallback upstream"
                );
            }

            match self
                .attempt(upstream, method, params.clone(), timeout, &guard)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!(upstream = %upstream, method, error = %e, "[Router] Transient failure");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        upstream: &str,
        method: &str,
        params: Value,
        timeout: Duration,
        guard: &PendingGuard,
    ) -> OrchestratorResult<Value> {
        let connection = self
            .upstreams
            .routable(upstream)
            .ok_or_else(|| OrchestratorError::unavailable(upstream, "not ready"))?;

        let result = tokio::select! {
            biased;
            _ = guard.token().cancelled() => Err(OrchestratorError::Cancelled),
            result = connection.send_tracked(method, Some(params), timeout, || guard.mark_answered()) => result,
        };

        match &result {
            Ok(_) | Err(OrchestratorError::UpstreamError { .. }) => {
                self.upstreams.record_success(upstream)
            }
            Err(OrchestratorError::UpstreamTimeout { .. }) => {
                self.upstreams.record_timeout(upstream, method, timeout)
            }
            Err(OrchestratorError::UpstreamUnavailable { reason, .. }) => {
                self.upstreams.report_unavailable(upstream, reason)
            }
            Err(OrchestratorError::Cancelled) => {
                debug!(upstream = %upstream, method, "[Router] Request cancelled")
            }
            Err(_) => {}
        }
        result
    }
}
