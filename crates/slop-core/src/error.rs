//! Orchestrator error taxonomy
//!
//! Every failure a client can observe is one of these variants. The gateway
//! translates them into JSON-RPC error envelopes using [`OrchestratorError::code`]
//! and [`OrchestratorError::data`].

use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::CapabilityKind;

/// JSON-RPC error codes used on the client-facing side
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const UPSTREAM_UNAVAILABLE: i64 = -32001;
    pub const UPSTREAM_TIMEOUT: i64 = -32002;
    pub const OVERLOADED: i64 = -32003;
    pub const SESSION_LIMIT: i64 = -32004;
    pub const REQUEST_CANCELLED: i64 = -32800;
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// Connect/handshake failure, or the connection dropped mid-request
    #[error("upstream '{upstream}' unavailable: {reason}")]
    UpstreamUnavailable { upstream: String, reason: String },

    #[error("upstream '{upstream}' did not respond within {}ms", .timeout.as_millis())]
    UpstreamTimeout { upstream: String, timeout: Duration },

    /// Client error, never retried
    #[error("unknown {kind} '{name}'{}", suggestion_hint(.suggestions))]
    UnknownCapability {
        kind: CapabilityKind,
        name: String,
        suggestions: Vec<String>,
    },

    /// Backpressure: too many requests in flight to one upstream
    #[error("upstream '{upstream}' is overloaded, retry after {}ms", .retry_after.as_millis())]
    Overloaded {
        upstream: String,
        retry_after: Duration,
    },

    /// Error response from the upstream, relayed verbatim
    #[error("{message}")]
    UpstreamError {
        upstream: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session limit reached ({max} active sessions)")]
    SessionLimit { max: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

fn suggestion_hint(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

impl OrchestratorError {
    pub fn unavailable(upstream: impl Into<String>, reason: impl ToString) -> Self {
        Self::UpstreamUnavailable {
            upstream: upstream.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unknown(kind: CapabilityKind, name: impl Into<String>) -> Self {
        Self::UnknownCapability {
            kind,
            name: name.into(),
            suggestions: Vec::new(),
        }
    }

    /// JSON-RPC error code for the client-facing envelope
    pub fn code(&self) -> i64 {
        match self {
            Self::UpstreamUnavailable { .. } => codes::UPSTREAM_UNAVAILABLE,
            Self::UpstreamTimeout { .. } => codes::UPSTREAM_TIMEOUT,
            Self::UnknownCapability { .. } => codes::INVALID_PARAMS,
            Self::Overloaded { .. } => codes::OVERLOADED,
            Self::UpstreamError { code, .. } => *code,
            Self::Cancelled => codes::REQUEST_CANCELLED,
            Self::InvalidRequest(_) => codes::INVALID_PARAMS,
            Self::SessionLimit { .. } => codes::SESSION_LIMIT,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Structured `data` member for the JSON-RPC error
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::UpstreamUnavailable { upstream, .. } => Some(json!({ "upstream": upstream })),
            Self::UpstreamTimeout { upstream, timeout } => Some(json!({
                "upstream": upstream,
                "timeoutMs": timeout.as_millis() as u64,
            })),
            Self::UnknownCapability {
                kind, suggestions, ..
            } => Some(json!({ "kind": kind.as_str(), "suggestions": suggestions })),
            Self::Overloaded {
                upstream,
                retry_after,
            } => Some(json!({
                "upstream": upstream,
                "retryAfterMs": retry_after.as_millis() as u64,
            })),
            Self::UpstreamError { data, .. } => data.clone(),
            Self::Cancelled
            | Self::InvalidRequest(_)
            | Self::SessionLimit { .. }
            | Self::Internal(_) => None,
        }
    }

    /// Transient upstream failures the router may retry on a fallback
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::UpstreamTimeout { .. }
        )
    }

    /// Upstream this error is attributed to, if any
    pub fn upstream(&self) -> Option<&str> {
        match self {
            Self::UpstreamUnavailable { upstream, .. }
            | Self::UpstreamTimeout { upstream, .. }
            | Self::Overloaded { upstream, .. }
            | Self::UpstreamError { upstream, .. } => Some(upstream),
            _ => None,
        }
    }

    /// Short stable name for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::Overloaded { .. } => "overloaded",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Cancelled => "cancelled",
            Self::InvalidRequest(_) => "invalid_request",
            Self::SessionLimit { .. } => "session_limit",
            Self::Internal(_) => "internal",
        }
    }
}
