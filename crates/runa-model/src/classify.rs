// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Error taxonomy for provider responses.
//!
//! Every failure surfaced to the workflow loop is a [`ClassifiedError`]: a
//! kind, a retryability flag, and an optional provider-requested delay.  The
//! loop maps kinds to retry policies; nothing above it ever inspects raw HTTP
//! status codes.

use std::time::Duration;

/// Synthetic status used for network/transport failures that never produced
/// an HTTP response.
pub const TRANSPORT_STATUS: u16 = 599;

/// Default wait applied to a 429 that carries no usable delay hint.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    RateLimit,
    ServerError,
    MalformedToolJson,
    TokenLimitExceeded,
    MessageStructure,
    AuthRecovered,
    ToolFailure,
    IterationLimit,
    SessionErrorBudget,
    PrematureStopBudget,
    MissingApiKey,
    InvalidConfig,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::MalformedToolJson => "malformed_tool_json",
            Self::TokenLimitExceeded => "token_limit_exceeded",
            Self::MessageStructure => "message_structure_error",
            Self::AuthRecovered => "auth_recovered",
            Self::ToolFailure => "tool_failure",
            Self::IterationLimit => "iteration_limit",
            Self::SessionErrorBudget => "session_error_budget",
            Self::PrematureStopBudget => "premature_stop_budget",
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidConfig => "invalid_config",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub retryable: bool,
    /// Provider-requested wait before the next attempt, when one was given.
    pub retry_after: Option<Duration>,
    pub message: String,
    /// Name of the tool whose arguments triggered the failure, when known.
    pub failed_tool: Option<String>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable,
            retry_after: None,
            message: message.into(),
            failed_tool: None,
        }
    }

    /// A network-level failure that never produced an HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, true, message)
    }

    pub fn missing_api_key(provider: &str) -> Self {
        Self::new(
            ErrorKind::MissingApiKey,
            false,
            format!("no API key configured for provider {provider:?}"),
        )
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, false, message)
    }

    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    pub fn with_failed_tool(mut self, tool: impl Into<String>) -> Self {
        self.failed_tool = Some(tool.into());
        self
    }
}

/// Classify an HTTP response by status and body.
///
/// `retry_after_header` is the raw `Retry-After` header value when present.
pub fn classify_response(
    status: u16,
    body: &str,
    retry_after_header: Option<&str>,
) -> ClassifiedError {
    match status {
        429 => {
            let wait = retry_after_header
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .or_else(|| extract_retry_in(body))
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
            ClassifiedError::new(
                ErrorKind::RateLimit,
                true,
                format!("rate limited by provider: {}", summarize(body)),
            )
            .with_retry_after(wait)
        }
        502 | 503 => ClassifiedError::new(
            ErrorKind::ServerError,
            true,
            format!("provider unavailable ({status}): {}", summarize(body)),
        ),
        TRANSPORT_STATUS => ClassifiedError::new(
            ErrorKind::ServerError,
            true,
            format!("transport failure: {}", summarize(body)),
        ),
        400 if is_malformed_tool_json(body) => ClassifiedError::new(
            ErrorKind::MalformedToolJson,
            true,
            format!("provider rejected tool-call JSON: {}", summarize(body)),
        ),
        400 if is_token_limit(body) => ClassifiedError::new(
            ErrorKind::TokenLimitExceeded,
            true,
            format!("prompt exceeds the model token limit: {}", summarize(body)),
        ),
        401 | 403 if is_token_expiry(body) => ClassifiedError::new(
            ErrorKind::AuthRecovered,
            true,
            "authentication token expired; refreshed".to_string(),
        ),
        _ if is_structure_error(body) => ClassifiedError::new(
            ErrorKind::MessageStructure,
            true,
            format!("provider rejected message structure: {}", summarize(body)),
        ),
        _ => ClassifiedError::new(
            ErrorKind::ServerError,
            false,
            format!("provider error {status}: {}", summarize(body)),
        ),
    }
}

/// Extract N from a "retry in N" / "retry in Ns" phrase in an error body.
fn extract_retry_in(body: &str) -> Option<Duration> {
    let re = regex::Regex::new(r"(?i)retry\s+in\s+(\d+)\s*s?").ok()?;
    let caps = re.captures(body)?;
    let secs: u64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs(secs))
}

fn is_malformed_tool_json(body: &str) -> bool {
    let re = regex::Regex::new(
        r"(?i)(invalid|malformed|could not parse|failed to parse).{0,60}(json|arguments|function[_ ]call)",
    )
    .expect("static regex");
    re.is_match(body)
}

fn is_token_limit(body: &str) -> bool {
    let re = regex::Regex::new(
        r"(?i)context length|context[_ ]window|too many tokens|exceed\w*\s.{0,30}tokens|input (is )?too long|maximum.{0,20}tokens",
    )
    .expect("static regex");
    re.is_match(body)
}

fn is_token_expiry(body: &str) -> bool {
    let re = regex::Regex::new(r"(?i)expired|token.{0,20}(invalid|revoked)|unauthorized")
        .expect("static regex");
    re.is_match(body)
}

fn is_structure_error(body: &str) -> bool {
    let re = regex::Regex::new(
        r#"(?i)tool_call_id|tool[_ ]calls?.{0,60}(message|must|without|missing)|messages?.{0,40}alternat|invalid role|'tool' must (be|follow)"#,
    )
    .expect("static regex");
    re.is_match(body)
}

/// Trim an error body to a log-friendly single line.
fn summarize(body: &str) -> String {
    let line = body.lines().next().unwrap_or("").trim();
    if line.len() > 300 {
        format!("{}…", &line[..300])
    } else {
        line.to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
