// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! HTTP gateway: one implementation of [`ChatProvider`] for every provider
//! that speaks the OpenAI-compatible `/chat/completions` wire format.
//!
//! The response body is consumed as a byte stream.  SSE events can be split
//! across TCP packets, so a persistent buffer accumulates bytes and only
//! complete blank-line-terminated events are parsed; the incomplete tail
//! stays in the buffer for the next chunk.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capabilities::{CapabilityCache, ModelCapabilities};
use crate::classify::{classify_response, ClassifiedError, ErrorKind, TRANSPORT_STATUS};
use crate::payload::build_chat_body;
use crate::provider::{ChatProvider, EventStream};
use crate::rate::{parse_quota_headers, parse_rate_headers, RequestPacer};
use crate::registry::ProviderProfile;
use crate::resolver::ResolvedEndpoint;
use crate::types::{ChatRequest, StreamEvent, ToolCall, Usage};

const STREAMING_TIMEOUT: Duration = Duration::from_secs(300);
const NON_STREAMING_TIMEOUT: Duration = Duration::from_secs(60);

/// Pinned API version sent on Copilot-family requests.
const COPILOT_API_VERSION: &str = "2025-05-01";
const DEFAULT_EDITOR_VERSION: &str = "vscode/1.96.0";

pub struct HttpGateway {
    profile: &'static ProviderProfile,
    model: String,
    chat_url: String,
    client: reqwest::Client,
    caps: CapabilityCache,
    pacer: Mutex<RequestPacer>,
    /// Resolved credential.  Interior mutability allows the expired-token
    /// refresh path to swap in a re-read key without `&mut self`.
    api_key: Mutex<Option<String>>,
    /// Environment variable the key came from, for refresh re-reads.
    api_key_env: Option<String>,
    editor_version: String,
}

impl HttpGateway {
    pub fn new(
        endpoint: &ResolvedEndpoint,
        model: impl Into<String>,
        api_key: Option<String>,
        api_key_env: Option<String>,
        editor_version: Option<String>,
    ) -> Self {
        let client = reqwest::Client::new();
        Self {
            profile: endpoint.kind.profile(),
            model: model.into(),
            chat_url: endpoint.chat_url.clone(),
            caps: CapabilityCache::new(client.clone(), endpoint.models_url.clone()),
            client,
            pacer: Mutex::new(RequestPacer::new()),
            api_key: Mutex::new(api_key),
            api_key_env,
            editor_version: editor_version.unwrap_or_else(|| DEFAULT_EDITOR_VERSION.to_string()),
        }
    }

    fn current_key(&self) -> Option<String> {
        self.api_key.lock().expect("key lock").clone()
    }

    /// Re-read the credential from its environment variable after a 401/403.
    /// Returns true when a different key was picked up.
    fn refresh_key(&self) -> bool {
        let Some(env) = &self.api_key_env else {
            return false;
        };
        let Ok(fresh) = std::env::var(env) else {
            return false;
        };
        let mut key = self.api_key.lock().expect("key lock");
        if key.as_deref() == Some(fresh.as_str()) {
            return false;
        }
        *key = Some(fresh);
        true
    }

    fn apply_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        req: &ChatRequest,
    ) -> reqwest::RequestBuilder {
        if let Some(key) = self.current_key() {
            let value = self.profile.auth_template.replace("{key}", &key);
            builder = builder.header(self.profile.auth_header, value);
        }
        builder = builder.header("Content-Type", "application/json");
        if req.stream {
            builder = builder.header("Accept", "*/*");
        }
        if self.profile.requires_copilot_headers {
            let initiator = if req.tool_call_iteration <= 1 {
                "user"
            } else {
                "agent"
            };
            builder = builder
                .header("X-Request-Id", uuid::Uuid::new_v4().to_string())
                .header("X-Interaction-Type", "conversational")
                .header("OpenAI-Intent", "conversational")
                .header("X-GitHub-Api-Version", COPILOT_API_VERSION)
                .header("Editor-Version", self.editor_version.as_str())
                .header("X-Initiator", initiator);
        }
        builder
    }
}

#[async_trait]
impl ChatProvider for HttpGateway {
    fn provider_name(&self) -> &str {
        self.profile.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn profile(&self) -> &'static ProviderProfile {
        self.profile
    }

    async fn capabilities(&self) -> ModelCapabilities {
        let key = self.current_key();
        let editor = self
            .profile
            .requires_copilot_headers
            .then(|| self.editor_version.clone());
        self.caps
            .get(&self.model, key.as_deref(), editor.as_deref())
            .await
    }

    fn pacing_wait(&self) -> Duration {
        self.pacer.lock().expect("pacer lock").required_wait()
    }

    async fn complete(&self, req: ChatRequest) -> Result<EventStream, ClassifiedError> {
        let body = build_chat_body(&req, self.profile, &self.model);
        debug!(
            provider = %self.profile.name,
            model = %self.model,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            stream = req.stream,
            "sending completion request"
        );
        tracing::trace!(request_body = %body, "full completion request");

        let timeout = if req.stream {
            STREAMING_TIMEOUT
        } else {
            NON_STREAMING_TIMEOUT
        };
        let builder = self
            .client
            .post(&self.chat_url)
            .timeout(timeout)
            .json(&body);
        let builder = self.apply_headers(builder, &req);

        self.pacer.lock().expect("pacer lock").note_request();
        let resp = builder
            .send()
            .await
            .map_err(|e| ClassifiedError::transport(e.to_string()))?;

        // Header-borne signals are emitted ahead of the body events so the
        // consumer observes quota/rate state before any content.
        let rate = parse_rate_headers(resp.headers());
        let quota = parse_quota_headers(resp.headers());
        {
            let mut pacer = self.pacer.lock().expect("pacer lock");
            pacer.observe(&rate);
            if let Some(q) = &quota {
                pacer.observe(&crate::rate::RateLimitSnapshot {
                    percent_remaining: Some(q.percent_remaining),
                    ..Default::default()
                });
            }
        }

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = resp.text().await.unwrap_or_default();
            let classified =
                classify_response(status.as_u16(), &body_text, retry_after.as_deref());
            if classified.kind == ErrorKind::RateLimit {
                if let Some(wait) = classified.retry_after {
                    self.pacer.lock().expect("pacer lock").block_for(wait);
                }
            }
            if matches!(status.as_u16(), 401 | 403) && classified.kind == ErrorKind::AuthRecovered
            {
                if self.refresh_key() {
                    debug!("credential refreshed from environment after {status}");
                    return Err(classified);
                }
                // No refresh path: surface as a terminal error.
                return Err(ClassifiedError::new(
                    ErrorKind::InvalidConfig,
                    false,
                    format!("authentication failed ({status}) and no refresh source is configured"),
                ));
            }
            return Err(classified);
        }

        let mut lead: Vec<Result<StreamEvent, ClassifiedError>> = Vec::new();
        if !rate.is_empty() {
            lead.push(Ok(StreamEvent::RateLimit(rate)));
        }
        if let Some(q) = quota {
            lead.push(Ok(StreamEvent::Quota(q)));
        }

        if !req.stream {
            let body: Value = resp.json().await.map_err(|e| {
                classify_response(TRANSPORT_STATUS, &format!("body decode failed: {e}"), None)
            })?;
            lead.extend(parse_complete_response(&body).into_iter().map(Ok));
            return Ok(Box::pin(futures::stream::iter(lead)));
        }

        let byte_stream = resp.bytes_stream();
        let sse = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<StreamEvent, ClassifiedError>> = match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_sse_events(buf).into_iter().map(Ok).collect()
                    }
                    Err(e) => vec![Err(ClassifiedError::transport(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(futures::stream::iter(lead).chain(sse)))
    }
}

// ─── SSE parsing ──────────────────────────────────────────────────────────────

/// Drain all complete blank-line-terminated SSE events from `buf`.
///
/// A trailing incomplete event (no `\n\n` yet) stays in `buf` so the next
/// TCP chunk can extend it.
pub(crate) fn drain_complete_sse_events(buf: &mut String) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    loop {
        let Some(boundary) = find_event_boundary(buf) else {
            break;
        };
        let event_text = buf[..boundary.start].to_string();
        *buf = buf[boundary.end..].to_string();
        for line in event_text.lines() {
            out.extend(parse_sse_data_line(line.trim_end_matches('\r')));
        }
    }
    out
}

struct Boundary {
    start: usize,
    end: usize,
}

/// Locate the first blank-line event terminator (`\n\n` or `\r\n\r\n`).
fn find_event_boundary(buf: &str) -> Option<Boundary> {
    let lf = buf.find("\n\n").map(|p| Boundary {
        start: p,
        end: p + 2,
    });
    let crlf = buf.find("\r\n\r\n").map(|p| Boundary {
        start: p,
        end: p + 4,
    });
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Parse one `data:` line into zero or more [`StreamEvent`]s.
fn parse_sse_data_line(line: &str) -> Vec<StreamEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Vec::new();
    };
    let data = data.trim();
    if data.is_empty() {
        return Vec::new();
    }
    if data == "[DONE]" {
        return vec![StreamEvent::Done];
    }
    let Ok(v) = serde_json::from_str::<Value>(data) else {
        warn!(line = %data, "unparseable SSE data line; skipped");
        return Vec::new();
    };
    parse_chunk(&v)
}

/// Decode one streamed JSON chunk.  A single chunk can carry several signals
/// (marker + content, multiple parallel tool-call fragments), so the result
/// is a list.
fn parse_chunk(v: &Value) -> Vec<StreamEvent> {
    let mut out = Vec::new();

    if let Some(marker) = find_stateful_marker(v) {
        out.push(StreamEvent::StatefulMarker(marker));
    }
    if let Some(id) = v["id"].as_str() {
        if !id.is_empty() {
            out.push(StreamEvent::ResponseId(id.to_string()));
        }
    }
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        out.push(StreamEvent::Usage(Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }

    let choice = &v["choices"][0];
    if let Some(reason) = choice["finish_reason"].as_str() {
        out.push(StreamEvent::FinishReason(reason.to_string()));
    }

    let delta = &choice["delta"];
    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for tc in tool_calls {
            out.push(StreamEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }
    if let Some(thinking) = delta.get("reasoning_content").and_then(Value::as_str) {
        if !thinking.is_empty() {
            out.push(StreamEvent::ThinkingDelta(thinking.to_string()));
        }
    }
    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            out.push(StreamEvent::TextDelta(text.to_string()));
        }
    }

    out
}

/// Decode a complete (non-streaming) response body into the same event
/// vocabulary the SSE path produces, ending with `Done`.
pub(crate) fn parse_complete_response(v: &Value) -> Vec<StreamEvent> {
    let mut out = Vec::new();

    if let Some(marker) = find_stateful_marker(v) {
        out.push(StreamEvent::StatefulMarker(marker));
    }
    if let Some(id) = v["id"].as_str() {
        if !id.is_empty() {
            out.push(StreamEvent::ResponseId(id.to_string()));
        }
    }

    let message = &v["choices"][0]["message"];
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            out.push(StreamEvent::TextDelta(text.to_string()));
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, tc) in calls.iter().enumerate() {
            out.push(StreamEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(i as u64) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            });
        }
    }
    if let Some(reason) = v["choices"][0]["finish_reason"].as_str() {
        out.push(StreamEvent::FinishReason(reason.to_string()));
    }
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        out.push(StreamEvent::Usage(Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }
    out.push(StreamEvent::Done);
    out
}

/// The continuity marker can ride at the top level, on the streamed delta,
/// or on the final assistant message.
fn find_stateful_marker(v: &Value) -> Option<String> {
    for candidate in [
        &v["stateful_marker"],
        &v["choices"][0]["delta"]["stateful_marker"],
        &v["choices"][0]["message"]["stateful_marker"],
    ] {
        if let Some(s) = candidate.as_str() {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

#[allow(dead_code)]
fn tool_calls_from_events(events: &[StreamEvent]) -> Vec<ToolCall> {
    // Convenience for tests; real assembly lives in `crate::assemble`.
    let mut asm = crate::assemble::StreamAssembler::new();
    for ev in events {
        asm.absorb(ev.clone());
    }
    asm.finish().tool_calls
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
