// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Request-body composition.
//!
//! Extracted as free functions so the wire format can be unit-tested without
//! making HTTP requests.

use serde_json::{json, Value};

use crate::registry::{adapt_payload, ProviderProfile};
use crate::sanitize::{sanitize_value, strip_internal_fields};
use crate::types::ChatRequest;

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_TOP_P: f32 = 0.95;

/// Compose the JSON body for one chat-completion request.
///
/// The result has passed provider adaptation (temperature clamp, tools
/// gating, `sam_config`), internal-field stripping, and character
/// sanitization; it is ready to serialize onto the wire.
pub fn build_chat_body(req: &ChatRequest, profile: &ProviderProfile, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": serde_json::to_value(&req.messages).expect("messages serialize"),
        "temperature": req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        "top_p": req.top_p.unwrap_or(DEFAULT_TOP_P),
    });

    if req.stream {
        body["stream"] = json!(true);
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if profile.requires_copilot_headers {
        if let Some(session_id) = &req.session_id {
            body["copilot_thread_id"] = json!(session_id);
        }
    }
    if let Some(prev) = &req.previous_response_id {
        body["previous_response_id"] = json!(prev);
    }

    adapt_payload(&mut body, profile);
    strip_internal_fields(&mut body);
    sanitize_value(&mut body);
    body
}

/// Total character count of a composed body, for estimator feedback.
pub fn body_char_len(body: &Value) -> usize {
    body.to_string().len()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
