// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Provider registry: static profiles for every supported chat provider.
//!
//! This module is the single source of truth for provider ids and their wire
//! requirements.  Construction logic lives in [`crate::from_config`].

use serde_json::{json, Value};

/// Wire profile for a chat provider.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Unique provider id used in `model.provider` config field (e.g. `"openai"`).
    pub name: &'static str,
    /// Header carrying the credential (e.g. `"Authorization"`).
    pub auth_header: &'static str,
    /// Credential template; `{key}` is replaced with the resolved API key.
    pub auth_template: &'static str,
    /// Path appended to the base URL for completions.
    pub path_suffix: &'static str,
    /// Inclusive `[lo, hi]` range the provider accepts for `temperature`.
    pub temperature_range: (f32, f32),
    /// Whether the provider accepts a `tools` array at all.
    pub supports_tools: bool,
    /// Whether Copilot-style interaction headers are required on every request.
    pub requires_copilot_headers: bool,
    /// Whether the request body must carry `sam_config.bypass_processing`.
    pub requires_sam_config: bool,
    /// Whether the provider accepts messages with `role: "tool"`.  When
    /// false, tool results are rewritten into user messages before sending.
    pub supports_role_tool: bool,
    /// Default environment variable that holds the API key.
    /// `None` for providers that require no key (local servers).
    pub default_api_key_env: Option<&'static str>,
    /// Whether an explicit API key is required.
    pub requires_api_key: bool,
}

/// Complete registry of supported providers.
pub static PROFILES: &[ProviderProfile] = &[
    ProviderProfile {
        name: "openai",
        auth_header: "Authorization",
        auth_template: "Bearer {key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 2.0),
        supports_tools: true,
        requires_copilot_headers: false,
        requires_sam_config: false,
        supports_role_tool: true,
        default_api_key_env: Some("OPENAI_API_KEY"),
        requires_api_key: true,
    },
    ProviderProfile {
        name: "copilot",
        auth_header: "Authorization",
        auth_template: "Bearer {key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 1.0),
        supports_tools: true,
        requires_copilot_headers: true,
        requires_sam_config: false,
        supports_role_tool: true,
        default_api_key_env: Some("COPILOT_API_KEY"),
        requires_api_key: true,
    },
    ProviderProfile {
        name: "claude",
        auth_header: "x-api-key",
        auth_template: "{key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 1.0),
        supports_tools: true,
        requires_copilot_headers: false,
        requires_sam_config: false,
        // The compatibility layer rejects role=tool; results are rewritten
        // into user messages by alternation enforcement.
        supports_role_tool: false,
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        requires_api_key: true,
    },
    ProviderProfile {
        name: "openrouter",
        auth_header: "Authorization",
        auth_template: "Bearer {key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 2.0),
        supports_tools: true,
        requires_copilot_headers: false,
        requires_sam_config: false,
        supports_role_tool: true,
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        requires_api_key: true,
    },
    ProviderProfile {
        name: "dashscope",
        auth_header: "Authorization",
        auth_template: "Bearer {key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 2.0),
        supports_tools: true,
        requires_copilot_headers: false,
        requires_sam_config: true,
        supports_role_tool: true,
        default_api_key_env: Some("DASHSCOPE_API_KEY"),
        requires_api_key: true,
    },
    ProviderProfile {
        name: "local",
        auth_header: "Authorization",
        auth_template: "Bearer {key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 2.0),
        supports_tools: true,
        requires_copilot_headers: false,
        requires_sam_config: false,
        supports_role_tool: true,
        default_api_key_env: None,
        requires_api_key: false,
    },
    ProviderProfile {
        name: "generic",
        auth_header: "Authorization",
        auth_template: "Bearer {key}",
        path_suffix: "/chat/completions",
        temperature_range: (0.0, 2.0),
        supports_tools: true,
        requires_copilot_headers: false,
        requires_sam_config: false,
        supports_role_tool: true,
        default_api_key_env: None,
        requires_api_key: false,
    },
];

/// Look up a profile by its id.  Returns `None` for unknown ids.
pub fn profile_for(name: &str) -> Option<&'static ProviderProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

/// Returns an iterator over all known provider ids.
pub fn known_provider_ids() -> impl Iterator<Item = &'static str> {
    PROFILES.iter().map(|p| p.name)
}

/// Adapt a composed request body to the target provider.
///
/// - clamps `temperature` into the profile's supported range
/// - deletes `tools` entirely when the provider does not accept them
/// - inserts `sam_config.bypass_processing` when the provider requires it
pub fn adapt_payload(payload: &mut Value, profile: &ProviderProfile) {
    if let Some(t) = payload.get("temperature").and_then(Value::as_f64) {
        let (lo, hi) = profile.temperature_range;
        let clamped = (t as f32).clamp(lo, hi);
        payload["temperature"] = json!(clamped);
    }
    if !profile.supports_tools {
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("tools");
        }
    }
    if profile.requires_sam_config {
        payload["sam_config"] = json!({ "bypass_processing": true });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
