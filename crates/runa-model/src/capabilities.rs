// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Per-model token limits, fetched on demand from the provider's `/models`
//! listing and cached for the life of the gateway.  Failures are logged and
//! fall back to safe defaults; they are never fatal.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MODELS_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_MAX_PROMPT: u32 = 128_000;
const DEFAULT_MAX_OUTPUT: u32 = 4_096;
const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub max_prompt_tokens: u32,
    pub max_output_tokens: u32,
    pub max_context_window_tokens: u32,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            max_prompt_tokens: DEFAULT_MAX_PROMPT,
            max_output_tokens: DEFAULT_MAX_OUTPUT,
            max_context_window_tokens: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Lazy cache over the provider's `/models` endpoint.
pub struct CapabilityCache {
    client: reqwest::Client,
    models_url: String,
    entries: Mutex<HashMap<String, ModelCapabilities>>,
}

impl CapabilityCache {
    pub fn new(client: reqwest::Client, models_url: impl Into<String>) -> Self {
        Self {
            client,
            models_url: models_url.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the capabilities for `model`, fetching the listing on first use.
    ///
    /// `editor_header` is the Copilot-style `Editor-Version` value, sent only
    /// when the provider requires it.
    pub async fn get(
        &self,
        model: &str,
        bearer: Option<&str>,
        editor_header: Option<&str>,
    ) -> ModelCapabilities {
        {
            let entries = self.entries.lock().await;
            if let Some(caps) = entries.get(model) {
                return *caps;
            }
        }

        match self.fetch(bearer, editor_header).await {
            Ok(fetched) => {
                let mut entries = self.entries.lock().await;
                entries.extend(fetched);
                match entries.get(model).copied() {
                    Some(caps) => caps,
                    None => {
                        debug!(model, "model absent from listing; using default limits");
                        let caps = ModelCapabilities::default();
                        entries.insert(model.to_string(), caps);
                        caps
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, url = %self.models_url, "models fetch failed; using default limits");
                let caps = ModelCapabilities::default();
                self.entries.lock().await.insert(model.to_string(), caps);
                caps
            }
        }
    }

    async fn fetch(
        &self,
        bearer: Option<&str>,
        editor_header: Option<&str>,
    ) -> anyhow::Result<HashMap<String, ModelCapabilities>> {
        let mut req = self
            .client
            .get(&self.models_url)
            .timeout(MODELS_FETCH_TIMEOUT);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(editor) = editor_header {
            req = req.header("Editor-Version", editor);
        }
        let resp = req.send().await?;
        anyhow::ensure!(
            resp.status().is_success(),
            "models endpoint returned {}",
            resp.status()
        );
        let body: Value = resp.json().await?;
        let data = body["data"]
            .as_array()
            .or_else(|| body.as_array())
            .cloned()
            .unwrap_or_default();

        let mut out = HashMap::new();
        for entry in &data {
            let Some(id) = entry["id"].as_str() else {
                continue;
            };
            out.insert(id.to_string(), normalize_entry(entry));
        }
        debug!(count = out.len(), "cached model capability entries");
        Ok(out)
    }
}

/// Normalize one `/models` entry into concrete limits.
///
/// Field priority per limit: root-level (`max_request_tokens`,
/// `max_completion_tokens`, `context_window`) → `capabilities.limits.*` →
/// built-in default.
pub(crate) fn normalize_entry(entry: &Value) -> ModelCapabilities {
    let limits = &entry["capabilities"]["limits"];
    let pick = |root_key: &str, limits_key: &str, default: u32| -> u32 {
        entry[root_key]
            .as_u64()
            .or_else(|| limits[limits_key].as_u64())
            .map(|n| n as u32)
            .unwrap_or(default)
    };
    ModelCapabilities {
        max_prompt_tokens: pick("max_request_tokens", "max_prompt_tokens", DEFAULT_MAX_PROMPT),
        max_output_tokens: pick(
            "max_completion_tokens",
            "max_output_tokens",
            DEFAULT_MAX_OUTPUT,
        ),
        max_context_window_tokens: pick(
            "context_window",
            "max_context_window_tokens",
            DEFAULT_CONTEXT_WINDOW,
        ),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_contract() {
        let caps = ModelCapabilities::default();
        assert_eq!(caps.max_prompt_tokens, 128_000);
        assert_eq!(caps.max_output_tokens, 4_096);
        assert_eq!(caps.max_context_window_tokens, 128_000);
    }

    #[test]
    fn root_level_fields_take_priority() {
        let entry = json!({
            "id": "m",
            "max_request_tokens": 90_000,
            "max_completion_tokens": 8_192,
            "context_window": 100_000,
            "capabilities": { "limits": {
                "max_prompt_tokens": 1,
                "max_output_tokens": 1,
                "max_context_window_tokens": 1
            }}
        });
        let caps = normalize_entry(&entry);
        assert_eq!(caps.max_prompt_tokens, 90_000);
        assert_eq!(caps.max_output_tokens, 8_192);
        assert_eq!(caps.max_context_window_tokens, 100_000);
    }

    #[test]
    fn limits_block_used_when_root_absent() {
        let entry = json!({
            "id": "m",
            "capabilities": { "limits": {
                "max_prompt_tokens": 60_000,
                "max_output_tokens": 2_048,
                "max_context_window_tokens": 64_000
            }}
        });
        let caps = normalize_entry(&entry);
        assert_eq!(caps.max_prompt_tokens, 60_000);
        assert_eq!(caps.max_output_tokens, 2_048);
        assert_eq!(caps.max_context_window_tokens, 64_000);
    }

    #[test]
    fn missing_everything_yields_defaults() {
        let caps = normalize_entry(&json!({ "id": "m" }));
        assert_eq!(caps, ModelCapabilities::default());
    }

    #[test]
    fn per_field_fallback_is_independent() {
        let entry = json!({
            "id": "m",
            "max_request_tokens": 32_000,
            "capabilities": { "limits": { "max_output_tokens": 1_024 } }
        });
        let caps = normalize_entry(&entry);
        assert_eq!(caps.max_prompt_tokens, 32_000);
        assert_eq!(caps.max_output_tokens, 1_024);
        assert_eq!(caps.max_context_window_tokens, DEFAULT_CONTEXT_WINDOW);
    }

    #[tokio::test]
    async fn unreachable_endpoint_falls_back_to_defaults() {
        let cache = CapabilityCache::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1/models", // nothing listens here
        );
        let caps = cache.get("some-model", None, None).await;
        assert_eq!(caps, ModelCapabilities::default());
    }

    #[tokio::test]
    async fn failed_fetch_result_is_cached() {
        let cache = CapabilityCache::new(reqwest::Client::new(), "http://127.0.0.1:1/models");
        let _ = cache.get("some-model", None, None).await;
        assert!(cache.entries.lock().await.contains_key("some-model"));
    }
}
