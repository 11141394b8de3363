// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Endpoint resolution: map a logical provider name or a base URL to a
//! provider kind, a chat-completions URL, and a `/models` URL.

use crate::classify::ClassifiedError;
use crate::registry::{profile_for, ProviderProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Copilot,
    Claude,
    OpenRouter,
    DashScope,
    Local,
    Generic,
}

impl ProviderKind {
    pub fn profile(&self) -> &'static ProviderProfile {
        let name = match self {
            Self::OpenAi => "openai",
            Self::Copilot => "copilot",
            Self::Claude => "claude",
            Self::OpenRouter => "openrouter",
            Self::DashScope => "dashscope",
            Self::Local => "local",
            Self::Generic => "generic",
        };
        profile_for(name).expect("registry covers every kind")
    }

    fn default_base(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Copilot => "https://api.githubcopilot.com",
            Self::Claude => "https://api.anthropic.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::DashScope => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            Self::Local => "http://localhost:8080/v1",
            Self::Generic => "",
        }
    }
}

/// Resolved endpoint set for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub kind: ProviderKind,
    /// Base URL with no trailing slash.
    pub base_url: String,
    /// Full chat-completions URL.
    pub chat_url: String,
    /// Full `/models` listing URL.
    pub models_url: String,
}

/// Resolve a logical provider name or base URL.
///
/// Logical names are matched first; then known URL substrings; finally any
/// `http(s)://` value is treated as a generic OpenAI-compatible endpoint.
/// Anything else is a configuration error.
pub fn resolve(base_url_or_name: &str) -> Result<ResolvedEndpoint, ClassifiedError> {
    let input = base_url_or_name.trim();

    let by_name = match input {
        "openai" => Some(ProviderKind::OpenAi),
        "copilot" | "github-copilot" => Some(ProviderKind::Copilot),
        "claude" | "anthropic" => Some(ProviderKind::Claude),
        "openrouter" => Some(ProviderKind::OpenRouter),
        "dashscope" | "qwen" => Some(ProviderKind::DashScope),
        "local" => Some(ProviderKind::Local),
        _ => None,
    };
    if let Some(kind) = by_name {
        return Ok(endpoint_for(kind, kind.default_base()));
    }

    if input.starts_with("http://") || input.starts_with("https://") {
        let kind = if input.contains("copilot") {
            ProviderKind::Copilot
        } else if input.contains("openrouter") {
            ProviderKind::OpenRouter
        } else if input.contains("dashscope") || input.contains("aliyuncs") {
            ProviderKind::DashScope
        } else if input.contains("openai") {
            ProviderKind::OpenAi
        } else if input.contains("localhost:8080") || input.contains("127.0.0.1:8080") {
            ProviderKind::Local
        } else {
            ProviderKind::Generic
        };
        return Ok(endpoint_for(kind, input));
    }

    Err(ClassifiedError::invalid_config(format!(
        "unknown provider {input:?}; expected one of {} or an http(s) base URL",
        crate::registry::known_provider_ids()
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

fn endpoint_for(kind: ProviderKind, base: &str) -> ResolvedEndpoint {
    let base = normalize_base(base);
    let chat_url = format!("{base}{}", kind.profile().path_suffix);
    // The models listing lives next to the version root: strip a trailing
    // `/v1` segment before appending `/models`.
    let models_root = base.strip_suffix("/v1").unwrap_or(&base);
    let models_url = format!("{models_root}/models");
    ResolvedEndpoint {
        kind,
        base_url: base,
        chat_url,
        models_url,
    }
}

fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
