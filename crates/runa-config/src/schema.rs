// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier or base URL.  Logical names ("openai", "copilot",
    /// "claude", "openrouter", "dashscope", "local") resolve to known
    /// endpoints; any `http(s)://` value is treated as a generic
    /// OpenAI-compatible endpoint.
    pub provider: String,
    /// Model name forwarded to the provider API
    pub model: String,
    /// Base URL override.  Takes precedence over the provider default.
    pub api_base: Option<String>,
    /// Explicit API key; prefer api_key_env in version-controlled files
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Sampling temperature.  Clamped into the provider's supported range
    /// before sending; defaults to 0.2 when unset.
    pub temperature: Option<f32>,
    /// Nucleus sampling parameter; defaults to 0.95 when unset.
    pub top_p: Option<f32>,
    /// Editor identification forwarded on Copilot-family requests,
    /// e.g. `"vscode/1.96.0"`.
    pub editor: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            api_base: None,
            api_key: None,
            api_key_env: None,
            temperature: Some(0.2),
            top_p: Some(0.95),
            editor: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model-call iterations per user input.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Files injected into the conversation after the system prompt, each
    /// wrapped in a `<context_file>` block.
    #[serde(default)]
    pub context_files: Vec<String>,
    /// System prompt override.  When unset the caller supplies the prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_files: Vec::new(),
            system_prompt: None,
        }
    }
}

/// Tool-specific configuration passed through to individual tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// API key for the web-search tool, when one is registered.
    pub web_search_api_key: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_openai() {
        let cfg = Config::default();
        assert_eq!(cfg.model.provider, "openai");
        assert_eq!(cfg.model.model, "gpt-4o");
    }

    #[test]
    fn default_temperature_and_top_p() {
        let cfg = ModelConfig::default();
        assert_eq!(cfg.temperature, Some(0.2));
        assert_eq!(cfg.top_p, Some(0.95));
    }

    #[test]
    fn default_max_iterations_is_500() {
        assert_eq!(AgentConfig::default().max_iterations, 500);
    }

    #[test]
    fn deserializes_partial_yaml_with_defaults() {
        let cfg: Config = serde_yaml::from_str("model:\n  provider: copilot\n  model: gpt-4o\n").unwrap();
        assert_eq!(cfg.model.provider, "copilot");
        assert_eq!(cfg.agent.max_iterations, 500);
    }

    #[test]
    fn agent_section_overrides_max_iterations() {
        let cfg: Config = serde_yaml::from_str("agent:\n  max_iterations: 25\n").unwrap();
        assert_eq!(cfg.agent.max_iterations, 25);
    }

    #[test]
    fn context_files_default_empty() {
        assert!(AgentConfig::default().context_files.is_empty());
    }
}
