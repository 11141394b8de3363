// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
pub mod assemble;
pub mod capabilities;
pub mod classify;
pub mod continuity;
pub mod estimator;
pub mod payload;
pub mod rate;
pub mod registry;
pub mod resolver;
pub mod sanitize;
mod gateway;
mod mock;
mod provider;
mod types;

pub use capabilities::ModelCapabilities;
pub use classify::{ClassifiedError, ErrorKind};
pub use estimator::TokenEstimator;
pub use gateway::HttpGateway;
pub use mock::{MockProvider, MockScript, ScriptedMockProvider};
pub use provider::{ChatProvider, EventStream};
pub use registry::{profile_for, ProviderProfile};
pub use resolver::{resolve, ProviderKind, ResolvedEndpoint};
pub use types::*;

use std::sync::Arc;

use runa_config::ModelConfig;

/// Construct a [`ChatProvider`] from configuration.
///
/// `api_base` takes precedence over the logical provider name.  The API key
/// is resolved explicit-key → configured env var → the provider's default
/// env var; a provider that requires a key fails construction without one.
pub fn from_config(cfg: &ModelConfig) -> Result<Arc<dyn ChatProvider>, ClassifiedError> {
    let target = cfg.api_base.as_deref().unwrap_or(&cfg.provider);
    let endpoint = resolve(target)?;
    let profile = endpoint.kind.profile();

    let (api_key, api_key_env) = resolve_api_key(cfg, profile);
    if api_key.is_none() && profile.requires_api_key {
        return Err(ClassifiedError::missing_api_key(profile.name));
    }

    Ok(Arc::new(HttpGateway::new(
        &endpoint,
        cfg.model.clone(),
        api_key,
        api_key_env,
        cfg.editor.clone(),
    )))
}

fn resolve_api_key(cfg: &ModelConfig, profile: &ProviderProfile) -> (Option<String>, Option<String>) {
    if let Some(k) = &cfg.api_key {
        return (Some(k.clone()), cfg.api_key_env.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return (std::env::var(env).ok(), Some(env.clone()));
    }
    if let Some(env) = profile.default_api_key_env {
        return (std::env::var(env).ok(), Some(env.to_string()));
    }
    (None, None)
}
