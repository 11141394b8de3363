// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::capabilities::ModelCapabilities;
use crate::classify::ClassifiedError;
use crate::registry::ProviderProfile;
use crate::types::{ChatRequest, StreamEvent};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClassifiedError>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id for status display and logging.
    fn provider_name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Wire profile for the target provider.
    fn profile(&self) -> &'static ProviderProfile;

    /// Send a completion request and return the event stream.
    ///
    /// Non-2xx responses and transport failures surface as a
    /// [`ClassifiedError`] so the caller can apply kind-specific retry policy.
    async fn complete(&self, req: ChatRequest) -> Result<EventStream, ClassifiedError>;

    /// Token limits for the active model.
    ///
    /// The default implementation returns the built-in limits; the HTTP
    /// gateway overrides it with the cached `/models` listing.
    async fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::default()
    }

    /// How long the caller must wait before sending the next request.
    ///
    /// The wait is *measured* here and *slept* by the workflow loop so that
    /// countdowns remain visible and interruptible.
    fn pacing_wait(&self) -> Duration {
        Duration::ZERO
    }
}
