// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::classify::ClassifiedError;
use crate::provider::{ChatProvider, EventStream};
use crate::registry::{profile_for, ProviderProfile};
use crate::types::{ChatRequest, Role, StreamEvent};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ChatProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }
    fn profile(&self) -> &'static ProviderProfile {
        profile_for("generic").expect("generic profile exists")
    }

    async fn complete(&self, req: ChatRequest) -> Result<EventStream, ClassifiedError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());
        let events: Vec<Result<StreamEvent, ClassifiedError>> = vec![
            Ok(StreamEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// One scripted response: either an event sequence or an error to return
/// from `complete` itself.
pub enum MockScript {
    Events(Vec<StreamEvent>),
    Error(ClassifiedError),
}

/// A pre-scripted mock provider.  Each call to `complete` pops the next
/// script from the front of the queue, so tests can specify exact event
/// sequences — including tool calls and provider errors — without network
/// access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<MockScript>>>,
    profile: &'static ProviderProfile,
    /// The last [`ChatRequest`] seen by this provider.
    /// Written on each `complete()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
    /// Every request seen, in order.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedMockProvider {
    pub fn new(scripts: Vec<MockScript>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            profile: profile_for("generic").expect("generic profile exists"),
            last_request: Arc::new(Mutex::new(None)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build from plain event sequences (no scripted errors).
    pub fn from_events(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self::new(scripts.into_iter().map(MockScript::Events).collect())
    }

    /// Use a different provider profile (e.g. one without role=tool support).
    pub fn with_profile(mut self, name: &str) -> Self {
        self.profile = profile_for(name).expect("profile must be registered");
        self
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::from_events(vec![vec![
            StreamEvent::TextDelta(reply.into()),
            StreamEvent::Done,
        ]])
    }

    /// Convenience: provider that returns a tool call, then a text reply on
    /// the following round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::from_events(vec![
            vec![
                StreamEvent::ToolCallDelta {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                StreamEvent::Done,
            ],
            vec![StreamEvent::TextDelta(final_text.into()), StreamEvent::Done],
        ])
    }
}

#[async_trait]
impl ChatProvider for ScriptedMockProvider {
    fn provider_name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }
    fn profile(&self) -> &'static ProviderProfile {
        self.profile
    }

    async fn complete(&self, req: ChatRequest) -> Result<EventStream, ClassifiedError> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        self.requests.lock().unwrap().push(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                MockScript::Events(vec![
                    StreamEvent::TextDelta("[no more scripts]".into()),
                    StreamEvent::Done,
                ])
            } else {
                scripts.remove(0)
            }
        };
        match script {
            MockScript::Events(events) => {
                let wrapped: Vec<Result<StreamEvent, ClassifiedError>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(wrapped)))
            }
            MockScript::Error(e) => Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
