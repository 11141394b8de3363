// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use runa_model::continuity::StatefulMarker;
use runa_model::rate::QuotaSnapshot;
use runa_model::{Message, Usage};

/// Bounded ring of recent turn-snapshot ids kept for undo.
pub const TURN_HISTORY_CAP: usize = 20;

/// The session fields the core reads and writes.  Everything else about
/// persistence (format, location, locking) belongs to the sink implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub selected_model: String,
    /// Legacy prior-response id kept alongside the marker list; the payload
    /// builder falls back to it when no marker matches the model.
    #[serde(rename = "lastGitHubCopilotResponseId", default)]
    pub last_copilot_response_id: Option<String>,
    #[serde(rename = "_stateful_markers", default)]
    pub stateful_markers: Vec<StatefulMarker>,
    #[serde(default)]
    pub quota: Option<QuotaSnapshot>,
    #[serde(rename = "_last_premium_used", default)]
    pub last_premium_used: Option<i64>,
    #[serde(rename = "_last_quota_delta", default)]
    pub last_quota_delta: Option<i64>,
    #[serde(rename = "_premium_charge_message", default)]
    pub premium_charge_message: Option<String>,
    #[serde(default)]
    pub total_premium_requests: u64,
    #[serde(default)]
    pub context_files: Vec<PathBuf>,
    #[serde(default)]
    pub user_interrupted: bool,
    #[serde(default)]
    pub turn_history: VecDeque<String>,
}

impl SessionState {
    pub fn new(selected_model: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            selected_model: selected_model.into(),
            last_copilot_response_id: None,
            stateful_markers: Vec::new(),
            quota: None,
            last_premium_used: None,
            last_quota_delta: None,
            premium_charge_message: None,
            total_premium_requests: 0,
            context_files: Vec::new(),
            user_interrupted: false,
            turn_history: VecDeque::new(),
        }
    }

    /// Record a turn-snapshot id in the bounded undo ring.
    pub fn note_turn(&mut self, turn_id: impl Into<String>) {
        self.turn_history.push_back(turn_id.into());
        while self.turn_history.len() > TURN_HISTORY_CAP {
            self.turn_history.pop_front();
        }
    }

    /// Fold a fresh quota snapshot into the session.
    ///
    /// Returns the user-visible charge message when premium usage increased.
    /// A zero delta means billing continuity carried the session; the first
    /// snapshot only establishes the baseline.
    pub fn apply_quota(&mut self, snap: QuotaSnapshot) -> Option<String> {
        let used = snap.used;
        let entitlement = snap.entitlement;
        let unlimited = snap.unlimited();
        let previous = self.last_premium_used;
        self.quota = Some(snap);
        self.last_premium_used = Some(used);

        let Some(prev) = previous else {
            debug!(used, "premium quota baseline established");
            self.last_quota_delta = None;
            return None;
        };

        let delta = used - prev;
        self.last_quota_delta = Some(delta);
        if delta > 0 {
            self.total_premium_requests += delta as u64;
            let message = if unlimited {
                format!("This request used {delta} premium request(s).")
            } else {
                format!(
                    "This request used {delta} premium request(s) \
                     ({used} of {entitlement} used this period)."
                )
            };
            self.premium_charge_message = Some(message.clone());
            Some(message)
        } else {
            debug!("premium usage unchanged; session continuity held");
            None
        }
    }
}

/// The narrow persistence interface the core requires.
///
/// `add_message` and `save` must be idempotent and ordered: replaying a save
/// must not duplicate messages, and a message is durable once `save` returns.
pub trait SessionSink: Send {
    fn session_id(&self) -> String;
    fn state(&mut self) -> &mut SessionState;
    fn state_ref(&self) -> &SessionState;
    /// The ordered conversation history as currently persisted.
    fn history(&self) -> Vec<Message>;
    fn add_message(&mut self, message: Message) -> anyhow::Result<()>;
    fn save(&mut self) -> anyhow::Result<()>;
    /// Open an undo snapshot for the turn started by `user_input`; returns
    /// its id.  File-mutating tools deposit pre-images under this id.
    fn begin_turn(&mut self, user_input: &str) -> String;
    fn record_api_usage(&mut self, _usage: &Usage, _model: &str, _provider: &str) {}
}

/// In-memory session used by the CLI's ephemeral mode and by tests.
#[derive(Debug)]
pub struct MemorySession {
    state: SessionState,
    messages: Vec<Message>,
    /// Number of `save` calls, observable by tests.
    pub save_count: usize,
    /// Message count at the time of each save, observable by tests.
    pub saved_lengths: Vec<usize>,
}

impl MemorySession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            state: SessionState::new(model),
            messages: Vec::new(),
            save_count: 0,
            saved_lengths: Vec::new(),
        }
    }

    pub fn with_history(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl SessionSink for MemorySession {
    fn session_id(&self) -> String {
        self.state.session_id.clone()
    }

    fn state(&mut self) -> &mut SessionState {
        &mut self.state
    }

    fn state_ref(&self) -> &SessionState {
        &self.state
    }

    fn history(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn add_message(&mut self, message: Message) -> anyhow::Result<()> {
        self.messages.push(message);
        Ok(())
    }

    fn save(&mut self) -> anyhow::Result<()> {
        self.save_count += 1;
        self.saved_lengths.push(self.messages.len());
        Ok(())
    }

    fn begin_turn(&mut self, _user_input: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.state.note_turn(id.clone());
        id
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
