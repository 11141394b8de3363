// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Deterministic char→token estimation with a feedback-learned ratio.
//!
//! Streaming responses carry no usage block, so the gateway estimates prompt
//! sizes locally.  Whenever a non-streaming response reports the real
//! `prompt_tokens`, the chars-per-token ratio is nudged toward the observed
//! value so estimates track the current model and workload.

use crate::types::Message;

const INITIAL_RATIO: f64 = 2.5;
const MIN_RATIO: f64 = 1.5;
const MAX_RATIO: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct TokenEstimator {
    chars_per_token: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: INITIAL_RATIO,
        }
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ratio(&self) -> f64 {
        self.chars_per_token
    }

    /// Estimate tokens for a text fragment.  Never returns 0 for non-empty input.
    pub fn estimate(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        ((text.len() as f64 / self.chars_per_token).ceil() as u32).max(1)
    }

    /// Estimate tokens for a full message, including tool-call payloads.
    pub fn estimate_message(&self, msg: &Message) -> u32 {
        let chars = msg.char_len();
        if chars == 0 {
            return 1;
        }
        ((chars as f64 / self.chars_per_token).ceil() as u32).max(1)
    }

    pub fn estimate_messages(&self, msgs: &[Message]) -> u32 {
        msgs.iter().map(|m| self.estimate_message(m)).sum()
    }

    /// Blend an observed chars/token ratio into the running estimate.
    ///
    /// `total_chars` is the character count of the payload that produced
    /// `actual_prompt_tokens`.  The blend is 80% old / 20% observed, clamped
    /// to a plausible band so a single bad sample cannot wreck estimation.
    pub fn observe(&mut self, total_chars: usize, actual_prompt_tokens: u32) {
        if actual_prompt_tokens == 0 || total_chars == 0 {
            return;
        }
        let observed = total_chars as f64 / actual_prompt_tokens as f64;
        let blended = 0.8 * self.chars_per_token + 0.2 * observed;
        self.chars_per_token = blended.clamp(MIN_RATIO, MAX_RATIO);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
