// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use runa_model::assemble::ChunkStats;

/// Events emitted by the orchestrator while processing one user input.
/// Consumers (CLI, UI) subscribe to these to drive their output; events are
/// sent in the same order the transcript records them.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A content chunk streamed from the model, with running stream stats
    Chunk { delta: String, stats: ChunkStats },
    /// A reasoning chunk surfaced by providers that expose one
    Thinking(String),
    /// The model has requested a tool call (fired as soon as the name is known)
    ToolCallStarted(String),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// A user-visible status line: rate-limit waits, retries, trims,
    /// premium-quota charges
    SystemMessage(String),
    /// The orchestrator finished processing the current user input
    TurnComplete,
}
