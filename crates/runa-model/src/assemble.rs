// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Incremental assembly of one streamed turn.
//!
//! Tool-call fragments arrive keyed by a parallel-call `index`; each index
//! accumulates its `id`, `name`, and `arguments` independently.  Fragment
//! order within an index is guaranteed by the provider, so concatenation
//! reconstructs the argument string regardless of chunk boundaries.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::rate::{QuotaSnapshot, RateLimitSnapshot};
use crate::types::{generate_call_id, StreamEvent, ToolCall, Usage};

/// Streaming statistics passed along with each content chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkStats {
    /// Rough count of tokens streamed so far.
    pub token_count: u32,
    /// Time from request start to the first content token.
    pub ttft: Option<Duration>,
    /// Tokens per second since the first token.
    pub tps: f64,
    /// Elapsed time since the request started.
    pub duration: Duration,
}

/// Consumer-visible notification produced while absorbing events.
#[derive(Debug, Clone)]
pub enum AssemblyNote {
    /// A content delta plus streaming stats — forward to `on_chunk`.
    Chunk { delta: String, stats: ChunkStats },
    /// A tool call's name just became known — forward to `on_tool_call`.
    ToolCallNamed(String),
    /// A reasoning delta — forward to `on_thinking`.
    Thinking(String),
}

/// Everything learned from one completed stream.
#[derive(Debug, Clone, Default)]
pub struct TurnAssembly {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub stateful_marker: Option<String>,
    pub response_id: Option<String>,
    pub rate: Option<RateLimitSnapshot>,
    pub quota: Option<QuotaSnapshot>,
    pub finish_reason: Option<String>,
    pub stats: ChunkStats,
    /// Whether the stream terminated with `[DONE]` (or a complete body).
    pub done: bool,
}

struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

pub struct StreamAssembler {
    content: String,
    pending: BTreeMap<u32, PendingCall>,
    usage: Option<Usage>,
    marker: Option<String>,
    response_id: Option<String>,
    rate: Option<RateLimitSnapshot>,
    quota: Option<QuotaSnapshot>,
    finish_reason: Option<String>,
    started: Instant,
    first_token: Option<Instant>,
    token_count: u32,
    done: bool,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            pending: BTreeMap::new(),
            usage: None,
            marker: None,
            response_id: None,
            rate: None,
            quota: None,
            finish_reason: None,
            started: Instant::now(),
            first_token: None,
            token_count: 0,
            done: false,
        }
    }

    /// Absorb one stream event, returning a note when the consumer should be
    /// notified.  Notes fire synchronously, in stream order.
    pub fn absorb(&mut self, event: StreamEvent) -> Option<AssemblyNote> {
        match event {
            StreamEvent::TextDelta(delta) => {
                let now = Instant::now();
                if self.first_token.is_none() {
                    self.first_token = Some(now);
                }
                self.token_count += ((delta.len() as u32) / 4).max(1);
                self.content.push_str(&delta);
                Some(AssemblyNote::Chunk {
                    delta,
                    stats: self.stats_at(now),
                })
            }
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let slot = self.pending.entry(index).or_insert_with(|| PendingCall {
                    id: String::new(),
                    name: String::new(),
                    arguments: String::new(),
                    announced: false,
                });
                if !id.is_empty() {
                    slot.id = id;
                }
                if !name.is_empty() {
                    slot.name.push_str(&name);
                }
                slot.arguments.push_str(&arguments);
                if !slot.announced && !slot.name.is_empty() {
                    slot.announced = true;
                    return Some(AssemblyNote::ToolCallNamed(slot.name.clone()));
                }
                None
            }
            StreamEvent::ThinkingDelta(delta) => Some(AssemblyNote::Thinking(delta)),
            StreamEvent::StatefulMarker(m) => {
                self.marker = Some(m);
                None
            }
            StreamEvent::ResponseId(id) => {
                self.response_id = Some(id);
                None
            }
            StreamEvent::RateLimit(snap) => {
                self.rate = Some(snap);
                None
            }
            StreamEvent::Quota(snap) => {
                self.quota = Some(snap);
                None
            }
            StreamEvent::Usage(u) => {
                self.usage = Some(u);
                None
            }
            StreamEvent::FinishReason(r) => {
                self.finish_reason = Some(r);
                None
            }
            StreamEvent::Done => {
                self.done = true;
                None
            }
        }
    }

    fn stats_at(&self, now: Instant) -> ChunkStats {
        let duration = now.duration_since(self.started);
        let ttft = self.first_token.map(|t| t.duration_since(self.started));
        let tps = match self.first_token {
            Some(t) => {
                let generating = now.duration_since(t).as_secs_f64();
                if generating > 0.0 {
                    self.token_count as f64 / generating
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        ChunkStats {
            token_count: self.token_count,
            ttft,
            tps,
            duration,
        }
    }

    /// Finalize the turn.  Pending calls are flushed in index order; calls
    /// with an empty name cannot be dispatched and are dropped; an empty id
    /// gets a synthetic replacement so pairing stays intact.
    pub fn finish(self) -> TurnAssembly {
        let stats = self.stats_at(Instant::now());
        let mut tool_calls = Vec::with_capacity(self.pending.len());
        for (index, slot) in self.pending {
            if slot.name.is_empty() {
                warn!(index, tool_call_id = %slot.id, "dropping tool call with empty name");
                continue;
            }
            let id = if slot.id.is_empty() {
                let synthetic = generate_call_id();
                warn!(index, tool_name = %slot.name, id = %synthetic, "tool call had empty id; generated one");
                synthetic
            } else {
                slot.id
            };
            tool_calls.push(ToolCall::function(id, slot.name, slot.arguments));
        }
        TurnAssembly {
            content: self.content,
            tool_calls,
            usage: self.usage,
            stateful_marker: self.marker,
            response_id: self.response_id,
            rate: self.rate,
            quota: self.quota,
            finish_reason: self.finish_reason,
            stats,
            done: self.done,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
