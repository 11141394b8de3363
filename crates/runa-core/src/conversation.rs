// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Conversation management: pure functions that validate, trim, and reshape
//! the transcript so every outgoing payload satisfies provider structural
//! contracts (tool-call pairing, role alternation, token limits).

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::warn;

use runa_model::{Message, Role, TokenEstimator};

/// Token headroom reserved on top of the estimated payload before trimming
/// kicks in.
const TRIM_HEADROOM_TOKENS: u32 = 500;
/// Fraction of the context window considered safe for the prompt.
const SAFE_WINDOW_FRACTION: f64 = 0.58;
/// Messages at the tail of the history that are always kept.
const KEEP_RECENT: usize = 10;
/// Fraction of the remaining safe budget older messages may fill.
const OLDER_BUDGET_FRACTION: f64 = 0.9;

// ─── History loading ──────────────────────────────────────────────────────────

/// Prepare a persisted history for sending.
///
/// Drops system messages (a fresh system prompt is built each turn) and tool
/// messages lacking a `tool_call_id`, then enforces bidirectional pairing:
/// an assistant whose `tool_calls` are not all answered before the next
/// assistant turn keeps its text but loses the calls; a tool result whose id
/// no preceding assistant requested is dropped.
pub fn load_history(raw: &[Message]) -> Vec<Message> {
    let mut msgs: Vec<Message> = raw
        .iter()
        .filter(|m| m.role != Role::System)
        .filter(|m| !(m.role == Role::Tool && m.tool_call_id.is_none()))
        .cloned()
        .collect();

    strip_unanswered_tool_calls(&mut msgs);
    drop_orphan_tool_results(msgs)
}

fn strip_unanswered_tool_calls(msgs: &mut [Message]) {
    let len = msgs.len();
    for i in 0..len {
        if msgs[i].role != Role::Assistant || msgs[i].tool_calls.is_empty() {
            continue;
        }
        // Results must arrive before the next assistant turn.
        let window_end = msgs[i + 1..]
            .iter()
            .position(|m| m.role == Role::Assistant)
            .map(|p| i + 1 + p)
            .unwrap_or(len);
        let result_ids: HashSet<&str> = msgs[i + 1..window_end]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let unanswered = msgs[i]
            .tool_calls
            .iter()
            .any(|c| !result_ids.contains(c.id.as_str()));
        if unanswered {
            warn!(
                index = i,
                calls = msgs[i].tool_calls.len(),
                "stripping unanswered tool_calls from assistant message"
            );
            msgs[i].tool_calls.clear();
        }
    }
}

fn drop_orphan_tool_results(msgs: Vec<Message>) -> Vec<Message> {
    let mut requested: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(msgs.len());
    for m in msgs {
        match m.role {
            Role::Assistant => {
                for call in &m.tool_calls {
                    requested.insert(call.id.clone());
                }
                out.push(m);
            }
            Role::Tool => {
                let matched = m
                    .tool_call_id
                    .as_deref()
                    .map(|id| requested.contains(id))
                    .unwrap_or(false);
                if matched {
                    out.push(m);
                } else {
                    warn!(id = ?m.tool_call_id, "dropping orphan tool result");
                }
            }
            _ => out.push(m),
        }
    }
    out
}

// ─── Pre-flight trim ──────────────────────────────────────────────────────────

/// Reduce the history before the first model call of an input when the
/// estimated payload would crowd the context window.
///
/// The most recent [`KEEP_RECENT`] messages are always kept; older messages
/// are admitted by descending importance into a budget of
/// `0.9 · (safe − system_tokens)`; the survivors return to chronological
/// order.
pub fn preflight_trim(
    messages: Vec<Message>,
    system_tokens: u32,
    context_window: u32,
    est: &TokenEstimator,
) -> Vec<Message> {
    let history_tokens = est.estimate_messages(&messages);
    let safe = (SAFE_WINDOW_FRACTION * context_window as f64) as u32;
    if system_tokens + history_tokens + TRIM_HEADROOM_TOKENS <= safe {
        return messages;
    }

    let split = messages.len().saturating_sub(KEEP_RECENT);
    let budget = (OLDER_BUDGET_FRACTION * safe.saturating_sub(system_tokens) as f64) as u32;

    let mut keep: HashSet<usize> = (split..messages.len()).collect();
    let mut used: u32 = est.estimate_messages(&messages[split..]);

    // Stable sort: equal importance keeps chronological precedence.
    let mut by_importance: Vec<usize> = (0..split).collect();
    by_importance.sort_by_key(|&i| std::cmp::Reverse(messages[i].importance.unwrap_or(0)));
    for i in by_importance {
        let cost = est.estimate_message(&messages[i]);
        if used + cost > budget {
            break;
        }
        used += cost;
        keep.insert(i);
    }

    warn!(
        before = messages.len(),
        after = keep.len(),
        budget,
        "pre-flight trim reduced history"
    );
    messages
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, m)| m)
        .collect()
}

// ─── Alternation enforcement ──────────────────────────────────────────────────

/// Produce a sequence with no two consecutive same-role messages.
///
/// Adjacent same-role messages merge (content joined by a blank line,
/// assistant `tool_calls` concatenated) — except tool messages, which each
/// carry a unique `tool_call_id` and are never merged.  For providers that
/// reject `role: "tool"`, each tool message is first rewritten into a user
/// message carrying the result inline.
///
/// Applying this function to its own output yields the same sequence.
pub fn enforce_alternation(messages: Vec<Message>, supports_role_tool: bool) -> Vec<Message> {
    let converted: Vec<Message> = if supports_role_tool {
        messages
    } else {
        messages
            .into_iter()
            .map(|m| {
                if m.role == Role::Tool {
                    let id = m.tool_call_id.as_deref().unwrap_or("");
                    Message::user(format!("Tool Result (ID: {id}):\n{}", m.content))
                } else {
                    m
                }
            })
            .collect()
    };

    let mut out: Vec<Message> = Vec::with_capacity(converted.len());
    for m in converted {
        match out.last_mut() {
            Some(prev) if prev.role == m.role && m.role != Role::Tool => {
                if !m.content.is_empty() {
                    if !prev.content.is_empty() {
                        prev.content.push_str("\n\n");
                    }
                    prev.content.push_str(&m.content);
                }
                prev.tool_calls.extend(m.tool_calls);
            }
            _ => out.push(m),
        }
    }
    out
}

// ─── Context-file injection ───────────────────────────────────────────────────

/// Build the user message carrying the configured context files, each wrapped
/// in a `<context_file>` block with its estimated token count.  Returns
/// `None` when no file could be read.
pub fn build_context_file_message(files: &[PathBuf], est: &TokenEstimator) -> Option<Message> {
    if files.is_empty() {
        return None;
    }
    let mut sections = Vec::with_capacity(files.len());
    let mut total: u32 = 0;
    for path in files {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable context file");
                continue;
            }
        };
        let tokens = est.estimate(&content);
        total += tokens;
        sections.push(format!(
            "<context_file path=\"{}\" tokens=\"~{}\">\n{}\n</context_file>",
            path.display(),
            tokens,
            content
        ));
    }
    if sections.is_empty() {
        return None;
    }
    Some(Message::user(format!(
        "Context files (~{total} tokens total):\n\n{}",
        sections.join("\n\n")
    )))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
