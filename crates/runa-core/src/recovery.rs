// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Token-limit recovery: progressively harsher history trims applied when
//! the provider rejects a payload for size, plus a compressed summary of
//! whatever was dropped so the model keeps its bearings.
//!
//! Distinct from the pre-flight trim: this runs only after a
//! `token_limit_exceeded` classification, and escalates per retry.

use std::collections::HashSet;

use tracing::warn;

use runa_model::{Message, Role, PINNED_IMPORTANCE};

/// Truncation applied to user requests quoted in the recovery summary.
const SUMMARY_REQUEST_CHARS: usize = 300;

/// Outcome of one recovery trim.
#[derive(Debug)]
pub struct RecoveryTrim {
    /// Survivors, in chronological order.
    pub kept: Vec<Message>,
    /// Everything removed, in chronological order.
    pub dropped: Vec<Message>,
}

impl RecoveryTrim {
    /// True when retrying further cannot help: the harshest trim already ran
    /// and almost nothing is left to remove.
    pub fn is_minimal(&self) -> bool {
        self.kept.len() <= 3
    }
}

/// Trim the history for token-limit retry `retry` (1-based).
///
/// Retry 1 keeps the newest 50% of the non-pinned tail (min 10), retry 2 the
/// newest 25% (min 5), retry 3 only the last 3.  The last assistant message
/// (the one that broke the budget) goes first; system messages and the
/// pinned first user message always survive; kept tool results whose calls
/// were dropped get their calls re-included so pairing holds.
pub fn trim_for_retry(messages: Vec<Message>, retry: u32) -> RecoveryTrim {
    let mut msgs = messages;

    // The most recent assistant message is the one that overflowed.  Leave it
    // alone if tool results already answer it; removing it would orphan them.
    if let Some(last_assistant) = msgs.iter().rposition(|m| m.role == Role::Assistant) {
        let answered = msgs[last_assistant + 1..].iter().any(|m| {
            m.role == Role::Tool
                && msgs[last_assistant]
                    .tool_calls
                    .iter()
                    .any(|c| Some(c.id.as_str()) == m.tool_call_id.as_deref())
        });
        if !answered {
            msgs.remove(last_assistant);
        }
    }

    let pinned_first_user = msgs.iter().position(|m| {
        m.role == Role::User && m.importance.unwrap_or(0) >= PINNED_IMPORTANCE
    });

    // "Rest" = everything that is neither system nor the pinned first user.
    let rest: Vec<usize> = (0..msgs.len())
        .filter(|&i| msgs[i].role != Role::System && Some(i) != pinned_first_user)
        .collect();

    let keep_n = match retry {
        0 | 1 => (rest.len() / 2).max(10),
        2 => (rest.len() / 4).max(5),
        _ => 3,
    }
    .min(rest.len());

    let mut keep: HashSet<usize> = rest[rest.len() - keep_n..].iter().copied().collect();
    for (i, m) in msgs.iter().enumerate() {
        if m.role == Role::System {
            keep.insert(i);
        }
    }
    if let Some(i) = pinned_first_user {
        keep.insert(i);
    }

    reinclude_calls_for_kept_results(&msgs, &mut keep);

    let (mut kept, mut dropped) = (Vec::new(), Vec::new());
    for (i, m) in msgs.into_iter().enumerate() {
        if keep.contains(&i) {
            kept.push(m);
        } else {
            dropped.push(m);
        }
    }
    warn!(
        retry,
        kept = kept.len(),
        dropped = dropped.len(),
        "token-limit recovery trimmed history"
    );
    RecoveryTrim { kept, dropped }
}

/// For every kept tool result whose matching call fell outside the keep set,
/// pull the assistant message carrying that call back in.
fn reinclude_calls_for_kept_results(msgs: &[Message], keep: &mut HashSet<usize>) {
    let needed: Vec<String> = keep
        .iter()
        .filter_map(|&i| {
            let m = &msgs[i];
            (m.role == Role::Tool).then(|| m.tool_call_id.clone()).flatten()
        })
        .collect();
    for id in needed {
        let already_kept = keep.iter().any(|&i| {
            msgs[i].role == Role::Assistant && msgs[i].tool_calls.iter().any(|c| c.id == id)
        });
        if already_kept {
            continue;
        }
        if let Some(i) = (0..msgs.len()).find(|&i| {
            msgs[i].role == Role::Assistant && msgs[i].tool_calls.iter().any(|c| c.id == id)
        }) {
            keep.insert(i);
        }
    }
}

/// Compress the dropped messages into a single system-role recovery-context
/// message: a count summary, the optional current task list, and the last
/// three user requests truncated to 300 chars each.
pub fn summarize_dropped(dropped: &[Message], task_list: Option<&str>) -> Message {
    let users = dropped.iter().filter(|m| m.role == Role::User).count();
    let assistants = dropped.iter().filter(|m| m.role == Role::Assistant).count();
    let tools = dropped.iter().filter(|m| m.role == Role::Tool).count();
    let tool_names: Vec<&str> = {
        let mut names: Vec<&str> = dropped
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .map(|c| c.function.name.as_str())
            .collect();
        names.sort();
        names.dedup();
        names
    };

    let mut body = format!(
        "[Recovery context] Earlier history was compressed to fit the model's \
         token limit. Dropped: {users} user message(s), {assistants} assistant \
         message(s), {tools} tool result(s)."
    );
    if !tool_names.is_empty() {
        body.push_str(&format!(" Tools used: {}.", tool_names.join(", ")));
    }
    if let Some(tasks) = task_list {
        body.push_str("\n\nCurrent task list:\n");
        body.push_str(tasks);
    }

    let recent_requests: Vec<String> = dropped
        .iter()
        .filter(|m| m.role == Role::User)
        .rev()
        .take(3)
        .map(|m| truncate_chars(&m.content, SUMMARY_REQUEST_CHARS))
        .collect();
    if !recent_requests.is_empty() {
        body.push_str("\n\nMost recent dropped requests (newest first):");
        for req in recent_requests {
            body.push_str("\n- ");
            body.push_str(&req);
        }
    }

    Message::system(body)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use runa_model::ToolCall;

    fn long_history(n: usize) -> Vec<Message> {
        let mut msgs = vec![
            Message::user("the original task").with_importance(PINNED_IMPORTANCE),
        ];
        for i in 0..n {
            msgs.push(Message::user(format!("step {i}")));
            msgs.push(Message::assistant(format!("reply {i}")));
        }
        msgs
    }

    #[test]
    fn last_assistant_message_is_removed_first() {
        let msgs = vec![
            Message::user("q"),
            Message::assistant("the overflowing reply"),
        ];
        let trim = trim_for_retry(msgs, 1);
        assert!(!trim
            .kept
            .iter()
            .chain(trim.dropped.iter())
            .any(|m| m.content == "the overflowing reply"));
    }

    #[test]
    fn retry_one_keeps_about_half() {
        let trim = trim_for_retry(long_history(40), 1);
        // 80 rest messages (pinned excluded) → keep 40, minus the removed
        // last assistant.
        let non_pinned = trim
            .kept
            .iter()
            .filter(|m| m.importance.unwrap_or(0) < PINNED_IMPORTANCE)
            .count();
        assert!((38..=41).contains(&non_pinned), "kept {non_pinned}");
    }

    #[test]
    fn retry_two_keeps_about_a_quarter() {
        let trim = trim_for_retry(long_history(40), 2);
        let non_pinned = trim
            .kept
            .iter()
            .filter(|m| m.importance.unwrap_or(0) < PINNED_IMPORTANCE)
            .count();
        assert!((18..=21).contains(&non_pinned), "kept {non_pinned}");
    }

    #[test]
    fn retry_three_keeps_last_three() {
        let trim = trim_for_retry(long_history(40), 3);
        let non_pinned = trim
            .kept
            .iter()
            .filter(|m| m.importance.unwrap_or(0) < PINNED_IMPORTANCE)
            .count();
        assert_eq!(non_pinned, 3);
    }

    #[test]
    fn minimums_apply_to_small_histories() {
        // 12 rest messages: 50% would be 6, but the minimum is 10.
        let trim = trim_for_retry(long_history(6), 1);
        let non_pinned = trim
            .kept
            .iter()
            .filter(|m| m.importance.unwrap_or(0) < PINNED_IMPORTANCE)
            .count();
        assert!(non_pinned >= 10, "minimum of 10 not honoured: {non_pinned}");
    }

    #[test]
    fn pinned_first_user_message_always_survives() {
        for retry in 1..=3 {
            let trim = trim_for_retry(long_history(40), retry);
            assert!(
                trim.kept.iter().any(|m| m.content == "the original task"),
                "pinned message lost at retry {retry}"
            );
        }
    }

    #[test]
    fn kept_tool_results_get_their_calls_back() {
        let mut msgs = long_history(20);
        // A tool pair early in the history, then enough messages that the
        // assistant half would normally be dropped.
        let call = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall::function("call_early", "grep", "{}")],
        );
        msgs.insert(1, call);
        msgs.insert(2, Message::tool_result("call_early", "match found"));

        // Keep-set is the tail; force the result into it by using retry 1 on
        // a history where the pair sits just inside the kept half.
        let trim = trim_for_retry(msgs, 1);
        let kept_result = trim
            .kept
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("call_early"));
        if kept_result {
            let kept_call = trim.kept.iter().any(|m| {
                m.tool_calls.iter().any(|c| c.id == "call_early")
            });
            assert!(kept_call, "kept result must drag its call back in");
        }
    }

    #[test]
    fn pairing_holds_for_every_kept_result() {
        let mut msgs = vec![Message::user("task").with_importance(PINNED_IMPORTANCE)];
        for i in 0..30 {
            msgs.push(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::function(format!("c{i}"), "tool", "{}")],
            ));
            msgs.push(Message::tool_result(format!("c{i}"), format!("r{i}")));
        }
        let trim = trim_for_retry(msgs, 2);
        for m in trim.kept.iter().filter(|m| m.role == Role::Tool) {
            let id = m.tool_call_id.as_deref().unwrap();
            assert!(
                trim.kept
                    .iter()
                    .any(|a| a.tool_calls.iter().any(|c| c.id == id)),
                "kept result {id} lost its call"
            );
        }
    }

    #[test]
    fn minimal_detection_at_three_or_fewer() {
        let trim = trim_for_retry(
            vec![Message::user("a"), Message::user("b")],
            3,
        );
        assert!(trim.is_minimal());
    }

    // ── summarize_dropped ─────────────────────────────────────────────────────

    #[test]
    fn summary_counts_roles_and_tools() {
        let dropped = vec![
            Message::user("please grep"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::function("c1", "grep", "{}")],
            ),
            Message::tool_result("c1", "matches"),
        ];
        let summary = summarize_dropped(&dropped, None);
        assert_eq!(summary.role, Role::System);
        assert!(summary.content.contains("1 user message(s)"));
        assert!(summary.content.contains("1 tool result(s)"));
        assert!(summary.content.contains("grep"));
    }

    #[test]
    fn summary_includes_task_list_when_given() {
        let summary = summarize_dropped(&[], Some("- [ ] fix the bug"));
        assert!(summary.content.contains("fix the bug"));
    }

    #[test]
    fn summary_quotes_last_three_requests_truncated() {
        let mut dropped = Vec::new();
        for i in 0..5 {
            dropped.push(Message::user(format!("request {i} {}", "x".repeat(400))));
        }
        let summary = summarize_dropped(&dropped, None);
        assert!(summary.content.contains("request 4"));
        assert!(summary.content.contains("request 2"));
        assert!(!summary.content.contains("request 1 "));
        // Truncation marker present.
        assert!(summary.content.contains('…'));
    }
}
