// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Payload sanitization: normalize or drop characters that certain providers
//! reject with a 400, and strip internal bookkeeping fields before
//! serialization.
//!
//! Both passes are idempotent; running the sanitizer over its own output
//! yields the same value.

use serde_json::Value;

/// Recursively sanitize every string in a JSON payload in place.
pub fn sanitize_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            let clean = sanitize_text(s);
            if clean != *s {
                *s = clean;
            }
        }
        Value::Array(items) => {
            for item in items {
                sanitize_value(item);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                sanitize_value(item);
            }
        }
        _ => {}
    }
}

/// Normalize a single string: smart punctuation becomes ASCII, bullets become
/// dashes, emoji/symbol code points and stray control characters are dropped.
/// `\t`, `\n`, and `\r` survive.
pub fn sanitize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\t' | '\n' | '\r' => out.push(c),
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => out.push('"'),
            '\u{2010}'..='\u{2015}' => out.push('-'),
            '\u{2022}' | '\u{25CF}' | '\u{25E6}' | '\u{2043}' | '\u{00B7}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' => out.push(' '),
            '\u{2028}' | '\u{2029}' => out.push('\n'),
            // Zero-width characters and variation selectors.
            '\u{200B}'..='\u{200F}' | '\u{FE00}'..='\u{FE0F}' | '\u{FEFF}' => {}
            // Emoji blocks and the misc-symbol ranges that ride along with them.
            '\u{1F000}'..='\u{1FFFF}' | '\u{2600}'..='\u{27BF}' | '\u{2190}'..='\u{21FF}'
            | '\u{2B00}'..='\u{2BFF}' => {}
            // Remaining C0/C1 controls and DEL.
            c if (c as u32) < 0x20 || c == '\u{7F}' || ('\u{80}'..='\u{9F}').contains(&c) => {}
            c => out.push(c),
        }
    }
    out
}

/// Remove internal metadata fields from messages and `tool_calls` entries.
/// Streaming assembly attaches flags like `_name_complete`, and trimming
/// attaches `_importance`; neither must reach the wire.
pub fn strip_internal_fields(v: &mut Value) {
    match v {
        Value::Array(items) => {
            for item in items {
                strip_internal_fields(item);
            }
        }
        Value::Object(map) => {
            // Message objects (role + content) and tool-call objects
            // (id + function) both carry only wire-visible keys.
            if map.contains_key("role") || map.contains_key("function") {
                map.retain(|k, _| !k.starts_with('_'));
            }
            for (_, item) in map.iter_mut() {
                strip_internal_fields(item);
            }
        }
        _ => {}
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_ascii_passes_through() {
        let s = "fn main() { println!(\"hi\"); }\n\ttabbed";
        assert_eq!(sanitize_text(s), s);
    }

    #[test]
    fn smart_quotes_become_ascii() {
        assert_eq!(sanitize_text("\u{201C}quoted\u{201D}"), "\"quoted\"");
        assert_eq!(sanitize_text("it\u{2019}s"), "it's");
    }

    #[test]
    fn bullets_and_dashes_normalize() {
        assert_eq!(sanitize_text("\u{2022} item"), "- item");
        assert_eq!(sanitize_text("a\u{2014}b"), "a-b");
    }

    #[test]
    fn ellipsis_expands() {
        assert_eq!(sanitize_text("wait\u{2026}"), "wait...");
    }

    #[test]
    fn emoji_are_dropped() {
        assert_eq!(sanitize_text("done \u{1F389}\u{2705}"), "done ");
    }

    #[test]
    fn control_chars_dropped_except_whitespace() {
        assert_eq!(sanitize_text("a\u{0}b\u{7}c\nd"), "abc\nd");
    }

    #[test]
    fn cjk_and_accents_survive() {
        let s = "héllo 世界 привет";
        assert_eq!(sanitize_text(s), s);
    }

    #[test]
    fn sanitize_text_is_idempotent() {
        let dirty = "\u{201C}x\u{201D} \u{2022} y\u{2026} \u{1F600}";
        let once = sanitize_text(dirty);
        assert_eq!(sanitize_text(&once), once);
    }

    #[test]
    fn sanitize_value_walks_nested_structures() {
        let mut v = json!({
            "messages": [
                { "role": "user", "content": "look \u{1F600} here" }
            ],
            "note": "it\u{2019}s fine"
        });
        sanitize_value(&mut v);
        assert_eq!(v["messages"][0]["content"], "look  here");
        assert_eq!(v["note"], "it's fine");
    }

    #[test]
    fn sanitize_value_is_idempotent() {
        let mut v = json!({ "a": "b\u{2026}", "nested": { "c": ["d\u{2022}"] } });
        sanitize_value(&mut v);
        let once = v.clone();
        sanitize_value(&mut v);
        assert_eq!(v, once);
    }

    #[test]
    fn strip_internal_fields_removes_assembly_flags() {
        let mut v = json!({
            "messages": [{
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "_name_complete": true,
                    "function": { "name": "shell", "arguments": "{}" }
                }]
            }]
        });
        strip_internal_fields(&mut v);
        let call = &v["messages"][0]["tool_calls"][0];
        assert!(call.get("_name_complete").is_none());
        assert_eq!(call["id"], "call_1");
        assert_eq!(call["function"]["name"], "shell");
    }

    #[test]
    fn strip_internal_fields_removes_importance_from_messages() {
        let mut v = json!({
            "messages": [{ "role": "user", "content": "hi", "_importance": 10 }]
        });
        strip_internal_fields(&mut v);
        assert!(v["messages"][0].get("_importance").is_none());
        assert_eq!(v["messages"][0]["content"], "hi");
    }

    #[test]
    fn strip_internal_fields_is_idempotent() {
        let mut v = json!({
            "tool_calls": [{ "id": "x", "function": { "name": "f" }, "_tmp": 1 }]
        });
        strip_internal_fields(&mut v);
        let once = v.clone();
        strip_internal_fields(&mut v);
        assert_eq!(v, once);
    }
}
