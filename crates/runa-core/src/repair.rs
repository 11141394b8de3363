// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Tolerant repair of tool-call arguments.
//!
//! Models occasionally emit argument strings that are almost JSON: a missing
//! value after a colon, a trailing comma, an invalid escape, or a truncated
//! tail.  Each repair stage is tried in order and the first parseable result
//! wins; already-valid JSON passes through stage one untouched, which makes
//! the whole pipeline idempotent.

use anyhow::bail;
use serde_json::Value;

/// Repair a tool call's `arguments` string into a JSON object.
///
/// An empty string is a valid "no arguments" spelling and yields `{}`.
pub fn repair_arguments(raw: &str) -> anyhow::Result<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    // Stage 1: already valid.
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }

    // Stage 2: fix invalid escape sequences inside string values.
    let fixed = fix_invalid_escapes(trimmed);
    if let Ok(v) = serde_json::from_str::<Value>(&fixed) {
        return Ok(v);
    }

    // Stage 3: fill missing values (`"k":,` → `"k":0,`) and drop trailing
    // commas.
    let filled = fill_missing_values(&fixed);
    let filled = remove_trailing_commas(&filled);
    if let Ok(v) = serde_json::from_str::<Value>(&filled) {
        return Ok(v);
    }

    // Stage 4: balance quotes and braces on a truncated tail.
    let completed = balance_delimiters(&filled);
    if let Ok(v) = serde_json::from_str::<Value>(&completed) {
        return Ok(v);
    }

    bail!("tool argument repair failed: all strategies exhausted")
}

/// Walk a JSON string and escape any invalid escape sequence inside string
/// values.  Valid JSON escapes are `"`, `\`, `/`, `b`, `f`, `n`, `r`, `t`,
/// `u`; anything else becomes a literal backslash plus the character.
fn fix_invalid_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

/// `"key":,` and `"key":}` mean the model dropped the value; substitute 0.
fn fill_missing_values(s: &str) -> String {
    let re = regex::Regex::new(r#"":\s*([,}\]])"#).expect("static regex");
    re.replace_all(s, "\":0$1").to_string()
}

fn remove_trailing_commas(s: &str) -> String {
    let re = regex::Regex::new(r",\s*([}\]])").expect("static regex");
    re.replace_all(s, "$1").to_string()
}

/// Close an unterminated string and any unclosed braces at the end of a
/// truncated argument payload.
fn balance_delimiters(s: &str) -> String {
    let mut out = s.trim_end().to_string();
    let quote_count = out.chars().filter(|&c| c == '"').count();
    if quote_count % 2 == 1 {
        out.push('"');
    }
    let opens = out.chars().filter(|&c| c == '{').count();
    let closes = out.chars().filter(|&c| c == '}').count();
    for _ in closes..opens {
        out.push('}');
    }
    out
}

// ─── XML tool-invocation form ─────────────────────────────────────────────────

/// Detect an XML-style tool invocation written into the text stream and
/// convert it to `(tool_name, json_arguments)`.
///
/// Some models fall back to the `<invoke name="…"><parameter name="…">…`
/// form instead of the structured tool-call protocol.  Parameter values that
/// parse as JSON scalars keep their type; everything else becomes a string.
pub fn convert_xml_invocation(text: &str) -> Option<(String, Value)> {
    let invoke_re =
        regex::Regex::new(r#"(?s)<invoke\s+name="([^"]+)"\s*>(.*?)</invoke>"#).expect("static regex");
    let param_re =
        regex::Regex::new(r#"(?s)<parameter\s+name="([^"]+)"\s*>(.*?)</parameter>"#)
            .expect("static regex");

    let caps = invoke_re.captures(text)?;
    let name = caps.get(1)?.as_str().to_string();
    let body = caps.get(2)?.as_str();

    let mut args = serde_json::Map::new();
    for p in param_re.captures_iter(body) {
        let key = p.get(1)?.as_str().to_string();
        let raw = p.get(2)?.as_str().trim();
        let value = serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|v| !v.is_string() || raw.starts_with('"'))
            .unwrap_or_else(|| Value::String(raw.to_string()));
        args.insert(key, value);
    }
    Some((name, Value::Object(args)))
}

/// True when the text contains tool-call markup that should have been a
/// structured call.
pub fn text_contains_tool_markup(text: &str) -> bool {
    text.contains("<invoke name=") || text.contains("<tool_call>") || text.contains("[TOOL_CALL]")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── repair_arguments ──────────────────────────────────────────────────────

    #[test]
    fn valid_json_passes_through_unchanged() {
        let v = repair_arguments(r#"{"path":"foo.txt","offset":10}"#).unwrap();
        assert_eq!(v, json!({ "path": "foo.txt", "offset": 10 }));
    }

    #[test]
    fn repair_is_idempotent_on_valid_json() {
        let raw = r#"{"a":1,"b":"two"}"#;
        let first = repair_arguments(raw).unwrap();
        let second = repair_arguments(&first.to_string()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        assert_eq!(repair_arguments("").unwrap(), json!({}));
        assert_eq!(repair_arguments("   ").unwrap(), json!({}));
    }

    #[test]
    fn missing_value_is_filled_with_zero() {
        let v = repair_arguments(r#"{"offset":,"length":8}"#).unwrap();
        assert_eq!(v, json!({ "offset": 0, "length": 8 }));
    }

    #[test]
    fn missing_value_before_closing_brace() {
        let v = repair_arguments(r#"{"offset":}"#).unwrap();
        assert_eq!(v, json!({ "offset": 0 }));
    }

    #[test]
    fn trailing_comma_is_removed() {
        let v = repair_arguments(r#"{"a":1,}"#).unwrap();
        assert_eq!(v, json!({ "a": 1 }));
    }

    #[test]
    fn invalid_escape_is_fixed() {
        let v = repair_arguments(r#"{"path":"C:\projects\main.c"}"#).unwrap();
        assert_eq!(v["path"], "C:\\projects\\main.c");
    }

    #[test]
    fn truncated_string_and_brace_are_balanced() {
        let v = repair_arguments(r#"{"command":"ls -la"#).unwrap();
        assert_eq!(v, json!({ "command": "ls -la" }));
    }

    #[test]
    fn truncated_nested_object_is_closed() {
        let v = repair_arguments(r#"{"outer":{"inner":1"#).unwrap();
        assert_eq!(v, json!({ "outer": { "inner": 1 } }));
    }

    #[test]
    fn hopeless_garbage_fails() {
        assert!(repair_arguments("not even close [[[").is_err());
    }

    #[test]
    fn colon_inside_string_value_is_not_mistaken_for_missing_value() {
        let v = repair_arguments(r#"{"url":"http://example.com","n":1}"#).unwrap();
        assert_eq!(v["url"], "http://example.com");
    }

    // ── XML invocation conversion ─────────────────────────────────────────────

    #[test]
    fn xml_invocation_converts_to_name_and_args() {
        let text = r#"I'll read that file.
<invoke name="file_operations">
<parameter name="operation">read_file</parameter>
<parameter name="path">foo.txt</parameter>
</invoke>"#;
        let (name, args) = convert_xml_invocation(text).unwrap();
        assert_eq!(name, "file_operations");
        assert_eq!(args["operation"], "read_file");
        assert_eq!(args["path"], "foo.txt");
    }

    #[test]
    fn xml_numeric_parameters_keep_their_type() {
        let text = r#"<invoke name="read"><parameter name="offset">42</parameter><parameter name="flag">true</parameter></invoke>"#;
        let (_, args) = convert_xml_invocation(text).unwrap();
        assert_eq!(args["offset"], 42);
        assert_eq!(args["flag"], true);
    }

    #[test]
    fn plain_text_is_not_an_invocation() {
        assert!(convert_xml_invocation("just a normal answer").is_none());
    }

    #[test]
    fn invocation_without_parameters_yields_empty_args() {
        let (name, args) = convert_xml_invocation(r#"<invoke name="ping"></invoke>"#).unwrap();
        assert_eq!(name, "ping");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn markup_detection_covers_known_variants() {
        assert!(text_contains_tool_markup(r#"<invoke name="x">"#));
        assert!(text_contains_tool_markup("<tool_call>{}</tool_call>"));
        assert!(text_contains_tool_markup("[TOOL_CALL] shell"));
        assert!(!text_contains_tool_markup("normal prose"));
    }
}
