// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Billing-continuity markers.
//!
//! Certain providers return an opaque `stateful_marker` that, replayed as
//! `previous_response_id`, lets follow-up requests share billing context.
//! Markers are stored only on the *first* model call of a user input
//! (`tool_call_iteration ≤ 1`); later rounds re-use the existing marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAX_STATEFUL_MARKERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatefulMarker {
    pub model: String,
    pub marker: String,
    pub timestamp: DateTime<Utc>,
}

/// Prepend a marker for `model`, honouring the iteration gate and the
/// list cap.  Newest entry is always at index 0.
pub fn store_marker(
    markers: &mut Vec<StatefulMarker>,
    model: &str,
    marker: &str,
    tool_call_iteration: u32,
) {
    if tool_call_iteration > 1 {
        debug!(model, tool_call_iteration, "marker storage suppressed past first call");
        return;
    }
    markers.insert(
        0,
        StatefulMarker {
            model: model.to_string(),
            marker: marker.to_string(),
            timestamp: Utc::now(),
        },
    );
    markers.truncate(MAX_STATEFUL_MARKERS);
}

/// Most recent marker stored for `model`, if any.
pub fn lookup_marker<'a>(markers: &'a [StatefulMarker], model: &str) -> Option<&'a str> {
    markers
        .iter()
        .find(|m| m.model == model)
        .map(|m| m.marker.as_str())
}

/// Resolve the continuity value to send as `previous_response_id`.
///
/// Prefers the newest stateful marker for `model`; falls back to the legacy
/// prior-response id.  Which path was taken is logged so the two mechanisms
/// can be told apart in traces.
pub fn resolve_previous_response_id(
    markers: &[StatefulMarker],
    legacy_response_id: Option<&str>,
    model: &str,
) -> Option<String> {
    if let Some(marker) = lookup_marker(markers, model) {
        debug!(model, continuity = "marker", "using stateful marker");
        return Some(marker.to_string());
    }
    if let Some(legacy) = legacy_response_id {
        debug!(model, continuity = "legacy_response_id", "using prior response id");
        return Some(legacy.to_string());
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_lookup_round_trip() {
        let mut markers = Vec::new();
        store_marker(&mut markers, "gpt-4o", "m-1", 1);
        assert_eq!(lookup_marker(&markers, "gpt-4o"), Some("m-1"));
    }

    #[test]
    fn storage_suppressed_past_first_iteration() {
        let mut markers = Vec::new();
        store_marker(&mut markers, "gpt-4o", "m-1", 1);
        store_marker(&mut markers, "gpt-4o", "m-2", 2);
        assert_eq!(lookup_marker(&markers, "gpt-4o"), Some("m-1"));
    }

    #[test]
    fn iteration_zero_also_stores() {
        let mut markers = Vec::new();
        store_marker(&mut markers, "gpt-4o", "m-1", 0);
        assert_eq!(markers.len(), 1);
    }

    #[test]
    fn newest_marker_is_at_index_zero() {
        let mut markers = Vec::new();
        store_marker(&mut markers, "gpt-4o", "m-1", 1);
        store_marker(&mut markers, "gpt-4o", "m-2", 1);
        assert_eq!(markers[0].marker, "m-2");
        assert_eq!(lookup_marker(&markers, "gpt-4o"), Some("m-2"));
    }

    #[test]
    fn list_is_capped_at_ten() {
        let mut markers = Vec::new();
        for i in 0..25 {
            store_marker(&mut markers, "gpt-4o", &format!("m-{i}"), 1);
        }
        assert_eq!(markers.len(), MAX_STATEFUL_MARKERS);
        assert_eq!(markers[0].marker, "m-24");
    }

    #[test]
    fn lookup_is_per_model() {
        let mut markers = Vec::new();
        store_marker(&mut markers, "gpt-4o", "m-openai", 1);
        store_marker(&mut markers, "claude-opus", "m-claude", 1);
        assert_eq!(lookup_marker(&markers, "gpt-4o"), Some("m-openai"));
        assert_eq!(lookup_marker(&markers, "claude-opus"), Some("m-claude"));
        assert_eq!(lookup_marker(&markers, "other"), None);
    }

    #[test]
    fn resolve_prefers_marker_over_legacy() {
        let mut markers = Vec::new();
        store_marker(&mut markers, "gpt-4o", "m-1", 1);
        let got = resolve_previous_response_id(&markers, Some("legacy-id"), "gpt-4o");
        assert_eq!(got.as_deref(), Some("m-1"));
    }

    #[test]
    fn resolve_falls_back_to_legacy() {
        let got = resolve_previous_response_id(&[], Some("legacy-id"), "gpt-4o");
        assert_eq!(got.as_deref(), Some("legacy-id"));
    }

    #[test]
    fn resolve_returns_none_when_nothing_stored() {
        assert!(resolve_previous_response_id(&[], None, "gpt-4o").is_none());
    }
}
