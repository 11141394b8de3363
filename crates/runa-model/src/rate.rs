// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
//! Rate-limit and premium-quota tracking.
//!
//! Standard `X-RateLimit-*` headers (and the Copilot quota snapshot's
//! percent-remaining) drive an adaptive minimum delay between outgoing
//! requests.  `Retry-After` opens a hard window during which no request may
//! be sent.  The pacer only *measures*; sleeping is done by the workflow
//! loop so waits stay interruptible.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Rate-limit headers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitSnapshot {
    pub limit_requests: Option<u64>,
    pub remaining_requests: Option<u64>,
    pub reset_requests: Option<u64>,
    pub limit_tokens: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub reset_tokens: Option<u64>,
    /// Seconds from the `Retry-After` header, when present.
    pub retry_after: Option<u64>,
    /// Percent remaining reported directly (Copilot quota header).
    pub percent_remaining: Option<f64>,
}

impl RateLimitSnapshot {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Best-effort percent of request quota remaining.
    pub fn percent(&self) -> Option<f64> {
        if let Some(p) = self.percent_remaining {
            return Some(p);
        }
        match (self.remaining_requests, self.limit_requests) {
            (Some(rem), Some(limit)) if limit > 0 => Some(rem as f64 * 100.0 / limit as f64),
            _ => None,
        }
    }
}

/// Parse the standard rate-limit header set out of an HTTP response.
pub fn parse_rate_headers(headers: &reqwest::header::HeaderMap) -> RateLimitSnapshot {
    let num = |name: &str| -> Option<u64> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
    };
    RateLimitSnapshot {
        limit_requests: num("x-ratelimit-limit-requests"),
        remaining_requests: num("x-ratelimit-remaining-requests"),
        reset_requests: num("x-ratelimit-reset-requests"),
        limit_tokens: num("x-ratelimit-limit-tokens"),
        remaining_tokens: num("x-ratelimit-remaining-tokens"),
        reset_tokens: num("x-ratelimit-reset-tokens"),
        retry_after: num("retry-after"),
        percent_remaining: None,
    }
}

// ─── Quota snapshot ───────────────────────────────────────────────────────────

/// Header names carrying the URL-encoded quota payload, highest priority first.
const QUOTA_HEADERS: &[&str] = &[
    "x-quota-snapshot-premium_models",
    "x-quota-snapshot-premium_interactions",
    "x-quota-snapshot-chat",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Entitlement for the period; `-1` means unlimited.
    pub entitlement: i64,
    pub used: i64,
    pub available: i64,
    pub percent_remaining: f64,
    pub overage_used: f64,
    pub overage_permitted: bool,
    pub reset_date: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl QuotaSnapshot {
    pub fn unlimited(&self) -> bool {
        self.entitlement < 0
    }
}

/// Find and decode the highest-priority quota header present.
pub fn parse_quota_headers(headers: &reqwest::header::HeaderMap) -> Option<QuotaSnapshot> {
    for name in QUOTA_HEADERS {
        if let Some(raw) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if let Some(snap) = decode_quota_payload(raw) {
                return Some(snap);
            }
        }
    }
    None
}

/// Decode a URL-encoded `ent=…&ov=…&ovPerm=…&rem=…&rst=…` payload.
///
/// `used = max(0, ⌊ent·(1−rem/100)⌋)` when `ent ≥ 0`; an entitlement of `-1`
/// means unlimited (used 0, available mirrors the sentinel).
pub fn decode_quota_payload(payload: &str) -> Option<QuotaSnapshot> {
    let mut entitlement: Option<i64> = None;
    let mut overage_used = 0.0f64;
    let mut overage_permitted = false;
    let mut percent_remaining: Option<f64> = None;
    let mut reset_date: Option<String> = None;

    for pair in payload.split('&') {
        let (key, value) = pair.split_once('=')?;
        let value = urlencoding::decode(value).ok()?;
        match key {
            "ent" => entitlement = value.parse::<f64>().ok().map(|v| v as i64),
            "ov" => overage_used = value.parse().unwrap_or(0.0),
            "ovPerm" => overage_permitted = value == "true",
            "rem" => percent_remaining = value.parse().ok(),
            "rst" => reset_date = Some(value.into_owned()),
            _ => {}
        }
    }

    let entitlement = entitlement?;
    let percent_remaining = percent_remaining?;
    let (used, available) = if entitlement >= 0 {
        let used = ((entitlement as f64) * (1.0 - percent_remaining / 100.0)).floor() as i64;
        let used = used.max(0);
        (used, entitlement - used)
    } else {
        (0, entitlement)
    };

    Some(QuotaSnapshot {
        entitlement,
        used,
        available,
        percent_remaining,
        overage_used,
        overage_permitted,
        reset_date,
        last_updated: Utc::now(),
    })
}

// ─── Adaptive pacing ──────────────────────────────────────────────────────────

/// Map percent-remaining to the minimum delay between requests.
///
/// Monotone non-increasing in `percent`: more quota never means more delay.
pub fn delay_for_percent(percent: f64) -> Duration {
    if percent > 50.0 {
        Duration::from_millis(1000)
    } else if percent >= 20.0 {
        Duration::from_millis(1500)
    } else if percent >= 10.0 {
        Duration::from_millis(2000)
    } else {
        Duration::from_millis(2500)
    }
}

/// Tracks when the next request is allowed to leave.
///
/// Uses `Instant` throughout so wall-clock adjustments cannot corrupt pacing.
#[derive(Debug)]
pub struct RequestPacer {
    min_delay: Duration,
    last_request: Option<Instant>,
    rate_limit_until: Option<Instant>,
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1000),
            last_request: None,
            rate_limit_until: None,
        }
    }
}

impl RequestPacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update pacing state from a response's rate-limit information.
    pub fn observe(&mut self, snap: &RateLimitSnapshot) {
        if let Some(percent) = snap.percent() {
            self.min_delay = delay_for_percent(percent);
        }
        if let Some(secs) = snap.retry_after {
            self.rate_limit_until = Some(Instant::now() + Duration::from_secs(secs));
        }
    }

    /// Open a hard wait window (e.g. from a 429 classification).
    pub fn block_for(&mut self, wait: Duration) {
        self.rate_limit_until = Some(Instant::now() + wait);
    }

    /// Record that a request is leaving now.
    pub fn note_request(&mut self) {
        self.last_request = Some(Instant::now());
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// How long the caller must still wait before the next request.
    pub fn required_wait(&self) -> Duration {
        let now = Instant::now();
        let pace_wait = match self.last_request {
            Some(last) => self.min_delay.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        };
        let block_wait = match self.rate_limit_until {
            Some(until) if until > now => until - now,
            _ => Duration::ZERO,
        };
        pace_wait.max(block_wait)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
