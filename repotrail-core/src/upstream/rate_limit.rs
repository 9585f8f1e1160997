//! Rate-limit bookkeeping for the upstream API
//!
//! Every response carries `x-ratelimit-*` headers. The tracker keeps the most
//! recent values so callers can see how much quota is left and, when it runs
//! out, how long until it resets. It never blocks on its own; pausing is a
//! policy decision made by the client (see [`crate::config::RateLimitPolicy`]).

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_USED: &str = "x-ratelimit-used";

/// Last observed rate-limit counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    /// Requests allowed per window
    pub limit: Option<u64>,
    /// Requests left in the current window
    pub remaining: Option<u64>,
    /// Requests spent in the current window
    pub used: Option<u64>,
    /// When the window resets
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitSnapshot {
    /// True once the upstream has reported zero remaining requests.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Time left until reset, only when the quota is exhausted.
    pub fn wait_until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_exhausted() {
            return None;
        }
        let reset_at = self.reset_at?;
        Some((reset_at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Read whichever counters are present in `headers`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header_u64(headers, HEADER_LIMIT),
            remaining: header_u64(headers, HEADER_REMAINING),
            used: header_u64(headers, HEADER_USED),
            reset_at: header_u64(headers, HEADER_RESET)
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        }
    }

    /// Overlay fields present in `newer` onto `self`.
    fn merge(&mut self, newer: RateLimitSnapshot) {
        self.limit = newer.limit.or(self.limit);
        self.remaining = newer.remaining.or(self.remaining);
        self.used = newer.used.or(self.used);
        self.reset_at = newer.reset_at.or(self.reset_at);
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Shared tracker, updated after every upstream call.
///
/// The quota belongs to the token, not to a repository, so a single tracker
/// is shared by all sync loops using the same client.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    state: Mutex<RateLimitSnapshot>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the counters carried by a response.
    ///
    /// Missing or unparsable headers keep their previous values.
    pub fn observe(&self, headers: &HeaderMap) -> RateLimitSnapshot {
        let observed = RateLimitSnapshot::from_headers(headers);
        let mut state = self.state.lock().unwrap();
        state.merge(observed);
        let current = *state;
        drop(state);

        if let (Some(used), Some(limit)) = (current.used, current.limit) {
            tracing::debug!(used, limit, remaining = ?current.remaining, "Upstream rate limit");
        }

        if let Some(wait) = current.wait_until_reset(Utc::now()) {
            tracing::warn!(
                wait_secs = wait.as_secs(),
                reset_at = ?current.reset_at,
                "Upstream rate limit exhausted"
            );
        }

        current
    }

    /// Current counters
    pub fn snapshot(&self) -> RateLimitSnapshot {
        *self.state.lock().unwrap()
    }

    /// Time left until reset if the quota is currently exhausted
    pub fn wait_until_reset(&self) -> Option<Duration> {
        self.snapshot().wait_until_reset(Utc::now())
    }
}
