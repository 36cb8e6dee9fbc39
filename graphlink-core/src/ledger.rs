//! Connection-attempt history and sliding-window rate limiting.
//!
//! The identity provider may lock out a client that refreshes too
//! aggressively, for example after a password rotation triggers a cascade of
//! automatic refreshes. [`AttemptLedger`] bounds those storms whether the
//! individual attempts fail fast or slowly.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sizing of the attempt ledger and its rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Most recent attempts retained, regardless of age.
    pub capacity: usize,

    /// Attempts allowed inside the window before callers are refused.
    pub max_attempts_in_window: usize,

    /// Length of the sliding window in seconds.
    pub window_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            max_attempts_in_window: 3,
            window_secs: 300,
        }
    }
}

impl LedgerConfig {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }
}

/// One refresh or connect action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Bounded rolling history of connection attempts.
///
/// Not synchronized on its own; the lifecycle manager keeps it behind the
/// same lock that serializes refreshes, so a check and the following
/// [`record`](Self::record) cannot interleave with another caller.
#[derive(Debug, Clone)]
pub struct AttemptLedger {
    config: LedgerConfig,
    entries: VecDeque<ConnectionAttempt>,
}

impl AttemptLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            entries: VecDeque::with_capacity(config.capacity),
        }
    }

    /// Whether another attempt is allowed right now.
    pub fn can_attempt(&self) -> bool {
        self.can_attempt_at(Utc::now())
    }

    /// Whether another attempt is allowed at `now`.
    ///
    /// True iff fewer than `max_attempts_in_window` entries are younger than
    /// the window.
    pub fn can_attempt_at(&self, now: DateTime<Utc>) -> bool {
        self.recent_count_at(now) < self.config.max_attempts_in_window
    }

    /// Number of entries younger than the window at `now`.
    pub fn recent_count_at(&self, now: DateTime<Utc>) -> usize {
        self.recent_at(now).count()
    }

    /// Time until [`can_attempt_at`](Self::can_attempt_at) turns true again.
    ///
    /// Returns `None` when attempts are already allowed.
    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let mut recent: Vec<DateTime<Utc>> = self.recent_at(now).map(|a| a.timestamp).collect();
        if recent.len() < self.config.max_attempts_in_window {
            return None;
        }

        // Entries are appended in order, but timestamps passed to `record_at`
        // are not guaranteed to be monotonic.
        recent.sort();
        let excess = recent.len() - self.config.max_attempts_in_window;
        let frees_at = recent[excess] + self.config.window();
        Some((frees_at - now).to_std().unwrap_or_default())
    }

    /// Append an attempt stamped with the current time.
    pub fn record(&mut self, success: bool, error: Option<String>) {
        self.record_at(Utc::now(), success, error);
    }

    /// Append an attempt, then evict the oldest entries beyond capacity.
    pub fn record_at(&mut self, timestamp: DateTime<Utc>, success: bool, error: Option<String>) {
        self.entries.push_back(ConnectionAttempt {
            timestamp,
            success,
            error,
        });
        while self.entries.len() > self.config.capacity {
            self.entries.pop_front();
        }
    }

    /// Forget every attempt.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retained attempts, oldest first.
    pub fn attempts(&self) -> impl Iterator<Item = &ConnectionAttempt> {
        self.entries.iter()
    }

    fn recent_at(&self, now: DateTime<Utc>) -> impl Iterator<Item = &ConnectionAttempt> {
        let window = self.config.window();
        self.entries
            .iter()
            .filter(move |a| now - a.timestamp < window)
    }
}

impl Default for AttemptLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_until_three_recent_attempts() {
        let now = Utc::now();
        let mut ledger = AttemptLedger::default();

        ledger.record_at(now - Duration::minutes(2), false, Some("boom".into()));
        ledger.record_at(now - Duration::minutes(1), true, None);
        assert!(ledger.can_attempt_at(now));

        ledger.record_at(now, false, None);
        assert!(!ledger.can_attempt_at(now));
        assert_eq!(ledger.recent_count_at(now), 3);
    }

    #[test]
    fn test_old_attempts_do_not_count() {
        let now = Utc::now();
        let mut ledger = AttemptLedger::default();

        for minutes in [30, 20, 10, 6] {
            ledger.record_at(now - Duration::minutes(minutes), false, None);
        }

        assert!(ledger.can_attempt_at(now));
        assert_eq!(ledger.len(), 4);
    }

    #[test]
    fn test_window_slides_as_oldest_entry_ages_out() {
        let start = Utc::now();
        let mut ledger = AttemptLedger::default();

        ledger.record_at(start, false, None);
        ledger.record_at(start + Duration::seconds(30), false, None);
        ledger.record_at(start + Duration::seconds(60), false, None);

        let just_before = start + Duration::seconds(299);
        assert!(!ledger.can_attempt_at(just_before));
        assert_eq!(
            ledger.retry_after_at(just_before),
            Some(std::time::Duration::from_secs(1))
        );

        let aged_out = start + Duration::seconds(300);
        assert!(ledger.can_attempt_at(aged_out));
        assert_eq!(ledger.retry_after_at(aged_out), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let now = Utc::now();
        let mut ledger = AttemptLedger::default();

        for i in 0..25 {
            ledger.record_at(now - Duration::hours(25 - i), i % 2 == 0, None);
            assert!(ledger.len() <= 10);
        }

        assert_eq!(ledger.len(), 10);
        let oldest = ledger.attempts().next().unwrap();
        assert_eq!(oldest.timestamp, now - Duration::hours(10));
    }

    #[test]
    fn test_reset_clears_history() {
        let now = Utc::now();
        let mut ledger = AttemptLedger::default();
        for _ in 0..3 {
            ledger.record_at(now, false, None);
        }
        assert!(!ledger.can_attempt_at(now));

        ledger.reset();
        assert!(ledger.is_empty());
        assert!(ledger.can_attempt_at(now));
    }

    #[test]
    fn test_custom_config() {
        let now = Utc::now();
        let mut ledger = AttemptLedger::new(LedgerConfig {
            capacity: 2,
            max_attempts_in_window: 1,
            window_secs: 60,
        });

        ledger.record_at(now - Duration::seconds(10), true, None);
        assert!(!ledger.can_attempt_at(now));
        assert!(ledger.can_attempt_at(now + Duration::seconds(50)));

        ledger.record_at(now, true, None);
        ledger.record_at(now, true, None);
        assert_eq!(ledger.len(), 2);
    }
}
