//! Process-wide ingestion counters
//!
//! Owned and injectable rather than global: the runner records outcomes, the
//! HTTP surface reads snapshots. Exactly one of success/error is recorded per
//! processed delivery. The lock is short-lived and never held across an await,
//! so snapshots are never torn.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct StatsInner {
    messages_processed: u64,
    items_stored: u64,
    errors: u64,
    last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct StatsTracker {
    started_at: DateTime<Utc>,
    inner: Mutex<StatsInner>,
}

/// Consistent point-in-time view of the counters
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub messages_processed: u64,
    pub items_stored: u64,
    pub errors: u64,
    pub last_processed: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Messages per minute since start, rounded to 2 decimals
    pub fn processing_rate(&self, now: DateTime<Utc>) -> f64 {
        let uptime_minutes = self.uptime_seconds(now) / 60.0;
        if uptime_minutes <= 0.0 {
            return 0.0;
        }
        let rate = self.messages_processed as f64 / uptime_minutes;
        (rate * 100.0).round() / 100.0
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            inner: Mutex::new(StatsInner::default()),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record one fully processed and stored delivery
    pub fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.messages_processed += 1;
            inner.items_stored += 1;
            inner.last_processed = Some(Utc::now());
        }
    }

    /// Record one failed delivery attempt or channel-level fault
    pub fn record_error(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.errors += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        StatsSnapshot {
            messages_processed: inner.messages_processed,
            items_stored: inner.items_stored,
            errors: inner.errors,
            last_processed: inner.last_processed,
            start_time: self.started_at,
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
