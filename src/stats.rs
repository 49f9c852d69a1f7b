//! Runtime counters shared between the poll loop and the command handler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    /// Time of the last successful fetch.
    pub last_check: Option<DateTime<Utc>>,
    /// Cleared by the next successful fetch.
    pub last_error: Option<String>,
    pub cycle_count: u64,
    pub consecutive_errors: u32,
    pub notifications_sent: u64,
    pub resident_bytes: Option<u64>,
}

impl StatsSnapshot {
    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

pub struct RuntimeStats {
    inner: RwLock<StatsSnapshot>,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new(StatsSnapshot {
                started_at,
                last_check: None,
                last_error: None,
                cycle_count: 0,
                consecutive_errors: 0,
                notifications_sent: 0,
                resident_bytes: None,
            }),
        }
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        self.inner.read().await.clone()
    }

    /// A cycle fetched the feed. Resets the error streak.
    pub async fn record_success(&self) {
        let mut stats = self.inner.write().await;
        stats.cycle_count += 1;
        stats.last_check = Some(Utc::now());
        stats.last_error = None;
        stats.consecutive_errors = 0;
    }

    /// A cycle failed. Returns the new streak length.
    pub async fn record_error(&self, error: impl ToString) -> u32 {
        let mut stats = self.inner.write().await;
        stats.cycle_count += 1;
        stats.consecutive_errors = stats.consecutive_errors.saturating_add(1);
        stats.last_error = Some(error.to_string());
        stats.consecutive_errors
    }

    pub async fn record_sent(&self, count: u64) {
        self.inner.write().await.notifications_sent += count;
    }

    pub async fn record_memory(&self, resident_bytes: Option<u64>) {
        self.inner.write().await.resident_bytes = resident_bytes;
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}
