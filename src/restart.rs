//! Self-monitoring restart policy.
//!
//! The controller is polled once per poll cycle with a [`HealthSample`]. It
//! moves from `Running` to the terminal `RestartRequested` state when uptime,
//! resident memory, or the feed error streak crosses its threshold. Acting on
//! the request (flush, exit, respawn) belongs to the caller and the process
//! supervisor.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

pub const MIB: u64 = 1024 * 1024;

/// Thresholds for the restart policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartConfig {
    pub max_uptime: Duration,
    /// Fraction of total system memory allowed as resident set size.
    pub memory_fraction: f64,
    pub memory_floor_bytes: u64,
    pub memory_ceiling_bytes: u64,
    pub max_consecutive_errors: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_uptime: Duration::from_secs(24 * 3600),
            memory_fraction: 0.30,
            memory_floor_bytes: 400 * MIB,
            memory_ceiling_bytes: 2000 * MIB,
            max_consecutive_errors: 15,
        }
    }
}

impl RestartConfig {
    /// `clamp(fraction × total, floor, ceiling)`. Unknown totals use the ceiling.
    pub fn memory_threshold(&self, total_memory_bytes: Option<u64>) -> u64 {
        match total_memory_bytes {
            Some(total) => ((total as f64 * self.memory_fraction) as u64)
                .clamp(self.memory_floor_bytes, self.memory_ceiling_bytes),
            None => self.memory_ceiling_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestartReason {
    Uptime,
    Memory,
    ErrorStreak,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::Uptime => f.write_str("uptime"),
            RestartReason::Memory => f.write_str("memory"),
            RestartReason::ErrorStreak => f.write_str("error streak"),
        }
    }
}

/// Why a restart was requested, with the metric that triggered it.
///
/// `value` and `threshold` are seconds, bytes, or an error count depending on
/// `reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSignal {
    pub reason: RestartReason,
    pub value: u64,
    pub threshold: u64,
}

impl fmt::Display for RestartSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            RestartReason::Uptime => write!(
                f,
                "uptime {:.1}h exceeds {:.1}h",
                self.value as f64 / 3600.0,
                self.threshold as f64 / 3600.0
            ),
            RestartReason::Memory => write!(
                f,
                "resident memory {:.1} MB exceeds {:.1} MB",
                self.value as f64 / MIB as f64,
                self.threshold as f64 / MIB as f64
            ),
            RestartReason::ErrorStreak => write!(
                f,
                "{} consecutive feed errors (limit {})",
                self.value, self.threshold
            ),
        }
    }
}

/// Metrics observed at a poll-cycle boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSample {
    pub uptime: Duration,
    pub resident_bytes: Option<u64>,
    pub consecutive_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    RestartRequested(RestartSignal),
}

pub struct RestartController {
    config: RestartConfig,
    memory_limit_bytes: u64,
    state: ControllerState,
}

impl RestartController {
    pub fn new(config: RestartConfig, total_memory_bytes: Option<u64>) -> Self {
        let memory_limit_bytes = config.memory_threshold(total_memory_bytes);
        Self {
            config,
            memory_limit_bytes,
            state: ControllerState::Running,
        }
    }

    pub fn config(&self) -> &RestartConfig {
        &self.config
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_bytes
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Evaluate a sample. Once a restart is requested the state never changes.
    pub fn observe(&mut self, sample: &HealthSample) -> Option<&RestartSignal> {
        if let ControllerState::Running = self.state
            && let Some(signal) = self.check(sample)
        {
            self.state = ControllerState::RestartRequested(signal);
        }
        match &self.state {
            ControllerState::Running => None,
            ControllerState::RestartRequested(signal) => Some(signal),
        }
    }

    fn check(&self, sample: &HealthSample) -> Option<RestartSignal> {
        if sample.uptime > self.config.max_uptime {
            return Some(RestartSignal {
                reason: RestartReason::Uptime,
                value: sample.uptime.as_secs(),
                threshold: self.config.max_uptime.as_secs(),
            });
        }
        if let Some(rss) = sample.resident_bytes
            && rss > self.memory_limit_bytes
        {
            return Some(RestartSignal {
                reason: RestartReason::Memory,
                value: rss,
                threshold: self.memory_limit_bytes,
            });
        }
        if sample.consecutive_errors >= self.config.max_consecutive_errors {
            return Some(RestartSignal {
                reason: RestartReason::ErrorStreak,
                value: u64::from(sample.consecutive_errors),
                threshold: u64::from(self.config.max_consecutive_errors),
            });
        }
        None
    }

    /// One-line policy description for status replies.
    pub fn describe(&self) -> String {
        format!(
            "memory > {:.0} MB, uptime > {}h, or {} consecutive errors",
            self.memory_limit_bytes as f64 / MIB as f64,
            self.config.max_uptime.as_secs() / 3600,
            self.config.max_consecutive_errors
        )
    }
}

/// Source of process and host memory figures.
#[async_trait]
pub trait MemoryProbe: Send + Sync {
    /// Resident set size of this process in bytes.
    async fn resident_bytes(&self) -> Option<u64>;

    /// Total physical memory of the host in bytes.
    async fn total_bytes(&self) -> Option<u64>;
}

/// Reads `/proc/self/status` and `/proc/meminfo`. Yields `None` off Linux.
pub struct ProcMemoryProbe;

#[async_trait]
impl MemoryProbe for ProcMemoryProbe {
    async fn resident_bytes(&self) -> Option<u64> {
        let status = fs::read_to_string("/proc/self/status").await.ok()?;
        parse_kb_fields(&status).get("VmRSS").copied()
    }

    async fn total_bytes(&self) -> Option<u64> {
        let meminfo = fs::read_to_string("/proc/meminfo").await.ok()?;
        parse_kb_fields(&meminfo).get("MemTotal").copied()
    }
}

/// Parse `Key:   1234 kB` lines into byte counts.
fn parse_kb_fields(contents: &str) -> HashMap<&str, u64> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim(), kb * 1024))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * MIB;

    fn sample(uptime_secs: u64, rss: Option<u64>, errors: u32) -> HealthSample {
        HealthSample {
            uptime: Duration::from_secs(uptime_secs),
            resident_bytes: rss,
            consecutive_errors: errors,
        }
    }

    #[test]
    fn threshold_applies_ceiling() {
        let cfg = RestartConfig::default();
        assert_eq!(cfg.memory_threshold(Some(10 * GIB)), 2000 * MIB);
    }

    #[test]
    fn threshold_applies_floor() {
        let cfg = RestartConfig::default();
        assert_eq!(cfg.memory_threshold(Some(GIB)), 400 * MIB);
    }

    #[test]
    fn threshold_uses_fraction_in_between() {
        let cfg = RestartConfig::default();
        let t = cfg.memory_threshold(Some(4 * GIB));
        assert!(t > 1228 * MIB && t < 1229 * MIB);
    }

    #[test]
    fn unknown_total_uses_ceiling() {
        let cfg = RestartConfig::default();
        assert_eq!(cfg.memory_threshold(None), 2000 * MIB);
    }

    #[test]
    fn fifteen_errors_triggers_fourteen_does_not() {
        let mut c = RestartController::new(RestartConfig::default(), Some(GIB));
        assert!(c.observe(&sample(10, Some(MIB), 14)).is_none());
        let signal = c.observe(&sample(10, Some(MIB), 15)).unwrap();
        assert_eq!(signal.reason, RestartReason::ErrorStreak);
        assert_eq!(signal.value, 15);
    }

    #[test]
    fn uptime_must_exceed_limit() {
        let mut c = RestartController::new(RestartConfig::default(), Some(GIB));
        assert!(c.observe(&sample(24 * 3600, None, 0)).is_none());
        let signal = c.observe(&sample(24 * 3600 + 1, None, 0)).unwrap();
        assert_eq!(signal.reason, RestartReason::Uptime);
    }

    #[test]
    fn memory_over_limit_triggers() {
        let mut c = RestartController::new(RestartConfig::default(), Some(GIB));
        assert!(c.observe(&sample(10, Some(400 * MIB), 0)).is_none());
        let signal = c.observe(&sample(10, Some(401 * MIB), 0)).unwrap();
        assert_eq!(signal.reason, RestartReason::Memory);
        assert_eq!(signal.threshold, 400 * MIB);
    }

    #[test]
    fn restart_requested_is_terminal() {
        let mut c = RestartController::new(RestartConfig::default(), Some(GIB));
        c.observe(&sample(10, None, 20));
        let again = c.observe(&sample(10, None, 0)).unwrap();
        assert_eq!(again.reason, RestartReason::ErrorStreak);
        assert!(matches!(c.state(), ControllerState::RestartRequested(_)));
    }

    #[test]
    fn signal_display_mentions_metric() {
        let signal = RestartSignal {
            reason: RestartReason::Memory,
            value: 500 * MIB,
            threshold: 400 * MIB,
        };
        assert_eq!(signal.to_string(), "resident memory 500.0 MB exceeds 400.0 MB");
    }

    #[test]
    fn parses_proc_fields() {
        let text = "Name:\tfeedwatch\nVmRSS:\t  2048 kB\nThreads:\t4\n";
        let fields = parse_kb_fields(text);
        assert_eq!(fields.get("VmRSS"), Some(&(2048 * 1024)));
        assert!(fields.get("Name").is_none());
    }

    #[test]
    fn describe_lists_thresholds() {
        let c = RestartController::new(RestartConfig::default(), Some(10 * GIB));
        assert_eq!(
            c.describe(),
            "memory > 2000 MB, uptime > 24h, or 15 consecutive errors"
        );
    }
}
