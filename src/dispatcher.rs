//! The poll loop: fetch, match per tenant, dedup, notify, check health, sleep.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::channels::{Notification, Notifier};
use crate::dedup::Fingerprint;
use crate::error::{ChannelError, FetchError};
use crate::feed::{Entry, FeedSource};
use crate::restart::{HealthSample, MemoryProbe, RestartController, RestartSignal};
use crate::rules::{RuleSet, Settings, evaluate};
use crate::stats::RuntimeStats;
use crate::store::{NotifiedStore, TenantId, TenantStore};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub fetch_timeout: Duration,
    pub send_timeout: Duration,
    /// Tenant whose settings control the polling interval.
    pub admin: Option<TenantId>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            admin: None,
        }
    }
}

/// Shared collaborators.
pub struct DispatcherDeps {
    pub store: Arc<TenantStore>,
    pub feed: Arc<dyn FeedSource>,
    pub notifier: Arc<dyn Notifier>,
    pub memory: Arc<dyn MemoryProbe>,
    pub stats: Arc<RuntimeStats>,
}

/// Outcome counters of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub entries: usize,
    pub matched: usize,
    pub already_seen: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    deps: DispatcherDeps,
    notified: NotifiedStore,
    restart: RestartController,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        deps: DispatcherDeps,
        notified: NotifiedStore,
        restart: RestartController,
    ) -> Self {
        Self {
            config,
            deps,
            notified,
            restart,
        }
    }

    pub fn notified(&self) -> &NotifiedStore {
        &self.notified
    }

    /// Poll until the restart controller asks for a restart.
    pub async fn run(&mut self) -> RestartSignal {
        loop {
            match self.run_cycle().await {
                Ok(report) => debug!(?report, "Poll cycle complete"),
                Err(e) => warn!("Poll cycle failed: {e}"),
            }

            if let Some(signal) = self.check_health().await {
                return signal;
            }

            let delay = self.next_delay().await;
            info!(delay_secs = delay.as_secs_f64(), "Waiting for next check");
            tokio::time::sleep(delay).await;
        }
    }

    /// One poll cycle. A fetch failure extends the error streak and produces
    /// no notifications; a success resets the streak.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, FetchError> {
        if let Err(e) = self.deps.store.reload().await {
            warn!("Failed to reload tenant config: {e}");
        }

        let entries = match self.fetch().await {
            Ok(entries) => {
                self.deps.stats.record_success().await;
                entries
            }
            Err(e) => {
                let streak = self.deps.stats.record_error(&e).await;
                error!(consecutive_errors = streak, "Feed fetch failed: {e}");
                return Err(e);
            }
        };

        let mut report = CycleReport {
            entries: entries.len(),
            ..CycleReport::default()
        };
        debug!(entries = entries.len(), feed = self.deps.feed.name(), "Fetched feed");

        for (tenant, rules) in self.deps.store.snapshot_all().await {
            self.dispatch_tenant(&tenant, &rules, &entries, &mut report)
                .await;
        }

        if report.sent > 0 {
            self.deps.stats.record_sent(report.sent as u64).await;
        }
        if let Err(e) = self.notified.flush().await {
            error!("Failed to save dedup history: {e}");
        }
        Ok(report)
    }

    async fn fetch(&self) -> Result<Vec<Entry>, FetchError> {
        let timeout = self.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.deps.feed.fetch_entries()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    async fn dispatch_tenant(
        &mut self,
        tenant: &TenantId,
        rules: &RuleSet,
        entries: &[Entry],
        report: &mut CycleReport,
    ) {
        let limit = rules.settings().max_notified_entries;

        for entry in entries {
            let Some(hit) = evaluate(entry, rules) else {
                continue;
            };
            report.matched += 1;

            let fingerprint = Fingerprint::of(entry);
            if self.notified.cache_mut(tenant, limit).seen(&fingerprint) {
                report.already_seen += 1;
                continue;
            }

            let notification = Notification::new(entry, &hit);
            match self.send(tenant, &notification).await {
                Ok(()) => {
                    // Record only after delivery so a failed send is retried next cycle.
                    self.notified.cache_mut(tenant, limit).record(&fingerprint);
                    self.notified.mark_dirty();
                    report.sent += 1;
                    info!(
                        tenant = %tenant,
                        rule = %hit.rule.word(),
                        title = %entry.title,
                        "Notification sent"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(tenant = %tenant, fingerprint = %fingerprint, "Notification failed: {e}");
                }
            }
        }
    }

    async fn send(&self, tenant: &TenantId, notification: &Notification) -> Result<(), ChannelError> {
        let timeout = self.config.send_timeout;
        match tokio::time::timeout(
            timeout,
            self.deps.notifier.send_notification(tenant, notification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout {
                name: self.deps.notifier.name().to_string(),
                timeout,
            }),
        }
    }

    /// Feed the current metrics to the restart controller.
    pub async fn check_health(&mut self) -> Option<RestartSignal> {
        let resident = self.deps.memory.resident_bytes().await;
        self.deps.stats.record_memory(resident).await;
        let stats = self.deps.stats.snapshot().await;
        let sample = HealthSample {
            uptime: stats.uptime(),
            resident_bytes: resident,
            consecutive_errors: stats.consecutive_errors,
        };
        let signal = self.restart.observe(&sample).cloned();
        if let Some(signal) = &signal {
            warn!(reason = %signal.reason, value = signal.value, threshold = signal.threshold, "Restart requested: {signal}");
        }
        signal
    }

    /// Delay before the next cycle, drawn from the admin tenant's interval.
    pub async fn next_delay(&self) -> Duration {
        let settings = match &self.config.admin {
            Some(admin) => *self.deps.store.snapshot(admin).await.settings(),
            None => Settings::default(),
        };
        let (min, max) = settings.effective_interval();
        jittered_delay(min, max, &mut rand::thread_rng())
    }

    /// Best-effort save of both state files.
    pub async fn flush(&mut self) {
        self.notified.mark_dirty();
        if let Err(e) = self.notified.flush().await {
            error!("Failed to save dedup history: {e}");
        }
        if let Err(e) = self.deps.store.flush().await {
            error!("Failed to save tenant config: {e}");
        }
    }
}

/// Uniformly random delay in `[min_secs, max_secs]`.
pub fn jittered_delay(min_secs: u64, max_secs: u64, rng: &mut impl Rng) -> Duration {
    if max_secs <= min_secs {
        return Duration::from_secs(min_secs);
    }
    Duration::from_secs_f64(rng.gen_range(min_secs as f64..=max_secs as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn delay_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = jittered_delay(30, 60, &mut rng);
            assert!(d >= Duration::from_secs(30) && d <= Duration::from_secs(60));
        }
    }

    #[test]
    fn fixed_interval_has_no_jitter() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(jittered_delay(45, 45, &mut rng), Duration::from_secs(45));
    }
}
