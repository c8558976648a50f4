//! Idle reaper sweep loop.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use dormant_core::{epoch_secs, Classification, ConfigHandle, Timestamp};
use dormant_executor::{bounded, LifecycleExecutor};
use dormant_state::ActivityLedger;

/// What a sweep did at the host level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    #[default]
    None,
    Shutdown,
    ShutdownFailed,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub at: Timestamp,
    pub active: Vec<String>,
    pub cooling: Vec<String>,
    pub idle: Vec<String>,
    pub stopped: Vec<String>,
    pub stop_failed: Vec<String>,
    pub system: SystemAction,
}

pub struct IdleReaper {
    config: ConfigHandle,
    ledger: Arc<ActivityLedger>,
    executor: Arc<dyn LifecycleExecutor>,
}

impl IdleReaper {
    pub fn new(
        config: ConfigHandle,
        ledger: Arc<ActivityLedger>,
        executor: Arc<dyn LifecycleExecutor>,
    ) -> Self {
        Self {
            config,
            ledger,
            executor,
        }
    }

    /// Run one sweep as of `now`.
    pub async fn sweep_at(&self, now: Timestamp) -> SweepReport {
        let config = self.config.current();
        let call_timeout = config.timing.executor_timeout;
        let mut report = SweepReport {
            at: now,
            ..SweepReport::default()
        };

        let resources = config.resources();
        for id in &resources {
            let class = self.ledger.classify(
                id,
                now,
                config.thresholds.active,
                config.idle_threshold_for(id),
            );
            match class {
                Classification::Active => report.active.push(id.clone()),
                Classification::Cooling => report.cooling.push(id.clone()),
                Classification::Idle => report.idle.push(id.clone()),
            }
        }

        if !resources.is_empty() && report.idle.len() == resources.len() {
            let newest = resources
                .iter()
                .map(|id| self.ledger.last_seen(id))
                .max()
                .unwrap_or(self.ledger.created_at());
            let system_idle_for = now.saturating_sub(newest);
            if system_idle_for > config.thresholds.system_idle.as_secs() {
                info!(
                    idle_secs = system_idle_for,
                    threshold_secs = config.thresholds.system_idle.as_secs(),
                    "every resource idle past system threshold, shutting down host"
                );
                report.system = match bounded(
                    "shutdown_system",
                    call_timeout,
                    self.executor.shutdown_system(),
                )
                .await
                {
                    Ok(()) => SystemAction::Shutdown,
                    Err(e) => {
                        error!(error = %e, "system shutdown failed");
                        SystemAction::ShutdownFailed
                    }
                };
                log_summary(&report);
                return report;
            }
            debug!(
                idle_secs = system_idle_for,
                "all resources idle, system threshold not reached"
            );
        }

        let mut stops = JoinSet::new();
        for id in &report.idle {
            let executor = Arc::clone(&self.executor);
            let id = id.clone();
            stops.spawn(async move {
                let outcome = stop_if_running(executor.as_ref(), &id, call_timeout).await;
                (id, outcome)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((id, StopOutcome::Stopped)) => report.stopped.push(id),
                Ok((id, StopOutcome::Failed)) => report.stop_failed.push(id),
                Ok((_, StopOutcome::NotRunning)) => {}
                Err(e) => error!(error = %e, "stop task panicked"),
            }
        }
        report.stopped.sort();
        report.stop_failed.sort();

        log_summary(&report);
        report
    }

    /// Sweep every `timing.sweep_period` until `shutdown` changes.
    ///
    /// The period is re-read each cycle so a reload takes effect on the
    /// next sleep.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = self.config.current().timing.sweep_period.as_secs(),
            "idle reaper started"
        );

        loop {
            let period = self.config.current().timing.sweep_period;
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.sweep_at(epoch_secs()).await;
                }
                _ = shutdown.changed() => {
                    info!("idle reaper shutting down");
                    break;
                }
            }
        }
    }
}

enum StopOutcome {
    Stopped,
    NotRunning,
    Failed,
}

async fn stop_if_running(
    executor: &dyn LifecycleExecutor,
    id: &str,
    call_timeout: Duration,
) -> StopOutcome {
    let running = match bounded("is_running", call_timeout, executor.is_running(id)).await {
        Ok(running) => running,
        Err(e) => {
            warn!(resource = %id, error = %e, "status check failed, skipping this sweep");
            false
        }
    };
    if !running {
        return StopOutcome::NotRunning;
    }

    match bounded("stop", call_timeout, executor.stop(id)).await {
        Ok(()) => {
            info!(resource = %id, "stopped idle resource");
            StopOutcome::Stopped
        }
        Err(e) => {
            warn!(resource = %id, error = %e, "stop failed, will retry next sweep");
            StopOutcome::Failed
        }
    }
}

fn log_summary(report: &SweepReport) {
    info!(
        active = ?report.active,
        cooling = ?report.cooling,
        idle = ?report.idle,
        stopped = ?report.stopped,
        system = ?report.system,
        "sweep complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use dormant_core::{LifecycleConfig, Pattern, PatternMatcher, Rule, Thresholds};
    use dormant_executor::{Call, FakeExecutor};

    const T: Timestamp = 1_700_100_000;
    const MIN: u64 = 60;

    fn config(resources: &[&str], idle_min: u64, system_min: u64) -> LifecycleConfig {
        let rules = resources
            .iter()
            .map(|r| Rule::new(Pattern::Substring(format!("/{r}/")), *r))
            .collect();
        LifecycleConfig::new(
            PatternMatcher::new(rules),
            Thresholds {
                active: Duration::from_secs(MIN),
                idle: Duration::from_secs(idle_min * MIN),
                system_idle: Duration::from_secs(system_min * MIN),
            },
        )
    }

    fn reaper(
        config: LifecycleConfig,
        ledger: Arc<ActivityLedger>,
        fake: &Arc<FakeExecutor>,
    ) -> IdleReaper {
        let executor: Arc<dyn LifecycleExecutor> = fake.clone();
        IdleReaper::new(ConfigHandle::new(config), ledger, executor)
    }

    #[tokio::test]
    async fn all_idle_but_newest_within_system_threshold_stops_individually() {
        let ledger = Arc::new(ActivityLedger::new(T - 60 * MIN));
        ledger.record("a", T - 5 * MIN);
        ledger.record("b", T - 20 * MIN);
        ledger.record("c", T - 40 * MIN);
        let fake = Arc::new(FakeExecutor::new().with_running(["a", "b", "c"]));
        let reaper = reaper(config(&["a", "b", "c"], 2, 15), ledger, &fake);

        let report = reaper.sweep_at(T).await;

        assert_eq!(report.idle, vec!["a", "b", "c"]);
        assert_eq!(report.system, SystemAction::None);
        assert_eq!(fake.shutdowns(), 0);
        assert_eq!(report.stopped, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn all_idle_past_system_threshold_shuts_down_instead_of_stopping() {
        let ledger = Arc::new(ActivityLedger::new(T - 60 * MIN));
        ledger.record("a", T - 16 * MIN);
        ledger.record("b", T - 30 * MIN);
        let fake = Arc::new(FakeExecutor::new().with_running(["a", "b"]));
        let reaper = reaper(config(&["a", "b"], 10, 15), ledger, &fake);

        let report = reaper.sweep_at(T).await;

        assert_eq!(report.system, SystemAction::Shutdown);
        assert!(report.stopped.is_empty());
        assert_eq!(fake.calls(), vec![Call::Shutdown]);
    }

    #[tokio::test]
    async fn unseen_resources_fall_back_to_ledger_creation() {
        let boot = T - 20 * MIN;
        let fake = Arc::new(FakeExecutor::new().with_running(["a"]));

        let early = reaper(config(&["a"], 10, 15), Arc::new(ActivityLedger::new(boot)), &fake);
        let report = early.sweep_at(boot + 5 * MIN).await;
        assert!(report.idle.is_empty());
        assert!(fake.calls().is_empty());

        let report = early.sweep_at(T).await;
        assert_eq!(report.idle, vec!["a"]);
        assert_eq!(report.system, SystemAction::Shutdown);
    }

    #[tokio::test]
    async fn one_active_resource_blocks_cascade() {
        let ledger = Arc::new(ActivityLedger::new(T - 120 * MIN));
        ledger.record("busy", T - 10);
        let fake = Arc::new(FakeExecutor::new().with_running(["busy", "quiet"]));
        let reaper = reaper(config(&["busy", "quiet"], 10, 15), ledger, &fake);

        let report = reaper.sweep_at(T).await;

        assert_eq!(report.active, vec!["busy"]);
        assert_eq!(report.idle, vec!["quiet"]);
        assert_eq!(report.stopped, vec!["quiet"]);
        assert_eq!(report.system, SystemAction::None);
        assert_eq!(fake.stops("busy"), 0);
    }

    #[tokio::test]
    async fn idle_but_not_running_is_left_alone() {
        let ledger = Arc::new(ActivityLedger::new(T - 120 * MIN));
        ledger.record("busy", T);
        let fake = Arc::new(FakeExecutor::new());
        let reaper = reaper(config(&["busy", "off"], 10, 15), ledger, &fake);

        let report = reaper.sweep_at(T).await;

        assert_eq!(report.idle, vec!["off"]);
        assert!(report.stopped.is_empty());
        assert_eq!(fake.stops("off"), 0);
    }

    #[tokio::test]
    async fn failed_stop_is_retried_next_sweep() {
        let ledger = Arc::new(ActivityLedger::new(T - 120 * MIN));
        ledger.record("busy", T);
        let fake = Arc::new(FakeExecutor::new().with_running(["stuck"]));
        fake.fail_stop("stuck");
        let reaper = reaper(config(&["busy", "stuck"], 10, 15), ledger, &fake);

        let first = reaper.sweep_at(T).await;
        assert_eq!(first.stop_failed, vec!["stuck"]);
        assert_eq!(fake.stops("stuck"), 1);

        let second = reaper.sweep_at(T + 60).await;
        assert_eq!(second.stop_failed, vec!["stuck"]);
        assert_eq!(fake.stops("stuck"), 2);
    }

    #[tokio::test]
    async fn failed_shutdown_is_reported() {
        let ledger = Arc::new(ActivityLedger::new(T - 120 * MIN));
        let fake = Arc::new(FakeExecutor::new());
        fake.fail_shutdown();
        let reaper = reaper(config(&["a"], 10, 15), ledger, &fake);

        let report = reaper.sweep_at(T).await;
        assert_eq!(report.system, SystemAction::ShutdownFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_check_does_not_stall_sweep() {
        let ledger = Arc::new(ActivityLedger::new(T - 120 * MIN));
        ledger.record("busy", T);
        let fake = Arc::new(FakeExecutor::new().with_running(["a", "b"]));
        fake.hang_is_running();
        let config = config(&["busy", "a", "b"], 10, 15);
        let call_timeout = config.timing.executor_timeout;
        let reaper = reaper(config, ledger, &fake);

        let begun = tokio::time::Instant::now();
        let report = reaper.sweep_at(T).await;

        assert_eq!(report.idle, vec!["a", "b"]);
        assert!(report.stopped.is_empty());
        // Checks run concurrently, so the sweep costs one timeout, not two.
        assert!(begun.elapsed() < call_timeout * 2);
    }

    #[tokio::test]
    async fn per_rule_idle_override_is_honored() {
        let ledger = Arc::new(ActivityLedger::new(T - 120 * MIN));
        ledger.record("short", T - 5 * MIN);
        ledger.record("long", T - 5 * MIN);
        let mut config = config(&["short", "long"], 10, 15);
        let mut rules = config.matcher.rules().to_vec();
        rules[0].idle_threshold = Some(Duration::from_secs(3 * MIN));
        config.matcher = PatternMatcher::new(rules);
        let fake = Arc::new(FakeExecutor::new().with_running(["short", "long"]));
        let reaper = reaper(config, ledger, &fake);

        let report = reaper.sweep_at(T).await;
        assert_eq!(report.idle, vec!["short"]);
        assert_eq!(report.cooling, vec!["long"]);
        assert_eq!(report.stopped, vec!["short"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown_signal() {
        let ledger = Arc::new(ActivityLedger::new(epoch_secs()));
        let fake = Arc::new(FakeExecutor::new());
        let reaper = Arc::new(reaper(config(&["a"], 10, 15), ledger, &fake));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let reaper = Arc::clone(&reaper);
            async move { reaper.run(rx).await }
        });
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        // Two sweeps at 60s and 120s; nothing idle yet so no calls.
        assert!(fake.calls().is_empty());
    }
}
