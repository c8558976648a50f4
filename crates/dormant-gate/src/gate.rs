//! Single-flight activation table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dormant_core::{epoch_secs, Disposition, Timestamp, Timing};
use dormant_executor::{bounded, LifecycleExecutor};

/// Snapshot of an activation in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationInFlight {
    pub resource_id: String,
    pub started_at: Timestamp,
    /// Callers still waiting on this activation, the activator included.
    pub waiters: usize,
}

struct Entry {
    generation: u64,
    started_at: Timestamp,
    waiters: usize,
    result: watch::Receiver<Option<Disposition>>,
}

type Table = Arc<Mutex<HashMap<String, Entry>>>;

pub struct ActivationGate {
    executor: Arc<dyn LifecycleExecutor>,
    in_flight: Table,
    generations: AtomicU64,
}

impl ActivationGate {
    pub fn new(executor: Arc<dyn LifecycleExecutor>) -> Self {
        Self {
            executor,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Make sure `resource_id` is running, starting it if needed.
    ///
    /// Concurrent callers for the same cold resource share one start and
    /// all receive the same disposition. `timing` is read per call:
    /// `readiness_timeout` caps the whole wait, status check included,
    /// `executor_timeout` bounds each executor call, and
    /// `readiness_poll_interval` spaces readiness checks.
    pub async fn ensure_active(&self, resource_id: &str, timing: &Timing) -> Disposition {
        let deadline = Instant::now() + timing.readiness_timeout;
        let check_timeout = timing.executor_timeout.min(timing.readiness_timeout);
        let running = bounded("is_running", check_timeout, self.executor.is_running(resource_id))
            .await
            .unwrap_or_else(|e| {
                warn!(resource = %resource_id, error = %e, "status check failed, treating as not running");
                false
            });
        if running {
            debug!(resource = %resource_id, "already active");
            return Disposition::AlreadyActive;
        }
        if Instant::now() >= deadline {
            warn!(resource = %resource_id, "readiness timeout spent on the status check");
            return Disposition::TimedOut;
        }

        let mut waiter = self.join_or_activate(resource_id, deadline, timing);
        let disposition = match waiter.result.wait_for(Option::is_some).await {
            Ok(disposition) => (*disposition).unwrap_or(Disposition::StartFailed),
            Err(_) => {
                warn!(resource = %resource_id, "activation task ended without a result");
                Disposition::StartFailed
            }
        };
        disposition
    }

    /// Snapshot of every activation in progress, sorted by resource id.
    pub fn in_flight(&self) -> Vec<ActivationInFlight> {
        let table = lock(&self.in_flight);
        let mut all: Vec<ActivationInFlight> = table
            .iter()
            .map(|(id, entry)| ActivationInFlight {
                resource_id: id.clone(),
                started_at: entry.started_at,
                waiters: entry.waiters,
            })
            .collect();
        all.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        all
    }

    pub fn is_in_flight(&self, resource_id: &str) -> bool {
        lock(&self.in_flight).contains_key(resource_id)
    }

    fn join_or_activate(&self, resource_id: &str, deadline: Instant, timing: &Timing) -> Waiter {
        let mut table = lock(&self.in_flight);
        if let Some(entry) = table.get_mut(resource_id) {
            entry.waiters += 1;
            debug!(resource = %resource_id, waiters = entry.waiters, "joined in-flight activation");
            return Waiter {
                table: Arc::clone(&self.in_flight),
                resource_id: resource_id.to_string(),
                generation: entry.generation,
                result: entry.result.clone(),
            };
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        table.insert(
            resource_id.to_string(),
            Entry {
                generation,
                started_at: epoch_secs(),
                waiters: 1,
                result: rx.clone(),
            },
        );
        drop(table);

        let activation = Activation {
            executor: Arc::clone(&self.executor),
            resource_id: resource_id.to_string(),
            poll_interval: timing.readiness_poll_interval,
            call_timeout: timing.executor_timeout,
            deadline,
        };
        let table = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let disposition = activation.run().await;
            let waiters = lock(&table)
                .remove(&activation.resource_id)
                .map(|e| e.waiters)
                .unwrap_or(0);
            info!(
                resource = %activation.resource_id,
                ?disposition,
                waiters,
                "activation finished"
            );
            let _ = tx.send(Some(disposition));
        });

        Waiter {
            table: Arc::clone(&self.in_flight),
            resource_id: resource_id.to_string(),
            generation,
            result: rx,
        }
    }
}

/// One caller's claim on an in-flight activation.
///
/// Dropping it (a disconnected client, say) takes the caller off the
/// waiter count without touching the activation itself.
struct Waiter {
    table: Table,
    resource_id: String,
    generation: u64,
    result: watch::Receiver<Option<Disposition>>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut table = lock(&self.table);
        if let Some(entry) = table.get_mut(&self.resource_id) {
            if entry.generation == self.generation {
                entry.waiters = entry.waiters.saturating_sub(1);
            }
        }
    }
}

/// One cold start, owned by the spawned activation task.
struct Activation {
    executor: Arc<dyn LifecycleExecutor>,
    resource_id: String,
    poll_interval: Duration,
    call_timeout: Duration,
    deadline: Instant,
}

impl Activation {
    async fn run(&self) -> Disposition {
        match tokio::time::timeout_at(self.deadline, self.start_and_wait()).await {
            Ok(disposition) => disposition,
            Err(_) => {
                warn!(resource = %self.resource_id, "resource did not become ready in time");
                Disposition::TimedOut
            }
        }
    }

    async fn start_and_wait(&self) -> Disposition {
        let id = self.resource_id.as_str();

        info!(resource = %id, "starting resource");
        if let Err(e) = bounded("start", self.call_timeout, self.executor.start(id)).await {
            warn!(resource = %id, error = %e, "start failed");
            return Disposition::StartFailed;
        }

        loop {
            match bounded("is_ready", self.call_timeout, self.executor.is_ready(id)).await {
                Ok(true) => return Disposition::BecameActive,
                Ok(false) => {}
                Err(e) => debug!(resource = %id, error = %e, "readiness check failed"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn lock(table: &Mutex<HashMap<String, Entry>>) -> MutexGuard<'_, HashMap<String, Entry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dormant_executor::{Call, FakeExecutor};

    const POLL: Duration = Duration::from_secs(2);
    const CALL: Duration = Duration::from_secs(10);
    const READY: Duration = Duration::from_secs(60);

    fn gate(fake: &Arc<FakeExecutor>) -> Arc<ActivationGate> {
        let executor: Arc<dyn LifecycleExecutor> = fake.clone();
        Arc::new(ActivationGate::new(executor))
    }

    fn timing(readiness_timeout: Duration) -> Timing {
        Timing {
            readiness_poll_interval: POLL,
            executor_timeout: CALL,
            readiness_timeout,
            ..Timing::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_resource_is_already_active() {
        let fake = Arc::new(FakeExecutor::new().with_running(["m"]));
        let gate = gate(&fake);

        assert_eq!(gate.ensure_active("m", &timing(READY)).await, Disposition::AlreadyActive);
        assert_eq!(fake.starts("m"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_start() {
        let fake = Arc::new(
            FakeExecutor::new()
                .with_start_delay(Duration::from_secs(3))
                .with_ready_after(2),
        );
        let gate = gate(&fake);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move { gate.ensure_active("m", &timing(READY)).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Disposition::BecameActive);
        }

        assert_eq!(fake.starts("m"), 1);
        assert!(!gate.is_in_flight("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_snapshot_counts_waiters() {
        let fake = Arc::new(FakeExecutor::new().with_start_delay(Duration::from_secs(5)));
        let gate = gate(&fake);

        let a = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.ensure_active("m", &timing(READY)).await }
        });
        let b = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.ensure_active("m", &timing(READY)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = gate.in_flight();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].resource_id, "m");
        assert_eq!(snapshot[0].waiters, 2);

        assert_eq!(a.await.unwrap(), Disposition::BecameActive);
        assert_eq!(b.await.unwrap(), Disposition::BecameActive);
        assert!(gate.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_and_clears_entry() {
        let fake = Arc::new(FakeExecutor::new());
        fake.never_ready("modelA");
        let gate = gate(&fake);

        let begun = Instant::now();
        let disposition = gate.ensure_active("modelA", &timing(READY)).await;

        assert_eq!(disposition, Disposition::TimedOut);
        assert!(begun.elapsed() >= READY);
        assert!(!gate.is_in_flight("modelA"));

        // A retry is a fresh activation, not blocked by a stale entry.
        assert_eq!(gate.ensure_active("modelA", &timing(READY)).await, Disposition::TimedOut);
        assert_eq!(fake.starts("modelA"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_releases_every_waiter() {
        let fake = Arc::new(FakeExecutor::new().with_start_delay(Duration::from_secs(1)));
        fake.fail_start("m");
        let gate = gate(&fake);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.ensure_active("m", &timing(READY)).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Disposition::StartFailed);
        }

        assert_eq!(fake.starts("m"), 1);
        assert!(!gate.is_in_flight("m"));
        // Only the fast-path checks ran; nothing polled after the failure.
        let checks = fake
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::IsRunning(_)))
            .count();
        assert_eq!(checks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_check_is_bounded() {
        let fake = Arc::new(FakeExecutor::new());
        fake.hang_is_running();
        let gate = gate(&fake);

        let begun = Instant::now();
        let disposition = gate.ensure_active("m", &timing(READY)).await;

        // The status check times out as "not running" and the readiness
        // polls hang too; the deadline covers all of it.
        assert_eq!(disposition, Disposition::TimedOut);
        assert!(begun.elapsed() <= READY);
        assert_eq!(fake.starts("m"), 1);
        assert!(!gate.is_in_flight("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_status_check_longer_than_timeout_never_starts() {
        let fake = Arc::new(FakeExecutor::new());
        fake.hang_is_running();
        let gate = gate(&fake);
        let short = Duration::from_secs(4);

        let begun = Instant::now();
        assert_eq!(gate.ensure_active("m", &timing(short)).await, Disposition::TimedOut);
        assert!(begun.elapsed() <= short);
        assert_eq!(fake.starts("m"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_start_is_cut_off_at_the_deadline() {
        let fake = Arc::new(FakeExecutor::new().with_start_delay(Duration::from_secs(8)));
        let gate = gate(&fake);
        let short = Duration::from_secs(5);

        let begun = Instant::now();
        assert_eq!(gate.ensure_active("m", &timing(short)).await, Disposition::TimedOut);
        assert!(begun.elapsed() <= short);
        assert!(!gate.is_in_flight("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn timing_is_read_per_call() {
        let fake = Arc::new(FakeExecutor::new());
        fake.never_ready("m");
        let gate = gate(&fake);

        let begun = Instant::now();
        assert_eq!(gate.ensure_active("m", &timing(READY)).await, Disposition::TimedOut);
        assert!(begun.elapsed() >= READY);

        let short = Duration::from_secs(6);
        let begun = Instant::now();
        assert_eq!(gate.ensure_active("m", &timing(short)).await, Disposition::TimedOut);
        let elapsed = begun.elapsed();
        assert!(elapsed >= short && elapsed < READY);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_leaves_activation_running() {
        let fake = Arc::new(FakeExecutor::new().with_start_delay(Duration::from_secs(5)));
        let gate = gate(&fake);

        let activator = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.ensure_active("m", &timing(READY)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let joiner = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.ensure_active("m", &timing(READY)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gate.in_flight()[0].waiters, 2);

        activator.abort();
        assert!(activator.await.unwrap_err().is_cancelled());

        let snapshot = gate.in_flight();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].waiters, 1);

        assert_eq!(joiner.await.unwrap(), Disposition::BecameActive);
        assert_eq!(fake.starts("m"), 1);
        assert!(!gate.is_in_flight("m"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_drop_does_not_touch_a_newer_activation() {
        let fake = Arc::new(FakeExecutor::new().with_start_delay(Duration::from_secs(5)));
        let gate = gate(&fake);

        assert_eq!(gate.ensure_active("m", &timing(READY)).await, Disposition::BecameActive);
        fake.set_running("m", false);

        let next = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.ensure_active("m", &timing(READY)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stale = Waiter {
            table: Arc::clone(&gate.in_flight),
            resource_id: "m".to_string(),
            generation: u64::MAX,
            result: watch::channel(None).1,
        };
        drop(stale);
        assert_eq!(gate.in_flight()[0].waiters, 1);

        assert_eq!(next.await.unwrap(), Disposition::BecameActive);
        assert_eq!(fake.starts("m"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn different_resources_activate_independently() {
        let fake = Arc::new(FakeExecutor::new().with_start_delay(Duration::from_secs(2)));
        fake.never_ready("slow");
        let gate = gate(&fake);

        let slow = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.ensure_active("slow", &timing(READY)).await }
        });
        let begun = Instant::now();
        assert_eq!(gate.ensure_active("fast", &timing(READY)).await, Disposition::BecameActive);
        assert!(begun.elapsed() < READY);

        assert_eq!(slow.await.unwrap(), Disposition::TimedOut);
    }
}
