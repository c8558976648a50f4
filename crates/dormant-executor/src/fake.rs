//! In-memory executor for tests.
//!
//! Records every call and lets a test script what `is_running` answers,
//! which operations fail, and how long a start takes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{ExecutorError, ExecutorResult};
use crate::executor::{ExecFuture, LifecycleExecutor};

/// One recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Stop(String),
    IsRunning(String),
    Shutdown,
}

#[derive(Debug, Default)]
struct FakeState {
    running: HashSet<String>,
    /// Started but not yet reporting running: remaining negative checks.
    warming: HashMap<String, u32>,
    ready_after: u32,
    never_ready: HashSet<String>,
    failing_starts: HashSet<String>,
    failing_stops: HashSet<String>,
    fail_shutdown: bool,
    hang_is_running: bool,
    start_delay: Duration,
    calls: Vec<Call>,
}

#[derive(Debug, Default)]
pub struct FakeExecutor {
    state: Mutex<FakeState>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given resources already running.
    pub fn with_running<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().running.extend(ids.into_iter().map(Into::into));
        self
    }

    /// After a successful start, answer `false` to this many checks first.
    pub fn with_ready_after(self, checks: u32) -> Self {
        self.lock().ready_after = checks;
        self
    }

    /// Make every start take this long before returning.
    pub fn with_start_delay(self, delay: Duration) -> Self {
        self.lock().start_delay = delay;
        self
    }

    pub fn set_running(&self, resource_id: &str, running: bool) {
        let mut state = self.lock();
        if running {
            state.running.insert(resource_id.to_string());
        } else {
            state.running.remove(resource_id);
        }
    }

    /// Starts succeed but the resource never reports running.
    pub fn never_ready(&self, resource_id: &str) {
        self.lock().never_ready.insert(resource_id.to_string());
    }

    pub fn fail_start(&self, resource_id: &str) {
        self.lock().failing_starts.insert(resource_id.to_string());
    }

    pub fn fail_stop(&self, resource_id: &str) {
        self.lock().failing_stops.insert(resource_id.to_string());
    }

    pub fn fail_shutdown(&self) {
        self.lock().fail_shutdown = true;
    }

    /// `is_running` never resolves.
    pub fn hang_is_running(&self) {
        self.lock().hang_is_running = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn starts(&self, resource_id: &str) -> usize {
        self.count(|c| matches!(c, Call::Start(id) if id == resource_id))
    }

    pub fn stops(&self, resource_id: &str) -> usize {
        self.count(|c| matches!(c, Call::Stop(id) if id == resource_id))
    }

    pub fn shutdowns(&self) -> usize {
        self.count(|c| matches!(c, Call::Shutdown))
    }

    pub fn is_marked_running(&self, resource_id: &str) -> bool {
        self.lock().running.contains(resource_id)
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure(op: &str, resource_id: &str) -> ExecutorError {
        ExecutorError::Command {
            command: format!("fake {op} {resource_id}"),
            reason: "scripted failure".to_string(),
        }
    }
}

impl LifecycleExecutor for FakeExecutor {
    fn start<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            let delay = {
                let mut state = self.lock();
                state.calls.push(Call::Start(resource_id.to_string()));
                state.start_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut state = self.lock();
            if state.failing_starts.contains(resource_id) {
                return Err(Self::failure("start", resource_id));
            }
            if state.never_ready.contains(resource_id) {
                return Ok(());
            }
            if state.ready_after == 0 {
                state.running.insert(resource_id.to_string());
            } else {
                let checks = state.ready_after;
                state.warming.insert(resource_id.to_string(), checks);
            }
            Ok(())
        })
    }

    fn stop<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::Stop(resource_id.to_string()));
            if state.failing_stops.contains(resource_id) {
                return Err(Self::failure("stop", resource_id));
            }
            state.running.remove(resource_id);
            state.warming.remove(resource_id);
            Ok(())
        })
    }

    fn is_running<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, bool> {
        Box::pin(async move {
            let hang = {
                let mut state = self.lock();
                state.calls.push(Call::IsRunning(resource_id.to_string()));
                state.hang_is_running
            };
            if hang {
                std::future::pending::<()>().await;
            }

            let mut state = self.lock();
            if state.running.contains(resource_id) {
                return Ok(true);
            }
            match state.warming.get_mut(resource_id) {
                Some(0) => {
                    state.warming.remove(resource_id);
                    state.running.insert(resource_id.to_string());
                    Ok(true)
                }
                Some(remaining) => {
                    *remaining -= 1;
                    Ok(false)
                }
                None => Ok(false),
            }
        })
    }

    fn shutdown_system(&self) -> ExecFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(Call::Shutdown);
            if state.fail_shutdown {
                return Err(Self::failure("shutdown", "system"));
            }
            Ok(())
        })
    }
}
