//! The `LifecycleExecutor` trait and helpers shared by implementations.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{ExecutorError, ExecutorResult};

/// Boxed future returned by executor methods.
pub type ExecFuture<'a, T> = Pin<Box<dyn Future<Output = ExecutorResult<T>> + Send + 'a>>;

/// Starts, stops and inspects named resources.
///
/// Implementations are injected so the gate and reaper can be tested with
/// `FakeExecutor`. Nothing here is assumed to be
/// idempotent or safe to call concurrently for the same resource.
pub trait LifecycleExecutor: Send + Sync {
    /// Issue a start. Success means the command was accepted, not that
    /// the resource is ready.
    fn start<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()>;

    fn stop<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, ()>;

    fn is_running<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, bool>;

    /// Readiness probe used while waiting for a started resource.
    fn is_ready<'a>(&'a self, resource_id: &'a str) -> ExecFuture<'a, bool> {
        self.is_running(resource_id)
    }

    /// Power the host off.
    fn shutdown_system(&self) -> ExecFuture<'_, ()>;
}

/// Run an executor call with an upper bound on how long it may take.
pub async fn bounded<T, F>(op: &'static str, timeout: Duration, fut: F) -> ExecutorResult<T>
where
    F: Future<Output = ExecutorResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExecutorError::Timeout { op, timeout }),
    }
}

/// Reject ids that could escape a URL path segment or a unit name.
pub fn validate_resource_id(resource_id: &str) -> ExecutorResult<()> {
    let bad = resource_id.is_empty()
        || resource_id.contains('/')
        || resource_id.contains("..")
        || resource_id.chars().any(|c| c.is_whitespace() || c.is_control());
    if bad {
        return Err(ExecutorError::InvalidResource(resource_id.to_string()));
    }
    Ok(())
}
