//! dormant-executor — the seam between the lifecycle controller and
//! whatever actually starts and stops resources.
//!
//! The controller never assumes the executor is idempotent or safe under
//! concurrent starts; the activation gate is what serializes starts.
//!
//! # Implementations
//!
//! ```text
//! LifecycleExecutor
//!   ├── InferenceServiceExecutor  REST: /models/running, /models/{id}/start|stop
//!   ├── SystemctlExecutor         systemctl is-active|start|stop <unit>
//!   └── FakeExecutor              in-memory, scripted (feature `test-util`)
//! ```
//!
//! Every call made by the gate and the reaper goes through [`bounded`] so
//! a hung command cannot stall a sweep or an activation.

pub mod command;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod http;
pub mod inference;
pub mod systemctl;

use std::sync::Arc;

use dormant_core::ExecutorConfig;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{bounded, validate_resource_id, ExecFuture, LifecycleExecutor};
#[cfg(any(test, feature = "test-util"))]
pub use fake::{Call, FakeExecutor};
pub use inference::InferenceServiceExecutor;
pub use systemctl::SystemctlExecutor;

/// Build the executor selected by the config.
pub fn from_config(config: &ExecutorConfig) -> Arc<dyn LifecycleExecutor> {
    match config {
        ExecutorConfig::InferenceService {
            base_url,
            shutdown_command,
        } => Arc::new(InferenceServiceExecutor::new(
            base_url.clone(),
            shutdown_command.clone(),
        )),
        ExecutorConfig::Systemctl {
            unit_template,
            use_sudo,
            shutdown_command,
        } => Arc::new(SystemctlExecutor::new(
            unit_template.clone(),
            *use_sudo,
            shutdown_command.clone(),
        )),
    }
}
