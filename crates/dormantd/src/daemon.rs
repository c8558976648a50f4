//! Component wiring.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use dormant_api::ApiState;
use dormant_controller::LifecycleController;
use dormant_core::{epoch_secs, ActivityEvent, ConfigHandle, LifecycleConfig};
use dormant_executor::LifecycleExecutor;
use dormant_gate::ActivationGate;
use dormant_reaper::IdleReaper;
use dormant_state::ActivityLedger;

/// Every long-lived component, sharing one ledger and one config handle.
pub struct Daemon {
    pub config: ConfigHandle,
    pub ledger: Arc<ActivityLedger>,
    pub controller: Arc<LifecycleController>,
    pub reaper: Arc<IdleReaper>,
}

impl Daemon {
    /// Wire up with the executor the config selects.
    pub fn new(config: LifecycleConfig) -> Self {
        let executor = dormant_executor::from_config(&config.executor);
        Self::with_executor(config, executor)
    }

    pub fn with_executor(config: LifecycleConfig, executor: Arc<dyn LifecycleExecutor>) -> Self {
        let handle = ConfigHandle::new(config);
        let ledger = Arc::new(ActivityLedger::new(epoch_secs()));

        let gate = Arc::new(ActivationGate::new(Arc::clone(&executor)));
        let controller = Arc::new(LifecycleController::new(
            handle.clone(),
            Arc::clone(&ledger),
            gate,
        ));
        let reaper = Arc::new(IdleReaper::new(handle.clone(), Arc::clone(&ledger), executor));

        Self {
            config: handle,
            ledger,
            controller,
            reaper,
        }
    }

    pub fn router(&self) -> Router {
        dormant_api::build_router(Arc::clone(&self.controller))
    }

    pub fn starter_router(&self) -> Router {
        dormant_api::starter_router(ApiState {
            controller: Arc::clone(&self.controller),
        })
    }

    /// Re-read the config file and install it.
    ///
    /// Rules, thresholds, and timing apply from the next event or sweep.
    /// Executor, listener, and ingest changes need a restart.
    pub fn reload_from(&self, path: &Path) -> anyhow::Result<()> {
        let next = LifecycleConfig::from_file(path)
            .with_context(|| format!("reloading {}", path.display()))?;

        let current = self.config.current();
        if next.executor != current.executor {
            warn!("executor settings changed; restart to apply them");
        }
        if next.ingest != current.ingest || next.service.listen != current.service.listen {
            warn!("listener or ingest settings changed; restart to apply them");
        }
        if next.timing.escalation_timeout != current.timing.escalation_timeout {
            warn!("escalation_timeout changed; restart to apply it");
        }

        self.controller
            .reload(next)
            .context("installing reloaded config")?;
        Ok(())
    }
}

/// Feed events from an ingestion channel into the controller until the
/// senders are gone.
pub async fn pump_events(controller: Arc<LifecycleController>, mut events: mpsc::Receiver<ActivityEvent>) {
    let mut seen: u64 = 0;
    while let Some(event) = events.recv().await {
        seen += 1;
        let outcome = controller.on_activity_event(&event.identifier, event.at, event.status);
        debug!(identifier = %event.identifier, resource = ?outcome.resource_id(), "event handled");
    }
    info!(events = seen, "event pump stopped");
}
