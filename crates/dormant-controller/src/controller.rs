//! The lifecycle controller.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dormant_core::{
    epoch_secs, Classification, ConfigHandle, ConfigResult, Disposition, LifecycleConfig, MacAddress,
    Timestamp,
};
use dormant_gate::{ActivationGate, ActivationInFlight};
use dormant_state::{ActivityLedger, DebounceKey, Debouncer};

use crate::error::ControllerError;
use crate::escalation::{Escalator, HttpEscalator};
use crate::wake::{MagicPacketSender, WakeSender};

const ESCALATE: &str = "escalate";
const WAKE: &str = "wake";

/// Source of "now" in epoch seconds.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// What `on_activity_event` did with an event.
#[derive(Debug)]
pub enum EventOutcome {
    /// No rule matched; nothing recorded.
    Unmatched,
    /// Activity recorded; no escalation sent (none configured or debounced).
    Recorded { resource_id: String },
    /// Activity recorded and an escalation dispatched on `task`.
    Escalating {
        resource_id: String,
        task: JoinHandle<()>,
    },
}

impl EventOutcome {
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            EventOutcome::Unmatched => None,
            EventOutcome::Recorded { resource_id } | EventOutcome::Escalating { resource_id, .. } => {
                Some(resource_id.as_str())
            }
        }
    }
}

/// Query view of one configured resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub resource_id: String,
    pub classification: Classification,
    pub last_seen: Timestamp,
    pub idle_for_secs: u64,
    pub last_escalated_at: Option<Timestamp>,
}

pub struct LifecycleController {
    config: ConfigHandle,
    ledger: Arc<ActivityLedger>,
    debouncer: Arc<Debouncer>,
    gate: Arc<ActivationGate>,
    escalator: Arc<dyn Escalator>,
    waker: Arc<dyn WakeSender>,
    clock: Clock,
}

impl LifecycleController {
    /// Controller with HTTP escalation, UDP wake, and the wall clock.
    pub fn new(config: ConfigHandle, ledger: Arc<ActivityLedger>, gate: Arc<ActivationGate>) -> Self {
        let escalation_timeout = config.current().timing.escalation_timeout;
        Self {
            config,
            ledger,
            debouncer: Arc::new(Debouncer::new()),
            gate,
            escalator: Arc::new(HttpEscalator::new(escalation_timeout)),
            waker: Arc::new(MagicPacketSender),
            clock: Arc::new(epoch_secs),
        }
    }

    pub fn with_escalator(mut self, escalator: Arc<dyn Escalator>) -> Self {
        self.escalator = escalator;
        self
    }

    pub fn with_waker(mut self, waker: Arc<dyn WakeSender>) -> Self {
        self.waker = waker;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Handle one observed use of `identifier`.
    ///
    /// Timestamps ahead of the clock are clamped to it so a skewed source
    /// cannot pin a resource as active.
    pub fn on_activity_event(&self, identifier: &str, at: Timestamp, status: Option<u16>) -> EventOutcome {
        let config = self.config.current();
        let Some(rule) = config.matcher.match_rule(identifier) else {
            debug!(%identifier, "no rule matched");
            return EventOutcome::Unmatched;
        };
        let resource_id = rule.resource_id.clone();

        let now = (self.clock)();
        if at > now {
            debug!(resource = %resource_id, at, now, "clamping future timestamp");
        }
        let at = at.min(now);
        self.ledger.record(&resource_id, at);

        let Some(target) = rule.endpoint_for(status) else {
            return EventOutcome::Recorded { resource_id };
        };

        let key = DebounceKey::new(ESCALATE, resource_id.as_str());
        if !self
            .debouncer
            .should_fire(&key, at, config.escalation_debounce_for(rule))
        {
            return EventOutcome::Recorded { resource_id };
        }
        self.ledger.record_escalation(&resource_id, at);

        info!(resource = %resource_id, %target, ?status, "escalating");
        let escalation = Escalation {
            resource_id: resource_id.clone(),
            target: target.to_string(),
            wake_target: config.wake_target_for(rule),
            wake_debounce: config.timing.wake_debounce,
            escalator: Arc::clone(&self.escalator),
            waker: Arc::clone(&self.waker),
            debouncer: Arc::clone(&self.debouncer),
            clock: Arc::clone(&self.clock),
        };
        let task = tokio::spawn(escalation.run());

        EventOutcome::Escalating { resource_id, task }
    }

    /// Record direct activity for a configured resource at the current time.
    pub fn report_activity(&self, resource_id: &str) -> Result<Timestamp, ControllerError> {
        self.ensure_configured(resource_id)?;
        let now = (self.clock)();
        Ok(self.ledger.record(resource_id, now))
    }

    /// Classification of a configured resource, as of now.
    pub fn current_classification(&self, resource_id: &str) -> Option<Classification> {
        self.status(resource_id).map(|s| s.classification)
    }

    /// Full status of a configured resource, as of now.
    pub fn status(&self, resource_id: &str) -> Option<ResourceStatus> {
        let config = self.config.current();
        if !config.is_configured(resource_id) {
            return None;
        }
        Some(self.status_with(&config, resource_id, (self.clock)()))
    }

    /// Classification of every configured resource.
    pub fn all_classifications(&self) -> BTreeMap<String, Classification> {
        self.all_statuses()
            .into_iter()
            .map(|s| (s.resource_id, s.classification))
            .collect()
    }

    /// Status of every configured resource, in rule order.
    pub fn all_statuses(&self) -> Vec<ResourceStatus> {
        let config = self.config.current();
        let now = (self.clock)();
        config
            .resources()
            .iter()
            .map(|id| self.status_with(&config, id, now))
            .collect()
    }

    /// Record the request as activity and make sure the resource is up.
    pub async fn ensure_active(&self, resource_id: &str) -> Result<Disposition, ControllerError> {
        self.ensure_configured(resource_id)?;
        self.ledger.record(resource_id, (self.clock)());
        let timing = self.config.current().timing;
        Ok(self.gate.ensure_active(resource_id, &timing).await)
    }

    pub fn activations(&self) -> Vec<ActivationInFlight> {
        self.gate.in_flight()
    }

    /// Install a new config. Takes effect for the next event or sweep.
    pub fn reload(&self, config: LifecycleConfig) -> ConfigResult<()> {
        self.config.replace(config)?;
        info!(resources = ?self.config.current().resources(), "configuration reloaded");
        Ok(())
    }

    /// Current time according to the controller's clock.
    pub fn now(&self) -> Timestamp {
        (self.clock)()
    }

    pub fn config(&self) -> Arc<LifecycleConfig> {
        self.config.current()
    }

    pub fn ledger(&self) -> &Arc<ActivityLedger> {
        &self.ledger
    }

    fn ensure_configured(&self, resource_id: &str) -> Result<(), ControllerError> {
        if self.config.current().is_configured(resource_id) {
            Ok(())
        } else {
            Err(ControllerError::UnknownResource(resource_id.to_string()))
        }
    }

    fn status_with(&self, config: &LifecycleConfig, resource_id: &str, now: Timestamp) -> ResourceStatus {
        let last_seen = self.ledger.last_seen(resource_id);
        let idle_for = self.ledger.idle_for(resource_id, now);
        ResourceStatus {
            resource_id: resource_id.to_string(),
            classification: Classification::from_elapsed(
                idle_for,
                config.thresholds.active,
                config.idle_threshold_for(resource_id),
            ),
            last_seen,
            idle_for_secs: idle_for.as_secs(),
            last_escalated_at: self.ledger.get(resource_id).and_then(|r| r.last_escalated_at),
        }
    }
}

/// One dispatched escalation, owned by its task.
struct Escalation {
    resource_id: String,
    target: String,
    wake_target: Option<(MacAddress, SocketAddr)>,
    wake_debounce: Duration,
    escalator: Arc<dyn Escalator>,
    waker: Arc<dyn WakeSender>,
    debouncer: Arc<Debouncer>,
    clock: Clock,
}

impl Escalation {
    async fn run(self) {
        let err = match self.escalator.escalate(&self.target, &self.resource_id).await {
            Ok(()) => return,
            Err(e) => e,
        };
        warn!(resource = %self.resource_id, target = %self.target, error = %err, "escalation failed");

        let Some((mac, broadcast)) = self.wake_target else {
            return;
        };
        let key = DebounceKey::new(WAKE, self.resource_id.as_str());
        if !self.debouncer.should_fire(&key, (self.clock)(), self.wake_debounce) {
            return;
        }
        if let Err(e) = self.waker.wake(mac, broadcast).await {
            warn!(resource = %self.resource_id, %mac, error = %e, "wake failed");
        }
    }
}
