//! Activity ledger — last-seen timestamps per resource.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

use dormant_core::{Classification, Timestamp};

/// Snapshot of one resource's activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub resource_id: String,
    pub last_seen_at: Timestamp,
    pub last_escalated_at: Option<Timestamp>,
}

/// Per-resource last-activity store.
///
/// Records are created lazily and never deleted. A resource with no
/// record is treated as last seen when the ledger was created, so nothing
/// is judged idle before the process has had a chance to see traffic.
#[derive(Debug)]
pub struct ActivityLedger {
    created_at: Timestamp,
    records: RwLock<HashMap<String, ActivityRecord>>,
}

impl ActivityLedger {
    /// Create an empty ledger whose default "last seen" is `created_at`.
    pub fn new(created_at: Timestamp) -> Self {
        Self {
            created_at,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Record activity at `at` and return the resulting `last_seen_at`.
    ///
    /// Monotonic: an older timestamp never moves `last_seen_at` back, and
    /// nothing moves it before the ledger's creation time.
    pub fn record(&self, resource_id: &str, at: Timestamp) -> Timestamp {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let created_at = self.created_at;
        let record = records
            .entry(resource_id.to_string())
            .or_insert_with(|| ActivityRecord {
                resource_id: resource_id.to_string(),
                last_seen_at: created_at,
                last_escalated_at: None,
            });
        record.last_seen_at = record.last_seen_at.max(at);
        trace!(resource = %resource_id, at, last_seen = record.last_seen_at, "activity recorded");
        record.last_seen_at
    }

    /// Stamp the last time an escalation was sent for a resource.
    pub fn record_escalation(&self, resource_id: &str, at: Timestamp) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let created_at = self.created_at;
        let record = records
            .entry(resource_id.to_string())
            .or_insert_with(|| ActivityRecord {
                resource_id: resource_id.to_string(),
                last_seen_at: created_at,
                last_escalated_at: None,
            });
        record.last_escalated_at = Some(record.last_escalated_at.map_or(at, |prev| prev.max(at)));
    }

    /// Last activity, or the ledger's creation time if never recorded.
    pub fn last_seen(&self, resource_id: &str) -> Timestamp {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(resource_id)
            .map(|r| r.last_seen_at)
            .unwrap_or(self.created_at)
    }

    /// Time since last activity as of `now`. Future timestamps count as zero.
    pub fn idle_for(&self, resource_id: &str, now: Timestamp) -> Duration {
        Duration::from_secs(now.saturating_sub(self.last_seen(resource_id)))
    }

    /// Classify a resource as of `now`.
    pub fn classify(
        &self,
        resource_id: &str,
        now: Timestamp,
        active: Duration,
        idle: Duration,
    ) -> Classification {
        Classification::from_elapsed(self.idle_for(resource_id, now), active, idle)
    }

    /// Copy of a single record, if one exists.
    pub fn get(&self, resource_id: &str) -> Option<ActivityRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(resource_id).cloned()
    }

    /// Copy of every record, sorted by resource id.
    pub fn snapshot(&self) -> Vec<ActivityRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<ActivityRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        all
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
