//! Shared types used across Dormant crates.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Whole seconds since the Unix epoch.
pub type Timestamp = u64;

/// Current wall-clock time in epoch seconds.
pub fn epoch_secs() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Derived activity state of a resource.
///
/// Never stored; always recomputed from `last_seen` and the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Seen within the active threshold.
    Active,
    /// Between thresholds: not guaranteed active, not eligible for reaping.
    Cooling,
    /// Not seen for longer than the idle threshold.
    Idle,
}

impl Classification {
    /// Classify an elapsed time since last activity.
    ///
    /// `elapsed <= active` wins first, so equal thresholds never yield
    /// both classes at the boundary instant.
    pub fn from_elapsed(elapsed: Duration, active: Duration, idle: Duration) -> Self {
        if elapsed <= active {
            Classification::Active
        } else if elapsed > idle {
            Classification::Idle
        } else {
            Classification::Cooling
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Active => "active",
            Classification::Cooling => "cooling",
            Classification::Idle => "idle",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed use of something that may map to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Raw identifier: a request URI or a model name.
    pub identifier: String,
    /// When the activity happened, per the source.
    pub at: Timestamp,
    /// Response status observed by the source, when it has one.
    pub status: Option<u16>,
}

/// Outcome of an activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The resource was already running; nothing was started.
    AlreadyActive,
    /// The resource was started and reported ready within the timeout.
    BecameActive,
    /// The start command failed.
    StartFailed,
    /// Started, but did not report ready before the timeout.
    TimedOut,
}

impl Disposition {
    /// Whether the resource can be expected to serve traffic now.
    pub fn is_ready(&self) -> bool {
        matches!(self, Disposition::AlreadyActive | Disposition::BecameActive)
    }
}

/// A 48-bit hardware address, used as a Wake-on-LAN target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl FromStr for MacAddress {
    type Err = ConfigError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::MacAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
