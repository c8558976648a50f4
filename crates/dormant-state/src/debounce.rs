//! Debouncer — per-key minimum-interval gate for side effects.
//!
//! Keys are namespaced by purpose so that two signals about the same
//! resource (an escalation call and a Wake-on-LAN packet, say) keep
//! independent windows.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use dormant_core::Timestamp;

/// Debounce key: a purpose namespace plus an id within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub namespace: &'static str,
    pub id: String,
}

impl DebounceKey {
    pub fn new(namespace: &'static str, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }
}

impl fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// Table of last-fired stamps.
#[derive(Debug, Default)]
pub struct Debouncer {
    stamps: Mutex<HashMap<DebounceKey, Timestamp>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a signal for `key` at `at` may fire.
    ///
    /// Returns `true` and stamps `at` when the key has never fired or at
    /// least `min_interval` has passed since the last stamp. Otherwise
    /// returns `false` and leaves the stamp alone. The check and the stamp
    /// happen under one lock, so racing callers see exactly one winner.
    pub fn should_fire(&self, key: &DebounceKey, at: Timestamp, min_interval: Duration) -> bool {
        let mut stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        match stamps.get_mut(key) {
            None => {
                stamps.insert(key.clone(), at);
                true
            }
            Some(last) => {
                let elapsed = at.saturating_sub(*last);
                if Duration::from_secs(elapsed) >= min_interval {
                    *last = (*last).max(at);
                    true
                } else {
                    debug!(%key, elapsed_secs = elapsed, "debounced");
                    false
                }
            }
        }
    }

    /// Last time `key` fired, if ever.
    pub fn last_fired(&self, key: &DebounceKey) -> Option<Timestamp> {
        let stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        stamps.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: Timestamp = 1_700_000_000;

    #[test]
    fn fires_then_suppresses_then_fires_again() {
        let debouncer = Debouncer::new();
        let key = DebounceKey::new("escalate", "llama");
        let window = Duration::from_secs(60);

        assert!(debouncer.should_fire(&key, T0, window));
        assert!(!debouncer.should_fire(&key, T0 + 1, window));
        assert!(debouncer.should_fire(&key, T0 + 61, window));
        assert_eq!(debouncer.last_fired(&key), Some(T0 + 61));
    }

    #[test]
    fn suppressed_call_does_not_extend_window() {
        let debouncer = Debouncer::new();
        let key = DebounceKey::new("escalate", "llama");
        let window = Duration::from_secs(60);

        assert!(debouncer.should_fire(&key, T0, window));
        assert!(!debouncer.should_fire(&key, T0 + 59, window));
        assert_eq!(debouncer.last_fired(&key), Some(T0));
        assert!(debouncer.should_fire(&key, T0 + 60, window));
    }

    #[test]
    fn namespaces_are_independent() {
        let debouncer = Debouncer::new();
        let escalate = DebounceKey::new("escalate", "llama");
        let wake = DebounceKey::new("wake", "llama");

        assert!(debouncer.should_fire(&escalate, T0, Duration::from_secs(60)));
        assert!(debouncer.should_fire(&wake, T0, Duration::from_secs(300)));

        assert!(debouncer.should_fire(&escalate, T0 + 60, Duration::from_secs(60)));
        assert!(!debouncer.should_fire(&wake, T0 + 60, Duration::from_secs(300)));
    }

    #[test]
    fn out_of_order_call_never_moves_stamp_back() {
        let debouncer = Debouncer::new();
        let key = DebounceKey::new("escalate", "m");

        assert!(debouncer.should_fire(&key, T0 + 100, Duration::ZERO));
        assert!(debouncer.should_fire(&key, T0, Duration::ZERO));
        assert_eq!(debouncer.last_fired(&key), Some(T0 + 100));
        assert!(!debouncer.should_fire(&key, T0 + 50, Duration::from_secs(10)));
    }

    #[test]
    fn exactly_one_winner_under_contention() {
        let debouncer = Arc::new(Debouncer::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let key = DebounceKey::new("escalate", "hot");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let debouncer = Arc::clone(&debouncer);
                let wins = Arc::clone(&wins);
                let key = key.clone();
                std::thread::spawn(move || {
                    if debouncer.should_fire(&key, T0, Duration::from_secs(60)) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sub_second_windows_are_not_truncated() {
        let debouncer = Debouncer::new();
        let key = DebounceKey::new("escalate", "m");

        let window = Duration::from_millis(1500);
        assert!(debouncer.should_fire(&key, T0, window));
        assert!(!debouncer.should_fire(&key, T0 + 1, window));
        assert!(debouncer.should_fire(&key, T0 + 2, window));

        let other = DebounceKey::new("wake", "m");
        let half = Duration::from_millis(500);
        assert!(debouncer.should_fire(&other, T0, half));
        assert!(!debouncer.should_fire(&other, T0, half));
        assert!(debouncer.should_fire(&other, T0 + 1, half));
    }

    #[test]
    fn key_display() {
        assert_eq!(DebounceKey::new("wake", "llama").to_string(), "wake:llama");
    }
}
