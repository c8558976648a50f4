//! dormant-controller — ties matching, the ledger, debouncing, escalation
//! and activation together.
//!
//! # Event path
//!
//! ```text
//! on_activity_event(identifier, at, status)
//!   → PatternMatcher::match_rule        no match: ignored
//!   → ActivityLedger::record            (at clamped to now)
//!   → Debouncer "escalate:<resource>"   suppressed: done
//!   → spawn: Escalator::escalate(target)
//!              └─ failed and wake target configured
//!                   → Debouncer "wake:<resource>"
//!                   → WakeSender::wake(mac)
//! ```
//!
//! Escalation and wake run on their own task so a slow endpoint never
//! holds up ledger updates.

pub mod controller;
pub mod error;
pub mod escalation;
pub mod wake;

pub use controller::{Clock, EventOutcome, LifecycleController, ResourceStatus};
pub use error::{ControllerError, EscalationError};
pub use escalation::{Escalator, EscalationFuture, HttpEscalator};
pub use wake::{magic_packet, MagicPacketSender, WakeFuture, WakeSender};
