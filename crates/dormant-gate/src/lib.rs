//! dormant-gate — at most one cold start per resource at a time.
//!
//! # Flow
//!
//! ```text
//! ensure_active(R)
//!   ├─ is_running(R)?  ── yes ──▶ AlreadyActive
//!   ├─ activation for R in flight? ── yes ──▶ join as waiter
//!   └─ become the activator
//!        spawn: start(R) ── err ──▶ StartFailed
//!               poll is_ready(R) every poll_interval
//!                 ├─ ready before deadline ──▶ BecameActive
//!                 └─ deadline passed        ──▶ TimedOut
//!        clear entry, release every waiter with the same disposition
//! ```
//!
//! The activation runs on its own task, so a caller that goes away (a
//! dropped HTTP request, say) neither cancels the start nor strands the
//! other waiters.

pub mod gate;

pub use gate::{ActivationGate, ActivationInFlight};
