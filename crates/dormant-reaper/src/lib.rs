//! dormant-reaper — stops what nobody is using.
//!
//! Every sweep classifies all configured resources (not just the ones
//! with recorded activity) and then takes exactly one of two paths:
//!
//! | Condition                                            | Action                        |
//! |------------------------------------------------------|-------------------------------|
//! | every resource Idle and newest `last_seen` older than `system_idle` | `shutdown_system()`, no stops |
//! | otherwise                                            | `stop()` each Idle + running  |
//!
//! Stop failures are logged and left for the next sweep.

pub mod reaper;

pub use reaper::{IdleReaper, SweepReport, SystemAction};
