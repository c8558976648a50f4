//! dormantd — assembly of the Dormant subsystems into one process.
//!
//! [`Daemon`] owns the shared tables and builds every component around
//! them; `main.rs` only adds signals, listeners, and task supervision.

pub mod daemon;

pub use daemon::{pump_events, Daemon};
