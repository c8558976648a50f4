//! dormant-state — in-memory tables shared by the lifecycle components.
//!
//! # Tables
//!
//! | Table | Key | Owner |
//! |---|---|---|
//! | [`ActivityLedger`] | resource id | last activity / last escalation |
//! | [`Debouncer`] | `(namespace, id)` | last time a signal fired |
//!
//! Each table is one lock around a `HashMap`, held only for the read or
//! mutation itself and never across an await. Readers get snapshot
//! copies, never references into the table. Both types are `Send + Sync`
//! and meant to be shared behind an `Arc`.

pub mod debounce;
pub mod ledger;

pub use debounce::{DebounceKey, Debouncer};
pub use ledger::{ActivityLedger, ActivityRecord};
