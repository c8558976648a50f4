//! dormant-core — shared types, configuration, and rule matching.
//!
//! Everything here is pure: no I/O beyond reading the config file, no
//! clocks beyond [`epoch_secs`]. The stateful tables live in
//! `dormant-state`; the async components build on both.

pub mod config;
pub mod duration;
pub mod error;
pub mod matcher;
pub mod types;

pub use config::{
    ConfigHandle, ExecutorConfig, IngestConfig, LifecycleConfig, ServiceConfig, Thresholds, Timing, WakeConfig,
};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use matcher::{Pattern, PatternMatcher, Rule};
pub use types::*;
