//! dormant-ingest — turns an nginx access log into activity events.
//!
//! [`LogTailer`] follows the file from its current end, survives rotation
//! and truncation, and forwards one [`ActivityEvent`](dormant_core::ActivityEvent)
//! per parseable line. Lines that do not parse are dropped.

pub mod parser;
pub mod tailer;

pub use parser::{AccessLogLine, AccessLogParser, SignalParseError};
pub use tailer::{LogCursor, LogTailer};
