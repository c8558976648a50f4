//! nginx combined/common log line parser.

use chrono::DateTime;
use regex::Regex;
use thiserror::Error;

use dormant_core::{ActivityEvent, Timestamp};

/// A line that does not look like an access log entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalParseError {
    #[error("line does not match access log format")]
    Shape,

    #[error("bad timestamp {0:?}")]
    Timestamp(String),

    #[error("bad status {0:?}")]
    Status(String),
}

/// Fields of one access log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogLine {
    pub client: String,
    pub at: Timestamp,
    pub method: String,
    pub uri: String,
    pub status: u16,
}

impl AccessLogLine {
    pub fn into_event(self) -> ActivityEvent {
        ActivityEvent {
            identifier: self.uri,
            at: self.at,
            status: Some(self.status),
        }
    }
}

/// Parses `IP - user [07/Dec/2025:01:30:45 +0000] "GET /uri HTTP/1.1" 200 1234 ...`.
///
/// Anything after the size field (referer, user agent) is ignored.
#[derive(Debug, Clone)]
pub struct AccessLogParser {
    line_re: Regex,
}

impl AccessLogParser {
    pub fn new() -> Result<Self, regex::Error> {
        let line_re = Regex::new(
            r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+)(?: HTTP/[^"]*)?" (\d{3}) (\S+)(?: .*)?$"#,
        )?;
        Ok(Self { line_re })
    }

    pub fn parse(&self, line: &str) -> Result<AccessLogLine, SignalParseError> {
        let caps = self
            .line_re
            .captures(line.trim())
            .ok_or(SignalParseError::Shape)?;

        let raw_ts = &caps[2];
        let at = DateTime::parse_from_str(raw_ts, "%d/%b/%Y:%H:%M:%S %z")
            .ok()
            .and_then(|dt| Timestamp::try_from(dt.timestamp()).ok())
            .ok_or_else(|| SignalParseError::Timestamp(raw_ts.to_string()))?;

        let raw_status = &caps[5];
        let status = raw_status
            .parse::<u16>()
            .ok()
            .filter(|s| (100..=599).contains(s))
            .ok_or_else(|| SignalParseError::Status(raw_status.to_string()))?;

        Ok(AccessLogLine {
            client: caps[1].to_string(),
            at,
            method: caps[3].to_string(),
            uri: caps[4].to_string(),
            status,
        })
    }

    pub fn parse_event(&self, line: &str) -> Result<ActivityEvent, SignalParseError> {
        self.parse(line).map(AccessLogLine::into_event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> AccessLogParser {
        AccessLogParser::new().unwrap()
    }

    #[test]
    fn parses_common_format() {
        let line = r#"172.17.0.1 - - [07/Dec/2025:01:30:45 +0000] "GET /api/v1/users HTTP/1.1" 200 1234"#;
        let parsed = parser().parse(line).unwrap();

        assert_eq!(parsed.client, "172.17.0.1");
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.uri, "/api/v1/users");
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.at, 1_765_071_045);
    }

    #[test]
    fn parses_combined_format_with_referer_and_agent() {
        let line = r#"10.0.0.5 - bob [07/Dec/2025:02:30:45 +0100] "POST /llama/v1/chat HTTP/1.1" 502 0 "-" "curl/8.4.0""#;
        let event = parser().parse_event(line).unwrap();

        assert_eq!(event.identifier, "/llama/v1/chat");
        assert_eq!(event.status, Some(502));
        // +0100 offset is normalized to UTC.
        assert_eq!(event.at, 1_765_071_045);
    }

    #[test]
    fn rejects_other_shapes() {
        let p = parser();
        assert_eq!(p.parse(""), Err(SignalParseError::Shape));
        assert_eq!(p.parse("2025/12/07 01:30:45 [error] 7#7: upstream timed out"), Err(SignalParseError::Shape));
        assert_eq!(
            p.parse(r#"1.2.3.4 - - [07/Dec/2025:01:30:45 +0000] "GET / HTTP/1.1" abc 1"#),
            Err(SignalParseError::Shape)
        );
    }

    #[test]
    fn rejects_bad_timestamp_and_status() {
        let p = parser();
        assert!(matches!(
            p.parse(r#"1.2.3.4 - - [31/Foo/2025:01:30:45 +0000] "GET / HTTP/1.1" 200 1"#),
            Err(SignalParseError::Timestamp(_))
        ));
        assert!(matches!(
            p.parse(r#"1.2.3.4 - - [07/Dec/2025:01:30:45 +0000] "GET / HTTP/1.1" 999 1"#),
            Err(SignalParseError::Status(_))
        ));
    }
}
