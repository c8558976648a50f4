//! Follow an access log across rotation and truncation.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use dormant_core::{ActivityEvent, IngestConfig};

use crate::parser::AccessLogParser;

/// Byte offset into a log file plus the identity of the file it belongs to.
#[derive(Debug)]
pub struct LogCursor {
    path: PathBuf,
    position: u64,
    file_id: Option<u64>,
}

impl LogCursor {
    /// Cursor at the current end of `path`: existing lines are skipped.
    pub async fn at_end(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(Self {
            file_id: file_id(&metadata),
            position: metadata.len(),
            path,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Complete lines appended since the last read.
    ///
    /// A trailing partial line is left for the next call. A replaced file
    /// (rotation) or a shrunk one (truncation) is read from the start.
    pub async fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        let len = metadata.len();
        let id = file_id(&metadata);

        if id != self.file_id {
            info!(path = %self.path.display(), "log file replaced, reading from start");
            self.file_id = id;
            self.position = 0;
        } else if len < self.position {
            info!(path = %self.path.display(), "log file truncated, reading from start");
            self.position = 0;
        }
        if len == self.position {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.position)).await?;
        let mut buf = Vec::with_capacity((len - self.position) as usize);
        file.read_to_end(&mut buf).await?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buf[..=last_newline];
        self.position += complete.len() as u64;

        Ok(complete
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect())
    }
}

#[cfg(unix)]
fn file_id(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Polls a log file and forwards parsed events.
pub struct LogTailer {
    path: PathBuf,
    poll_interval: Duration,
    retry_interval: Duration,
    parser: AccessLogParser,
}

impl LogTailer {
    pub fn new(config: &IngestConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            path: config.log_file.clone(),
            poll_interval: config.poll_interval,
            retry_interval: config.retry_interval,
            parser: AccessLogParser::new()?,
        })
    }

    /// Tail until `shutdown` changes or the receiver goes away.
    pub async fn run(self, events: mpsc::Sender<ActivityEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), "log tailer started");

        let mut cursor = None;
        loop {
            let wait = match cursor.as_mut() {
                None => match LogCursor::at_end(&self.path).await {
                    Ok(opened) => {
                        debug!(path = %self.path.display(), position = opened.position(), "log file opened");
                        cursor = Some(opened);
                        self.poll_interval
                    }
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "log file unavailable, retrying");
                        self.retry_interval
                    }
                },
                Some(open) => match open.read_new_lines().await {
                    Ok(lines) => {
                        if !self.forward(lines, &events).await {
                            info!("event receiver closed, log tailer stopping");
                            return;
                        }
                        self.poll_interval
                    }
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "log read failed, reopening");
                        cursor = None;
                        self.retry_interval
                    }
                },
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("log tailer shutting down");
                    return;
                }
            }
        }
    }

    /// Returns `false` once the receiver is gone.
    async fn forward(&self, lines: Vec<String>, events: &mpsc::Sender<ActivityEvent>) -> bool {
        for line in lines {
            match self.parser.parse_event(&line) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        return false;
                    }
                }
                Err(e) => debug!(error = %e, %line, "dropping log line"),
            }
        }
        true
    }
}
