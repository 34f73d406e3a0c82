//! Structured logging shared by all pipeline workers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Structured log event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// Resolved source/pipeline summary emitted once after setup
    SourceInfo { entries: Vec<(String, String)> },

    /// Rate-limited overrun report from a live capture path
    Overrun {
        dropped_since_last: u64,
        dropped_total: u64,
    },

    /// Periodic progress sample
    Progress {
        frames_read: u64,
        frames_written: u64,
        percent: Option<f64>,
    },

    /// Final run summary
    Summary(SummaryEvent),

    /// General info message
    Info { message: String },

    /// Warning message
    Warn { message: String },

    /// Error message
    Error {
        message: String,
        details: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub frames_read: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub overruns_dropped: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogEvent {
    fn level(&self) -> LogLevel {
        match self {
            LogEvent::Progress { .. } => LogLevel::Debug,
            LogEvent::SourceInfo { .. } | LogEvent::Summary(_) | LogEvent::Info { .. } => {
                LogLevel::Info
            }
            LogEvent::Overrun { .. } | LogEvent::Warn { .. } => LogLevel::Warn,
            LogEvent::Error { .. } => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Logfmt,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Stdout,
    Stderr,
    File,
}

/// Logging output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_target")]
    pub target: LogTarget,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default = "default_format")]
    pub format: LogFormat,
    #[serde(default = "default_level")]
    pub level: LogLevel,
}

fn default_target() -> LogTarget {
    LogTarget::Stderr
}

fn default_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            file_path: None,
            format: default_format(),
            level: default_level(),
        }
    }
}

/// Logger shared across worker threads. Events below the configured
/// level are discarded; everything else is formatted and flushed under
/// a single writer lock so lines never interleave.
pub struct PipelineLogger {
    format: LogFormat,
    level: LogLevel,
    writer: Mutex<Box<dyn Write + Send>>,
    start_time: DateTime<Utc>,
}

impl PipelineLogger {
    pub fn new(config: &LogConfig) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match &config.target {
            LogTarget::Stdout => Box::new(io::stdout()),
            LogTarget::Stderr => Box::new(io::stderr()),
            LogTarget::File => {
                let path = config.file_path.as_ref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "file path required for file logging",
                    )
                })?;
                Box::new(BufWriter::new(File::create(path)?))
            }
        };
        Ok(Self {
            format: config.format,
            level: config.level,
            writer: Mutex::new(writer),
            start_time: Utc::now(),
        })
    }

    /// Logger that drops everything; used by tests.
    pub fn disabled() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: LogLevel::Error,
            writer: Mutex::new(Box::new(io::sink())),
            start_time: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    pub fn log(&self, event: LogEvent) {
        if event.level() < self.level {
            return;
        }
        let line = match self.format {
            LogFormat::Json => serde_json::to_string(&event).unwrap_or_default(),
            LogFormat::Logfmt => format_logfmt(&event),
            LogFormat::Pretty => format_pretty(&event),
        };
        let mut writer = self.writer.lock();
        // A dead log sink must not take the pipeline down with it.
        let _ = writeln!(writer, "{}", line);
        let _ = writer.flush();
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogEvent::Warn {
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>, details: Option<String>) {
        self.log(LogEvent::Error {
            message: message.into(),
            details,
        });
    }
}

fn format_logfmt(event: &LogEvent) -> String {
    let ts = Utc::now().to_rfc3339();
    match event {
        LogEvent::SourceInfo { entries } => {
            let fields: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k.replace(' ', "_").to_lowercase(), v))
                .collect();
            format!("ts=\"{}\" type=source_info {}", ts, fields.join(" "))
        }
        LogEvent::Overrun {
            dropped_since_last,
            dropped_total,
        } => format!(
            "ts=\"{}\" type=overrun dropped={} dropped_total={}",
            ts, dropped_since_last, dropped_total
        ),
        LogEvent::Progress {
            frames_read,
            frames_written,
            percent,
        } => match percent {
            Some(p) => format!(
                "ts=\"{}\" type=progress frames_read={} frames_written={} percent={:.1}",
                ts, frames_read, frames_written, p
            ),
            None => format!(
                "ts=\"{}\" type=progress frames_read={} frames_written={}",
                ts, frames_read, frames_written
            ),
        },
        LogEvent::Summary(s) => format!(
            "ts=\"{}\" type=summary duration_secs={:.2} frames_read={} frames_written={} bytes_written={} overruns_dropped={} cancelled={}",
            ts, s.duration_secs, s.frames_read, s.frames_written, s.bytes_written, s.overruns_dropped, s.cancelled
        ),
        LogEvent::Info { message } => format!("ts=\"{}\" level=info msg=\"{}\"", ts, message),
        LogEvent::Warn { message } => format!("ts=\"{}\" level=warn msg=\"{}\"", ts, message),
        LogEvent::Error { message, details } => match details {
            Some(d) => format!(
                "ts=\"{}\" level=error msg=\"{}\" details=\"{}\"",
                ts, message, d
            ),
            None => format!("ts=\"{}\" level=error msg=\"{}\"", ts, message),
        },
    }
}

fn format_pretty(event: &LogEvent) -> String {
    let ts = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match event {
        LogEvent::SourceInfo { entries } => {
            let fields: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect();
            format!("[{}] SOURCE: {}", ts, fields.join(" | "))
        }
        LogEvent::Overrun {
            dropped_since_last,
            dropped_total,
        } => format!(
            "[{}] OVERRUN: dropped {} packets ({} total)",
            ts, dropped_since_last, dropped_total
        ),
        LogEvent::Progress {
            frames_read,
            frames_written,
            percent,
        } => match percent {
            Some(p) => format!(
                "[{}] PROGRESS: {} in / {} out ({:.1}%)",
                ts, frames_read, frames_written, p
            ),
            None => format!("[{}] PROGRESS: {} in / {} out", ts, frames_read, frames_written),
        },
        LogEvent::Summary(s) => format!(
            "[{}] SUMMARY ({:.2}s): {} frames in, {} frames out, {} bytes written, {} dropped{}",
            ts,
            s.duration_secs,
            s.frames_read,
            s.frames_written,
            s.bytes_written,
            s.overruns_dropped,
            if s.cancelled { " (cancelled)" } else { "" }
        ),
        LogEvent::Info { message } => format!("[{}] INFO: {}", ts, message),
        LogEvent::Warn { message } => format!("[{}] WARN: {}", ts, message),
        LogEvent::Error { message, details } => match details {
            Some(d) => format!("[{}] ERROR: {} | {}", ts, message, d),
            None => format!("[{}] ERROR: {}", ts, message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_applies() {
        // Progress maps to debug and the default level is info.
        assert!(LogEvent::Progress {
            frames_read: 0,
            frames_written: 0,
            percent: None
        }
        .level() < default_level());
    }

    #[test]
    fn logfmt_summary_fields() {
        let line = format_logfmt(&LogEvent::Summary(SummaryEvent {
            timestamp: Utc::now(),
            duration_secs: 1.5,
            frames_read: 10,
            frames_written: 5,
            bytes_written: 20,
            overruns_dropped: 0,
            cancelled: false,
        }));
        assert!(line.contains("type=summary"));
        assert!(line.contains("frames_read=10"));
        assert!(line.contains("cancelled=false"));
    }

    #[test]
    fn json_roundtrips() {
        let event = LogEvent::Overrun {
            dropped_since_last: 3,
            dropped_total: 7,
        };
        let line = serde_json::to_string(&event).unwrap();
        let back: LogEvent = serde_json::from_str(&line).unwrap();
        match back {
            LogEvent::Overrun { dropped_total, .. } => assert_eq!(dropped_total, 7),
            _ => panic!("wrong variant"),
        }
    }
}
