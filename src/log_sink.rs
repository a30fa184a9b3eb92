// log_sink.rs
// Purpose: Output channels for the application logger (colored console, plain file)

use crate::errors::{SafeLock, StudioError, StudioResult};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const ANSI_RESET: &str = "\x1b[0m";

/// LogLevel classifies the severity of log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// ANSI prefix used by the console channel.
    fn color(&self) -> &'static str {
        match self {
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Warning => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
            // red on white
            LogLevel::Critical => "\x1b[31;47m",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// An independent destination for formatted log lines.
///
/// Channels never share state; a failure in one has no effect on the others.
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Format and write a single line at the given severity.
    fn write_line(&self, level: LogLevel, message: &str) -> StudioResult<()>;
}

/// Colorized `<SEVERITY>:<logger-name>:<message>` lines, stderr by default.
pub struct ConsoleChannel {
    logger_name: String,
    colored: bool,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleChannel {
    pub fn stderr(logger_name: impl Into<String>) -> Self {
        Self::with_writer(logger_name, Box::new(io::stderr()), true)
    }

    pub fn with_writer(
        logger_name: impl Into<String>,
        writer: Box<dyn Write + Send>,
        colored: bool,
    ) -> Self {
        Self {
            logger_name: logger_name.into(),
            colored,
            writer: Mutex::new(writer),
        }
    }

    pub fn format_line(&self, level: LogLevel, message: &str) -> String {
        if self.colored {
            format!(
                "{}{}:{}:{}{}",
                level.color(),
                level.as_str(),
                self.logger_name,
                message,
                ANSI_RESET
            )
        } else {
            format!("{}:{}:{}", level.as_str(), self.logger_name, message)
        }
    }
}

impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn write_line(&self, level: LogLevel, message: &str) -> StudioResult<()> {
        let line = self.format_line(level, message);
        let mut writer = self.writer.safe_lock("console_channel")?;
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| StudioError::channel_write(self.name(), e))
    }
}

/// Plain `<timestamp> - <SEVERITY> - <message>` lines appended to a file.
pub struct FileChannel {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileChannel {
    /// Open (or create) the log file in append mode.
    ///
    /// Fails with `StudioError::Configuration` when the path is not writable.
    pub fn open(path: impl AsRef<Path>) -> StudioResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StudioError::configuration(path.display().to_string(), e))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format_line(level: LogLevel, message: &str) -> String {
        format!(
            "{} - {} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            level.as_str(),
            message
        )
    }
}

impl Channel for FileChannel {
    fn name(&self) -> &str {
        "file"
    }

    fn write_line(&self, level: LogLevel, message: &str) -> StudioResult<()> {
        let line = Self::format_line(level, message);
        let mut file = self.file.safe_lock("file_channel")?;
        writeln!(file, "{line}")
            .and_then(|_| file.flush())
            .map_err(|e| StudioError::channel_write(self.name(), e))
    }
}

/// In-memory writer that can be handed to a [`ConsoleChannel`] and read back.
#[doc(hidden)]
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
