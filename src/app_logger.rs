//! Application logger: routes classified log requests to the output channels
//! and, for inference events, to the audit trail.
//!
//! The router owns its channels and its logging mode. It does not own the
//! audit sink, which is shared and append-only, nor the settings source,
//! which is read once during construction.
//!
//! Delivery for inference kinds is ordered: console/file first, audit sink
//! second. A failed append therefore never hides the console/file line.

use crate::audit::{shape_call_args, CallArg, InferenceRecord, LogEntry, LogKind};
use crate::audit_store::{AuditSink, CsvAuditSink};
use crate::config_loader::{AppConfig, DEFAULT_AUDIT_CSV, DEFAULT_LOGGER_NAME};
use crate::errors::{StudioError, StudioResult};
use crate::log_sink::{Channel, ConsoleChannel, FileChannel, LogLevel};
use crate::runtime_config::LoggingMode;
use crate::settings::SettingsProvider;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct LogRouter {
    name: String,
    min_level: LogLevel,
    channels: Vec<Box<dyn Channel>>,
    audit_sink: Arc<dyn AuditSink>,
    mode: LoggingMode,
    last_created_on: AtomicI64,
}

impl LogRouter {
    /// Build a router with a colored stderr console channel and, when
    /// `log_file` is given, a file channel.
    pub fn initialize(
        log_file: Option<&Path>,
        settings: &dyn SettingsProvider,
        audit_sink: Arc<dyn AuditSink>,
    ) -> StudioResult<Self> {
        let mut builder = Self::builder().audit_sink(audit_sink);
        if let Some(path) = log_file {
            builder = builder.log_file(path);
        }
        builder.build(settings)
    }

    /// Build a router from the loaded application config.
    pub fn from_config(config: &AppConfig, settings: &dyn SettingsProvider) -> StudioResult<Self> {
        let mut builder = Self::builder()
            .name(config.logger_name.clone())
            .level(config.level())
            .audit_sink(Arc::new(CsvAuditSink::new(&config.audit_csv_path)));
        if let Some(path) = &config.log_file {
            builder = builder.log_file(path);
        }
        builder.build(settings)
    }

    pub fn builder() -> LogRouterBuilder {
        LogRouterBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logging_mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver a log request.
    ///
    /// Non-inference kinds must not carry `data`; inference kinds must.
    /// A rejected request produces no output at all.
    pub fn emit(
        &self,
        kind: LogKind,
        message: impl Into<String>,
        data: Option<InferenceRecord>,
    ) -> StudioResult<()> {
        let entry = LogEntry::new(kind, message, data)?;
        self.emit_entry(&entry)
    }

    /// Deliver a prepared entry. The kind/data pairing is checked again here.
    pub fn emit_entry(&self, entry: &LogEntry) -> StudioResult<()> {
        entry.validate()?;
        let channel_result = self.write_channels(entry.kind().severity(), entry.message());

        if let Some(record) = entry.data() {
            self.audit_sink
                .append(record)
                .map_err(|e| StudioError::audit_write("appending inference record", e))?;
        }

        channel_result
    }

    pub fn debug(&self, message: impl Into<String>) -> StudioResult<()> {
        self.emit(LogKind::Debug, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> StudioResult<()> {
        self.emit(LogKind::Info, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> StudioResult<()> {
        self.emit(LogKind::Error, message, None)
    }

    /// Record a hosted model call in the audit trail.
    ///
    /// Opaque arguments (files, buffers, live handles) are dropped before
    /// the remaining arguments are serialized.
    pub fn log_model_inference(
        &self,
        model_name: &str,
        model_version: &str,
        time_taken: Duration,
        call_kwargs: &BTreeMap<String, CallArg>,
    ) -> StudioResult<()> {
        let input_params = Value::Object(shape_call_args(call_kwargs)).to_string();
        let record = InferenceRecord::new(
            model_name,
            model_version,
            time_taken,
            input_params,
            self.next_created_on(),
        );

        self.emit(LogKind::InferenceCall, "logging inference data", Some(record))
    }

    /// Wall-clock seconds, never earlier than a previously issued value.
    fn next_created_on(&self) -> i64 {
        let now = Utc::now().timestamp();
        let previous = self.last_created_on.fetch_max(now, Ordering::SeqCst);
        now.max(previous)
    }

    fn write_channels(&self, level: LogLevel, message: &str) -> StudioResult<()> {
        if level < self.min_level {
            return Ok(());
        }

        let mut first_failure = None;
        for channel in &self.channels {
            if let Err(e) = channel.write_line(level, message) {
                warn!(channel = channel.name(), error = %e, "log channel write failed");
                first_failure.get_or_insert(e);
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct LogRouterBuilder {
    name: String,
    min_level: LogLevel,
    console: Option<ConsoleChannel>,
    log_file: Option<PathBuf>,
    extra_channels: Vec<Box<dyn Channel>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
}

impl Default for LogRouterBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOGGER_NAME.to_string(),
            min_level: LogLevel::Debug,
            console: None,
            log_file: None,
            extra_channels: Vec::new(),
            audit_sink: None,
        }
    }
}

impl LogRouterBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Replace the default stderr console channel.
    pub fn console(mut self, console: ConsoleChannel) -> Self {
        self.console = Some(console);
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.extra_channels.push(channel);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Construct the router, reading `settings` exactly once.
    ///
    /// The console channel is created before the file channel and does not
    /// depend on it; an unusable log file is reported on the console and then
    /// returned as `StudioError::Configuration`.
    pub fn build(self, settings: &dyn SettingsProvider) -> StudioResult<LogRouter> {
        let console = match self.console {
            Some(console) => console,
            None => ConsoleChannel::stderr(self.name.clone()),
        };

        let file = match &self.log_file {
            Some(path) => match FileChannel::open(path) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    // console is independent of the file channel
                    let _ = console.write_line(LogLevel::Error, &e.to_string());
                    return Err(e);
                }
            },
            None => None,
        };

        let mode = LoggingMode::from_settings(&settings.get()?);

        let mut channels: Vec<Box<dyn Channel>> = vec![Box::new(console)];
        if let Some(file) = file {
            channels.push(Box::new(file));
        }
        channels.extend(self.extra_channels);

        let audit_sink = match self.audit_sink {
            Some(sink) => sink,
            None => Arc::new(CsvAuditSink::new(DEFAULT_AUDIT_CSV)),
        };

        tracing::debug!(logger = %self.name, mode = %mode, channels = channels.len(), "logger initialized");

        Ok(LogRouter {
            name: self.name,
            min_level: self.min_level,
            channels,
            audit_sink,
            mode,
            last_created_on: AtomicI64::new(i64::MIN),
        })
    }
}
