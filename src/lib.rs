//! Library root for the `studio_audit` crate
//!
//! Application logging and inference audit trail for the video studio, plus
//! the hosted-model call site that feeds it.

// Core error handling
pub mod errors;

// Configuration & settings
pub mod config_loader;
pub mod runtime_config;
pub mod settings;

// Logging & audit
pub mod app_logger;
pub mod audit;
pub mod audit_store;
pub mod log_sink;

// Hosted inference
pub mod ml_processor;

// CLI
pub mod cli;

#[cfg(test)]
mod tests {
    pub mod test_utils;
    pub mod router_delivery;
}

pub use app_logger::{LogRouter, LogRouterBuilder};
pub use audit::{CallArg, InferenceRecord, LogEntry, LogKind};
pub use audit_store::{AuditSink, CsvAuditSink, MemoryAuditSink};
pub use errors::{StudioError, StudioResult};
pub use runtime_config::LoggingMode;
pub use settings::{CsvSettings, SettingsProvider, StaticSettings};
