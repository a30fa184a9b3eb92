// audit.rs
// Log categories, the persisted inference record, and call-argument shaping

use crate::errors::{StudioError, StudioResult};
use crate::log_sink::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Closed set of log categories accepted by the application logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Debug,
    Info,
    Error,
    InferenceCall,
    InferenceResult,
}

impl LogKind {
    pub const ALL: [LogKind; 5] = [
        LogKind::Debug,
        LogKind::Info,
        LogKind::Error,
        LogKind::InferenceCall,
        LogKind::InferenceResult,
    ];

    pub fn is_inference(&self) -> bool {
        matches!(self, LogKind::InferenceCall | LogKind::InferenceResult)
    }

    /// Severity used on the console/file channels. Inference events go out at info.
    pub fn severity(&self) -> LogLevel {
        match self {
            LogKind::Debug => LogLevel::Debug,
            LogKind::Error => LogLevel::Error,
            LogKind::Info | LogKind::InferenceCall | LogKind::InferenceResult => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Debug => "debug",
            LogKind::Info => "info",
            LogKind::Error => "error",
            LogKind::InferenceCall => "inference_call",
            LogKind::InferenceResult => "inference_result",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().replace('-', "_").as_str() {
            "debug" => Ok(LogKind::Debug),
            "info" => Ok(LogKind::Info),
            "error" => Ok(LogKind::Error),
            "inference_call" => Ok(LogKind::InferenceCall),
            "inference_result" => Ok(LogKind::InferenceResult),
            other => Err(format!("unknown log kind '{other}'")),
        }
    }
}

/// Shape of one row in the inference audit trail. Field order is column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub model_name: String,
    pub model_version: String,
    /// Seconds, never negative.
    pub total_inference_time: f64,
    /// JSON object text of the shaped call arguments.
    pub input_params: String,
    /// Seconds since the Unix epoch.
    pub created_on: i64,
}

impl InferenceRecord {
    pub fn new(
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        time_taken: Duration,
        input_params: String,
        created_on: i64,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: model_version.into(),
            total_inference_time: time_taken.as_secs_f64(),
            input_params,
            created_on,
        }
    }

    /// Parse `input_params` back into a JSON value.
    pub fn input_params_json(&self) -> StudioResult<Value> {
        serde_json::from_str(&self.input_params)
            .map_err(|e| StudioError::serialization("parsing input_params", e))
    }
}

/// A single log request. `data` is present exactly when `kind` is an inference kind.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    kind: LogKind,
    message: String,
    data: Option<InferenceRecord>,
}

impl LogEntry {
    /// Build an entry, rejecting payloads that break the kind/data pairing.
    pub fn new(
        kind: LogKind,
        message: impl Into<String>,
        data: Option<InferenceRecord>,
    ) -> StudioResult<Self> {
        let entry = Self {
            kind,
            message: message.into(),
            data,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check the kind/data pairing.
    pub fn validate(&self) -> StudioResult<()> {
        match (self.kind.is_inference(), self.data.is_some()) {
            (false, true) => Err(StudioError::invalid_payload(
                self.kind.as_str(),
                "structured data is only accepted for inference entries",
            )),
            (true, false) => Err(StudioError::invalid_payload(
                self.kind.as_str(),
                "inference entries require an inference record",
            )),
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&InferenceRecord> {
        self.data.as_ref()
    }
}

/// Capability tag of a call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Scalar,
    String,
    Sequence,
    Mapping,
    /// Anything that cannot be written to the audit trail (files, buffers, handles, null).
    Opaque,
}

/// Argument passed to a hosted model call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<CallArg>),
    Map(BTreeMap<String, CallArg>),
    /// Local file that gets uploaded with the request.
    File(PathBuf),
    /// In-memory buffer (e.g. an encoded image).
    Bytes(Vec<u8>),
    /// Any other live object, described for diagnostics only.
    Handle(String),
}

impl CallArg {
    pub fn tag(&self) -> ValueTag {
        match self {
            CallArg::Bool(_) | CallArg::Int(_) => ValueTag::Scalar,
            CallArg::Float(f) if f.is_finite() => ValueTag::Scalar,
            CallArg::Str(_) => ValueTag::String,
            CallArg::List(_) => ValueTag::Sequence,
            CallArg::Map(_) => ValueTag::Mapping,
            CallArg::Float(_)
            | CallArg::Null
            | CallArg::File(_)
            | CallArg::Bytes(_)
            | CallArg::Handle(_) => ValueTag::Opaque,
        }
    }

    pub fn is_serializable(&self) -> bool {
        self.tag() != ValueTag::Opaque
    }

    /// JSON form of the argument, or `None` when it is opaque.
    /// Opaque children of sequences and mappings are dropped.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            CallArg::Bool(b) => Some(Value::Bool(*b)),
            CallArg::Int(i) => Some(Value::from(*i)),
            CallArg::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
            CallArg::Str(s) => Some(Value::String(s.clone())),
            CallArg::List(items) => Some(Value::Array(
                items.iter().filter_map(CallArg::to_json).collect(),
            )),
            CallArg::Map(entries) => Some(Value::Object(shape_call_args(entries))),
            CallArg::Null | CallArg::File(_) | CallArg::Bytes(_) | CallArg::Handle(_) => None,
        }
    }
}

impl From<bool> for CallArg {
    fn from(value: bool) -> Self {
        CallArg::Bool(value)
    }
}

impl From<i64> for CallArg {
    fn from(value: i64) -> Self {
        CallArg::Int(value)
    }
}

impl From<i32> for CallArg {
    fn from(value: i32) -> Self {
        CallArg::Int(i64::from(value))
    }
}

impl From<u32> for CallArg {
    fn from(value: u32) -> Self {
        CallArg::Int(i64::from(value))
    }
}

impl From<f64> for CallArg {
    fn from(value: f64) -> Self {
        CallArg::Float(value)
    }
}

impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        CallArg::Str(value.to_string())
    }
}

impl From<String> for CallArg {
    fn from(value: String) -> Self {
        CallArg::Str(value)
    }
}

impl From<PathBuf> for CallArg {
    fn from(value: PathBuf) -> Self {
        CallArg::File(value)
    }
}

impl<T: Into<CallArg>> From<Vec<T>> for CallArg {
    fn from(values: Vec<T>) -> Self {
        CallArg::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<&Value> for CallArg {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => CallArg::Null,
            Value::Bool(b) => CallArg::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CallArg::Int(i),
                None => CallArg::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => CallArg::Str(s.clone()),
            Value::Array(items) => CallArg::List(items.iter().map(CallArg::from).collect()),
            Value::Object(map) => CallArg::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), CallArg::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Keep only the serializable call arguments.
///
/// Filtering happens on the tags before anything is serialized, so the
/// returned map always serializes.
pub fn shape_call_args(args: &BTreeMap<String, CallArg>) -> Map<String, Value> {
    args.iter()
        .filter(|(_, value)| value.is_serializable())
        .filter_map(|(key, value)| value.to_json().map(|json| (key.clone(), json)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: Vec<(&str, CallArg)>) -> BTreeMap<String, CallArg> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_opaque_values_are_dropped() {
        let shaped = shape_call_args(&args(vec![
            ("image", CallArg::File(PathBuf::from("frame_001.png"))),
            ("steps", CallArg::Int(25)),
        ]));
        assert_eq!(Value::Object(shaped), json!({"steps": 25}));
    }

    #[test]
    fn test_nested_opaque_values_are_dropped() {
        let mut inner = BTreeMap::new();
        inner.insert("buffer".to_string(), CallArg::Bytes(vec![1, 2, 3]));
        inner.insert("strength".to_string(), CallArg::Float(0.75));

        let shaped = shape_call_args(&args(vec![
            ("opts", CallArg::Map(inner)),
            (
                "prompts",
                CallArg::List(vec!["a".into(), CallArg::Handle("stream".into()), "b".into()]),
            ),
            ("negative_prompt", CallArg::Null),
            ("invert_mask", CallArg::Bool(true)),
        ]));

        assert_eq!(
            Value::Object(shaped),
            json!({
                "opts": {"strength": 0.75},
                "prompts": ["a", "b"],
                "invert_mask": true
            })
        );
    }

    #[test]
    fn test_non_finite_floats_are_opaque() {
        assert_eq!(CallArg::Float(f64::NAN).tag(), ValueTag::Opaque);
        assert_eq!(CallArg::Float(f64::INFINITY).to_json(), None);
        assert_eq!(CallArg::Float(1.5).tag(), ValueTag::Scalar);
    }

    #[test]
    fn test_entry_payload_pairing() {
        let record = InferenceRecord::new("m", "v", Duration::from_millis(10), "{}".into(), 0);

        assert!(LogEntry::new(LogKind::Info, "hello", None).is_ok());
        assert!(LogEntry::new(LogKind::InferenceCall, "x", Some(record.clone())).is_ok());

        for kind in [LogKind::Debug, LogKind::Info, LogKind::Error] {
            let err = LogEntry::new(kind, "x", Some(record.clone())).unwrap_err();
            assert!(matches!(err, StudioError::InvalidPayload { .. }));
        }
        assert!(LogEntry::new(LogKind::InferenceResult, "x", None).is_err());
    }

    #[test]
    fn test_hand_built_entry_is_rejected_by_router() {
        use crate::app_logger::LogRouter;
        use crate::audit_store::MemoryAuditSink;
        use crate::log_sink::{CaptureBuffer, ConsoleChannel};
        use crate::settings::StaticSettings;
        use std::sync::Arc;

        let buffer = CaptureBuffer::new();
        let sink = MemoryAuditSink::new();
        let logger = LogRouter::builder()
            .console(ConsoleChannel::with_writer("app_logger", Box::new(buffer.clone()), false))
            .audit_sink(Arc::new(sink.clone()))
            .build(&StaticSettings::empty())
            .unwrap();

        let entry = LogEntry {
            kind: LogKind::Debug,
            message: "plain".to_string(),
            data: Some(InferenceRecord::new("m", "v", Duration::ZERO, "{}".into(), 0)),
        };

        let result = logger.emit_entry(&entry);
        assert!(matches!(result, Err(StudioError::InvalidPayload { .. })));
        assert!(buffer.contents().is_empty());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_kind_parsing_and_severity() {
        assert_eq!("inference-call".parse::<LogKind>().unwrap(), LogKind::InferenceCall);
        assert_eq!(LogKind::InferenceResult.severity(), LogLevel::Info);
        assert_eq!(LogKind::Error.severity(), LogLevel::Error);
        assert!("trace".parse::<LogKind>().is_err());
    }
}
