use crate::audit::InferenceRecord;
use crate::errors::{StudioError, StudioResult};
use std::fs::{create_dir_all, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Append-only store for inference records.
///
/// The logger calls `append` exactly once per inference event and never
/// coordinates concurrent writers; implementations that may be shared across
/// processes must make a single append atomic themselves.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &InferenceRecord) -> io::Result<()>;
}

/// CSV audit trail. The header row is written when the file is first created.
#[derive(Debug, Clone)]
pub struct CsvAuditSink {
    path: PathBuf,
}

impl CsvAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back in insertion order. A missing file is an empty trail.
    pub fn read_all(&self) -> StudioResult<Vec<InferenceRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| StudioError::io("opening audit trail", io::Error::from(e)))?;

        reader
            .deserialize::<InferenceRecord>()
            .map(|row| row.map_err(|e| StudioError::io("reading audit row", io::Error::from(e))))
            .collect()
    }
}

impl AuditSink for CsvAuditSink {
    fn append(&self, record: &InferenceRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }

        let needs_header = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;

        debug!(path = %self.path.display(), model = %record.model_name, "appended inference record");
        Ok(())
    }
}

/// In-process audit trail, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<InferenceRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InferenceRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &InferenceRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::other("memory audit sink poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
