//! Application settings consumed when the logger starts.

use crate::errors::{StudioError, StudioResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type SettingsMap = BTreeMap<String, String>;

/// Supplies the application settings mapping.
pub trait SettingsProvider {
    fn get(&self) -> StudioResult<SettingsMap>;
}

/// Fixed settings held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: SettingsMap,
}

impl StaticSettings {
    pub fn new(values: SettingsMap) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SettingsProvider for StaticSettings {
    fn get(&self) -> StudioResult<SettingsMap> {
        Ok(self.values.clone())
    }
}

/// `key,value` CSV file with a header row. A missing file means no settings.
#[derive(Debug, Clone)]
pub struct CsvSettings {
    path: PathBuf,
}

impl CsvSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsProvider for CsvSettings {
    fn get(&self) -> StudioResult<SettingsMap> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "settings file absent, using empty settings");
            return Ok(SettingsMap::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| StudioError::settings(format!("cannot open {}: {e}", self.path.display())))?;

        let mut values = SettingsMap::new();
        for row in reader.records() {
            let row = row.map_err(|e| {
                StudioError::settings(format!("malformed row in {}: {e}", self.path.display()))
            })?;
            match (row.get(0), row.get(1)) {
                (Some(key), Some(value)) if !key.is_empty() => {
                    values.insert(key.to_string(), value.to_string());
                }
                (Some(key), None) if !key.is_empty() => {
                    values.insert(key.to_string(), String::new());
                }
                _ => {}
            }
        }

        Ok(values)
    }
}

/// Boolean-like reading of a settings value.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_csv_settings_reads_pairs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app_settings.csv");
        std::fs::write(&path, "key,value\nonline, True\nreplicate_username,peter942\n").unwrap();

        let settings = CsvSettings::new(&path).get().unwrap();
        assert_eq!(settings.get("online").map(String::as_str), Some("True"));
        assert_eq!(settings.get("replicate_username").map(String::as_str), Some("peter942"));
    }

    #[test]
    fn test_missing_csv_is_empty() {
        let dir = tempdir().unwrap();
        let settings = CsvSettings::new(dir.path().join("nope.csv")).get().unwrap();
        assert!(settings.is_empty());
    }

    #[test]
    fn test_truthy_values() {
        for v in ["true", "True", "1", "yes", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["false", "0", "", "no"] {
            assert!(!is_truthy(v), "{v}");
        }
    }
}
