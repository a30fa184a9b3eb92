// Runtime logging mode, fixed once when the logger is built
use crate::settings::{is_truthy, SettingsMap};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingMode {
    Online,
    Offline,
}

impl LoggingMode {
    pub fn value(&self) -> &'static str {
        match self {
            LoggingMode::Online => "online",
            LoggingMode::Offline => "offline",
        }
    }

    /// Derive the mode from application settings.
    ///
    /// A truthy `online` key selects `Offline`. This mapping is inverted
    /// relative to the key name and is kept as-is pending product confirmation.
    pub fn from_settings(settings: &SettingsMap) -> Self {
        match settings.get("online") {
            Some(value) if is_truthy(value) => LoggingMode::Offline,
            _ => LoggingMode::Online,
        }
    }
}

impl fmt::Display for LoggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> SettingsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_absent_key_is_online() {
        assert_eq!(LoggingMode::from_settings(&settings(&[])), LoggingMode::Online);
    }

    #[test]
    fn test_truthy_online_key_selects_offline() {
        assert_eq!(
            LoggingMode::from_settings(&settings(&[("online", "true")])),
            LoggingMode::Offline
        );
        assert_eq!(
            LoggingMode::from_settings(&settings(&[("online", "false")])),
            LoggingMode::Online
        );
    }
}
