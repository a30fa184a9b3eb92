use crate::log_sink::LogLevel;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "studio.toml";
pub const DEFAULT_LOGGER_NAME: &str = "app_logger";
pub const DEFAULT_AUDIT_CSV: &str = "inference_log/inference_log.csv";
pub const DEFAULT_SETTINGS_CSV: &str = "settings/app_settings.csv";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicateConfig {
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_dreambooth_base_url")]
    pub dreambooth_base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_trainer_owner")]
    pub trainer_owner: String,
    #[serde(default = "default_trainer_version")]
    pub trainer_version: String,
    #[serde(default = "default_webhook_completed")]
    pub webhook_completed: String,
}

fn default_api_base_url() -> String {
    "https://api.replicate.com/v1".to_string()
}

fn default_dreambooth_base_url() -> String {
    "https://dreambooth-api-experimental.replicate.com/v1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_wait_secs() -> u64 {
    600
}

fn default_trainer_owner() -> String {
    "peter942".to_string()
}

fn default_trainer_version() -> String {
    "cd3f925f7ab21afaef7d45224790eedbb837eeac40d22e8fefe015489ab644aa".to_string()
}

fn default_webhook_completed() -> String {
    "https://example.com/dreambooth-webhook".to_string()
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        ReplicateConfig {
            api_token: String::new(),
            api_base_url: default_api_base_url(),
            dreambooth_base_url: default_dreambooth_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
            trainer_owner: default_trainer_owner(),
            trainer_version: default_trainer_version(),
            webhook_completed: default_webhook_completed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_logger_name")]
    pub logger_name: String,
    #[serde(default = "default_audit_csv")]
    pub audit_csv_path: PathBuf,
    #[serde(default = "default_settings_csv")]
    pub settings_csv_path: PathBuf,
    #[serde(default)]
    pub replicate: ReplicateConfig,
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_logger_name() -> String {
    DEFAULT_LOGGER_NAME.to_string()
}

fn default_audit_csv() -> PathBuf {
    PathBuf::from(DEFAULT_AUDIT_CSV)
}

fn default_settings_csv() -> PathBuf {
    PathBuf::from(DEFAULT_SETTINGS_CSV)
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_file: None,
            log_level: default_log_level(),
            logger_name: default_logger_name(),
            audit_csv_path: default_audit_csv(),
            settings_csv_path: default_settings_csv(),
            replicate: ReplicateConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parsed `log_level`; `load_config` has already rejected bad values.
    pub fn level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or(LogLevel::Debug)
    }
}

/// Defaults, then the TOML file, then `STUDIO_*` environment variables.
///
/// Nested keys use a double underscore, e.g. `STUDIO_REPLICATE__API_TOKEN`.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, figment::Error> {
    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let figment = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("STUDIO_").split("__"));

    let config: AppConfig = figment.extract()?;

    if let Err(e) = config.log_level.parse::<LogLevel>() {
        return Err(figment::Error::from(format!("log_level: {e}")));
    }

    if config.replicate.poll_interval_ms == 0 {
        return Err(figment::Error::from(
            "replicate.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(config)
}
