// studio_audit - main.rs
// Bootstrap: config, diagnostics, application logger, command dispatch

use clap::Parser;
use std::process::exit;
use std::sync::Arc;
use studio_audit::app_logger::LogRouter;
use studio_audit::cli::{dispatch, Cli};
use studio_audit::config_loader::load_config;
use studio_audit::errors::StudioError;
use studio_audit::settings::CsvSettings;
use tracing::Level;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            exit(1);
        }
    };

    let settings = CsvSettings::new(&config.settings_csv_path);

    let logger = match LogRouter::from_config(&config, &settings) {
        Ok(logger) => logger,
        Err(StudioError::Configuration { path, .. }) => {
            // console-only fallback; the failure was already printed on the console channel
            tracing::warn!(%path, "continuing without file logging");
            let mut console_only = config.clone();
            console_only.log_file = None;
            match LogRouter::from_config(&console_only, &settings) {
                Ok(logger) => logger,
                Err(e) => {
                    eprintln!("Failed to start logger: {e}");
                    exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to start logger: {e}");
            exit(1);
        }
    };

    let logger = Arc::new(logger);
    if let Err(e) = dispatch(cli, &config, Arc::clone(&logger)) {
        let _ = logger.error(format!("{e:#}"));
        exit(1);
    }
}
