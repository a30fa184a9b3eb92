use crate::app_logger::LogRouter;
use crate::audit::{CallArg, LogKind};
use crate::audit_store::CsvAuditSink;
use crate::config_loader::AppConfig;
use crate::ml_processor::{
    package_training_images, InterrogateMode, MachineLearningProcessor, PromptTarget,
    ReplicateModel, ReplicateProcessor,
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level CLI for the studio logging and inference tools
#[derive(Parser)]
#[command(
    name = "studio_audit",
    version = "0.1.0",
    about = "Application logger and inference audit trail for the video studio"
)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print internal diagnostics
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a message through the application logger
    Log {
        #[arg(short, long, default_value = "info")]
        kind: LogKind,
        message: String,
    },

    /// Inspect the inference audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// Print the logging mode derived from app settings
    Mode,

    /// Run a hosted model with key=value inputs
    Predict {
        /// owner/name or owner/name:version
        #[arg(short, long)]
        model: String,
        #[arg(short, long = "input")]
        inputs: Vec<String>,
    },

    /// Inpaint an image under a mask
    Inpaint {
        #[arg(long)]
        image: String,
        #[arg(long)]
        mask: String,
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value = "")]
        negative_prompt: String,
    },

    /// Remove the background from an image (path or URL)
    RemoveBackground {
        #[arg(long)]
        image: String,
    },

    /// Describe an image as a prompt for the given Stable Diffusion version
    FindPrompt {
        #[arg(long)]
        image: String,
        /// "sd15" / "Stable Diffusion 1.5" or "sd2" / "Stable Diffusion 2"
        #[arg(long, default_value = "sd15")]
        target: PromptTarget,
        #[arg(long, default_value = "best")]
        mode: InterrogateMode,
    },

    /// Bundle training images into a zip
    PackageTraining {
        #[arg(short, long, default_value = "data.zip")]
        out: PathBuf,
        images: Vec<PathBuf>,
    },

    /// Upload a training zip and start a dreambooth job
    Train {
        #[arg(long)]
        zip: PathBuf,
        #[arg(long)]
        instance_prompt: String,
        #[arg(long)]
        class_prompt: String,
        #[arg(long, default_value_t = 2000)]
        max_train_steps: u32,
        #[arg(long)]
        model_name: String,
    },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// List recorded inference calls, newest last
    List {
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

pub fn dispatch(cli: Cli, config: &AppConfig, logger: Arc<LogRouter>) -> Result<()> {
    match cli.command {
        Commands::Log { kind, message } => {
            logger.emit(kind, message, None)?;
        }
        Commands::Audit {
            command: AuditCommands::List { limit },
        } => {
            let records = CsvAuditSink::new(&config.audit_csv_path).read_all()?;
            let skip = limit.map_or(0, |n| records.len().saturating_sub(n));
            for record in records.iter().skip(skip) {
                println!(
                    "{}\t{}\t{:.3}s\t{}\t{}",
                    record.created_on,
                    record.model_name,
                    record.total_inference_time,
                    record.model_version,
                    record.input_params
                );
            }
        }
        Commands::Mode => {
            println!("{}", logger.logging_mode());
        }
        Commands::Predict { model, inputs } => {
            let model = ReplicateModel::parse(&model)
                .ok_or_else(|| anyhow!("model must look like owner/name[:version], got '{model}'"))?;
            let inputs = inputs
                .iter()
                .map(|raw| parse_input_arg(raw))
                .collect::<Result<BTreeMap<_, _>>>()?;
            let processor = ReplicateProcessor::new(config.replicate.clone(), logger)?;
            print_output(&processor.predict_model_output(&model, inputs)?)?;
        }
        Commands::Inpaint {
            image,
            mask,
            prompt,
            negative_prompt,
        } => {
            let processor = ReplicateProcessor::new(config.replicate.clone(), logger)?;
            print_output(&processor.inpainting(&image, &mask, &prompt, &negative_prompt)?)?;
        }
        Commands::RemoveBackground { image } => {
            let processor = ReplicateProcessor::new(config.replicate.clone(), logger)?;
            print_output(&processor.remove_background(&image)?)?;
        }
        Commands::FindPrompt {
            image,
            target,
            mode,
        } => {
            let processor = ReplicateProcessor::new(config.replicate.clone(), logger)?;
            print_output(&processor.prompt_clip_interrogator(&image, target, mode)?)?;
        }
        Commands::PackageTraining { out, images } => {
            let count = package_training_images(&images, &out)?;
            logger.info(format!("packaged {count} training images into {}", out.display()))?;
        }
        Commands::Train {
            zip,
            instance_prompt,
            class_prompt,
            max_train_steps,
            model_name,
        } => {
            let processor = ReplicateProcessor::new(config.replicate.clone(), logger)?;
            let upload = processor.upload_training_data(&zip)?;
            let response = processor.dreambooth_training(
                &upload.serving_url,
                &instance_prompt,
                &class_prompt,
                max_train_steps,
                &model_name,
            )?;
            print_output(&response)?;
        }
    }
    Ok(())
}

/// Parse `key=value`. JSON values are taken as-is, existing paths become
/// file uploads, and anything else is a plain string.
pub fn parse_input_arg(raw: &str) -> Result<(String, CallArg)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("input '{raw}' is not key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("input '{raw}' has an empty key"));
    }

    let arg = match serde_json::from_str::<Value>(value) {
        Ok(json) => CallArg::from(&json),
        Err(_) if Path::new(value).is_file() => CallArg::File(PathBuf::from(value)),
        Err(_) => CallArg::from(value),
    };
    Ok((key.to_string(), arg))
}

fn print_output(output: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_and_plain_inputs() {
        assert_eq!(parse_input_arg("steps=25").unwrap(), ("steps".into(), CallArg::Int(25)));
        assert_eq!(
            parse_input_arg("prompt=a red fox").unwrap(),
            ("prompt".into(), CallArg::Str("a red fox".into()))
        );
        assert_eq!(
            parse_input_arg("invert_mask=true").unwrap().1,
            CallArg::Bool(true)
        );
        assert!(parse_input_arg("novalue").is_err());
        assert!(parse_input_arg("=x").is_err());
    }

    #[test]
    fn test_existing_path_becomes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, b"x").unwrap();

        let (_, arg) = parse_input_arg(&format!("image={}", path.display())).unwrap();
        assert_eq!(arg, CallArg::File(path));
    }

    #[test]
    fn test_cli_parses_log_command() {
        let cli = Cli::try_parse_from(["studio_audit", "log", "--kind", "error", "boom"]).unwrap();
        match cli.command {
            Commands::Log { kind, message } => {
                assert_eq!(kind, LogKind::Error);
                assert_eq!(message, "boom");
            }
            _ => panic!("expected log command"),
        }
    }

    #[test]
    fn test_cli_parses_find_prompt_command() {
        let cli = Cli::try_parse_from([
            "studio_audit",
            "find-prompt",
            "--image",
            "https://cdn/fox.png",
            "--target",
            "sd2",
        ])
        .unwrap();
        match cli.command {
            Commands::FindPrompt { image, target, mode } => {
                assert_eq!(image, "https://cdn/fox.png");
                assert_eq!(target, PromptTarget::StableDiffusion2);
                assert_eq!(mode, InterrogateMode::Best);
            }
            _ => panic!("expected find-prompt command"),
        }
    }
}
