//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! clasificar validate hyp.yaml --detailed
//! clasificar plan hyp.yaml
//! clasificar plan hyp.yaml --format json --epochs 50
//! ```

use super::schema::TrainSpec;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Epoch-scheduled training strategies for image classification
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "clasificar")]
#[command(version)]
#[command(about = "Validate training configs and inspect their per-epoch schedule")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate a configuration file
    Validate(ValidateArgs),

    /// Print the resolved plan for every epoch
    Plan(PlanArgs),
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Show a configuration summary
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the plan command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct PlanArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// Override number of epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override base learning rate
    #[arg(short, long)]
    pub lr: Option<f32>,
}

/// Output format for the plan command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Invalid output format: {s}. Valid formats: table, json"
            )),
        }
    }
}

/// Parse command line arguments
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides to a TrainSpec before validation
pub fn apply_overrides(spec: &mut TrainSpec, args: &PlanArgs) {
    if let Some(epochs) = args.epochs {
        spec.hyp.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        spec.hyp.base_lr = lr;
    }
}
