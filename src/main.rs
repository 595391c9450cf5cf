//! Clasificar CLI
//!
//! Validates training configs and prints their per-epoch schedule. Training
//! itself is a library entry point, since model and data are supplied by the
//! caller.
//!
//! # Usage
//!
//! ```bash
//! # Validate config
//! clasificar validate hyp.yaml --detailed
//!
//! # Show the resolved plan of every epoch
//! clasificar plan hyp.yaml
//!
//! # Plan with overrides, as JSON
//! clasificar plan hyp.yaml --format json --epochs 50 --lr 0.02
//! ```

use clap::Parser;
use clasificar::config::{
    apply_overrides, load_spec, validate_config, Cli, Command, LossMode, OutputFormat, PlanArgs,
    TrainingConfig, ValidateArgs,
};
use clasificar::train::resolve_all;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Validate(args) => run_validate(args),
        Command::Plan(args) => run_plan(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise the flags pick the level
fn init_tracing(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_validate(args: ValidateArgs) -> Result<(), String> {
    tracing::info!("Validating config: {}", args.config.display());

    let spec = load_spec(&args.config).map_err(|e| format!("Config error: {e}"))?;
    let config = validate_config(&spec).map_err(|e| format!("Validation failed: {e}"))?;

    tracing::info!("Configuration is valid");

    if args.detailed {
        print_summary(&config);
    }
    Ok(())
}

fn print_summary(config: &TrainingConfig) {
    println!("Configuration Summary:");
    println!("  Image size: {}", config.image_size);
    println!("  Classes: {}", config.num_classes);
    println!();
    println!(
        "  Epochs: {} (warmup {}, augmentation until {})",
        config.epochs, config.warmup_epochs, config.aug_epoch
    );
    println!(
        "  Optimizer: {:?} (lr={}, final ratio={}, decay={:?})",
        config.optimizer, config.base_lr, config.final_lr_ratio, config.lr_decay
    );
    println!(
        "  Momentum: {} (warmup {})",
        config.momentum, config.warmup_momentum
    );
    println!("  Weight decay: {}", config.weight_decay);
    for (group, mult) in &config.layer_lr {
        println!("  Layer lr: {group} x{mult}");
    }
    println!();

    match config.loss {
        LossMode::CrossEntropy {
            label_smoothing,
            ohem,
        } => {
            println!("  Loss: cross_entropy (label smoothing {label_smoothing})");
            if let Some(ohem) = ohem {
                println!(
                    "    OHEM: min_kept={}, prob_threshold={}, ignore_index={}",
                    ohem.min_kept, ohem.prob_threshold, ohem.ignore_index
                );
            }
        }
        LossMode::BinaryCrossEntropy {
            label_smoothing,
            focal,
            multi_label,
            threshold,
        } => {
            println!(
                "  Loss: binary_cross_entropy (label smoothing {label_smoothing}, multi_label {multi_label}, threshold {threshold})"
            );
            if let Some(focal) = focal {
                println!("    Focal: alpha={}, gamma={}", focal.alpha, focal.gamma);
            }
        }
    }

    match &config.progressive {
        Some(schedule) => {
            println!("  Progressive stages:");
            for stage in schedule.stages() {
                println!(
                    "    [{}, {}): size x{}, mixup alpha {}",
                    stage.start, stage.end, stage.image_size_ratio, stage.mixup_alpha
                );
            }
        }
        None => println!("  Progressive learning: off"),
    }
    println!("  Mixup probability: {}", config.mixup_prob);

    match config.ema {
        Some(ema) => println!("  EMA: decay {} (tau {:?})", ema.decay, ema.tau),
        None => println!("  EMA: off"),
    }
    println!("  Seed: {}", config.seed);
}

fn run_plan(args: PlanArgs) -> Result<(), String> {
    let mut spec = load_spec(&args.config).map_err(|e| format!("Config error: {e}"))?;
    apply_overrides(&mut spec, &args);
    let config = validate_config(&spec).map_err(|e| format!("Validation failed: {e}"))?;

    let plans = resolve_all(&config);
    tracing::debug!(epochs = plans.len(), "resolved plans");

    match args.format {
        OutputFormat::Table => {
            println!(
                "{:>6}  {:<10}  {:>9}  {:>5}  {:>5}  {:>10}  {:>8}",
                "epoch", "phase", "size", "aug", "alpha", "lr", "momentum"
            );
            for plan in &plans {
                println!(
                    "{:>6}  {:<10}  {:>9}  {:>5}  {:>5.2}  {:>10.6}  {:>8.4}",
                    plan.epoch_index,
                    plan.phase.to_string(),
                    plan.image_size.to_string(),
                    plan.augmentation_enabled,
                    plan.mixup_alpha,
                    plan.lr,
                    plan.momentum
                );
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&plans)
                .map_err(|e| format!("JSON serialization error: {e}"))?;
            println!("{json}");
        }
    }
    Ok(())
}
