//! Declarative YAML configuration
//!
//! A training run is described once, validated at load time and then shared
//! read-only by every component.
//!
//! # Example
//!
//! ```yaml
//! seed: 42
//!
//! data:
//!   image_size: [224, 224]
//!   num_classes: 5
//!
//! hyp:
//!   epochs: 100
//!   warmup_epochs: 3
//!   aug_epoch: 80
//!   base_lr: 0.01
//!   loss_mode: cross_entropy
//!   label_smoothing: 0.1
//!   strategy:
//!     progressive_learning: true
//!     ohem: { enabled: true, min_kept: 8, prob_threshold: 0.7 }
//!
//! ema:
//!   decay: 0.9999
//! ```

mod cli;
mod load;
mod schema;
mod training;
mod validate;

#[cfg(test)]
mod tests;

pub use cli::{apply_overrides, parse_args, Cli, Command, OutputFormat, PlanArgs, ValidateArgs};
pub use load::{load_config, load_spec};
pub use schema::{
    DataSpec, EmaSpec, FocalSpec, HypSpec, LossModeKind, LrDecay, OhemSpec, OptimizerName,
    StageSpec, StrategySpec, TrainSpec,
};
pub use training::{
    EmaConfig, FocalConfig, ImageSize, LossMode, OhemConfig, OptimizerKind, ProgressiveSchedule,
    Stage, TrainingConfig, DEFAULT_FINAL_LR_RATIO,
};
pub use validate::{validate_config, ConfigError};
