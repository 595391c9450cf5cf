//! Epoch-scheduled training loop
//!
//! This module provides the training core:
//! - Stage resolution (`EpochPlan` per epoch)
//! - Mixup with coordinated randomness
//! - Loss composition (cross-entropy with OHEM, binary cross-entropy with focal)
//! - EMA of model weights
//! - Trainer, callbacks and per-epoch metrics records
//!
//! The model and the data pipeline are external; they plug in through
//! [`ClassifierModel`] and [`DataSource`].
//!
//! # Example
//!
//! ```no_run
//! use clasificar::config::TrainingConfig;
//! use clasificar::train::{resolve, resolve_all};
//!
//! let config = TrainingConfig::from_yaml_str(r#"
//! data: { image_size: [224, 224], num_classes: 10 }
//! hyp: { epochs: 30, warmup_epochs: 3, aug_epoch: 25, base_lr: 0.01, loss_mode: cross_entropy }
//! "#).unwrap();
//!
//! let plan = resolve(10, &config);
//! assert!(plan.augmentation_enabled);
//! assert_eq!(resolve_all(&config).len(), 30);
//! ```

mod batch;
mod boundary;
pub mod callback;
mod ema;
mod loss;
mod metrics;
mod mixup;
mod plan;
mod trainer;

pub use batch::{Batch, Targets};
pub use boundary::{ClassifierModel, DataSource, Mode};
pub use callback::{
    CallbackAction, CallbackManager, JsonlMetricsSink, MetricsHistory, ProgressLogger,
    TrainerCallback,
};
pub use ema::{EmaState, EmaTracker};
pub use loss::{LossComposer, LossTerms};
pub use metrics::{ClassCounts, ClassScores, DiagnosticCounts, Diagnostics, EpochRecord};
pub use mixup::{MixedBatch, MixedTargets, MixupController};
pub use plan::{resolve, resolve_all, EpochPlan, Phase};
pub use trainer::{TrainResult, Trainer};
