//! # Clasificar: Epoch-Scheduled Classification Training
//!
//! Clasificar decides, for every epoch of an image-classification run, which
//! training behaviors are active and composes the loss accordingly.
//!
//! ## Architecture
//!
//! - **config**: Declarative YAML configuration, validated into an immutable `TrainingConfig`
//! - **optim**: Parameter groups, SGD/Adam, warmup + decay LR/momentum scheduler
//! - **train**: Stage resolution, mixup, loss composition, EMA, trainer and callbacks
//! - **io**: JSON checkpoints for resuming a run

pub mod config;
pub mod io;
pub mod optim;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use config::{load_config, TrainingConfig};
pub use error::{Error, Result};
pub use train::{resolve, EpochPlan, Trainer};
