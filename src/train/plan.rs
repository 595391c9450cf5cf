//! Per-epoch strategy resolution
//!
//! [`resolve`] maps an epoch index to the full set of behaviors active in
//! that epoch. It reads the configuration only, so every replica and every
//! data-loading worker derives the same plan for the same epoch.

use crate::config::{ImageSize, TrainingConfig};
use crate::optim::WarmupDecayCurve;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which part of the schedule an epoch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Linear lr/momentum ramp on clean, full-resolution data
    Warmup,
    /// Inside progressive stage `stage` (0-based)
    Progressive { stage: usize },
    /// Augmented training without progressive learning
    Augmented,
    /// Clean tail: no augmentation, no mixup, full resolution
    Clean,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Warmup => write!(f, "warmup"),
            Phase::Progressive { stage } => write!(f, "stage {stage}"),
            Phase::Augmented => write!(f, "augmented"),
            Phase::Clean => write!(f, "clean"),
        }
    }
}

/// Behaviors active during one epoch
///
/// Recomputed at the start of every epoch and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochPlan {
    pub epoch_index: usize,
    pub phase: Phase,
    pub is_warmup: bool,
    pub image_size: ImageSize,
    pub image_size_ratio: f32,
    pub augmentation_enabled: bool,
    /// 0 disables mixup
    pub mixup_alpha: f32,
    pub lr: f32,
    pub momentum: f32,
}

impl EpochPlan {
    pub fn mixup_enabled(&self) -> bool {
        self.mixup_alpha > 0.0
    }

    /// True when the data-facing behaviors differ from `other`
    ///
    /// Learning rate and momentum change every epoch and are not compared.
    pub fn strategy_changed(&self, other: &EpochPlan) -> bool {
        self.phase != other.phase
            || self.image_size != other.image_size
            || self.augmentation_enabled != other.augmentation_enabled
            || self.mixup_alpha != other.mixup_alpha
    }
}

/// Resolve the plan for `epoch_index`
///
/// Epochs at or beyond `config.epochs` are outside the schedule; the result
/// for them is the clean tail with the final learning rate.
pub fn resolve(epoch_index: usize, config: &TrainingConfig) -> EpochPlan {
    let is_warmup = epoch_index < config.warmup_epochs;
    let curve = WarmupDecayCurve::from_config(config);

    let (phase, image_size_ratio, augmentation_enabled, mixup_alpha) = if is_warmup {
        (Phase::Warmup, 1.0, false, 0.0)
    } else {
        match &config.progressive {
            None if epoch_index < config.aug_epoch => (Phase::Augmented, 1.0, true, 0.0),
            None => (Phase::Clean, 1.0, false, 0.0),
            // Past the last stage the tail wins, whatever the stage table says.
            Some(schedule) => match schedule.locate(epoch_index) {
                Some((index, stage)) if epoch_index < config.aug_epoch => (
                    Phase::Progressive { stage: index },
                    stage.image_size_ratio,
                    true,
                    stage.mixup_alpha,
                ),
                _ => (Phase::Clean, 1.0, false, 0.0),
            },
        }
    };

    EpochPlan {
        epoch_index,
        phase,
        is_warmup,
        image_size: config.image_size.scaled(image_size_ratio),
        image_size_ratio,
        augmentation_enabled,
        mixup_alpha,
        lr: curve.lr_at(epoch_index),
        momentum: curve.momentum_at(epoch_index),
    }
}

/// Plans for every epoch of the run
pub fn resolve_all(config: &TrainingConfig) -> Vec<EpochPlan> {
    (0..config.epochs).map(|e| resolve(e, config)).collect()
}
