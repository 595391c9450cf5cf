//! Learning rate and momentum schedulers

use super::ParamGroup;
use crate::config::{LrDecay, TrainingConfig};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Get the current momentum
    fn get_momentum(&self) -> f32;

    /// Step the scheduler (called once at the end of each epoch)
    fn step(&mut self);
}

/// Values written to the parameter groups for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledValues {
    pub lr: f32,
    pub momentum: f32,
}

/// Warmup-then-decay curve
///
/// During warmup the learning rate ramps linearly from 0 to `base_lr` and
/// momentum from `warmup_momentum` to `momentum`. Afterwards the learning
/// rate decays from `base_lr` at `warmup_epochs` to `base_lr * final_lr_ratio`
/// at `epochs - 1`, either along a half cosine or a straight line.
///
/// Formula (cosine): lr_e = lr_min + 0.5 * (base_lr - lr_min) * (1 + cos(π * p))
///
/// Where:
/// - p = (e - warmup_epochs) / (epochs - 1 - warmup_epochs)
/// - lr_min = base_lr * final_lr_ratio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmupDecayCurve {
    base_lr: f32,
    final_lr_ratio: f32,
    warmup_epochs: usize,
    epochs: usize,
    momentum: f32,
    warmup_momentum: f32,
    decay: LrDecay,
}

impl WarmupDecayCurve {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            base_lr: config.base_lr,
            final_lr_ratio: config.final_lr_ratio,
            warmup_epochs: config.warmup_epochs,
            epochs: config.epochs,
            momentum: config.momentum,
            warmup_momentum: config.warmup_momentum,
            decay: config.lr_decay,
        }
    }

    /// Learning rate at `epoch`, a pure function of the epoch index
    pub fn lr_at(&self, epoch: usize) -> f32 {
        if epoch < self.warmup_epochs {
            return self.base_lr * epoch as f32 / self.warmup_epochs as f32;
        }

        let span = self.epochs.saturating_sub(1 + self.warmup_epochs);
        if span == 0 {
            return self.base_lr;
        }

        let progress = ((epoch - self.warmup_epochs) as f32 / span as f32).min(1.0);
        let lr_min = self.base_lr * self.final_lr_ratio;
        let factor = match self.decay {
            LrDecay::Cosine => 0.5 * (1.0 + (PI * progress).cos()),
            LrDecay::Linear => 1.0 - progress,
        };
        lr_min + (self.base_lr - lr_min) * factor
    }

    /// Momentum at `epoch`
    pub fn momentum_at(&self, epoch: usize) -> f32 {
        if epoch < self.warmup_epochs {
            let t = epoch as f32 / self.warmup_epochs as f32;
            self.warmup_momentum + (self.momentum - self.warmup_momentum) * t
        } else {
            self.momentum
        }
    }

    pub fn values_at(&self, epoch: usize) -> ScheduledValues {
        ScheduledValues {
            lr: self.lr_at(epoch),
            momentum: self.momentum_at(epoch),
        }
    }
}

/// Epoch-counting scheduler driven by the training loop
///
/// The only state is the epoch counter, so restoring it from a checkpoint
/// reproduces the curve of an uninterrupted run.
#[derive(Debug, Clone)]
pub struct WarmupDecayLR {
    curve: WarmupDecayCurve,
    current_epoch: usize,
}

impl WarmupDecayLR {
    pub fn new(curve: WarmupDecayCurve) -> Self {
        Self {
            curve,
            current_epoch: 0,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(WarmupDecayCurve::from_config(config))
    }

    pub fn curve(&self) -> &WarmupDecayCurve {
        &self.curve
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Restore the counter when resuming
    pub fn set_epoch(&mut self, epoch: usize) {
        self.current_epoch = epoch;
    }

    /// Write the current values into every group, scaling lr by the group multiplier
    pub fn apply(&self, groups: &mut [ParamGroup]) -> ScheduledValues {
        let values = self.curve.values_at(self.current_epoch);
        for group in groups {
            group.lr = values.lr * group.lr_mult;
            group.momentum = values.momentum;
        }
        values
    }
}

impl LRScheduler for WarmupDecayLR {
    fn get_lr(&self) -> f32 {
        self.curve.lr_at(self.current_epoch)
    }

    fn get_momentum(&self) -> f32 {
        self.curve.momentum_at(self.current_epoch)
    }

    fn step(&mut self) {
        self.current_epoch += 1;
    }
}
