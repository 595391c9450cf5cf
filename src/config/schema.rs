//! YAML schema definitions for declarative training configuration
//!
//! These are the raw, unvalidated shapes read from disk. They are turned into
//! a [`TrainingConfig`](super::TrainingConfig) by [`validate_config`](super::validate_config).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete training specification as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSpec {
    /// Seed shared by every replica for mixup draws
    #[serde(default)]
    pub seed: u64,

    /// Input data description
    pub data: DataSpec,

    /// Hyperparameters and strategy
    pub hyp: HypSpec,

    /// Exponential moving average of weights
    #[serde(default)]
    pub ema: EmaSpec,
}

/// Input geometry and label space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSpec {
    /// Full training resolution as `[height, width]`
    pub image_size: [usize; 2],

    /// Number of output classes
    pub num_classes: usize,
}

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypSpec {
    /// Total number of epochs, warmup included
    pub epochs: usize,

    /// Epochs of linear lr/momentum warmup
    #[serde(default)]
    pub warmup_epochs: usize,

    /// First epoch trained without augmentation
    pub aug_epoch: usize,

    /// Peak learning rate reached at the end of warmup
    pub base_lr: f32,

    /// Final learning rate as a fraction of `base_lr` (0.1 when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_lr_ratio: Option<f32>,

    #[serde(default = "default_momentum")]
    pub momentum: f32,

    #[serde(default = "default_warmup_momentum")]
    pub warmup_momentum: f32,

    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,

    #[serde(default)]
    pub optimizer: OptimizerName,

    /// Neighbourhood radius of sharpness-aware minimization
    #[serde(default = "default_sam_rho")]
    pub sam_rho: f32,

    #[serde(default)]
    pub lr_decay: LrDecay,

    /// Learning-rate multiplier per parameter group name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layer_lr: BTreeMap<String, f32>,

    pub loss_mode: LossModeKind,

    #[serde(default)]
    pub label_smoothing: f32,

    /// Samples may carry several positive classes (BCE only)
    #[serde(default)]
    pub multi_label: bool,

    /// Decision threshold for BCE diagnostics
    #[serde(default = "default_bce_threshold")]
    pub bce_threshold: f32,

    #[serde(default)]
    pub strategy: StrategySpec,
}

/// Regularisation and sample-weighting strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    #[serde(default)]
    pub progressive_learning: bool,

    /// Explicit stages; derived from the augmentation window when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progressive_stages: Vec<StageSpec>,

    /// Probability that a batch is mixed when the stage alpha is non-zero
    #[serde(default = "default_mixup_prob")]
    pub mixup_prob: f32,

    #[serde(default)]
    pub focal: FocalSpec,

    #[serde(default)]
    pub ohem: OhemSpec,
}

impl Default for StrategySpec {
    fn default() -> Self {
        Self {
            progressive_learning: false,
            progressive_stages: Vec::new(),
            mixup_prob: default_mixup_prob(),
            focal: FocalSpec::default(),
            ohem: OhemSpec::default(),
        }
    }
}

/// One progressive-learning stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// `[start, end)` in absolute epochs
    pub epoch_range: [usize; 2],
    pub image_size_ratio: f32,
    #[serde(default)]
    pub mixup_alpha: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocalSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_focal_alpha")]
    pub alpha: f32,
    #[serde(default = "default_focal_gamma")]
    pub gamma: f32,
}

impl Default for FocalSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            alpha: default_focal_alpha(),
            gamma: default_focal_gamma(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhemSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_kept")]
    pub min_kept: usize,
    #[serde(default = "default_prob_threshold")]
    pub prob_threshold: f32,
    /// Class label excluded from the loss; negative values exclude nothing
    #[serde(default = "default_ignore_index")]
    pub ignore_index: i64,
}

impl Default for OhemSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            min_kept: default_min_kept(),
            prob_threshold: default_prob_threshold(),
            ignore_index: default_ignore_index(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ema_decay")]
    pub decay: f32,
    /// Ramp constant; the decay is fixed when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tau: Option<f32>,
}

impl Default for EmaSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            decay: default_ema_decay(),
            tau: None,
        }
    }
}

/// Loss family selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossModeKind {
    CrossEntropy,
    BinaryCrossEntropy,
}

/// Optimizer selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerName {
    #[default]
    Sgd,
    Adam,
    /// Sharpness-aware minimization over an SGD base step
    Sam,
}

/// Shape of the post-warmup learning-rate decay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrDecay {
    #[default]
    Cosine,
    Linear,
}

fn default_true() -> bool {
    true
}

fn default_momentum() -> f32 {
    0.937
}

fn default_warmup_momentum() -> f32 {
    0.8
}

fn default_weight_decay() -> f32 {
    5e-4
}

fn default_bce_threshold() -> f32 {
    0.5
}

fn default_mixup_prob() -> f32 {
    1.0
}

fn default_focal_alpha() -> f32 {
    0.25
}

fn default_focal_gamma() -> f32 {
    2.0
}

fn default_sam_rho() -> f32 {
    0.05
}

fn default_min_kept() -> usize {
    16
}

fn default_prob_threshold() -> f32 {
    0.7
}

fn default_ignore_index() -> i64 {
    255
}

fn default_ema_decay() -> f32 {
    0.9999
}
