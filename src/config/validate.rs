//! Configuration validation
//!
//! Turns a raw [`TrainSpec`] into a [`TrainingConfig`], failing fast on the
//! first invalid or contradictory field.

use super::schema::{LossModeKind, OptimizerName, StageSpec, TrainSpec};
use super::training::{
    EmaConfig, FocalConfig, ImageSize, LossMode, OhemConfig, OptimizerKind, ProgressiveSchedule,
    Stage, TrainingConfig, DEFAULT_FINAL_LR_RATIO,
};

/// Validation error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("hyp.epochs: must be > 0")]
    InvalidEpochs,

    #[error("hyp.aug_epoch: {aug_epoch} exceeds epochs {epochs}")]
    AugEpochOutOfRange { aug_epoch: usize, epochs: usize },

    #[error("hyp.warmup_epochs: {warmup_epochs} must be smaller than epochs {epochs}")]
    WarmupTooLong { warmup_epochs: usize, epochs: usize },

    #[error("{field}: {value} {reason}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        reason: &'static str,
    },

    #[error("data.image_size: {0:?} must be positive on both sides")]
    InvalidImageSize([usize; 2]),

    #[error("data.num_classes: must be > 0")]
    InvalidNumClasses,

    #[error("hyp.strategy.focal: focal reweighting requires loss_mode binary_cross_entropy")]
    FocalRequiresBce,

    #[error("hyp.strategy.ohem: hard example mining requires loss_mode cross_entropy")]
    OhemRequiresCe,

    #[error("hyp.multi_label: multi-label targets require loss_mode binary_cross_entropy")]
    MultiLabelRequiresBce,

    #[error("hyp.strategy.ohem.min_kept: must be > 0")]
    InvalidMinKept,

    #[error("hyp.strategy.progressive_stages: stages given but progressive_learning is false")]
    StagesWithoutProgressive,

    #[error("hyp.strategy.progressive_stages[{index}]: {reason}")]
    InvalidStage { index: usize, reason: String },

    #[error("hyp.strategy.progressive_stages[{first}] overlaps progressive_stages[{second}]")]
    OverlappingStages { first: usize, second: usize },

    #[error("hyp.strategy.progressive_stages: {0}")]
    StageCoverage(String),

    #[error("hyp.layer_lr.{group}: multiplier {value} must be finite and > 0")]
    InvalidLayerMultiplier { group: String, value: f32 },

    #[error("hyp.layer_lr.{0}: no parameter group with this name")]
    UnknownParamGroup(String),
}

fn check(
    ok: bool,
    field: &'static str,
    value: f32,
    reason: &'static str,
) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            reason,
        })
    }
}

/// Validate a training specification
///
/// Checks:
/// - Epoch windows are consistent (warmup < epochs, aug_epoch <= epochs)
/// - Numeric values are in valid ranges
/// - Loss-mode-specific strategies match the loss mode
/// - Progressive stages are disjoint and cover `[warmup_epochs, aug_epoch)`
pub fn validate_config(spec: &TrainSpec) -> Result<TrainingConfig, ConfigError> {
    let hyp = &spec.hyp;
    let strategy = &hyp.strategy;

    if hyp.epochs == 0 {
        return Err(ConfigError::InvalidEpochs);
    }
    if hyp.aug_epoch > hyp.epochs {
        return Err(ConfigError::AugEpochOutOfRange {
            aug_epoch: hyp.aug_epoch,
            epochs: hyp.epochs,
        });
    }
    if hyp.warmup_epochs >= hyp.epochs {
        return Err(ConfigError::WarmupTooLong {
            warmup_epochs: hyp.warmup_epochs,
            epochs: hyp.epochs,
        });
    }

    let [height, width] = spec.data.image_size;
    if height == 0 || width == 0 {
        return Err(ConfigError::InvalidImageSize(spec.data.image_size));
    }
    if spec.data.num_classes == 0 {
        return Err(ConfigError::InvalidNumClasses);
    }

    check(
        hyp.base_lr.is_finite() && hyp.base_lr > 0.0,
        "hyp.base_lr",
        hyp.base_lr,
        "must be > 0",
    )?;
    let final_lr_ratio = hyp.final_lr_ratio.unwrap_or(DEFAULT_FINAL_LR_RATIO);
    check(
        final_lr_ratio > 0.0 && final_lr_ratio <= 1.0,
        "hyp.final_lr_ratio",
        final_lr_ratio,
        "must be in (0, 1]",
    )?;
    check(
        (0.0..1.0).contains(&hyp.momentum),
        "hyp.momentum",
        hyp.momentum,
        "must be in [0, 1)",
    )?;
    check(
        (0.0..1.0).contains(&hyp.warmup_momentum),
        "hyp.warmup_momentum",
        hyp.warmup_momentum,
        "must be in [0, 1)",
    )?;
    check(
        hyp.weight_decay.is_finite() && hyp.weight_decay >= 0.0,
        "hyp.weight_decay",
        hyp.weight_decay,
        "must be >= 0",
    )?;
    check(
        (0.0..1.0).contains(&hyp.label_smoothing),
        "hyp.label_smoothing",
        hyp.label_smoothing,
        "must be in [0, 1)",
    )?;
    check(
        (0.0..=1.0).contains(&strategy.mixup_prob),
        "hyp.strategy.mixup_prob",
        strategy.mixup_prob,
        "must be in [0, 1]",
    )?;

    for (group, &value) in &hyp.layer_lr {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::InvalidLayerMultiplier {
                group: group.clone(),
                value,
            });
        }
    }

    let optimizer = match hyp.optimizer {
        OptimizerName::Sgd => OptimizerKind::Sgd,
        OptimizerName::Adam => OptimizerKind::Adam,
        OptimizerName::Sam => {
            check(
                hyp.sam_rho.is_finite() && hyp.sam_rho > 0.0,
                "hyp.sam_rho",
                hyp.sam_rho,
                "must be > 0",
            )?;
            OptimizerKind::Sam { rho: hyp.sam_rho }
        }
    };

    let loss = validate_loss(spec)?;
    let progressive = validate_progressive(spec)?;

    let ema = if spec.ema.enabled {
        check(
            spec.ema.decay > 0.0 && spec.ema.decay < 1.0,
            "ema.decay",
            spec.ema.decay,
            "must be in (0, 1)",
        )?;
        if let Some(tau) = spec.ema.tau {
            check(tau.is_finite() && tau > 0.0, "ema.tau", tau, "must be > 0")?;
        }
        Some(EmaConfig {
            decay: spec.ema.decay,
            tau: spec.ema.tau,
        })
    } else {
        None
    };

    Ok(TrainingConfig {
        epochs: hyp.epochs,
        warmup_epochs: hyp.warmup_epochs,
        aug_epoch: hyp.aug_epoch,
        image_size: ImageSize::new(height, width),
        num_classes: spec.data.num_classes,
        base_lr: hyp.base_lr,
        final_lr_ratio,
        momentum: hyp.momentum,
        warmup_momentum: hyp.warmup_momentum,
        weight_decay: hyp.weight_decay,
        optimizer,
        lr_decay: hyp.lr_decay,
        layer_lr: hyp.layer_lr.clone(),
        loss,
        progressive,
        mixup_prob: strategy.mixup_prob,
        ema,
        seed: spec.seed,
    })
}

fn validate_loss(spec: &TrainSpec) -> Result<LossMode, ConfigError> {
    let hyp = &spec.hyp;
    let strategy = &hyp.strategy;

    match hyp.loss_mode {
        LossModeKind::CrossEntropy => {
            if strategy.focal.enabled {
                return Err(ConfigError::FocalRequiresBce);
            }
            if hyp.multi_label {
                return Err(ConfigError::MultiLabelRequiresBce);
            }

            let ohem = if strategy.ohem.enabled {
                let ohem = &strategy.ohem;
                if ohem.min_kept == 0 {
                    return Err(ConfigError::InvalidMinKept);
                }
                check(
                    (0.0..=1.0).contains(&ohem.prob_threshold),
                    "hyp.strategy.ohem.prob_threshold",
                    ohem.prob_threshold,
                    "must be in [0, 1]",
                )?;
                Some(OhemConfig {
                    min_kept: ohem.min_kept,
                    prob_threshold: ohem.prob_threshold,
                    ignore_index: ohem.ignore_index,
                })
            } else {
                None
            };

            Ok(LossMode::CrossEntropy {
                label_smoothing: hyp.label_smoothing,
                ohem,
            })
        }
        LossModeKind::BinaryCrossEntropy => {
            if strategy.ohem.enabled {
                return Err(ConfigError::OhemRequiresCe);
            }
            check(
                hyp.bce_threshold > 0.0 && hyp.bce_threshold < 1.0,
                "hyp.bce_threshold",
                hyp.bce_threshold,
                "must be in (0, 1)",
            )?;

            let focal = if strategy.focal.enabled {
                let focal = &strategy.focal;
                check(
                    focal.alpha.is_finite() && focal.alpha >= 0.0,
                    "hyp.strategy.focal.alpha",
                    focal.alpha,
                    "must be >= 0",
                )?;
                check(
                    focal.gamma.is_finite() && focal.gamma >= 0.0,
                    "hyp.strategy.focal.gamma",
                    focal.gamma,
                    "must be >= 0",
                )?;
                Some(FocalConfig {
                    alpha: focal.alpha,
                    gamma: focal.gamma,
                })
            } else {
                None
            };

            Ok(LossMode::BinaryCrossEntropy {
                label_smoothing: hyp.label_smoothing,
                focal,
                multi_label: hyp.multi_label,
                threshold: hyp.bce_threshold,
            })
        }
    }
}

fn validate_progressive(spec: &TrainSpec) -> Result<Option<ProgressiveSchedule>, ConfigError> {
    let hyp = &spec.hyp;
    let strategy = &hyp.strategy;

    if !strategy.progressive_learning {
        if !strategy.progressive_stages.is_empty() {
            return Err(ConfigError::StagesWithoutProgressive);
        }
        return Ok(None);
    }

    if strategy.progressive_stages.is_empty() {
        if hyp.aug_epoch < hyp.warmup_epochs + 3 {
            return Err(ConfigError::StageCoverage(format!(
                "window [{}, {}) is too short to derive three stages",
                hyp.warmup_epochs, hyp.aug_epoch
            )));
        }
        return Ok(Some(ProgressiveSchedule::derived(
            hyp.warmup_epochs,
            hyp.aug_epoch,
        )));
    }

    let stages = strategy
        .progressive_stages
        .iter()
        .enumerate()
        .map(|(index, s)| validate_stage(index, s))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, a) in stages.iter().enumerate() {
        for (j, b) in stages.iter().enumerate().skip(i + 1) {
            if a.start < b.end && b.start < a.end {
                return Err(ConfigError::OverlappingStages {
                    first: i,
                    second: j,
                });
            }
        }
    }

    for (i, pair) in stages.windows(2).enumerate() {
        if pair[0].end != pair[1].start {
            return Err(ConfigError::StageCoverage(format!(
                "progressive_stages[{}] ends at {} but progressive_stages[{}] starts at {}",
                i,
                pair[0].end,
                i + 1,
                pair[1].start
            )));
        }
    }

    let first = stages[0].start;
    let last = stages[stages.len() - 1].end;
    if first != hyp.warmup_epochs || last != hyp.aug_epoch {
        return Err(ConfigError::StageCoverage(format!(
            "stages cover [{}, {}) but must cover [warmup_epochs, aug_epoch) = [{}, {})",
            first, last, hyp.warmup_epochs, hyp.aug_epoch
        )));
    }

    Ok(Some(ProgressiveSchedule::new(stages)))
}

fn validate_stage(index: usize, stage: &StageSpec) -> Result<Stage, ConfigError> {
    let [start, end] = stage.epoch_range;
    let invalid = |reason: String| ConfigError::InvalidStage { index, reason };

    if start >= end {
        return Err(invalid(format!("epoch_range [{start}, {end}) is empty")));
    }
    if !(stage.image_size_ratio > 0.0 && stage.image_size_ratio <= 1.0) {
        return Err(invalid(format!(
            "image_size_ratio {} must be in (0, 1]",
            stage.image_size_ratio
        )));
    }
    if !(stage.mixup_alpha.is_finite() && stage.mixup_alpha >= 0.0) {
        return Err(invalid(format!(
            "mixup_alpha {} must be >= 0",
            stage.mixup_alpha
        )));
    }

    Ok(Stage {
        start,
        end,
        image_size_ratio: stage.image_size_ratio,
        mixup_alpha: stage.mixup_alpha,
    })
}
