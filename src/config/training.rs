//! Validated, immutable training configuration

use super::schema::{LrDecay, TrainSpec};
use super::validate::{validate_config, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default final learning rate as a fraction of the base rate
pub const DEFAULT_FINAL_LR_RATIO: f32 = 0.1;

/// Spatial resolution of a training batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

impl ImageSize {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Scale both sides by `ratio`, rounding and never collapsing below one pixel
    pub fn scaled(self, ratio: f32) -> Self {
        let scale = |side: usize| ((side as f32 * ratio).round() as usize).max(1);
        Self {
            height: scale(self.height),
            width: scale(self.width),
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// A progressive-learning stage covering epochs `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub start: usize,
    pub end: usize,
    pub image_size_ratio: f32,
    pub mixup_alpha: f32,
}

impl Stage {
    pub fn contains(&self, epoch: usize) -> bool {
        self.start <= epoch && epoch < self.end
    }
}

/// Ordered, disjoint, contiguous stages
///
/// Stage counts are small, so lookup is a linear scan. Epochs at or past the
/// end of the last stage belong to the clean tail and match no stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressiveSchedule {
    stages: Vec<Stage>,
}

impl ProgressiveSchedule {
    pub(crate) fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Three even stages over `[start, end)`, growing resolution and mixup strength
    pub(crate) fn derived(start: usize, end: usize) -> Self {
        const RATIOS: [f32; 3] = [0.5, 0.75, 1.0];
        const ALPHAS: [f32; 3] = [0.0, 0.1, 0.2];

        let span = (end - start) as f32;
        let nodes: Vec<usize> = (0..=3)
            .map(|k| start + (span * k as f32 / 3.0).round() as usize)
            .collect();

        let stages = (0..3)
            .map(|k| Stage {
                start: nodes[k],
                end: nodes[k + 1],
                image_size_ratio: RATIOS[k],
                mixup_alpha: ALPHAS[k],
            })
            .collect();
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// First epoch of the clean tail
    pub fn end(&self) -> usize {
        self.stages.last().map(|s| s.end).unwrap_or(0)
    }

    /// Stage containing `epoch`, or `None` in warmup and in the tail
    pub fn stage_at(&self, epoch: usize) -> Option<&Stage> {
        self.locate(epoch).map(|(_, stage)| stage)
    }

    /// Like [`stage_at`](Self::stage_at), also returning the stage's position
    pub fn locate(&self, epoch: usize) -> Option<(usize, &Stage)> {
        if epoch >= self.end() {
            return None;
        }
        self.stages.iter().enumerate().find(|(_, s)| s.contains(epoch))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhemConfig {
    pub min_kept: usize,
    pub prob_threshold: f32,
    /// Excluded label; negative sentinels such as -100 match no class
    pub ignore_index: i64,
}

impl OhemConfig {
    pub fn ignores(&self, class: usize) -> bool {
        i64::try_from(class).is_ok_and(|class| class == self.ignore_index)
    }
}

/// Optimizer with its algorithm-specific settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    /// Sharpness-aware minimization: the SGD step uses the gradient taken at
    /// `w + rho * g / ||g||`
    Sam { rho: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalConfig {
    pub alpha: f32,
    pub gamma: f32,
}

/// Supervision mode
///
/// Focal reweighting only exists under binary cross-entropy and hard-example
/// mining only under cross-entropy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LossMode {
    CrossEntropy {
        label_smoothing: f32,
        ohem: Option<OhemConfig>,
    },
    BinaryCrossEntropy {
        label_smoothing: f32,
        focal: Option<FocalConfig>,
        multi_label: bool,
        threshold: f32,
    },
}

impl LossMode {
    pub fn label_smoothing(&self) -> f32 {
        match *self {
            LossMode::CrossEntropy {
                label_smoothing, ..
            }
            | LossMode::BinaryCrossEntropy {
                label_smoothing, ..
            } => label_smoothing,
        }
    }

    pub fn is_cross_entropy(&self) -> bool {
        matches!(self, LossMode::CrossEntropy { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            LossMode::CrossEntropy { ohem: Some(_), .. } => "CrossEntropy+OHEM",
            LossMode::CrossEntropy { .. } => "CrossEntropy",
            LossMode::BinaryCrossEntropy { focal: Some(_), .. } => "BCE+Focal",
            LossMode::BinaryCrossEntropy { .. } => "BCE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaConfig {
    pub decay: f32,
    pub tau: Option<f32>,
}

/// Validated training configuration
///
/// Built once from a [`TrainSpec`] and shared read-only by every component.
/// The only way to obtain one is through validation:
///
/// ```compile_fail
/// let config: clasificar::TrainingConfig = serde_json::from_str("{}").unwrap();
/// ```
///
/// ```compile_fail
/// # use clasificar::config::*;
/// let config = TrainingConfig { epochs: 10, ..todo!() };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub struct TrainingConfig {
    pub epochs: usize,
    pub warmup_epochs: usize,
    pub aug_epoch: usize,
    pub image_size: ImageSize,
    pub num_classes: usize,
    pub base_lr: f32,
    pub final_lr_ratio: f32,
    pub momentum: f32,
    pub warmup_momentum: f32,
    pub weight_decay: f32,
    pub optimizer: OptimizerKind,
    pub lr_decay: LrDecay,
    pub layer_lr: BTreeMap<String, f32>,
    pub loss: LossMode,
    /// `None` when progressive learning is off
    pub progressive: Option<ProgressiveSchedule>,
    pub mixup_prob: f32,
    pub ema: Option<EmaConfig>,
    pub seed: u64,
}

impl TrainingConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let spec: TrainSpec =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        validate_config(&spec)
    }

    pub fn progressive_learning(&self) -> bool {
        self.progressive.is_some()
    }

    /// Learning-rate multiplier for a parameter group
    pub fn lr_multiplier(&self, group: &str) -> f32 {
        self.layer_lr.get(group).copied().unwrap_or(1.0)
    }
}

impl TryFrom<&TrainSpec> for TrainingConfig {
    type Error = ConfigError;

    fn try_from(spec: &TrainSpec) -> Result<Self, Self::Error> {
        validate_config(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(start: usize, end: usize, ratio: f32, alpha: f32) -> Stage {
        Stage {
            start,
            end,
            image_size_ratio: ratio,
            mixup_alpha: alpha,
        }
    }

    #[test]
    fn test_image_size_scaled() {
        let size = ImageSize::new(224, 160);
        assert_eq!(size.scaled(0.5), ImageSize::new(112, 80));
        assert_eq!(size.scaled(1.0), size);
        assert_eq!(ImageSize::new(1, 1).scaled(0.1), ImageSize::new(1, 1));
    }

    #[test]
    fn test_stage_lookup_is_left_closed_right_open() {
        let schedule = ProgressiveSchedule::new(vec![
            stage(3, 35, 0.5, 0.0),
            stage(35, 70, 0.75, 0.1),
            stage(70, 80, 1.0, 0.2),
        ]);

        assert!(schedule.stage_at(2).is_none());
        assert_eq!(schedule.stage_at(3).unwrap().image_size_ratio, 0.5);
        assert_eq!(schedule.stage_at(34).unwrap().image_size_ratio, 0.5);
        assert_eq!(schedule.stage_at(35).unwrap().image_size_ratio, 0.75);
        assert_eq!(schedule.stage_at(79).unwrap().mixup_alpha, 0.2);
        assert!(schedule.stage_at(80).is_none());
        assert_eq!(schedule.end(), 80);
    }

    #[test]
    fn test_derived_schedule_covers_window() {
        let schedule = ProgressiveSchedule::derived(3, 80);
        let stages = schedule.stages();

        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].start, 3);
        assert_eq!(stages[2].end, 80);
        for pair in stages.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(stages[0].mixup_alpha, 0.0);
        assert_eq!(stages[2].image_size_ratio, 1.0);
    }

    #[test]
    fn test_loss_mode_names() {
        let ce = LossMode::CrossEntropy {
            label_smoothing: 0.0,
            ohem: None,
        };
        let focal = LossMode::BinaryCrossEntropy {
            label_smoothing: 0.1,
            focal: Some(FocalConfig {
                alpha: 0.25,
                gamma: 2.0,
            }),
            multi_label: false,
            threshold: 0.5,
        };

        assert_eq!(ce.name(), "CrossEntropy");
        assert!(ce.is_cross_entropy());
        assert_eq!(focal.name(), "BCE+Focal");
        assert_eq!(focal.label_smoothing(), 0.1);
    }
}
