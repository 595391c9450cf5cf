//! Optimizer trait

use super::{Adam, ParamGroup, SGD};
use crate::config::{OptimizerKind, TrainingConfig};
use crate::error::{Error, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Per-parameter buffers, indexed `[group][param]`
pub type Buffers = Vec<Vec<Option<Array1<f32>>>>;

/// Serializable optimizer state for checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerState {
    Sgd { velocities: Buffers },
    Adam { t: u64, m: Buffers, v: Buffers },
}

impl OptimizerState {
    pub fn kind(&self) -> &'static str {
        match self {
            OptimizerState::Sgd { .. } => "sgd",
            OptimizerState::Adam { .. } => "adam",
        }
    }

    fn buffers(&self) -> Vec<(&'static str, &Buffers)> {
        match self {
            OptimizerState::Sgd { velocities } => vec![("velocities", velocities)],
            OptimizerState::Adam { m, v, .. } => vec![("m", m), ("v", v)],
        }
    }

    /// Fail unless every stored buffer fits the tensors of `groups`
    ///
    /// Empty buffers belong to an optimizer that has not stepped yet and fit
    /// any model.
    pub fn check_layout(&self, groups: &[ParamGroup]) -> Result<()> {
        for (name, buffers) in self.buffers() {
            if buffers.is_empty() {
                continue;
            }
            if buffers.len() != groups.len() {
                return Err(Error::Checkpoint(format!(
                    "optimizer {name} cover {} parameter groups, the model has {}",
                    buffers.len(),
                    groups.len()
                )));
            }
            for (group, stored) in groups.iter().zip(buffers) {
                if stored.len() != group.params.len() {
                    return Err(Error::Checkpoint(format!(
                        "optimizer {name} of group '{}' hold {} tensors, the group has {}",
                        group.name,
                        stored.len(),
                        group.params.len()
                    )));
                }
                for (i, (param, buffer)) in group.params.iter().zip(stored).enumerate() {
                    if let Some(buffer) = buffer.as_ref().filter(|b| b.len() != param.len()) {
                        return Err(Error::Checkpoint(format!(
                            "optimizer {name} of '{}'[{i}] has length {}, the parameter has {}",
                            group.name,
                            buffer.len(),
                            param.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Trait for optimization algorithms
///
/// Learning rate and momentum are read from each [`ParamGroup`], which the
/// scheduler rewrites every epoch.
pub trait Optimizer: Send {
    /// Perform a single optimization step
    fn step(&mut self, groups: &mut [ParamGroup]);

    /// Zero out all gradients
    fn zero_grad(&mut self, groups: &mut [ParamGroup]) {
        for group in groups {
            group.zero_grad();
        }
    }

    /// Snapshot the internal buffers
    fn state(&self) -> OptimizerState;

    /// Restore buffers from a snapshot
    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}

/// Shape `buffers` to match `groups`, keeping existing entries
pub(crate) fn ensure_buffers(buffers: &mut Buffers, groups: &[ParamGroup]) {
    let fits = buffers.len() == groups.len()
        && buffers
            .iter()
            .zip(groups)
            .all(|(b, g)| b.len() == g.params.len());
    if !fits {
        *buffers = groups.iter().map(|g| vec![None; g.params.len()]).collect();
    }
}

pub(crate) fn state_mismatch(expected: &str, got: &OptimizerState) -> Error {
    Error::Checkpoint(format!(
        "optimizer state is {} but the run uses {expected}",
        got.kind()
    ))
}

/// Build the optimizer selected by `hyp.optimizer`
///
/// SAM steps with SGD; its ascent pass is driven by the trainer.
pub fn build_optimizer(config: &TrainingConfig) -> Box<dyn Optimizer> {
    match config.optimizer {
        OptimizerKind::Sgd | OptimizerKind::Sam { .. } => Box::new(SGD::new()),
        OptimizerKind::Adam => Box::new(Adam::default_params()),
    }
}
