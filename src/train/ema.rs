//! Exponential moving average of model weights

use crate::config::EmaConfig;
use crate::error::Result;
use crate::optim::{check_layout, snapshot_weights, GroupWeights, ParamGroup};
use serde::{Deserialize, Serialize};

/// Persisted EMA state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaState {
    pub updates: u64,
    pub shadow: Vec<GroupWeights>,
}

/// Shadow copy of the trainable weights
///
/// `update` must be called exactly once per optimizer step, after the step
/// has been applied:
///
/// shadow ← decay · shadow + (1 - decay) · weights
///
/// With `tau` set, the decay ramps up as `decay · (1 - exp(-updates / tau))`
/// so early updates follow the live weights closely.
#[derive(Debug, Clone)]
pub struct EmaTracker {
    decay: f32,
    tau: Option<f32>,
    state: EmaState,
}

impl EmaTracker {
    /// Start tracking from the current weights of `groups`
    pub fn new(config: EmaConfig, groups: &[ParamGroup]) -> Self {
        Self {
            decay: config.decay,
            tau: config.tau,
            state: EmaState {
                updates: 0,
                shadow: snapshot_weights(groups),
            },
        }
    }

    /// Resume from a persisted state
    pub fn from_state(config: EmaConfig, state: EmaState) -> Self {
        Self {
            decay: config.decay,
            tau: config.tau,
            state,
        }
    }

    pub fn updates(&self) -> u64 {
        self.state.updates
    }

    /// Decay used by update number `updates` (1-based)
    pub fn decay_for(&self, updates: u64) -> f32 {
        match self.tau {
            Some(tau) => self.decay * (1.0 - (-(updates as f32) / tau).exp()),
            None => self.decay,
        }
    }

    /// Fold the freshly stepped weights into the shadow
    pub fn update(&mut self, groups: &[ParamGroup]) -> Result<()> {
        check_layout(groups, &self.state.shadow)?;

        self.state.updates += 1;
        let d = self.decay_for(self.state.updates);
        for (group, shadow) in groups.iter().zip(self.state.shadow.iter_mut()) {
            for (param, s) in group.params.iter().zip(shadow.params.iter_mut()) {
                s.zip_mut_with(param.data(), |s, &w| *s = d * *s + (1.0 - d) * w);
            }
        }
        Ok(())
    }

    /// Read-only view of the shadow weights
    pub fn shadow(&self) -> &[GroupWeights] {
        &self.state.shadow
    }

    /// Copy of the full state for checkpointing and export
    pub fn snapshot(&self) -> EmaState {
        self.state.clone()
    }
}
