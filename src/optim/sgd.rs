//! Stochastic Gradient Descent optimizer

use super::optimizer::{ensure_buffers, state_mismatch, Buffers, OptimizerState};
use super::{Optimizer, ParamGroup};
use crate::error::Result;

/// SGD optimizer with momentum and L2 weight decay
///
/// Momentum and learning rate are taken from each group on every step.
#[derive(Debug, Default)]
pub struct SGD {
    velocities: Buffers,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for SGD {
    fn step(&mut self, groups: &mut [ParamGroup]) {
        ensure_buffers(&mut self.velocities, groups);

        for (g, group) in groups.iter_mut().enumerate() {
            let (lr, momentum, weight_decay) = (group.lr, group.momentum, group.weight_decay);

            for (i, param) in group.params.iter_mut().enumerate() {
                let Some(grad) = param.grad() else {
                    continue;
                };
                let grad = if weight_decay > 0.0 {
                    grad + &(param.data() * weight_decay)
                } else {
                    grad.clone()
                };

                if momentum > 0.0 {
                    // v = momentum * v - lr * grad
                    let velocity = match &self.velocities[g][i] {
                        Some(v) => v * momentum - &grad * lr,
                        None => &grad * (-lr),
                    };
                    *param.data_mut() += &velocity;
                    self.velocities[g][i] = Some(velocity);
                } else {
                    *param.data_mut() -= &(&grad * lr);
                }
            }
        }
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Sgd {
            velocities: self.velocities.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Sgd { velocities } => {
                self.velocities = velocities;
                Ok(())
            }
            other => Err(state_mismatch("sgd", &other)),
        }
    }
}
