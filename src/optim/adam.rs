//! Adam optimizer

use super::optimizer::{ensure_buffers, state_mismatch, Buffers, OptimizerState};
use super::{Optimizer, ParamGroup};
use crate::error::Result;
use ndarray::Array1;

/// Adam optimizer (Adaptive Moment Estimation)
///
/// The group's momentum is used as `beta1`, so the warmup momentum ramp
/// applies to Adam the same way it applies to SGD.
#[derive(Debug)]
pub struct Adam {
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Buffers, // First moment
    v: Buffers, // Second moment
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(beta2: f32, epsilon: f32) -> Self {
        Self {
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create Adam with default parameters
    pub fn default_params() -> Self {
        Self::new(0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn step(&mut self, groups: &mut [ParamGroup]) {
        ensure_buffers(&mut self.m, groups);
        ensure_buffers(&mut self.v, groups);
        self.t += 1;

        for (g, group) in groups.iter_mut().enumerate() {
            let beta1 = group.momentum;
            let (lr, weight_decay) = (group.lr, group.weight_decay);

            // Bias correction factors
            let lr_t = lr
                * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                    / (1.0 - beta1.powi(self.t as i32)).max(f32::EPSILON));

            for (i, param) in group.params.iter_mut().enumerate() {
                let Some(grad) = param.grad() else {
                    continue;
                };
                let grad = if weight_decay > 0.0 {
                    grad + &(param.data() * weight_decay)
                } else {
                    grad.clone()
                };

                // m_t = β1 * m_{t-1} + (1 - β1) * g
                let m_t = match &self.m[g][i] {
                    Some(m) => m * beta1 + &grad * (1.0 - beta1),
                    None => &grad * (1.0 - beta1),
                };

                // v_t = β2 * v_{t-1} + (1 - β2) * g²
                let grad_sq: Array1<f32> = &grad * &grad;
                let v_t = match &self.v[g][i] {
                    Some(v) => v * self.beta2 + &grad_sq * (1.0 - self.beta2),
                    None => &grad_sq * (1.0 - self.beta2),
                };

                // θ_t = θ_{t-1} - lr_t * m_t / (√v_t + ε)
                let update = &m_t / &(v_t.mapv(f32::sqrt) + self.epsilon) * lr_t;
                *param.data_mut() -= &update;

                self.m[g][i] = Some(m_t);
                self.v[g][i] = Some(v_t);
            }
        }
    }

    fn state(&self) -> OptimizerState {
        OptimizerState::Adam {
            t: self.t,
            m: self.m.clone(),
            v: self.v.clone(),
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> Result<()> {
        match state {
            OptimizerState::Adam { t, m, v } => {
                self.t = t;
                self.m = m;
                self.v = v;
                Ok(())
            }
            other => Err(state_mismatch("adam", &other)),
        }
    }
}
