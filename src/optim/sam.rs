//! Sharpness-aware minimization
//!
//! SAM evaluates the gradient twice per step. The first gradient `g` picks
//! the ascent point `w + rho * g / ||g||`; the gradient taken there is then
//! applied by the base optimizer to the original weights `w`.

use super::{Buffers, ParamGroup};

/// Global L2 norm of all gradients in `groups`
pub fn grad_norm(groups: &[ParamGroup]) -> f32 {
    groups
        .iter()
        .flat_map(|g| g.params.iter())
        .filter_map(|p| p.grad())
        .map(|grad| grad.iter().map(|x| x * x).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}

/// Weights saved before moving to the ascent point
///
/// Parameters without a gradient are not moved.
#[derive(Debug)]
pub struct SamPerturbation {
    saved: Buffers,
}

impl SamPerturbation {
    /// Move every parameter with a gradient by `rho * g / ||g||`
    pub fn ascend(groups: &mut [ParamGroup], rho: f32) -> Self {
        let scale = rho / (grad_norm(groups) + 1e-12);

        let saved = groups
            .iter_mut()
            .map(|group| {
                group
                    .params
                    .iter_mut()
                    .map(|param| {
                        let offset = param.grad()? * scale;
                        let original = param.data().clone();
                        *param.data_mut() += &offset;
                        Some(original)
                    })
                    .collect()
            })
            .collect();
        Self { saved }
    }

    /// Put the saved weights back, leaving the gradients untouched
    pub fn restore(self, groups: &mut [ParamGroup]) {
        for (group, saved) in groups.iter_mut().zip(self.saved) {
            for (param, original) in group.params.iter_mut().zip(saved) {
                if let Some(original) = original {
                    *param.data_mut() = original;
                }
            }
        }
    }
}
