//! Mixup regularization
//!
//! Trains on convex combinations of a batch with a shuffled copy of itself.
//! Randomness is always injected: the trainer derives one generator per
//! `(seed, epoch, step)` so replicas agree on lambda and on the coin flip.

use super::{Batch, Targets};
use crate::config::{ConfigError, TrainingConfig};
use crate::error::Result;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};

/// Targets of a (possibly) mixed batch
///
/// The loss is `lambda * L(targets_a) + (1 - lambda) * L(targets_b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedTargets {
    pub targets_a: Targets,
    pub targets_b: Targets,
    pub lambda: f32,
}

impl MixedTargets {
    /// Unmixed targets: both sets equal and `lambda == 1`
    pub fn single(targets: Targets) -> Self {
        Self {
            targets_b: targets.clone(),
            targets_a: targets,
            lambda: 1.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.lambda == 1.0
    }
}

/// Output of [`MixupController::apply`]
#[derive(Debug, Clone, PartialEq)]
pub struct MixedBatch {
    pub images: Array2<f32>,
    pub targets: MixedTargets,
}

impl MixedBatch {
    pub fn identity(batch: Batch) -> Self {
        Self {
            images: batch.images,
            targets: MixedTargets::single(batch.targets),
        }
    }

    pub fn lambda(&self) -> f32 {
        self.targets.lambda
    }
}

/// Applies mixup with a per-batch probability
#[derive(Debug, Clone, Copy)]
pub struct MixupController {
    seed: u64,
    mixup_prob: f32,
}

impl MixupController {
    pub fn new(seed: u64, mixup_prob: f32) -> Self {
        Self { seed, mixup_prob }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.seed, config.mixup_prob)
    }

    /// Generator for one optimizer step, identical on every replica
    pub fn rng_for(&self, epoch: usize, step: usize) -> StdRng {
        let stream = splitmix64(splitmix64(self.seed ^ epoch as u64) ^ step as u64);
        StdRng::seed_from_u64(stream)
    }

    /// Mix `batch` with a shuffled copy of itself
    ///
    /// With `alpha == 0` the batch is returned untouched with `lambda == 1`.
    /// Otherwise a coin with probability `mixup_prob` decides whether to mix;
    /// lambda is drawn from `Beta(alpha, alpha)` before the permutation, so
    /// replicas holding different shard sizes still agree on it.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        batch: Batch,
        alpha: f32,
        rng: &mut R,
    ) -> Result<MixedBatch> {
        if alpha == 0.0 {
            return Ok(MixedBatch::identity(batch));
        }
        if rng.random::<f32>() >= self.mixup_prob {
            return Ok(MixedBatch::identity(batch));
        }

        let beta = Beta::new(alpha, alpha).map_err(|_| ConfigError::OutOfRange {
            field: "mixup_alpha",
            value: alpha,
            reason: "must be > 0",
        })?;
        let lambda: f32 = beta.sample(rng);

        let mut index: Vec<usize> = (0..batch.len()).collect();
        index.shuffle(rng);

        let shuffled = batch.images.select(Axis(0), &index);
        let images = &batch.images * lambda + &shuffled * (1.0 - lambda);
        let targets_b = batch.targets.select(&index);

        Ok(MixedBatch {
            images,
            targets: MixedTargets {
                targets_a: batch.targets,
                targets_b,
                lambda,
            },
        })
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn batch() -> Batch {
        Batch::new(
            array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]],
            Targets::Classes(vec![0, 1, 2, 3]),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_alpha_is_identity() {
        let controller = MixupController::new(7, 1.0);
        let mut rng = controller.rng_for(0, 0);

        let mixed = controller.apply(batch(), 0.0, &mut rng).unwrap();
        assert_eq!(mixed.images, batch().images);
        assert_eq!(mixed.targets.targets_a, batch().targets);
        assert_eq!(mixed.targets.targets_b, batch().targets);
        assert_eq!(mixed.lambda(), 1.0);
    }

    #[test]
    fn test_zero_probability_never_mixes() {
        let controller = MixupController::new(7, 0.0);
        for step in 0..20 {
            let mut rng = controller.rng_for(3, step);
            let mixed = controller.apply(batch(), 0.4, &mut rng).unwrap();
            assert!(mixed.targets.is_identity());
        }
    }

    #[test]
    fn test_mixed_images_are_convex_combination() {
        let controller = MixupController::new(11, 1.0);
        let mut rng = controller.rng_for(5, 2);
        let mixed = controller.apply(batch(), 0.4, &mut rng).unwrap();

        let lambda = mixed.lambda();
        assert!((0.0..=1.0).contains(&lambda));

        let (Targets::Classes(a), Targets::Classes(b)) =
            (&mixed.targets.targets_a, &mixed.targets.targets_b)
        else {
            panic!("class targets expected");
        };
        for row in 0..4 {
            // Sample i has value i+1 in both columns
            let expected = lambda * (a[row] + 1) as f32 + (1.0 - lambda) * (b[row] + 1) as f32;
            assert_abs_diff_eq!(mixed.images[[row, 0]], expected, epsilon = 1e-5);
        }

        let mut permuted = b.clone();
        permuted.sort_unstable();
        assert_eq!(permuted, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_same_seed_epoch_step_gives_same_draw() {
        let controller = MixupController::new(42, 1.0);
        let first = controller
            .apply(batch(), 0.2, &mut controller.rng_for(9, 4))
            .unwrap();
        let second = controller
            .apply(batch(), 0.2, &mut controller.rng_for(9, 4))
            .unwrap();
        assert_eq!(first, second);

        let other_step = controller
            .apply(batch(), 0.2, &mut controller.rng_for(9, 5))
            .unwrap();
        assert_ne!(first.lambda(), other_step.lambda());
    }

    #[test]
    fn test_lambda_independent_of_batch_size() {
        let controller = MixupController::new(42, 1.0);
        let small = Batch::new(array![[0.0], [1.0]], Targets::Classes(vec![0, 1])).unwrap();

        let a = controller
            .apply(batch(), 0.2, &mut controller.rng_for(1, 1))
            .unwrap();
        let b = controller
            .apply(small, 0.2, &mut controller.rng_for(1, 1))
            .unwrap();
        assert_eq!(a.lambda(), b.lambda());
    }
}
