//! Toy model and in-memory data shared by the integration tests

#![allow(dead_code)]

use clasificar::config::{ImageSize, TrainingConfig};
use clasificar::optim::{ParamGroup, Parameter};
use clasificar::train::{Batch, ClassifierModel, DataSource, Mode, Targets};
use clasificar::{Error, Result};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

// =============================================================================
// Model
// =============================================================================

/// `logits = x · W + b` with `W` in group "backbone" and `b` in group "head"
pub struct LinearSoftmax {
    groups: Vec<ParamGroup>,
    dim: usize,
    classes: usize,
    input: Option<Array2<f32>>,
    pub modes: Vec<Mode>,
}

impl LinearSoftmax {
    pub fn new(dim: usize, classes: usize) -> Self {
        Self {
            groups: vec![
                ParamGroup::new("backbone", vec![Parameter::zeros(dim * classes)]),
                ParamGroup::new("head", vec![Parameter::zeros(classes)]),
            ],
            dim,
            classes,
            input: None,
            modes: Vec::new(),
        }
    }

    fn weights(&self) -> Result<Array2<f32>> {
        Array2::from_shape_vec(
            (self.dim, self.classes),
            self.groups[0].params[0].data().to_vec(),
        )
        .map_err(|_| Error::ShapeMismatch {
            expected: vec![self.dim, self.classes],
            got: vec![self.groups[0].params[0].len()],
        })
    }

    /// All weights flattened, for comparisons
    pub fn flat_weights(&self) -> Vec<f32> {
        self.groups
            .iter()
            .flat_map(|g| g.params.iter())
            .flat_map(|p| p.data().iter().copied())
            .collect()
    }
}

impl ClassifierModel for LinearSoftmax {
    fn set_mode(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    fn forward(&mut self, images: &Array2<f32>) -> Result<Array2<f32>> {
        if images.ncols() != self.dim {
            return Err(Error::ShapeMismatch {
                expected: vec![images.nrows(), self.dim],
                got: images.shape().to_vec(),
            });
        }
        let logits = images.dot(&self.weights()?) + self.groups[1].params[0].data();
        self.input = Some(images.clone());
        Ok(logits)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()> {
        let input = self.input.take().expect("forward before backward");
        let grad_w = input.t().dot(grad_logits);
        let grad_b = grad_logits.sum_axis(Axis(0));

        self.groups[0].params[0].set_grad(Array1::from_iter(grad_w.iter().copied()));
        self.groups[1].params[0].set_grad(grad_b);
        Ok(())
    }

    fn parameter_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn parameter_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }
}

// =============================================================================
// Data
// =============================================================================

/// Gaussian clusters, one per class, reshuffled deterministically per epoch
pub struct ClusterData {
    features: Array2<f32>,
    labels: Vec<usize>,
    classes: usize,
    batch_size: usize,
    seed: u64,
    multi_hot: bool,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    /// Serve at most this many batches per epoch
    pub available: Option<usize>,
    /// Poison the batch at `(epoch, step)` with NaN pixels
    pub nan_at: Option<(usize, usize)>,
    /// `(epoch, image_size, augment)` of every request
    pub requests: Vec<(usize, ImageSize, bool)>,
}

impl ClusterData {
    pub fn new(samples: usize, dim: usize, classes: usize, batch_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, 0.3).expect("valid normal");

        let labels: Vec<usize> = (0..samples).map(|i| i % classes).collect();
        let features = Array2::from_shape_fn((samples, dim), |(i, j)| {
            let center = if j % classes == labels[i] { 2.0 } else { 0.0 };
            center + noise.sample(&mut rng)
        });

        Self {
            features,
            labels,
            classes,
            batch_size,
            seed,
            multi_hot: false,
            order: (0..samples).collect(),
            cursor: 0,
            epoch: 0,
            available: None,
            nan_at: None,
            requests: Vec::new(),
        }
    }

    /// Serve targets as one-hot indicator rows
    pub fn multi_hot(mut self) -> Self {
        self.multi_hot = true;
        self
    }

    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    /// Epochs in which augmentation was requested
    pub fn augmented_epochs(&self) -> Vec<usize> {
        let mut epochs: Vec<usize> = self
            .requests
            .iter()
            .filter(|(_, _, augment)| *augment)
            .map(|(epoch, _, _)| *epoch)
            .collect();
        epochs.dedup();
        epochs
    }

    /// Image size requested in `epoch`
    pub fn size_in(&self, epoch: usize) -> Option<ImageSize> {
        self.requests
            .iter()
            .find(|(e, _, _)| *e == epoch)
            .map(|(_, size, _)| *size)
    }
}

impl DataSource for ClusterData {
    fn begin_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.cursor = 0;
        self.order = (0..self.labels.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed ^ (epoch as u64).wrapping_mul(0x9E37));
        self.order.shuffle(&mut rng);
    }

    fn next_batch(&mut self, image_size: ImageSize, augment: bool) -> Option<Batch> {
        let step = self.cursor / self.batch_size;
        if self.available.is_some_and(|limit| step >= limit) {
            return None;
        }
        if self.cursor + self.batch_size > self.order.len() {
            return None;
        }
        self.requests.push((self.epoch, image_size, augment));

        let index = &self.order[self.cursor..self.cursor + self.batch_size];
        self.cursor += self.batch_size;

        let mut images = self.features.select(Axis(0), index);
        if self.nan_at == Some((self.epoch, step)) {
            images.row_mut(0).fill(f32::NAN);
        }

        let classes: Vec<usize> = index.iter().map(|&i| self.labels[i]).collect();
        let targets = if self.multi_hot {
            let mut dense = Array2::zeros((classes.len(), self.classes));
            for (row, &class) in classes.iter().enumerate() {
                dense[[row, class]] = 1.0;
            }
            Targets::MultiHot(dense)
        } else {
            Targets::Classes(classes)
        };
        Batch::new(images, targets).ok()
    }

    fn batches_per_epoch(&self) -> usize {
        self.labels.len() / self.batch_size
    }
}

// =============================================================================
// Configs
// =============================================================================

pub fn config(yaml: &str) -> TrainingConfig {
    TrainingConfig::from_yaml_str(yaml).expect("valid test config")
}
