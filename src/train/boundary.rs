//! Model and data capabilities consumed by the trainer
//!
//! Network construction, image decoding and augmentation live outside this
//! crate. The trainer only needs the small surfaces below.

use super::Batch;
use crate::config::ImageSize;
use crate::error::Result;
use crate::optim::ParamGroup;
use ndarray::Array2;

/// Learning mode of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A classifier producing one row of class scores per image
pub trait ClassifierModel: Send {
    /// Switch between training and evaluation behavior
    fn set_mode(&mut self, mode: Mode);

    /// Forward pass, returning `[batch, num_classes]` logits
    fn forward(&mut self, images: &Array2<f32>) -> Result<Array2<f32>>;

    /// Backward pass from the gradient of the loss w.r.t. the last logits
    ///
    /// Implementations store parameter gradients on their [`ParamGroup`]s.
    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<()>;

    fn parameter_groups(&self) -> &[ParamGroup];

    fn parameter_groups_mut(&mut self) -> &mut [ParamGroup];
}

/// A per-epoch, exhaustible stream of batches
pub trait DataSource {
    /// Restart the stream for `epoch`
    fn begin_epoch(&mut self, epoch: usize);

    /// Next batch at the requested resolution, or `None` once exhausted
    fn next_batch(&mut self, image_size: ImageSize, augment: bool) -> Option<Batch>;

    /// Number of batches the stream is expected to yield per epoch
    fn batches_per_epoch(&self) -> usize;
}
