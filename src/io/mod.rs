//! Checkpoint I/O
//!
//! Checkpoints are JSON documents holding model and EMA weights, optimizer
//! buffers and the scheduler counter.

mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_VERSION};
