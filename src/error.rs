//! Error types for clasificar

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data exhausted in epoch {epoch}: expected {expected} batches, got {got}")]
    DataExhaustion {
        epoch: usize,
        expected: usize,
        got: usize,
    },

    #[error("Non-finite loss {loss} at epoch {epoch}, step {step}")]
    NumericInstability { epoch: usize, step: usize, loss: f32 },

    #[error("Invalid target {class} for sample {index}: expected a class below {num_classes}")]
    InvalidTarget {
        index: usize,
        class: usize,
        num_classes: usize,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
