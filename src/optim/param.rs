//! Trainable parameters and parameter groups

use crate::config::{ConfigError, TrainingConfig};
use crate::error::{Error, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A flat trainable tensor with an optional gradient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    data: Array1<f32>,
    #[serde(skip)]
    grad: Option<Array1<f32>>,
}

impl Parameter {
    pub fn new(data: Array1<f32>) -> Self {
        Self { data, grad: None }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(Array1::zeros(len))
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self::new(Array1::from(values))
    }

    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array1<f32> {
        &mut self.data
    }

    pub fn grad(&self) -> Option<&Array1<f32>> {
        self.grad.as_ref()
    }

    pub fn set_grad(&mut self, grad: Array1<f32>) {
        self.grad = Some(grad);
    }

    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Named set of parameters sharing optimizer hyperparameters
///
/// `lr` and `momentum` are rewritten by the scheduler at the start of every
/// epoch. `lr_mult` is bound once from `hyp.layer_lr` and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub name: String,
    pub params: Vec<Parameter>,
    pub lr_mult: f32,
    pub lr: f32,
    pub momentum: f32,
    pub weight_decay: f32,
}

impl ParamGroup {
    pub fn new(name: impl Into<String>, params: Vec<Parameter>) -> Self {
        Self {
            name: name.into(),
            params,
            lr_mult: 1.0,
            lr: 0.0,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }

    pub fn with_lr_mult(mut self, lr_mult: f32) -> Self {
        self.lr_mult = lr_mult;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Total number of scalar weights in the group
    pub fn num_elements(&self) -> usize {
        self.params.iter().map(Parameter::len).sum()
    }

    pub fn zero_grad(&mut self) {
        for param in &mut self.params {
            param.zero_grad();
        }
    }
}

/// Bind per-layer multipliers and weight decay onto the model's groups
///
/// Every key of `hyp.layer_lr` must name an existing group.
pub fn bind_param_groups(
    groups: &mut [ParamGroup],
    config: &TrainingConfig,
) -> std::result::Result<(), ConfigError> {
    if let Some(unknown) = config
        .layer_lr
        .keys()
        .find(|name| !groups.iter().any(|g| &g.name == *name))
    {
        return Err(ConfigError::UnknownParamGroup(unknown.clone()));
    }

    for group in groups.iter_mut() {
        group.lr_mult = config.lr_multiplier(&group.name);
        group.weight_decay = config.weight_decay;
    }
    Ok(())
}

/// Plain weights of one group, as stored in checkpoints and the EMA shadow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWeights {
    pub name: String,
    pub params: Vec<Array1<f32>>,
}

/// Copy the current weights out of the groups
pub fn snapshot_weights(groups: &[ParamGroup]) -> Vec<GroupWeights> {
    groups
        .iter()
        .map(|g| GroupWeights {
            name: g.name.clone(),
            params: g.params.iter().map(|p| p.data().clone()).collect(),
        })
        .collect()
}

/// Overwrite the groups' weights, checking names and shapes first
pub fn load_weights(groups: &mut [ParamGroup], weights: &[GroupWeights]) -> Result<()> {
    check_layout(groups, weights)?;
    for (group, stored) in groups.iter_mut().zip(weights) {
        for (param, data) in group.params.iter_mut().zip(&stored.params) {
            param.data_mut().assign(data);
        }
    }
    Ok(())
}

/// Fail unless `weights` has exactly the group names and tensor lengths of `groups`
pub fn check_layout(groups: &[ParamGroup], weights: &[GroupWeights]) -> Result<()> {
    if groups.len() != weights.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![groups.len()],
            got: vec![weights.len()],
        });
    }
    for (group, stored) in groups.iter().zip(weights) {
        if group.name != stored.name {
            return Err(Error::Checkpoint(format!(
                "parameter group '{}' does not match stored group '{}'",
                group.name, stored.name
            )));
        }
        let expected: Vec<usize> = group.params.iter().map(Parameter::len).collect();
        let got: Vec<usize> = stored.params.iter().map(|p| p.len()).collect();
        if expected != got {
            return Err(Error::ShapeMismatch { expected, got });
        }
    }
    Ok(())
}
