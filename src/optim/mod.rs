//! Optimizers, parameter groups and learning rate schedules

mod adam;
mod optimizer;
mod param;
mod sam;
mod scheduler;
mod sgd;

pub use adam::Adam;
pub use optimizer::{build_optimizer, Buffers, Optimizer, OptimizerState};
pub use param::{
    bind_param_groups, check_layout, load_weights, snapshot_weights, GroupWeights, ParamGroup,
    Parameter,
};
pub use sam::{grad_norm, SamPerturbation};
pub use scheduler::{LRScheduler, ScheduledValues, WarmupDecayCurve, WarmupDecayLR};
pub use sgd::SGD;
