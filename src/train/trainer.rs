//! Trainer orchestrating the per-epoch training loop

use super::callback::{CallbackAction, CallbackManager, TrainerCallback};
use super::{
    resolve, ClassifierModel, DataSource, DiagnosticCounts, EmaTracker, EpochPlan, EpochRecord,
    LossComposer, MixedTargets, MixupController, Mode,
};
use crate::config::{OptimizerKind, TrainingConfig};
use crate::error::{Error, Result};
use crate::io::{Checkpoint, CheckpointStore, CHECKPOINT_VERSION};
use crate::optim::{
    bind_param_groups, build_optimizer, check_layout, load_weights, snapshot_weights, GroupWeights,
    LRScheduler, Optimizer, SamPerturbation, WarmupDecayLR,
};
use ndarray::Array2;
use std::path::PathBuf;
use std::time::Instant;

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainResult {
    /// Records of the epochs run by this call
    pub history: Vec<EpochRecord>,
    /// Best fitness over the whole run, including epochs before a resume
    pub best_fitness: Option<f32>,
    /// Number of epochs completed, counted from the start of the run
    pub final_epoch: usize,
    /// Whether a callback stopped training before the last epoch
    pub stopped_early: bool,
    /// Wall time of this call in seconds
    pub elapsed_secs: f64,
}

/// Totals of one pass over a data source
struct PassTotals {
    loss_sum: f32,
    steps: usize,
    batches: usize,
    skipped: usize,
    exhausted: bool,
    counts: DiagnosticCounts,
}

impl PassTotals {
    fn new(counts: DiagnosticCounts) -> Self {
        Self {
            loss_sum: 0.0,
            steps: 0,
            batches: 0,
            skipped: 0,
            exhausted: false,
            counts,
        }
    }

    fn mean_loss(&self) -> f32 {
        if self.steps == 0 {
            0.0
        } else {
            self.loss_sum / self.steps as f32
        }
    }
}

/// High-level trainer that orchestrates the training loop
///
/// Each epoch resolves its [`EpochPlan`], applies the scheduled learning rate
/// and momentum to the model's parameter groups, then runs
/// mixup, loss, backward, optimizer step and EMA update for every batch.
/// With SAM the gradient is recomputed at the ascent point before the step.
///
/// # Example
///
/// ```no_run
/// use clasificar::config::load_config;
/// use clasificar::train::{ClassifierModel, DataSource, MetricsHistory, Trainer};
///
/// fn run<M: ClassifierModel>(model: M, data: &mut dyn DataSource) -> clasificar::Result<()> {
///     let config = load_config("train.yaml")?;
///     let history = MetricsHistory::new();
///
///     let mut trainer = Trainer::new(config, model)?.with_checkpoint_dir("runs/exp")?;
///     trainer.add_callback(history.clone());
///
///     let result = trainer.fit(data, None)?;
///     println!("best fitness {:?}", result.best_fitness);
///     Ok(())
/// }
/// ```
pub struct Trainer<M: ClassifierModel> {
    config: TrainingConfig,
    model: M,
    optimizer: Box<dyn Optimizer>,
    scheduler: WarmupDecayLR,
    ema: Option<EmaTracker>,
    composer: LossComposer,
    mixup: MixupController,
    callbacks: CallbackManager,
    checkpoints: Option<CheckpointStore>,
    best_fitness: Option<f32>,
    last_plan: Option<EpochPlan>,
}

impl<M: ClassifierModel> Trainer<M> {
    /// Create a trainer, binding per-layer multipliers onto the model's groups
    pub fn new(config: TrainingConfig, mut model: M) -> Result<Self> {
        bind_param_groups(model.parameter_groups_mut(), &config)?;

        let ema = config
            .ema
            .map(|ema| EmaTracker::new(ema, model.parameter_groups()));

        Ok(Self {
            optimizer: build_optimizer(&config),
            scheduler: WarmupDecayLR::from_config(&config),
            composer: LossComposer::new(&config),
            mixup: MixupController::from_config(&config),
            callbacks: CallbackManager::new(),
            checkpoints: None,
            best_fitness: None,
            last_plan: None,
            ema,
            model,
            config,
        })
    }

    /// Save `last.json` every epoch and `best.json` on improvement under `dir`
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        self.checkpoints = Some(CheckpointStore::new(dir)?);
        Ok(self)
    }

    /// Add a callback to the trainer
    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn ema(&self) -> Option<&EmaTracker> {
        self.ema.as_ref()
    }

    pub fn best_fitness(&self) -> Option<f32> {
        self.best_fitness
    }

    /// Next epoch to run
    pub fn current_epoch(&self) -> usize {
        self.scheduler.current_epoch()
    }

    /// Weights to deploy: the EMA shadow when tracking, otherwise the live weights
    pub fn export_weights(&self) -> Vec<GroupWeights> {
        match &self.ema {
            Some(ema) => ema.shadow().to_vec(),
            None => snapshot_weights(self.model.parameter_groups()),
        }
    }

    /// Capture the state after `epoch` has completed
    pub fn checkpoint(&self, epoch: usize) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            epoch,
            model: snapshot_weights(self.model.parameter_groups()),
            ema: self.ema.as_ref().map(EmaTracker::snapshot),
            optimizer: self.optimizer.state(),
            scheduler_epoch: epoch + 1,
            best_fitness: self.best_fitness,
        }
    }

    /// Restore a checkpoint and continue at the epoch after it
    pub fn resume(&mut self, checkpoint: Checkpoint) -> Result<()> {
        if checkpoint.scheduler_epoch > self.config.epochs {
            return Err(Error::Checkpoint(format!(
                "checkpoint resumes at epoch {} but the run has {} epochs",
                checkpoint.scheduler_epoch, self.config.epochs
            )));
        }

        checkpoint
            .optimizer
            .check_layout(self.model.parameter_groups())?;
        load_weights(self.model.parameter_groups_mut(), &checkpoint.model)?;
        self.optimizer.load_state(checkpoint.optimizer)?;

        self.ema = match (self.config.ema, checkpoint.ema) {
            (Some(config), Some(state)) => {
                let ema = EmaTracker::from_state(config, state);
                check_layout(self.model.parameter_groups(), ema.shadow())?;
                Some(ema)
            }
            (Some(config), None) => {
                tracing::warn!("checkpoint has no EMA state, restarting EMA from resumed weights");
                Some(EmaTracker::new(config, self.model.parameter_groups()))
            }
            (None, _) => None,
        };

        self.scheduler.set_epoch(checkpoint.scheduler_epoch);
        self.best_fitness = checkpoint.best_fitness;
        self.last_plan = None;

        tracing::info!(
            epoch = checkpoint.epoch,
            next = checkpoint.scheduler_epoch,
            "resumed from checkpoint"
        );
        Ok(())
    }

    /// Run the remaining epochs
    ///
    /// `val`, when given, is evaluated after every epoch at full resolution
    /// without augmentation, using the EMA weights when EMA is enabled.
    pub fn fit(
        &mut self,
        train: &mut dyn DataSource,
        mut val: Option<&mut dyn DataSource>,
    ) -> Result<TrainResult> {
        let start = Instant::now();
        let mut history = Vec::new();
        let mut stopped_early = false;

        if self.callbacks.on_train_begin(self.current_epoch()) == CallbackAction::Stop {
            stopped_early = true;
        }

        while !stopped_early && self.current_epoch() < self.config.epochs {
            let epoch = self.current_epoch();
            let epoch_start = Instant::now();

            let plan = resolve(epoch, &self.config);
            let values = self.scheduler.apply(self.model.parameter_groups_mut());
            self.log_transition(&plan);

            if self.callbacks.on_epoch_begin(&plan) == CallbackAction::Stop {
                stopped_early = true;
                break;
            }

            let totals = self.train_epoch(&plan, train)?;

            let (val_loss, val_diagnostics) = match val.as_deref_mut() {
                Some(source) => {
                    let totals = self.validate(epoch, source)?;
                    (Some(totals.mean_loss()), Some(totals.counts.finish()))
                }
                None => (None, None),
            };

            let diagnostics = totals.counts.finish();
            let fitness = val_diagnostics
                .as_ref()
                .unwrap_or(&diagnostics)
                .fitness();
            let is_best = self.best_fitness.map_or(true, |best| fitness > best);
            if is_best {
                self.best_fitness = Some(fitness);
            }

            self.scheduler.step();
            self.save_checkpoint(epoch, is_best);

            let record = EpochRecord {
                epoch,
                plan,
                lr: values.lr,
                momentum: values.momentum,
                loss: totals.mean_loss(),
                diagnostics,
                val_loss,
                val_diagnostics,
                fitness,
                is_best,
                batches: totals.batches,
                skipped_steps: totals.skipped,
                exhausted_early: totals.exhausted,
                elapsed_secs: epoch_start.elapsed().as_secs_f64(),
            };

            let action = self.callbacks.on_epoch_end(&record);
            history.push(record);
            if action == CallbackAction::Stop && self.current_epoch() < self.config.epochs {
                stopped_early = true;
            }
        }

        self.callbacks.on_train_end(&history);

        Ok(TrainResult {
            history,
            best_fitness: self.best_fitness,
            final_epoch: self.current_epoch(),
            stopped_early,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    fn log_transition(&mut self, plan: &EpochPlan) {
        let changed = self
            .last_plan
            .as_ref()
            .map_or(true, |last| plan.strategy_changed(last));
        if changed {
            tracing::info!(
                epoch = plan.epoch_index,
                phase = %plan.phase,
                image_size = %plan.image_size,
                augmentation = plan.augmentation_enabled,
                mixup_alpha = plan.mixup_alpha,
                "training strategy changed"
            );
        }
        self.last_plan = Some(*plan);
    }

    fn train_epoch(&mut self, plan: &EpochPlan, data: &mut dyn DataSource) -> Result<PassTotals> {
        let epoch = plan.epoch_index;
        let expected = data.batches_per_epoch();
        let mut totals = PassTotals::new(self.composer.empty_counts());

        self.model.set_mode(Mode::Train);
        data.begin_epoch(epoch);

        for step in 0..expected {
            let Some(batch) = data.next_batch(plan.image_size, plan.augmentation_enabled) else {
                let err = Error::DataExhaustion {
                    epoch,
                    expected,
                    got: step,
                };
                tracing::warn!(epoch, error = %err, "ending epoch early");
                totals.exhausted = true;
                break;
            };
            totals.batches += 1;

            let mut rng = self.mixup.rng_for(epoch, step);
            let mixed = self.mixup.apply(batch, plan.mixup_alpha, &mut rng)?;

            self.optimizer.zero_grad(self.model.parameter_groups_mut());
            let logits = self.model.forward(&mixed.images)?;
            let terms = self.composer.compute(&logits, &mixed.targets)?;

            if !terms.loss.is_finite() {
                let err = Error::NumericInstability {
                    epoch,
                    step,
                    loss: terms.loss,
                };
                tracing::warn!(epoch, step, error = %err, "skipping optimizer step");
                totals.skipped += 1;
                continue;
            }

            self.model.backward(&terms.grad)?;

            if let OptimizerKind::Sam { rho } = self.config.optimizer {
                let ascent_loss = self.sharpness_aware_grad(&mixed.images, &mixed.targets, rho)?;
                if !ascent_loss.is_finite() {
                    let err = Error::NumericInstability {
                        epoch,
                        step,
                        loss: ascent_loss,
                    };
                    tracing::warn!(epoch, step, error = %err, "skipping optimizer step at SAM ascent point");
                    totals.skipped += 1;
                    continue;
                }
            }

            self.optimizer.step(self.model.parameter_groups_mut());
            if let Some(ema) = self.ema.as_mut() {
                ema.update(self.model.parameter_groups())?;
            }

            totals.loss_sum += terms.loss;
            totals.steps += 1;
            totals.counts.merge(&terms.counts);
        }

        tracing::debug!(
            epoch,
            steps = totals.steps,
            skipped = totals.skipped,
            "training pass finished"
        );
        Ok(totals)
    }

    /// Replace the gradients with those taken at the SAM ascent point
    ///
    /// Returns the loss at the ascent point. The weights are restored before
    /// returning; gradients are only replaced when that loss is finite.
    fn sharpness_aware_grad(
        &mut self,
        images: &Array2<f32>,
        targets: &MixedTargets,
        rho: f32,
    ) -> Result<f32> {
        let perturbation = SamPerturbation::ascend(self.model.parameter_groups_mut(), rho);
        self.optimizer.zero_grad(self.model.parameter_groups_mut());

        let ascent = self
            .model
            .forward(images)
            .and_then(|logits| self.composer.compute(&logits, targets))
            .and_then(|terms| {
                if terms.loss.is_finite() {
                    self.model.backward(&terms.grad)?;
                }
                Ok(terms.loss)
            });

        perturbation.restore(self.model.parameter_groups_mut());
        ascent
    }

    /// Evaluate on `data`, swapping the EMA shadow in for the duration
    fn validate(&mut self, epoch: usize, data: &mut dyn DataSource) -> Result<PassTotals> {
        let live = match &self.ema {
            Some(ema) => {
                let live = snapshot_weights(self.model.parameter_groups());
                load_weights(self.model.parameter_groups_mut(), ema.shadow())?;
                Some(live)
            }
            None => None,
        };

        let result = self.evaluate(epoch, data);

        if let Some(live) = live {
            load_weights(self.model.parameter_groups_mut(), &live)?;
        }
        result
    }

    fn evaluate(&mut self, epoch: usize, data: &mut dyn DataSource) -> Result<PassTotals> {
        let mut totals = PassTotals::new(self.composer.empty_counts());

        self.model.set_mode(Mode::Eval);
        data.begin_epoch(epoch);

        for _ in 0..data.batches_per_epoch() {
            let Some(batch) = data.next_batch(self.config.image_size, false) else {
                totals.exhausted = true;
                break;
            };
            totals.batches += 1;

            let logits = self.model.forward(&batch.images)?;
            let terms = self
                .composer
                .compute(&logits, &MixedTargets::single(batch.targets))?;

            if !terms.loss.is_finite() {
                tracing::warn!(epoch, loss = terms.loss, "non-finite validation loss");
                totals.skipped += 1;
                continue;
            }
            totals.loss_sum += terms.loss;
            totals.steps += 1;
            totals.counts.merge(&terms.counts);
        }

        self.model.set_mode(Mode::Train);
        Ok(totals)
    }

    fn save_checkpoint(&self, epoch: usize, is_best: bool) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        if let Err(e) = store.save(&self.checkpoint(epoch), is_best) {
            tracing::warn!(epoch, error = %e, "failed to save checkpoint");
        }
    }
}
