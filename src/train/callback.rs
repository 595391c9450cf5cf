//! Callback system for training events
//!
//! Hooks fire at epoch granularity:
//! - `on_train_begin` / `on_train_end`
//! - `on_epoch_begin` with the resolved [`EpochPlan`]
//! - `on_epoch_end` with the finished [`EpochRecord`]
//!
//! # Example
//!
//! ```rust
//! use clasificar::train::callback::{CallbackAction, TrainerCallback};
//! use clasificar::train::EpochRecord;
//!
//! struct StopBelow(f32);
//!
//! impl TrainerCallback for StopBelow {
//!     fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
//!         if record.loss < self.0 {
//!             CallbackAction::Stop
//!         } else {
//!             CallbackAction::Continue
//!         }
//!     }
//! }
//! ```

use super::{EpochPlan, EpochRecord};
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Action to take after a callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// Continue training normally
    Continue,
    /// Stop training after the current epoch
    Stop,
}

/// Trait for training callbacks
///
/// All methods have default no-op implementations, so you only need to
/// implement the events you care about.
pub trait TrainerCallback: Send {
    /// Called before the first epoch, with the epoch training starts at
    fn on_train_begin(&mut self, _start_epoch: usize) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after training ends, with every record of this run
    fn on_train_end(&mut self, _history: &[EpochRecord]) {}

    /// Called before each epoch
    fn on_epoch_begin(&mut self, _plan: &EpochPlan) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called after each epoch
    fn on_epoch_end(&mut self, _record: &EpochRecord) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Get callback name for logging
    fn name(&self) -> &str {
        "TrainerCallback"
    }
}

// =============================================================================
// Metrics History
// =============================================================================

/// In-memory record of every finished epoch
///
/// Cloning yields another handle to the same history, so a clone can be
/// registered with the trainer while the caller keeps one to read from.
#[derive(Clone, Debug, Default)]
pub struct MetricsHistory {
    records: Arc<Mutex<Vec<EpochRecord>>>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EpochRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of all records so far
    pub fn records(&self) -> Vec<EpochRecord> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<EpochRecord> {
        self.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl TrainerCallback for MetricsHistory {
    fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
        self.lock().push(record.clone());
        CallbackAction::Continue
    }

    fn name(&self) -> &str {
        "MetricsHistory"
    }
}

// =============================================================================
// JSON Lines Sink
// =============================================================================

/// Appends one JSON document per finished epoch to a file
pub struct JsonlMetricsSink {
    writer: BufWriter<File>,
}

impl JsonlMetricsSink {
    /// Create (or truncate) the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn write_record(&mut self, record: &EpochRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl TrainerCallback for JsonlMetricsSink {
    fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
        if let Err(e) = self.write_record(record) {
            tracing::warn!(epoch = record.epoch, error = %e, "failed to write metrics record");
        }
        CallbackAction::Continue
    }

    fn name(&self) -> &str {
        "JsonlMetricsSink"
    }
}

// =============================================================================
// Progress Logger
// =============================================================================

/// Logs one line per epoch through `tracing`
#[derive(Clone, Debug)]
pub struct ProgressLogger {
    total_epochs: usize,
}

impl ProgressLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self { total_epochs }
    }
}

impl TrainerCallback for ProgressLogger {
    fn on_epoch_begin(&mut self, plan: &EpochPlan) -> CallbackAction {
        tracing::debug!(
            epoch = plan.epoch_index,
            total = self.total_epochs,
            phase = %plan.phase,
            image_size = %plan.image_size,
            lr = plan.lr,
            "epoch started"
        );
        CallbackAction::Continue
    }

    fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
        tracing::info!(
            epoch = record.epoch + 1,
            total = self.total_epochs,
            loss = record.loss,
            val_loss = ?record.val_loss,
            fitness = record.fitness,
            lr = record.lr,
            skipped = record.skipped_steps,
            secs = record.elapsed_secs,
            "epoch finished{}",
            if record.is_best { " (best)" } else { "" }
        );
        CallbackAction::Continue
    }

    fn name(&self) -> &str {
        "ProgressLogger"
    }
}

// =============================================================================
// Callback Manager
// =============================================================================

/// Manages multiple callbacks and dispatches events
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    /// Create new callback manager
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback
    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Fire train begin event
    pub fn on_train_begin(&mut self, start_epoch: usize) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_train_begin(start_epoch) == CallbackAction::Stop {
                tracing::info!(callback = cb.name(), "stop requested before training");
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    /// Fire train end event
    pub fn on_train_end(&mut self, history: &[EpochRecord]) {
        for cb in &mut self.callbacks {
            cb.on_train_end(history);
        }
    }

    /// Fire epoch begin event
    pub fn on_epoch_begin(&mut self, plan: &EpochPlan) -> CallbackAction {
        for cb in &mut self.callbacks {
            if cb.on_epoch_begin(plan) == CallbackAction::Stop {
                tracing::info!(callback = cb.name(), epoch = plan.epoch_index, "stop requested");
                return CallbackAction::Stop;
            }
        }
        CallbackAction::Continue
    }

    /// Fire epoch end event
    ///
    /// Every callback sees the record even when an earlier one asks to stop.
    pub fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
        let mut action = CallbackAction::Continue;
        for cb in &mut self.callbacks {
            if cb.on_epoch_end(record) == CallbackAction::Stop {
                tracing::info!(callback = cb.name(), epoch = record.epoch, "stop requested");
                action = CallbackAction::Stop;
            }
        }
        action
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageSize;
    use crate::train::{Diagnostics, Phase};
    use std::io::{BufRead, BufReader};

    fn record(epoch: usize, loss: f32) -> EpochRecord {
        let plan = EpochPlan {
            epoch_index: epoch,
            phase: Phase::Clean,
            is_warmup: false,
            image_size: ImageSize::new(32, 32),
            image_size_ratio: 1.0,
            augmentation_enabled: false,
            mixup_alpha: 0.0,
            lr: 0.01,
            momentum: 0.9,
        };
        EpochRecord {
            epoch,
            plan,
            lr: plan.lr,
            momentum: plan.momentum,
            loss,
            diagnostics: Diagnostics::TopK {
                top1: 0.5,
                top5: 1.0,
            },
            val_loss: None,
            val_diagnostics: None,
            fitness: 0.5,
            is_best: false,
            batches: 4,
            skipped_steps: 0,
            exhausted_early: false,
            elapsed_secs: 0.1,
        }
    }

    struct StopAfter(usize);

    impl TrainerCallback for StopAfter {
        fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackAction {
            if record.epoch + 1 >= self.0 {
                CallbackAction::Stop
            } else {
                CallbackAction::Continue
            }
        }
    }

    #[test]
    fn test_history_handles_share_records() {
        let history = MetricsHistory::new();
        let mut registered = history.clone();

        registered.on_epoch_end(&record(0, 1.0));
        registered.on_epoch_end(&record(1, 0.5));

        assert_eq!(history.len(), 2);
        assert_eq!(history.last().map(|r| r.epoch), Some(1));
    }

    #[test]
    fn test_manager_delivers_record_to_all_before_stopping() {
        let history = MetricsHistory::new();
        let mut manager = CallbackManager::new();
        manager.add(StopAfter(1));
        manager.add(history.clone());

        assert_eq!(manager.on_epoch_end(&record(0, 1.0)), CallbackAction::Stop);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_manager_continue_by_default() {
        let mut manager = CallbackManager::default();
        manager.add(ProgressLogger::new(10));
        assert_eq!(manager.len(), 1);

        let r = record(0, 1.0);
        assert_eq!(manager.on_epoch_begin(&r.plan), CallbackAction::Continue);
        assert_eq!(manager.on_epoch_end(&r), CallbackAction::Continue);
    }

    #[test]
    fn test_jsonl_sink_writes_one_line_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");

        let mut sink = JsonlMetricsSink::create(&path).unwrap();
        sink.on_epoch_end(&record(0, 2.0));
        sink.on_epoch_end(&record(1, 1.5));
        drop(sink);

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let parsed: EpochRecord = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(parsed, record(1, 1.5));
    }
}
