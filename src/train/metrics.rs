//! Per-batch and per-epoch classification diagnostics
//!
//! Counts are accumulated across batches and only turned into rates at the
//! end of an epoch, so the epoch figures do not depend on batch boundaries.

use super::EpochPlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Summary of one finished epoch, handed to callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub plan: EpochPlan,
    pub lr: f32,
    pub momentum: f32,
    /// Mean training loss over the applied optimizer steps
    pub loss: f32,
    pub diagnostics: Diagnostics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_diagnostics: Option<Diagnostics>,
    /// Validation fitness when available, otherwise training fitness
    pub fitness: f32,
    pub is_best: bool,
    pub batches: usize,
    pub skipped_steps: usize,
    pub exhausted_early: bool,
    pub elapsed_secs: f64,
}

/// Precision, recall and F1 of a single class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// Reduced diagnostics reported alongside the loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostics {
    /// Cross-entropy mode
    TopK { top1: f32, top5: f32 },
    /// Binary cross-entropy mode, keyed by class index
    PerClass(BTreeMap<usize, ClassScores>),
}

impl Diagnostics {
    /// Scalar used to rank checkpoints: top-1 accuracy or mean F1
    pub fn fitness(&self) -> f32 {
        match self {
            Diagnostics::TopK { top1, .. } => *top1,
            Diagnostics::PerClass(scores) => {
                if scores.is_empty() {
                    0.0
                } else {
                    scores.values().map(|s| s.f1).sum::<f32>() / scores.len() as f32
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl ClassCounts {
    pub fn scores(&self) -> ClassScores {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f32 / den as f32 };
        let precision = ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        );
        let recall = ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        );
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassScores {
            precision,
            recall,
            f1,
        }
    }
}

/// Raw counts behind [`Diagnostics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagnosticCounts {
    TopK {
        top1: usize,
        top5: usize,
        total: usize,
    },
    PerClass(Vec<ClassCounts>),
}

impl DiagnosticCounts {
    pub fn empty_top_k() -> Self {
        DiagnosticCounts::TopK {
            top1: 0,
            top5: 0,
            total: 0,
        }
    }

    pub fn empty_per_class(num_classes: usize) -> Self {
        DiagnosticCounts::PerClass(vec![ClassCounts::default(); num_classes])
    }

    /// Add the counts of another batch of the same kind
    pub fn merge(&mut self, other: &DiagnosticCounts) {
        match (self, other) {
            (
                DiagnosticCounts::TopK { top1, top5, total },
                DiagnosticCounts::TopK {
                    top1: t1,
                    top5: t5,
                    total: n,
                },
            ) => {
                *top1 += t1;
                *top5 += t5;
                *total += n;
            }
            (DiagnosticCounts::PerClass(mine), DiagnosticCounts::PerClass(theirs)) => {
                if mine.len() < theirs.len() {
                    mine.resize(theirs.len(), ClassCounts::default());
                }
                for (m, t) in mine.iter_mut().zip(theirs) {
                    m.true_positives += t.true_positives;
                    m.false_positives += t.false_positives;
                    m.false_negatives += t.false_negatives;
                }
            }
            _ => tracing::debug!("ignoring diagnostics of a different loss mode"),
        }
    }

    pub fn finish(&self) -> Diagnostics {
        match self {
            DiagnosticCounts::TopK { top1, top5, total } => {
                let rate = |hits: usize| {
                    if *total == 0 {
                        0.0
                    } else {
                        hits as f32 / *total as f32
                    }
                };
                Diagnostics::TopK {
                    top1: rate(*top1),
                    top5: rate(*top5),
                }
            }
            DiagnosticCounts::PerClass(counts) => Diagnostics::PerClass(
                counts
                    .iter()
                    .enumerate()
                    .map(|(class, c)| (class, c.scores()))
                    .collect(),
            ),
        }
    }
}
