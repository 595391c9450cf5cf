//! Loss composition
//!
//! A [`LossComposer`] turns logits and (possibly mixed) targets into a scalar
//! loss, the gradient of that loss with respect to the logits, and the raw
//! diagnostic counts for the batch.
//!
//! Two families are supported, selected by [`LossMode`]:
//! - Softmax cross-entropy with label smoothing and optional hard example mining
//! - Sigmoid binary cross-entropy with label smoothing and optional focal reweighting

use super::metrics::{ClassCounts, DiagnosticCounts, Diagnostics};
use super::mixup::MixedTargets;
use super::Targets;
use crate::config::{FocalConfig, LossMode, OhemConfig, TrainingConfig};
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};

/// Loss, logit gradient and diagnostics of one batch
#[derive(Debug, Clone, PartialEq)]
pub struct LossTerms {
    pub loss: f32,
    /// d loss / d logits, `[batch, num_classes]`
    pub grad: Array2<f32>,
    pub counts: DiagnosticCounts,
    /// Samples contributing to the loss of `targets_a`
    pub kept_samples: usize,
}

impl LossTerms {
    pub fn diagnostics(&self) -> Diagnostics {
        self.counts.finish()
    }
}

/// Result of one branch on one target set
struct BranchLoss {
    loss: f32,
    grad: Array2<f32>,
    kept: usize,
}

/// Assembles the active loss terms for the configured [`LossMode`]
#[derive(Debug, Clone)]
pub struct LossComposer {
    mode: LossMode,
    num_classes: usize,
}

impl LossComposer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self::with_mode(config.loss, config.num_classes)
    }

    pub fn with_mode(mode: LossMode, num_classes: usize) -> Self {
        Self { mode, num_classes }
    }

    pub fn mode(&self) -> &LossMode {
        &self.mode
    }

    /// Zeroed counts of the kind [`compute`](Self::compute) produces
    pub fn empty_counts(&self) -> DiagnosticCounts {
        if self.mode.is_cross_entropy() {
            DiagnosticCounts::empty_top_k()
        } else {
            DiagnosticCounts::empty_per_class(self.num_classes)
        }
    }

    /// Compute the loss of `logits` against `targets`
    ///
    /// Mixed targets are scored independently, each with the full policy of
    /// the active branch, and blended as `λ·L_a + (1-λ)·L_b`. Diagnostics are
    /// always taken against `targets_a`.
    pub fn compute(&self, logits: &Array2<f32>, targets: &MixedTargets) -> Result<LossTerms> {
        if logits.ncols() != self.num_classes || logits.nrows() != targets.targets_a.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![targets.targets_a.len(), self.num_classes],
                got: logits.shape().to_vec(),
            });
        }

        let a = self.branch(logits, &targets.targets_a)?;
        let counts = self.diagnose(logits, &targets.targets_a)?;

        if targets.is_identity() {
            return Ok(LossTerms {
                loss: a.loss,
                grad: a.grad,
                counts,
                kept_samples: a.kept,
            });
        }

        let lambda = targets.lambda;
        let b = self.branch(logits, &targets.targets_b)?;
        Ok(LossTerms {
            loss: lambda * a.loss + (1.0 - lambda) * b.loss,
            grad: a.grad * lambda + b.grad * (1.0 - lambda),
            counts,
            kept_samples: a.kept,
        })
    }

    fn branch(&self, logits: &Array2<f32>, targets: &Targets) -> Result<BranchLoss> {
        if logits.nrows() == 0 {
            return Ok(BranchLoss {
                loss: 0.0,
                grad: Array2::zeros(logits.raw_dim()),
                kept: 0,
            });
        }

        match self.mode {
            LossMode::CrossEntropy {
                label_smoothing,
                ohem,
            } => {
                let classes = class_indices(targets);
                self.cross_entropy(logits, &classes, label_smoothing, ohem.as_ref())
            }
            LossMode::BinaryCrossEntropy {
                label_smoothing,
                focal,
                ..
            } => {
                let dense = targets.to_dense(self.num_classes)?;
                Ok(self.binary_cross_entropy(logits, &dense, label_smoothing, focal.as_ref()))
            }
        }
    }

    fn cross_entropy(
        &self,
        logits: &Array2<f32>,
        classes: &[usize],
        label_smoothing: f32,
        ohem: Option<&OhemConfig>,
    ) -> Result<BranchLoss> {
        let num_classes = self.num_classes;
        let off_target = label_smoothing / num_classes as f32;
        let on_target = 1.0 - label_smoothing + off_target;

        let mut valid = Vec::with_capacity(classes.len());
        for (index, &class) in classes.iter().enumerate() {
            if ohem.is_some_and(|o| o.ignores(class)) {
                continue;
            }
            if class >= num_classes {
                return Err(Error::InvalidTarget {
                    index,
                    class,
                    num_classes,
                });
            }
            valid.push(index);
        }

        let probs = softmax_rows(logits);
        let mut per_sample = Array1::<f32>::zeros(classes.len());
        for &i in &valid {
            let row = logits.row(i);
            let lse = log_sum_exp(row);
            per_sample[i] = row
                .iter()
                .enumerate()
                .map(|(j, &z)| {
                    let q = if j == classes[i] { on_target } else { off_target };
                    -q * (z - lse)
                })
                .sum();
        }

        let kept: Vec<usize> = match ohem {
            None => valid,
            Some(ohem) => {
                let hard = valid
                    .iter()
                    .filter(|&&i| probs[[i, classes[i]]] < ohem.prob_threshold)
                    .count();
                let keep = ohem.min_kept.max(hard).min(valid.len());

                let mut ranked = valid;
                ranked.sort_by(|&x, &y| per_sample[y].total_cmp(&per_sample[x]));
                ranked.truncate(keep);
                ranked
            }
        };

        let mut grad = Array2::zeros(logits.raw_dim());
        if kept.is_empty() {
            return Ok(BranchLoss {
                loss: 0.0,
                grad,
                kept: 0,
            });
        }

        let scale = 1.0 / kept.len() as f32;
        let loss = kept.iter().map(|&i| per_sample[i]).sum::<f32>() * scale;
        for &i in &kept {
            let mut row = grad.row_mut(i);
            row.assign(&probs.row(i));
            row.mapv_inplace(|p| p - off_target);
            row[classes[i]] -= on_target - off_target;
            row *= scale;
        }

        Ok(BranchLoss {
            loss,
            grad,
            kept: kept.len(),
        })
    }

    fn binary_cross_entropy(
        &self,
        logits: &Array2<f32>,
        targets: &Array2<f32>,
        label_smoothing: f32,
        focal: Option<&FocalConfig>,
    ) -> BranchLoss {
        let off_target = label_smoothing / self.num_classes as f32;
        let smoothed = targets.mapv(|y| y * (1.0 - label_smoothing) + off_target);
        let mut loss = Array2::<f32>::zeros(logits.raw_dim());
        let mut grad = Array2::<f32>::zeros(logits.raw_dim());

        Zip::from(&mut loss)
            .and(&mut grad)
            .and(logits)
            .and(&smoothed)
            .for_each(|l, g, &z, &y| {
                let p = sigmoid(z);
                // max(z, 0) - z*y + ln(1 + e^-|z|)
                let bce = z.max(0.0) - z * y + (-z.abs()).exp().ln_1p();

                match focal {
                    None => {
                        *l = bce;
                        *g = p - y;
                    }
                    Some(focal) => {
                        let p_t = y * p + (1.0 - y) * (1.0 - p);
                        let easy = (1.0 - p_t).max(0.0);
                        let weight = focal.alpha * easy.powf(focal.gamma);
                        let d_weight = if focal.gamma == 0.0 {
                            0.0
                        } else {
                            let d_pt = (2.0 * y - 1.0) * p * (1.0 - p);
                            -focal.alpha
                                * focal.gamma
                                * easy.max(1e-12).powf(focal.gamma - 1.0)
                                * d_pt
                        };
                        *l = weight * bce;
                        *g = weight * (p - y) + bce * d_weight;
                    }
                }
            });

        let scale = 1.0 / logits.len() as f32;
        grad *= scale;
        BranchLoss {
            loss: loss.sum() * scale,
            grad,
            kept: logits.nrows(),
        }
    }

    fn diagnose(&self, logits: &Array2<f32>, targets: &Targets) -> Result<DiagnosticCounts> {
        match self.mode {
            LossMode::CrossEntropy { ohem, .. } => {
                let k = self.num_classes.min(5);
                let (mut top1, mut top5, mut total) = (0, 0, 0);

                for (i, class) in class_indices(targets).into_iter().enumerate() {
                    if ohem.is_some_and(|o| o.ignores(class)) || class >= self.num_classes {
                        continue;
                    }
                    let row = logits.row(i);
                    let target_score = row[class];
                    let rank = row.iter().filter(|&&z| z > target_score).count();
                    top1 += usize::from(rank < 1);
                    top5 += usize::from(rank < k);
                    total += 1;
                }
                Ok(DiagnosticCounts::TopK { top1, top5, total })
            }
            LossMode::BinaryCrossEntropy {
                multi_label,
                threshold,
                ..
            } => {
                let dense = targets.to_dense(self.num_classes)?;
                let mut counts = vec![ClassCounts::default(); self.num_classes];

                for (row, truth) in logits.axis_iter(Axis(0)).zip(dense.axis_iter(Axis(0))) {
                    if multi_label {
                        for (class, c) in counts.iter_mut().enumerate() {
                            let predicted = sigmoid(row[class]) >= threshold;
                            let actual = truth[class] >= 0.5;
                            tally(c, predicted, actual);
                        }
                    } else {
                        let predicted = argmax(row);
                        let actual = argmax(truth);
                        for (class, c) in counts.iter_mut().enumerate() {
                            tally(c, predicted == class, actual == class);
                        }
                    }
                }
                Ok(DiagnosticCounts::PerClass(counts))
            }
        }
    }
}

fn tally(counts: &mut ClassCounts, predicted: bool, actual: bool) {
    match (predicted, actual) {
        (true, true) => counts.true_positives += 1,
        (true, false) => counts.false_positives += 1,
        (false, true) => counts.false_negatives += 1,
        (false, false) => {}
    }
}

/// Class index per sample; multi-hot rows reduce to their strongest class
fn class_indices(targets: &Targets) -> Vec<usize> {
    match targets {
        Targets::Classes(classes) => classes.clone(),
        Targets::MultiHot(labels) => labels.axis_iter(Axis(0)).map(argmax).collect(),
    }
}

fn argmax(row: ArrayView1<'_, f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}

fn log_sum_exp(row: ArrayView1<'_, f32>) -> f32 {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    max + row.iter().map(|&z| (z - max).exp()).sum::<f32>().ln()
}

fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|z| (z - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    probs
}

fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
