//! Classification scores.

use serde::{Deserialize, Serialize};

/// How per-sample correctness is aggregated by `evaluate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Averaging {
    /// Plain accuracy over all samples.
    #[default]
    Micro,
    /// Unweighted mean of per-label F1 scores.
    Macro,
}

/// Fraction of positions where `pred` equals `truth`. Empty input scores 0.
///
/// Both slices must have the same length; in release builds only the common
/// prefix is scored.
pub fn accuracy(pred: &[usize], truth: &[usize]) -> f64 {
    debug_assert_eq!(pred.len(), truth.len(), "prediction/truth length mismatch");
    let n = pred.len().min(truth.len());
    if n == 0 {
        return 0.0;
    }
    let correct = pred.iter().zip(truth).filter(|(p, t)| p == t).count();
    correct as f64 / n as f64
}

/// Macro-averaged F1 over the labels that occur in either `pred` or `truth`.
pub fn macro_f1(pred: &[usize], truth: &[usize], num_labels: usize) -> f64 {
    let mut tp = vec![0usize; num_labels];
    let mut fp = vec![0usize; num_labels];
    let mut fn_ = vec![0usize; num_labels];

    for (&p, &t) in pred.iter().zip(truth) {
        if p >= num_labels || t >= num_labels {
            continue;
        }
        if p == t {
            tp[p] += 1;
        } else {
            fp[p] += 1;
            fn_[t] += 1;
        }
    }

    let mut total = 0.0;
    let mut present = 0usize;
    for k in 0..num_labels {
        let support = tp[k] + fp[k] + fn_[k];
        if support == 0 {
            continue;
        }
        present += 1;
        total += 2.0 * tp[k] as f64 / (2 * tp[k] + fp[k] + fn_[k]) as f64;
    }

    if present == 0 {
        0.0
    } else {
        total / present as f64
    }
}

/// Score `pred` against `truth` with the requested averaging.
pub fn score(pred: &[usize], truth: &[usize], num_labels: usize, averaging: Averaging) -> f64 {
    match averaging {
        Averaging::Micro => accuracy(pred, truth),
        Averaging::Macro => macro_f1(pred, truth, num_labels),
    }
}
