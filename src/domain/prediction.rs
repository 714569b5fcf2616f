// ============================================================
// Layer 3 — Predictions and Loss Reports
// ============================================================
// Dense decode output pads every sequence to the longest one in the
// batch with the sentinel -1. Consumers strip the sentinel before
// turning ids into text.

use serde::{Deserialize, Serialize};

/// Padding sentinel used for labels and dense decode output.
pub const PADDING: i64 = -1;

/// Remove the padding sentinel from dense rows, keeping token order.
///
/// Dense decode rows are `f32` (the Predict head casts its output),
/// so values are compared after rounding to the nearest integer.
pub fn strip_padding(rows: &[Vec<f32>]) -> Vec<Vec<u32>> {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|&v| v.round() as i64)
                .filter(|&v| v != PADDING)
                .map(|v| v as u32)
                .collect()
        })
        .collect()
}

/// Output of `predict_on_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPrediction {
    /// `predictions[example][path]` — decoded token ids, padding removed
    pub predictions:   Vec<Vec<Vec<u32>>>,
    /// `probabilities[example][path]` — exp of the path log-probability;
    /// index 0 is the best path
    pub probabilities: Vec<Vec<f32>>,
}

impl BatchPrediction {
    pub fn batch_size(&self) -> usize {
        self.predictions.len()
    }

    /// Best decode path of every example.
    pub fn best_paths(&self) -> Vec<&[u32]> {
        self.predictions
            .iter()
            .map(|paths| paths.first().map(Vec::as_slice).unwrap_or(&[]))
            .collect()
    }
}

/// Accumulated output of `predict` over many batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PredictOutput {
    /// `[example][path][token]`
    Decoded(Vec<Vec<Vec<u32>>>),
    /// `[example][time][class]` — the untouched network output
    Raw(Vec<Vec<Vec<f32>>>),
}

impl PredictOutput {
    pub fn len(&self) -> usize {
        match self {
            PredictOutput::Decoded(v) => v.len(),
            PredictOutput::Raw(v)     => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of `get_loss` for a fully labelled batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub total:       f32,
    pub per_example: Vec<f32>,
}

impl LossReport {
    pub fn new(per_example: Vec<f32>) -> Self {
        let total = per_example.iter().sum();
        Self { total, per_example }
    }

    pub fn mean(&self) -> f32 {
        if self.per_example.is_empty() {
            0.0
        } else {
            self.total / self.per_example.len() as f32
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_padding_scenario() {
        let dense = vec![
            vec![2.0, 5.0, -1.0, -1.0],
            vec![1.0, -1.0, -1.0, -1.0],
        ];
        assert_eq!(strip_padding(&dense), vec![vec![2, 5], vec![1]]);
    }

    #[test]
    fn test_strip_padding_keeps_order_between_sentinels() {
        let dense = vec![vec![-1.0, 3.0, -1.0, 0.0, 7.0, -1.0]];
        assert_eq!(strip_padding(&dense), vec![vec![3, 0, 7]]);
    }

    #[test]
    fn test_strip_padding_all_padding() {
        let dense = vec![vec![-1.0, -1.0]];
        assert_eq!(strip_padding(&dense), vec![Vec::<u32>::new()]);
    }

    #[test]
    fn test_loss_report_total() {
        let report = LossReport::new(vec![1.5, 2.5]);
        assert_eq!(report.total, 4.0);
        assert_eq!(report.mean(), 2.0);
    }

    #[test]
    fn test_best_paths() {
        let pred = BatchPrediction {
            predictions:   vec![vec![vec![1, 2], vec![1]], vec![vec![]]],
            probabilities: vec![vec![0.6, 0.3], vec![0.9]],
        };
        assert_eq!(pred.best_paths(), vec![&[1u32, 2][..], &[][..]]);
    }
}
