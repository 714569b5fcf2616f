use burn::data::dataset::Dataset;
use serde::Serialize;

use crate::domain::error::{CtcError, Result};

/// One handwritten line: a `[time, features]` matrix and its token label.
/// Unlabelled samples (inference data) carry an empty label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HtrSample {
    features: Vec<Vec<f32>>,
    label:    Vec<u32>,
}

impl HtrSample {
    /// Every row must have the same number of features.
    pub fn new(features: Vec<Vec<f32>>, label: Vec<u32>) -> Result<Self> {
        let width = features.first().map_or(0, Vec::len);
        if let Some((t, row)) = features.iter().enumerate().find(|(_, row)| row.len() != width) {
            return Err(CtcError::BatchShape(format!(
                "timestep {t} has {} features, expected {width}", row.len()
            )));
        }
        Ok(Self { features, label })
    }

    pub fn features(&self) -> &[Vec<f32>] {
        &self.features
    }

    pub fn label(&self) -> &[u32] {
        &self.label
    }

    /// Number of timesteps.
    pub fn input_length(&self) -> usize {
        self.features.len()
    }

    pub fn label_length(&self) -> usize {
        self.label.len()
    }

    /// Feature dimension (0 for an empty sequence).
    pub fn num_features(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }
}

pub struct HtrDataset {
    samples: Vec<HtrSample>,
}

impl HtrDataset {
    pub fn new(samples: Vec<HtrSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }

    pub fn samples(&self) -> &[HtrSample] { &self.samples }
}

impl Dataset<HtrSample> for HtrDataset {
    fn get(&self, index: usize) -> Option<HtrSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_rows_rejected() {
        let wider_last = HtrSample::new(vec![vec![1.0], vec![2.0, 3.0]], vec![]);
        assert!(matches!(wider_last, Err(CtcError::BatchShape(_))));

        let wider_middle = HtrSample::new(vec![vec![1.0], vec![2.0, 3.0], vec![4.0]], vec![0]);
        assert!(matches!(wider_middle, Err(CtcError::BatchShape(_))));
    }

    #[test]
    fn test_uniform_rows_accepted() {
        let sample = HtrSample::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]], vec![1]).unwrap();
        assert_eq!(sample.num_features(), 2);
        assert_eq!(sample.input_length(), 2);
        assert_eq!(sample.label(), &[1]);

        let empty = HtrSample::new(Vec::new(), Vec::new()).unwrap();
        assert_eq!(empty.num_features(), 0);
    }
}
