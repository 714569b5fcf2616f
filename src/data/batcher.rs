// ============================================================
// Layer 4 — CTC Batcher
// ============================================================
// Implements Burn's Batcher trait to stack HtrSamples into the two
// batch layouts the adapter consumes:
//
//   CtcBatch       — (features, labels, input_lengths, label_lengths)
//                    used by the Train head, fit() and get_loss()
//   InferenceBatch — (features, input_lengths)
//                    used by the Predict and RawPredict heads
//
// Samples have different lengths, so the batcher pads dynamically:
//   features: zero rows appended up to the longest sequence
//             → [batch, max_time, num_features]
//   labels:   the sentinel -1 appended up to the longest label
//             → [batch, max(max_label_len, 1)]
//
// input_lengths / label_lengths keep the true (unpadded) lengths.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::{backend::AutodiffBackend, TensorData},
};

use crate::data::dataset::HtrSample;
use crate::domain::prediction::PADDING;

// ─── CtcBatch ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct CtcBatch<B: Backend> {
    /// [batch_size, max_time, num_features]
    pub features: Tensor<B, 3>,

    /// [batch_size, max_label_len], padded with -1
    pub labels: Tensor<B, 2, Int>,

    /// [batch_size]
    pub input_lengths: Tensor<B, 1, Int>,

    /// [batch_size]
    pub label_lengths: Tensor<B, 1, Int>,
}

impl<B: Backend> CtcBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.features.dims()[0]
    }

    /// Drop the label half of the batch.
    pub fn inference(&self) -> InferenceBatch<B> {
        InferenceBatch {
            features:      self.features.clone(),
            input_lengths: self.input_lengths.clone(),
        }
    }
}

// ─── InferenceBatch ───────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct InferenceBatch<B: Backend> {
    /// [batch_size, max_time, num_features]
    pub features: Tensor<B, 3>,

    /// [batch_size]
    pub input_lengths: Tensor<B, 1, Int>,
}

impl<B: Backend> InferenceBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.features.dims()[0]
    }
}

// Evaluation runs on the inner backend, without gradient tracking.
impl<B: AutodiffBackend> CtcBatch<B> {
    pub fn inner(&self) -> CtcBatch<B::InnerBackend> {
        CtcBatch {
            features:      self.features.clone().inner(),
            labels:        self.labels.clone().inner(),
            input_lengths: self.input_lengths.clone().inner(),
            label_lengths: self.label_lengths.clone().inner(),
        }
    }
}

impl<B: AutodiffBackend> InferenceBatch<B> {
    pub fn inner(&self) -> InferenceBatch<B::InnerBackend> {
        InferenceBatch {
            features:      self.features.clone().inner(),
            input_lengths: self.input_lengths.clone().inner(),
        }
    }
}

// ─── CtcBatcher ───────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct CtcBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> CtcBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Zero-pad every sample to the longest sequence and widest row,
    /// returning the features tensor and the true input lengths.
    fn stack_features(&self, items: &[HtrSample]) -> (Tensor<B, 3>, Vec<i64>) {
        let batch_size   = items.len();
        let max_time     = items.iter().map(HtrSample::input_length).max().unwrap_or(0).max(1);
        let num_features = items.iter().map(HtrSample::num_features).max().unwrap_or(0).max(1);

        let mut flat = vec![0.0f32; batch_size * max_time * num_features];
        for (b, sample) in items.iter().enumerate() {
            for (t, row) in sample.features().iter().enumerate() {
                let offset = (b * max_time + t) * num_features;
                flat[offset..offset + row.len()].copy_from_slice(row);
            }
        }

        let features = Tensor::<B, 3>::from_data(
            TensorData::new(flat, [batch_size, max_time, num_features]),
            &self.device,
        );
        let lengths = items.iter().map(|s| s.input_length() as i64).collect();
        (features, lengths)
    }

    fn lengths_tensor(&self, lengths: Vec<i64>) -> Tensor<B, 1, Int> {
        let n = lengths.len();
        Tensor::<B, 1, Int>::from_data(TensorData::new(lengths, [n]), &self.device)
    }
}

impl<B: Backend> Batcher<HtrSample, CtcBatch<B>> for CtcBatcher<B> {
    fn batch(&self, items: Vec<HtrSample>) -> CtcBatch<B> {
        let batch_size = items.len();
        let (features, input_lengths) = self.stack_features(&items);

        // At least one label column so an all-unlabelled batch stays a valid tensor
        let max_label = items.iter().map(HtrSample::label_length).max().unwrap_or(0).max(1);

        let mut labels = vec![PADDING; batch_size * max_label];
        for (b, sample) in items.iter().enumerate() {
            for (i, &token) in sample.label().iter().enumerate() {
                labels[b * max_label + i] = token as i64;
            }
        }
        let label_lengths: Vec<i64> = items.iter().map(|s| s.label_length() as i64).collect();

        CtcBatch {
            features,
            labels: Tensor::<B, 2, Int>::from_data(
                TensorData::new(labels, [batch_size, max_label]),
                &self.device,
            ),
            input_lengths: self.lengths_tensor(input_lengths),
            label_lengths: self.lengths_tensor(label_lengths),
        }
    }
}

impl<B: Backend> Batcher<HtrSample, InferenceBatch<B>> for CtcBatcher<B> {
    fn batch(&self, items: Vec<HtrSample>) -> InferenceBatch<B> {
        let (features, input_lengths) = self.stack_features(&items);
        InferenceBatch {
            features,
            input_lengths: self.lengths_tensor(input_lengths),
        }
    }
}
