// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a trained model on a labelled dataset:
//
//   loss — mean per-example CTC loss over the batches get_loss
//          accepts (a batch with any empty label is skipped whole)
//   CER  — character error rate of the best decode path:
//          total edit distance / total reference length

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::predict_use_case::{restore, Restored};
use crate::data::{
    batcher::{CtcBatch, CtcBatcher},
    dataset::HtrDataset,
    generator::DatasetBatches,
    loader::JsonlLoader,
};
use crate::domain::{config::DecodeConfig, traits::BatchSequence};
use crate::ml::TrainBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateConfig {
    pub output_dir: String,
    pub data_path:  String,
    pub batch_size: usize,
    pub decode:     Option<DecodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub examples:        usize,
    pub batches:         usize,
    pub skipped_batches: usize,
    /// None when every batch was skipped
    pub mean_loss:       Option<f64>,
    pub cer:             f64,
}

pub struct EvaluateUseCase {
    config:   EvaluateConfig,
    restored: Restored,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Result<Self> {
        let restored = restore(&config.output_dir, config.decode)?;
        Ok(Self { config, restored })
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        let cfg     = &self.config;
        let charset = &self.restored.charset;
        let model   = &self.restored.model;

        let samples = JsonlLoader::new(&cfg.data_path)
            .load_samples(charset)
            .with_context(|| format!("Cannot load evaluation data '{}'", cfg.data_path))?;
        let references: Vec<Vec<u32>> = samples.iter().map(|s| s.label().to_vec()).collect();

        let batches = DatasetBatches::<TrainBackend, CtcBatch<TrainBackend>>::new(
            Arc::new(HtrDataset::new(samples)),
            CtcBatcher::new(Default::default()),
            cfg.batch_size,
        );

        let mut loss_sum  = 0.0f64;
        let mut loss_n    = 0usize;
        let mut skipped   = 0usize;
        let mut edits     = 0usize;
        let mut reference = 0usize;
        let mut seen      = 0usize;

        for index in 0..batches.len() {
            let batch = batches.get(index)?;
            match model.get_loss(&batch)? {
                Some(report) => {
                    loss_sum += report.total as f64;
                    loss_n   += report.per_example.len();
                }
                None => skipped += 1,
            }

            let predicted = model.predict_on_batch(&batch.inference())?;
            for (best, truth) in predicted.best_paths().into_iter().zip(&references[seen..]) {
                edits     += edit_distance(best, truth);
                reference += truth.len();
            }
            seen += batch.batch_size();
            tracing::debug!(index, "evaluated batch");
        }

        let report = EvaluationReport {
            examples:        seen,
            batches:         batches.len(),
            skipped_batches: skipped,
            mean_loss:       (loss_n > 0).then(|| loss_sum / loss_n as f64),
            cer:             if reference > 0 { edits as f64 / reference as f64 } else { 0.0 },
        };
        tracing::info!(
            "Evaluated {} examples: loss={:?} cer={:.4} ({} batches skipped)",
            report.examples, report.mean_loss, report.cer, report.skipped_batches
        );
        Ok(report)
    }
}

/// Levenshtein distance between two token sequences.
pub fn edit_distance(a: &[u32], b: &[u32]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current  = vec![0usize; b.len() + 1];

    for (i, x) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitute = previous[j] + usize::from(x != y);
            current[j + 1] = substitute.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
