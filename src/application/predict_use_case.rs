// ============================================================
// Layer 2 — PredictUseCase
// ============================================================
// Rebuilds the trained model from an output directory and
// transcribes a dataset:
//
//   Step 1: Load train_config.json       (Layer 6 - infra)
//   Step 2: Rebuild + compile the model  (Layer 5 - ml)
//   Step 3: Load the best checkpoint     (Layer 5 - ml)
//   Step 4: Batch the records            (Layer 4 - data)
//   Step 5: predict → text via charset   (Layer 5 / Layer 3)

use std::{path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::train_use_case::{build_model, TrainConfig};
use crate::data::{
    batcher::{CtcBatcher, InferenceBatch},
    dataset::{HtrDataset, HtrSample},
    generator::DatasetBatches,
    loader::JsonlLoader,
};
use crate::domain::{
    charset::Charset,
    config::DecodeConfig,
    prediction::PredictOutput,
    traits::{BatchSequence, BatchSource},
};
use crate::infra::checkpoint;
use crate::ml::{
    ctc_model::{CtcModel, PredictOptions},
    network::HtrNetwork,
    TrainBackend,
};

pub(crate) type HtrModel = CtcModel<TrainBackend, HtrNetwork<TrainBackend>>;

/// A trained model together with the config and charset it was built from.
pub(crate) struct Restored {
    pub config:  TrainConfig,
    pub charset: Charset,
    pub model:   HtrModel,
}

/// Rebuild the network described in `output_dir` and load its best weights.
pub(crate) fn restore(output_dir: &str, decode: Option<DecodeConfig>) -> Result<Restored> {
    let mut config: TrainConfig = checkpoint::load_config(Path::new(output_dir))?;
    config.output_dir = output_dir.to_string();
    if let Some(decode) = decode {
        config.decode = decode;
    }

    let charset   = config.resolved_charset()?;
    let mut model = build_model(&config, &charset)?;
    let path      = config.checkpoint_path();
    if !model.load_checkpoint(&path)? {
        bail!("No checkpoint at '{}'. Have you run 'train' first?", path.display());
    }
    Ok(Restored { config, charset, model })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    pub output_dir:     String,
    pub data_path:      String,
    pub batch_size:     usize,
    pub workers:        usize,
    pub max_queue_size: usize,
    /// Overrides the decode settings saved at training time
    pub decode:         Option<DecodeConfig>,
}

/// Transcriptions of one example, best path first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub paths: Vec<String>,
}

impl Transcription {
    pub fn best(&self) -> &str {
        self.paths.first().map(String::as_str).unwrap_or("")
    }
}

pub struct PredictUseCase {
    config:   PredictConfig,
    restored: Restored,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Result<Self> {
        let restored = restore(&config.output_dir, config.decode)?;
        Ok(Self { config, restored })
    }

    pub fn charset(&self) -> &Charset {
        &self.restored.charset
    }

    /// Decode every record of the dataset, in file order.
    pub fn transcribe(&self) -> Result<Vec<Transcription>> {
        let output = self.run(false)?;
        let PredictOutput::Decoded(examples) = output else {
            bail!("Predict head returned raw output");
        };
        Ok(examples
            .into_iter()
            .map(|paths| Transcription {
                paths: paths.iter().map(|ids| self.restored.charset.decode(ids)).collect(),
            })
            .collect())
    }

    /// Undecoded network output, `[example][time][class]`.
    pub fn raw(&self) -> Result<Vec<Vec<Vec<f32>>>> {
        match self.run(true)? {
            PredictOutput::Raw(raw) => Ok(raw),
            PredictOutput::Decoded(_) => bail!("RawPredict head returned decoded output"),
        }
    }

    fn run(&self, raw_returns: bool) -> Result<PredictOutput> {
        let cfg = &self.config;

        // Transcriptions, if present, are not needed to predict
        let samples: Vec<HtrSample> = JsonlLoader::new(&cfg.data_path)
            .load_records()
            .with_context(|| format!("Cannot load data '{}'", cfg.data_path))?
            .into_iter()
            .map(|r| HtrSample::new(r.features, Vec::new()))
            .collect::<std::result::Result<_, _>>()
            .context("Malformed feature rows")?;
        if samples.is_empty() {
            return Ok(if raw_returns { PredictOutput::Raw(Vec::new()) } else { PredictOutput::Decoded(Vec::new()) });
        }
        if let Some(bad) = samples.iter().find(|s| s.num_features() != self.restored.config.num_features) {
            bail!(
                "Data has {} features per step, the model expects {}",
                bad.num_features(), self.restored.config.num_features
            );
        }

        let batches = DatasetBatches::<TrainBackend, InferenceBatch<TrainBackend>>::new(
            Arc::new(HtrDataset::new(samples)),
            CtcBatcher::new(Default::default()),
            cfg.batch_size,
        );
        let options = PredictOptions {
            steps:          batches.steps_per_epoch(),
            workers:        cfg.workers,
            max_queue_size: cfg.max_queue_size,
            raw_returns,
            verbose:        true,
            ..PredictOptions::default()
        };
        let sequence: Arc<dyn BatchSequence<InferenceBatch<TrainBackend>>> = Arc::new(batches);

        tracing::info!("Predicting {} batches from '{}'", options.steps, cfg.data_path);
        self.restored
            .model
            .predict(BatchSource::Sequence(sequence), &options)
            .context("Prediction failed")
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::{
        fixtures::{scratch, write_dataset},
        TrainUseCase,
    };

    fn trained(name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir  = scratch(name);
        let data = write_dataset(&dir, "train.jsonl", &["ab", "ba", "a", "bb"]);
        let cfg  = TrainConfig {
            train_path:  data.display().to_string(),
            output_dir:  dir.join("out").display().to_string(),
            batch_size:  2,
            epochs:      1,
            hidden_size: 8,
            dropout:     0.0,
            ..TrainConfig::default()
        };
        TrainUseCase::new(cfg).execute().unwrap();
        (dir.join("out"), data)
    }

    fn predict_config(out: &Path, data: &Path) -> PredictConfig {
        PredictConfig {
            output_dir:     out.display().to_string(),
            data_path:      data.display().to_string(),
            batch_size:     3,
            workers:        2,
            max_queue_size: 2,
            decode:         Some(DecodeConfig::greedy()),
        }
    }

    #[test]
    fn test_transcribes_every_record() {
        let (out, data) = trained("predict-all");
        let use_case = PredictUseCase::new(predict_config(&out, &data)).unwrap();

        let lines = use_case.transcribe().unwrap();
        assert_eq!(lines.len(), 4);
        for line in &lines {
            assert_eq!(line.paths.len(), 1);
            assert!(line.best().chars().all(|c| c == 'a' || c == 'b'));
        }
    }

    #[test]
    fn test_raw_output_has_one_matrix_per_record() {
        let (out, data) = trained("predict-raw");
        let use_case = PredictUseCase::new(predict_config(&out, &data)).unwrap();

        let raw = use_case.raw().unwrap();
        assert_eq!(raw.len(), 4);
        // charset "ab" + blank
        assert!(raw.iter().all(|m| m.iter().all(|row| row.len() == 3)));
    }

    #[test]
    fn test_missing_output_dir_fails() {
        let dir = scratch("predict-missing");
        let cfg = predict_config(&dir.join("nowhere"), &dir.join("data.jsonl"));
        assert!(PredictUseCase::new(cfg).is_err());
    }
}
