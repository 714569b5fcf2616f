// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Load training records        (Layer 4 - data)
//   Step 2: Resolve the charset          (Layer 3 - domain)
//   Step 3: Encode samples               (Layer 4 - data)
//   Step 4: Validation set or split      (Layer 4 - data)
//   Step 5: Save resolved config         (Layer 6 - infra)
//   Step 6: Build + compile the model    (Layer 5 - ml)
//   Step 7: Resume from checkpoint       (Layer 5 - ml)
//   Step 8: fit with default callbacks   (Layer 5 - ml)

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use burn::optim::AdamConfig;
use serde::{Deserialize, Serialize};

use crate::data::{
    batcher::{CtcBatch, CtcBatcher},
    dataset::{HtrDataset, HtrSample},
    generator::DatasetBatches,
    loader::{charset_from_records, JsonlLoader},
    splitter::split_train_val,
};
use crate::domain::{
    charset::Charset,
    config::DecodeConfig,
    traits::{BatchSequence, BatchSource},
};
use crate::infra::checkpoint;
use crate::ml::{
    callbacks::default_callbacks,
    ctc_model::{CtcModel, FitOptions, History},
    network::{HtrNetwork, HtrNetworkConfig},
    TrainBackend,
};

pub const SUMMARY_FILE: &str = "summary.txt";

// ─── Training Configuration ──────────────────────────────────────────────────
// Saved next to the weights with the resolved charset and feature width,
// so prediction can rebuild the exact same network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_path:      String,
    pub val_path:        Option<String>,
    pub output_dir:      String,
    pub checkpoint_name: String,
    /// Ordered characters; derived from the training transcriptions when None
    pub charset:         Option<String>,
    pub num_features:    usize,
    pub batch_size:      usize,
    pub epochs:          usize,
    pub lr:              f64,
    pub hidden_size:     usize,
    pub dropout:         f64,
    pub train_fraction:  f64,
    pub monitor:         String,
    pub decode:          DecodeConfig,
    pub workers:         usize,
    pub max_queue_size:  usize,
    pub seed:            u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_path:      "data/train.jsonl".to_string(),
            val_path:        None,
            output_dir:      "outputs".to_string(),
            checkpoint_name: "checkpoint_weights".to_string(),
            charset:         None,
            num_features:    0,
            batch_size:      16,
            epochs:          1000,
            lr:              1e-3,
            hidden_size:     128,
            dropout:         0.2,
            train_fraction:  0.9,
            monitor:         "val_loss".to_string(),
            decode:          DecodeConfig::default(),
            workers:         1,
            max_queue_size:  10,
            seed:            42,
        }
    }
}

impl TrainConfig {
    pub fn checkpoint_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir).join(&self.checkpoint_name)
    }

    pub fn network_config(&self, num_classes: usize) -> HtrNetworkConfig {
        HtrNetworkConfig::new(self.num_features, num_classes)
            .with_hidden_size(self.hidden_size)
            .with_dropout(self.dropout)
    }

    pub fn resolved_charset(&self) -> Result<Charset> {
        match self.charset.as_deref() {
            Some(chars) if !chars.is_empty() => Ok(Charset::new(chars)),
            _ => bail!("Config for '{}' has no charset", self.output_dir),
        }
    }
}

/// Build a compiled model from a resolved config.
pub(crate) fn build_model(cfg: &TrainConfig, charset: &Charset) -> Result<CtcModel<TrainBackend, HtrNetwork<TrainBackend>>> {
    let device  = Default::default();
    let network = cfg.network_config(charset.num_classes()).init::<TrainBackend>(&device);
    let (input, output) = (network.input_node(), network.output_node());

    let mut model = CtcModel::new(network, input, output, cfg.decode, device);
    model
        .compile(AdamConfig::new().with_epsilon(1e-8).init(), cfg.lr)
        .context("Cannot compile the CTC model")?;
    Ok(model)
}

/// Rebuild the model saved under `output_dir` and render its summary.
pub fn model_summary(output_dir: &str) -> Result<String> {
    let mut cfg: TrainConfig = checkpoint::load_config(std::path::Path::new(output_dir))?;
    cfg.output_dir = output_dir.to_string();
    let model = build_model(&cfg, &cfg.resolved_charset()?)?;
    Ok(model.summary(None, None)?)
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<History> {
        let mut cfg = self.config.clone();

        // ── Step 1: Load training records ─────────────────────────────────────
        let records = JsonlLoader::new(&cfg.train_path)
            .load_records()
            .with_context(|| format!("Cannot load training data '{}'", cfg.train_path))?;

        // ── Step 2: Resolve charset ───────────────────────────────────────────
        let charset = match cfg.charset.as_deref() {
            Some(chars) => Charset::new(chars),
            None        => charset_from_records(&records),
        };
        if charset.is_empty() {
            bail!("Empty charset: pass --charset or provide text transcriptions");
        }
        cfg.charset = Some(charset.as_string());
        tracing::info!("Charset of {} characters ({} classes)", charset.len(), charset.num_classes());

        // ── Step 3: Encode samples ────────────────────────────────────────────
        let samples: Vec<HtrSample> = records
            .into_iter()
            .map(|r| r.into_sample(&charset))
            .collect::<std::result::Result<_, _>>()
            .context("Cannot encode training transcriptions")?;
        let Some(first) = samples.first() else {
            bail!("No training samples in '{}'", cfg.train_path);
        };
        cfg.num_features = first.num_features();

        // ── Step 4: Validation data ───────────────────────────────────────────
        let (train_samples, val_samples) = match &cfg.val_path {
            Some(path) => {
                let val = JsonlLoader::new(path)
                    .load_samples(&charset)
                    .with_context(|| format!("Cannot load validation data '{path}'"))?;
                if let Some(bad) = val.iter().find(|s| s.num_features() != cfg.num_features) {
                    bail!(
                        "Validation data '{path}' has {} features per step, training data has {}",
                        bad.num_features(), cfg.num_features
                    );
                }
                (samples, val)
            }
            None => split_train_val(samples, cfg.train_fraction, cfg.seed),
        };
        if train_samples.is_empty() {
            bail!("Training split is empty; raise --train-fraction or add data");
        }
        tracing::info!("Split: {} train, {} validation", train_samples.len(), val_samples.len());

        // ── Step 5: Save config for prediction ────────────────────────────────
        let output_dir = PathBuf::from(&cfg.output_dir);
        checkpoint::save_config(&output_dir, &cfg)?;

        // ── Step 6: Build + compile ───────────────────────────────────────────
        let mut model = build_model(&cfg, &charset)?;
        model.summary(Some(&output_dir), Some(SUMMARY_FILE))?;

        // ── Step 7: Resume ────────────────────────────────────────────────────
        if model.load_checkpoint(cfg.checkpoint_path())? {
            tracing::info!("Resuming from '{}'", cfg.checkpoint_path().display());
        }

        // ── Step 8: fit ───────────────────────────────────────────────────────
        let batcher = CtcBatcher::<TrainBackend>::new(Default::default());
        let train = DatasetBatches::<TrainBackend, CtcBatch<TrainBackend>>::new(
            Arc::new(HtrDataset::new(train_samples)),
            batcher.clone(),
            cfg.batch_size,
        )
        .shuffled(cfg.seed);

        let mut options = FitOptions::new(train.steps_per_epoch(), cfg.epochs);
        options.workers        = cfg.workers;
        options.max_queue_size = cfg.max_queue_size;

        let validation = (!val_samples.is_empty()).then(|| {
            let val: Arc<dyn BatchSequence<CtcBatch<TrainBackend>>> = Arc::new(DatasetBatches::new(
                Arc::new(HtrDataset::new(val_samples)),
                batcher,
                cfg.batch_size,
            ));
            BatchSource::Sequence(val)
        });

        let callbacks = default_callbacks(&output_dir, &cfg.checkpoint_name, &cfg.monitor);
        let history = model
            .fit(BatchSource::Generator(Box::new(train)), validation, callbacks, &options)
            .context("Training failed")?;

        if let Some(best) = history.val_loss().into_iter().reduce(f64::min) {
            tracing::info!("Best val_loss: {best:.4}");
        }
        Ok(history)
    }
}

// ─── Test fixtures ────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod fixtures {
    use std::{fs, io::Write, path::{Path, PathBuf}};

    /// Write a JSON-lines dataset whose features loosely follow the text.
    pub(crate) fn write_dataset(dir: &Path, name: &str, texts: &[&str]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        for (i, text) in texts.iter().enumerate() {
            let time = text.chars().count() * 2 + 1;
            let features: Vec<Vec<f32>> = (0..time)
                .map(|t| vec![((i + t) % 3) as f32 * 0.5, (t % 2) as f32])
                .collect();
            let line = serde_json::json!({ "features": features, "text": text });
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    pub(crate) fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("htr-ctc-app-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::fixtures::{scratch, write_dataset};
    use super::*;

    #[test]
    fn test_train_writes_artifacts() {
        let dir  = scratch("train-artifacts");
        let data = write_dataset(&dir, "train.jsonl", &["ab", "ba", "a", "bb"]);

        let cfg = TrainConfig {
            train_path:     data.display().to_string(),
            output_dir:     dir.join("out").display().to_string(),
            batch_size:     2,
            epochs:         2,
            hidden_size:    8,
            dropout:        0.0,
            train_fraction: 0.75,
            ..TrainConfig::default()
        };
        let history = TrainUseCase::new(cfg.clone()).execute().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.val_loss().len(), 2);

        let out = dir.join("out");
        assert!(out.join("epochs.log").is_file());
        assert!(out.join(SUMMARY_FILE).is_file());
        assert!(checkpoint::weights_file(&cfg.checkpoint_path()).is_file());

        let saved: TrainConfig = checkpoint::load_config(&out).unwrap();
        assert_eq!(saved.charset.as_deref(), Some("ab"));
        assert_eq!(saved.num_features, 2);
    }

    #[test]
    fn test_model_summary_from_saved_config() {
        let dir  = scratch("train-summary");
        let data = write_dataset(&dir, "train.jsonl", &["ab", "ba"]);
        let out  = dir.join("out");
        let cfg  = TrainConfig {
            train_path:     data.display().to_string(),
            output_dir:     out.display().to_string(),
            batch_size:     2,
            epochs:         1,
            hidden_size:    4,
            train_fraction: 1.0,
            ..TrainConfig::default()
        };
        TrainUseCase::new(cfg).execute().unwrap();

        let text = model_summary(&out.display().to_string()).unwrap();
        assert!(text.contains("CTCloss"));
    }

    #[test]
    fn test_validation_width_must_match_training() {
        let dir  = scratch("train-val-width");
        let data = write_dataset(&dir, "train.jsonl", &["ab", "ba"]);
        let val  = dir.join("val.jsonl");
        std::fs::write(&val, "{\"features\": [[0.1, 0.2, 0.3]], \"text\": \"a\"}\n").unwrap();

        let cfg = TrainConfig {
            train_path:  data.display().to_string(),
            val_path:    Some(val.display().to_string()),
            output_dir:  dir.join("out").display().to_string(),
            batch_size:  2,
            epochs:      1,
            hidden_size: 4,
            ..TrainConfig::default()
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("features per step"));
    }

    #[test]
    fn test_unknown_character_in_explicit_charset_fails() {
        let dir  = scratch("train-unknown-char");
        let data = write_dataset(&dir, "train.jsonl", &["abc"]);
        let cfg  = TrainConfig {
            train_path: data.display().to_string(),
            output_dir: dir.join("out").display().to_string(),
            charset:    Some("ab".to_string()),
            ..TrainConfig::default()
        };
        assert!(TrainUseCase::new(cfg).execute().is_err());
    }
}
