// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores network weights with Burn's named MessagePack
// recorder (gzip), plus the JSON training config needed to rebuild
// the network before weights can be loaded into it.
//
// File layout inside an output directory:
//   outputs/
//     checkpoint_weights.mpk.gz   ← best weights (ModelCheckpoint)
//     train_config.json           ← network + decode hyperparameters
//     epochs.log                  ← per-epoch CSV (see metrics.rs)
//
// Paths given to the weight functions may include the ".mpk.gz"
// extension or not; the recorder always writes `<stem>.mpk.gz`.
//
// Full precision keeps reloaded predictions identical to the saved model.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::error::{CtcError, Result};

pub type WeightsRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

pub const WEIGHTS_EXTENSION: &str = "mpk.gz";
pub const CONFIG_FILE:       &str = "train_config.json";

/// Path without the recorder extension.
pub fn weights_stem(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(&format!(".{WEIGHTS_EXTENSION}")) {
        Some(stem) => PathBuf::from(stem),
        None       => path.to_path_buf(),
    }
}

/// The file the recorder reads and writes for `path`.
pub fn weights_file(path: &Path) -> PathBuf {
    weights_stem(path).with_extension(WEIGHTS_EXTENSION)
}

/// Stem of an existing weights file, or None when nothing is stored at `path`.
pub fn existing_weights(path: &Path) -> Option<PathBuf> {
    weights_file(path).is_file().then(|| weights_stem(path))
}

pub fn save_weights<B: Backend, M: Module<B>>(module: &M, path: &Path) -> Result<PathBuf> {
    let stem = weights_stem(path);
    if let Some(parent) = stem.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Recorder::<B>::record(&WeightsRecorder::new(), module.clone().into_record(), stem.clone())
        .map_err(|e| CtcError::Checkpoint(format!("cannot save '{}': {e:?}", stem.display())))?;

    let file = weights_file(path);
    tracing::debug!("Saved weights to '{}'", file.display());
    Ok(file)
}

pub fn load_weights<B: Backend, M: Module<B>>(module: M, path: &Path, device: &B::Device) -> Result<M> {
    let stem   = weights_stem(path);
    let record = Recorder::<B>::load(&WeightsRecorder::new(), stem.clone(), device)
        .map_err(|e| CtcError::Checkpoint(format!("cannot load '{}': {e:?}", stem.display())))?;

    tracing::debug!("Loaded weights from '{}'", weights_file(path).display());
    Ok(module.load_record(record))
}

/// Write `config` as pretty JSON to `dir/train_config.json`.
pub fn save_config<T: Serialize>(dir: &Path, config: &T) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
    let path = dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&path, json)
        .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

    tracing::debug!("Saved training config to '{}'", path.display());
    Ok(path)
}

pub fn load_config<T: DeserializeOwned>(dir: &Path) -> anyhow::Result<T> {
    let path = dir.join(CONFIG_FILE);
    let json = fs::read_to_string(&path).with_context(|| {
        format!(
            "Cannot read config from '{}'. Make sure you have run 'train' first.",
            path.display()
        )
    })?;
    serde_json::from_str(&json)
        .with_context(|| format!("Malformed config in '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::{Linear, LinearConfig},
    };
    use serde::Deserialize;

    type TB = NdArray;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("htr-ctc-ckpt-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_stem_and_file() {
        let p = Path::new("out/checkpoint_weights.mpk.gz");
        assert_eq!(weights_stem(p), PathBuf::from("out/checkpoint_weights"));
        assert_eq!(weights_file(Path::new("out/checkpoint_weights")), PathBuf::from(p));
    }

    #[test]
    fn test_missing_weights_not_found() {
        let dir = scratch("missing");
        assert!(existing_weights(&dir.join("nothing")).is_none());
    }

    #[test]
    fn test_weights_round_trip() {
        let dir    = scratch("roundtrip");
        let device = Default::default();
        let saved: Linear<TB> = LinearConfig::new(3, 2).init(&device);

        let file = save_weights::<TB, _>(&saved, &dir.join("weights")).unwrap();
        assert!(file.is_file());
        assert!(existing_weights(&file).is_some());

        let fresh: Linear<TB> = LinearConfig::new(3, 2).init(&device);
        let loaded = load_weights::<TB, _>(fresh, &file, &device).unwrap();

        let a: Vec<f32> = saved.weight.val().into_data().convert::<f32>().to_vec().unwrap();
        let b: Vec<f32> = loaded.weight.val().into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_config_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Cfg { hidden: usize }

        let dir = scratch("config");
        save_config(&dir, &Cfg { hidden: 7 }).unwrap();
        let back: Cfg = load_config(&dir).unwrap();
        assert_eq!(back, Cfg { hidden: 7 });
    }

    #[test]
    fn test_missing_config_is_error() {
        let dir = scratch("noconfig");
        assert!(load_config::<serde_json::Value>(&dir).is_err());
    }
}
