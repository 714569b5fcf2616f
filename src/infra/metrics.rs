// ============================================================
// Layer 6 — Epoch Log
// ============================================================
// Appends one row per training epoch to `<logdir>/epochs.log`,
// `;`-separated, so consecutive runs accumulate in the same file.
//
// Example:
//   epoch;loss;val_loss;lr
//   0;41.203125;39.870210;0.001
//   1;32.771942;33.015624;0.001
//
// `val_loss` is left empty for runs without validation data.
// Epochs are 0-based, as in the training history.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::domain::error::Result;

pub const EPOCH_LOG: &str = "epochs.log";
pub const SEPARATOR: char = ';';

/// Values recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:    usize,
    pub loss:     f64,
    pub val_loss: Option<f64>,
    pub lr:       f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, loss: f64, val_loss: Option<f64>, lr: f64) -> Self {
        Self { epoch, loss, val_loss, lr }
    }

    /// Look up a metric by its log name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "loss"     => Some(self.loss),
            "val_loss" => self.val_loss,
            "lr"       => Some(self.lr),
            _          => None,
        }
    }
}

pub struct MetricsLogger {
    path: PathBuf,
}

impl MetricsLogger {
    /// Open `<dir>/epochs.log` for appending, writing the header if the
    /// file is new or empty.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(EPOCH_LOG);

        let is_empty = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        if is_empty {
            let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(f, "epoch{SEPARATOR}loss{SEPARATOR}val_loss{SEPARATOR}lr")?;
            tracing::debug!("Created epoch log: '{}'", path.display());
        }
        Ok(Self { path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.path)?;
        let val = m.val_loss.map(|v| format!("{v:.6}")).unwrap_or_default();
        writeln!(f, "{}{SEPARATOR}{:.6}{SEPARATOR}{val}{SEPARATOR}{}", m.epoch, m.loss, m.lr)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("htr-ctc-metrics-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_get_by_name() {
        let m = EpochMetrics::new(0, 2.5, None, 0.01);
        assert_eq!(m.get("loss"), Some(2.5));
        assert_eq!(m.get("val_loss"), None);
        assert_eq!(m.get("accuracy"), None);
    }

    #[test]
    fn test_rows_appended_across_loggers() {
        let dir = scratch("append");

        let logger = MetricsLogger::new(&dir).unwrap();
        logger.log(&EpochMetrics::new(0, 3.0, Some(2.5), 0.001)).unwrap();

        // a second run reuses the file without repeating the header
        let logger = MetricsLogger::new(&dir).unwrap();
        logger.log(&EpochMetrics::new(1, 2.0, None, 0.0002)).unwrap();

        let text  = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch;loss;val_loss;lr");
        assert_eq!(lines[1], "0;3.000000;2.500000;0.001");
        assert_eq!(lines[2], "1;2.000000;;0.0002");
    }
}
