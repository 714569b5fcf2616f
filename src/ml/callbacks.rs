// ============================================================
// Layer 5 — Training Callbacks
// ============================================================
// Hooks run by `CtcModel::fit` at epoch boundaries. The standard set
// for HTR training (see `default_callbacks`):
//
//   CsvLogger          epochs.log, `;`-separated, appended
//   ModelCheckpoint    save weights when the monitored metric improves
//   EarlyStopping      stop after `patience` epochs without improvement
//                      (min_delta 1e-8, patience 20), restoring the best
//                      weights
//   ReduceLrOnPlateau  multiply the learning rate by `factor` after
//                      `patience` stale epochs (min_delta 1e-8,
//                      factor 0.2, patience 10)
//
// All monitors minimise. When the monitored metric is missing from the
// epoch logs (e.g. `val_loss` without validation data), `loss` is used.

use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use burn::prelude::*;

use crate::domain::error::Result;
use crate::infra::{
    checkpoint,
    metrics::{EpochMetrics, MetricsLogger},
};

/// Mutable training state a callback may touch.
pub struct TrainingContext<'a, N> {
    pub network:       &'a mut N,
    pub learning_rate: &'a mut f64,
    pub stop_training: &'a mut bool,
}

pub trait Callback<B: Backend, N: Module<B>>: Send {
    fn on_train_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochMetrics, ctx: &mut TrainingContext<'_, N>) -> Result<()>;

    fn on_train_end(&mut self, _ctx: &mut TrainingContext<'_, N>) -> Result<()> {
        Ok(())
    }
}

pub type Callbacks<B, N> = Vec<Box<dyn Callback<B, N>>>;

/// Value of `monitor` in `logs`, falling back to the training loss.
pub fn monitored(logs: &EpochMetrics, monitor: &str) -> f64 {
    logs.get(monitor).unwrap_or_else(|| {
        tracing::debug!("'{monitor}' not in epoch logs, monitoring 'loss'");
        logs.loss
    })
}

/// Tracks the best (lowest) value seen and how long ago it was.
#[derive(Debug, Clone)]
struct Plateau {
    min_delta: f64,
    best:      f64,
    wait:      usize,
}

impl Plateau {
    fn new(min_delta: f64) -> Self {
        Self { min_delta, best: f64::INFINITY, wait: 0 }
    }

    /// True when `value` improves on the best by more than `min_delta`.
    fn update(&mut self, value: f64) -> bool {
        if value < self.best - self.min_delta {
            self.best = value;
            self.wait = 0;
            true
        } else {
            self.wait += 1;
            false
        }
    }
}

// ─── CsvLogger ────────────────────────────────────────────────────────────────

pub struct CsvLogger {
    dir:    PathBuf,
    logger: Option<MetricsLogger>,
}

impl CsvLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), logger: None }
    }
}

impl<B: Backend, N: Module<B>> Callback<B, N> for CsvLogger {
    fn on_train_begin(&mut self) -> Result<()> {
        self.logger = Some(MetricsLogger::new(&self.dir)?);
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochMetrics, _ctx: &mut TrainingContext<'_, N>) -> Result<()> {
        if self.logger.is_none() {
            self.logger = Some(MetricsLogger::new(&self.dir)?);
        }
        match &self.logger {
            Some(logger) => logger.log(logs),
            None         => Ok(()),
        }
    }
}

// ─── ModelCheckpoint ──────────────────────────────────────────────────────────

/// Saves weights only, and only when the monitored value improves.
pub struct ModelCheckpoint {
    path:    PathBuf,
    monitor: String,
    best:    f64,
}

impl ModelCheckpoint {
    pub fn new(path: impl Into<PathBuf>, monitor: &str) -> Self {
        Self { path: path.into(), monitor: monitor.to_string(), best: f64::INFINITY }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<B: Backend, N: Module<B>> Callback<B, N> for ModelCheckpoint {
    fn on_epoch_end(&mut self, logs: &EpochMetrics, ctx: &mut TrainingContext<'_, N>) -> Result<()> {
        let current = monitored(logs, &self.monitor);
        if current < self.best {
            tracing::info!(
                "Epoch {}: {} improved from {:.5} to {:.5}, saving weights",
                logs.epoch + 1, self.monitor, self.best, current
            );
            self.best = current;
            checkpoint::save_weights::<B, N>(ctx.network, &self.path)?;
        }
        Ok(())
    }
}

// ─── EarlyStopping ────────────────────────────────────────────────────────────

pub struct EarlyStopping<B: Backend, N: Module<B>> {
    monitor:       String,
    patience:      usize,
    restore_best:  bool,
    plateau:       Plateau,
    best_network:  Option<N>,
    stopped_epoch: Option<usize>,
    _backend:      PhantomData<fn() -> B>,
}

impl<B: Backend, N: Module<B>> EarlyStopping<B, N> {
    pub fn new(monitor: &str, min_delta: f64, patience: usize, restore_best: bool) -> Self {
        Self {
            monitor: monitor.to_string(),
            patience,
            restore_best,
            plateau: Plateau::new(min_delta),
            best_network: None,
            stopped_epoch: None,
            _backend: PhantomData,
        }
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl<B: Backend, N: Module<B>> Callback<B, N> for EarlyStopping<B, N> {
    fn on_train_begin(&mut self) -> Result<()> {
        self.plateau       = Plateau::new(self.plateau.min_delta);
        self.best_network  = None;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(&mut self, logs: &EpochMetrics, ctx: &mut TrainingContext<'_, N>) -> Result<()> {
        if self.plateau.update(monitored(logs, &self.monitor)) {
            if self.restore_best {
                self.best_network = Some(ctx.network.clone());
            }
            return Ok(());
        }
        if self.plateau.wait >= self.patience {
            self.stopped_epoch  = Some(logs.epoch);
            *ctx.stop_training  = true;
            tracing::info!("Epoch {}: early stopping", logs.epoch + 1);
            if let Some(best) = self.best_network.take() {
                tracing::info!("Restoring weights from the best epoch");
                *ctx.network = best;
            }
        }
        Ok(())
    }
}

// ─── ReduceLrOnPlateau ────────────────────────────────────────────────────────

pub struct ReduceLrOnPlateau {
    monitor:  String,
    factor:   f64,
    patience: usize,
    min_lr:   f64,
    plateau:  Plateau,
}

impl ReduceLrOnPlateau {
    pub fn new(monitor: &str, min_delta: f64, factor: f64, patience: usize) -> Self {
        Self {
            monitor: monitor.to_string(),
            factor,
            patience,
            min_lr: 0.0,
            plateau: Plateau::new(min_delta),
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }
}

impl<B: Backend, N: Module<B>> Callback<B, N> for ReduceLrOnPlateau {
    fn on_epoch_end(&mut self, logs: &EpochMetrics, ctx: &mut TrainingContext<'_, N>) -> Result<()> {
        if self.plateau.update(monitored(logs, &self.monitor)) {
            return Ok(());
        }
        if self.plateau.wait >= self.patience && *ctx.learning_rate > self.min_lr {
            let reduced = (*ctx.learning_rate * self.factor).max(self.min_lr);
            tracing::info!(
                "Epoch {}: reducing learning rate from {:e} to {:e}",
                logs.epoch + 1, *ctx.learning_rate, reduced
            );
            *ctx.learning_rate = reduced;
            self.plateau.wait  = 0;
        }
        Ok(())
    }
}

// ─── Default set ──────────────────────────────────────────────────────────────

/// Epoch log, best-only checkpoint at `logdir/checkpoint_name`, early
/// stopping and learning-rate reduction, all watching `monitor`.
pub fn default_callbacks<B, N>(logdir: &Path, checkpoint_name: &str, monitor: &str) -> Callbacks<B, N>
where
    B: Backend,
    N: Module<B> + 'static,
{
    vec![
        Box::new(CsvLogger::new(logdir)),
        Box::new(ModelCheckpoint::new(logdir.join(checkpoint_name), monitor)),
        Box::new(EarlyStopping::<B, N>::new(monitor, 1e-8, 20, true)),
        Box::new(ReduceLrOnPlateau::new(monitor, 1e-8, 0.2, 10)),
    ]
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::{Linear, LinearConfig},
    };

    type TB  = NdArray;
    type Net = Linear<TB>;

    struct Harness {
        network: Net,
        lr:      f64,
        stop:    bool,
    }

    impl Harness {
        fn new() -> Self {
            Self { network: LinearConfig::new(2, 2).init(&Default::default()), lr: 1.0, stop: false }
        }

        fn epoch<C: Callback<TB, Net>>(&mut self, cb: &mut C, epoch: usize, loss: f64) {
            let logs = EpochMetrics::new(epoch, loss, None, self.lr);
            let mut ctx = TrainingContext {
                network:       &mut self.network,
                learning_rate: &mut self.lr,
                stop_training: &mut self.stop,
            };
            cb.on_epoch_end(&logs, &mut ctx).unwrap();
        }
    }

    #[test]
    fn test_monitor_falls_back_to_loss() {
        let logs = EpochMetrics::new(0, 1.25, None, 0.1);
        assert_eq!(monitored(&logs, "val_loss"), 1.25);
        let logs = EpochMetrics::new(0, 1.25, Some(0.5), 0.1);
        assert_eq!(monitored(&logs, "val_loss"), 0.5);
    }

    #[test]
    fn test_early_stopping_after_patience() {
        let mut h  = Harness::new();
        let mut cb = EarlyStopping::<TB, Net>::new("loss", 1e-8, 2, false);

        h.epoch(&mut cb, 0, 1.0);
        h.epoch(&mut cb, 1, 1.0);
        assert!(!h.stop);
        h.epoch(&mut cb, 2, 1.5);
        assert!(h.stop);
        assert_eq!(cb.stopped_epoch(), Some(2));
    }

    #[test]
    fn test_early_stopping_restores_best_network() {
        let mut h  = Harness::new();
        let mut cb = EarlyStopping::<TB, Net>::new("loss", 1e-8, 1, true);

        h.epoch(&mut cb, 0, 1.0);
        let best: Vec<f32> = h.network.weight.val().into_data().convert::<f32>().to_vec().unwrap();

        h.network = LinearConfig::new(2, 2).init(&Default::default());
        h.epoch(&mut cb, 1, 2.0);

        assert!(h.stop);
        let now: Vec<f32> = h.network.weight.val().into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(best, now);
    }

    #[test]
    fn test_early_stopping_keeps_last_weights_without_stopping() {
        let mut h  = Harness::new();
        let mut cb = EarlyStopping::<TB, Net>::new("loss", 1e-8, 3, true);

        h.epoch(&mut cb, 0, 1.0);
        h.network = LinearConfig::new(2, 2).init(&Default::default());
        let last: Vec<f32> = h.network.weight.val().into_data().convert::<f32>().to_vec().unwrap();
        h.epoch(&mut cb, 1, 2.0);

        assert!(!h.stop);
        assert_eq!(cb.stopped_epoch(), None);
        let now: Vec<f32> = h.network.weight.val().into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(last, now);
    }

    #[test]
    fn test_reduce_lr_on_plateau() {
        let mut h  = Harness::new();
        let mut cb = ReduceLrOnPlateau::new("loss", 1e-8, 0.2, 2);

        h.epoch(&mut cb, 0, 1.0);
        h.epoch(&mut cb, 1, 1.0);
        assert_eq!(h.lr, 1.0);
        h.epoch(&mut cb, 2, 1.0);
        assert!((h.lr - 0.2).abs() < 1e-12);
        // wait restarts after a reduction
        h.epoch(&mut cb, 3, 1.0);
        assert!((h.lr - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_checkpoint_saves_only_improvements() {
        let dir = std::env::temp_dir().join(format!("htr-ctc-cb-{}", std::process::id()));
        let _   = std::fs::remove_dir_all(&dir);
        let path = dir.join("best");

        let mut h  = Harness::new();
        let mut cb = ModelCheckpoint::new(&path, "val_loss");

        h.epoch(&mut cb, 0, 2.0);
        let file = checkpoint::weights_file(&path);
        assert!(file.is_file());
        let first = std::fs::metadata(&file).unwrap().modified().unwrap();

        h.epoch(&mut cb, 1, 3.0);
        assert_eq!(std::fs::metadata(&file).unwrap().modified().unwrap(), first);
    }

    #[test]
    fn test_csv_logger_writes_rows() {
        let dir = std::env::temp_dir().join(format!("htr-ctc-csvcb-{}", std::process::id()));
        let _   = std::fs::remove_dir_all(&dir);

        let mut h  = Harness::new();
        let mut cb = CsvLogger::new(&dir);
        Callback::<TB, Net>::on_train_begin(&mut cb).unwrap();
        h.epoch(&mut cb, 0, 2.0);
        h.epoch(&mut cb, 1, 1.0);

        let text = std::fs::read_to_string(dir.join("epochs.log")).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_default_set() {
        let cbs: Callbacks<TB, Net> = default_callbacks(Path::new("logs"), "checkpoint_weights", "val_loss");
        assert_eq!(cbs.len(), 4);
    }
}
