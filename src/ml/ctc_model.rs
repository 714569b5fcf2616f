// ============================================================
// Layer 5 — CTC Model Adapter
// ============================================================
// Wraps a per-timestep classification network and exposes CTC
// training and prediction over it.
//
// Lifecycle:
//
//   CtcModel::new(network, inputs, outputs, decode)     Uncompiled
//        │
//        ▼  compile(optimizer, learning_rate)
//   Compiled { heads, optimizer, objective, lr }         Compiled
//        │
//        ├── fit(generator, validation, callbacks)  → History
//        ├── predict(source, options)                → PredictOutput
//        ├── predict_on_batch(batch)                 → BatchPrediction
//        ├── get_loss(batch)                         → Option<LossReport>
//        ├── load_checkpoint / save_checkpoint
//        └── summary
//
// The three heads (see heads.rs) share the one network held here, so a
// weight update or a checkpoint load is seen by all of them at once.
// Training runs on the autodiff backend B; everything else runs on
// `network.valid()` over B::InnerBackend.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::data::{
    batcher::{CtcBatch, InferenceBatch},
    enqueuer::{enqueuer_for, Enqueuer},
};
use crate::domain::{
    config::DecodeConfig,
    error::{CtcError, Result},
    node::NodeList,
    prediction::{strip_padding, BatchPrediction, LossReport, PredictOutput},
    traits::BatchSource,
};
use crate::infra::{checkpoint, metrics::EpochMetrics};
use crate::ml::{
    callbacks::{Callbacks, TrainingContext},
    heads::{self, CompiledHeads, LOSS_NODE},
    host,
    network::CtcNetwork,
    objective::{ModelOptimizer, Objective, Passthrough},
};

// ─── Options and results ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    pub steps_per_epoch:  usize,
    pub epochs:           usize,
    pub verbose:          bool,
    /// Required when validation data is a generator; defaults to the
    /// sequence length for sequences.
    pub validation_steps: Option<usize>,
    pub max_queue_size:   usize,
    pub workers:          usize,
    pub initial_epoch:    usize,
}

impl FitOptions {
    pub fn new(steps_per_epoch: usize, epochs: usize) -> Self {
        Self {
            steps_per_epoch,
            epochs,
            verbose:          true,
            validation_steps: None,
            max_queue_size:   10,
            workers:          1,
            initial_epoch:    0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictOptions {
    pub steps:               usize,
    pub max_queue_size:      usize,
    pub workers:             usize,
    /// Accepted for API parity; producers always run as threads.
    pub use_multiprocessing: bool,
    /// Return the undecoded network output instead of decoded paths.
    pub raw_returns:         bool,
    pub verbose:             bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            steps:               1,
            max_queue_size:      10,
            workers:             1,
            use_multiprocessing: true,
            raw_returns:         false,
            verbose:             false,
        }
    }
}

/// Per-epoch logs of one `fit` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn val_loss(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|e| e.val_loss).collect()
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────

struct Compiled<B: AutodiffBackend, N: AutodiffModule<B>> {
    heads:         CompiledHeads,
    optimizer:     Box<dyn ModelOptimizer<B, N>>,
    objective:     Box<dyn Objective<B>>,
    learning_rate: f64,
}

enum State<B: AutodiffBackend, N: AutodiffModule<B>> {
    Uncompiled,
    Compiled(Compiled<B, N>),
}

pub struct CtcModel<B: AutodiffBackend, N: AutodiffModule<B>> {
    network: N,
    inputs:  NodeList,
    outputs: NodeList,
    decode:  DecodeConfig,
    device:  B::Device,
    state:   State<B, N>,
}

impl<B, N> CtcModel<B, N>
where
    B: AutodiffBackend,
    N: CtcNetwork<B> + AutodiffModule<B> + 'static,
    N::InnerModule: CtcNetwork<B::InnerBackend>,
{
    /// `inputs` and `outputs` take a single node or a list of nodes.
    pub fn new(
        network: N,
        inputs:  impl Into<NodeList>,
        outputs: impl Into<NodeList>,
        decode:  DecodeConfig,
        device:  B::Device,
    ) -> Self {
        Self {
            network,
            inputs: inputs.into(),
            outputs: outputs.into(),
            decode,
            device,
            state: State::Uncompiled,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state, State::Compiled(_))
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn inputs(&self) -> &NodeList {
        &self.inputs
    }

    pub fn outputs(&self) -> &NodeList {
        &self.outputs
    }

    pub fn decode_config(&self) -> DecodeConfig {
        self.decode
    }

    pub fn heads(&self) -> Result<&CompiledHeads> {
        self.compiled("heads").map(|c| &c.heads)
    }

    pub fn learning_rate(&self) -> Option<f64> {
        match &self.state {
            State::Compiled(c) => Some(c.learning_rate),
            State::Uncompiled  => None,
        }
    }

    fn compiled(&self, operation: &'static str) -> Result<&Compiled<B, N>> {
        match &self.state {
            State::Compiled(c) => Ok(c),
            State::Uncompiled  => Err(CtcError::NotCompiled(operation)),
        }
    }

    // ── compile ──────────────────────────────────────────────────────────────

    /// Build the Train, Predict and RawPredict heads and bind `optimizer`.
    /// Calling it again replaces heads and optimizer.
    pub fn compile<O>(&mut self, optimizer: O, learning_rate: f64) -> Result<()>
    where
        O: Optimizer<N, B> + 'static,
    {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(CtcError::Config(format!("learning rate must be positive, got {learning_rate}")));
        }
        let heads = CompiledHeads::build(&self.inputs, &self.outputs, &self.decode)?;

        tracing::info!("Compiled train head:        {}", heads.train);
        tracing::info!("Compiled predict head:      {}", heads.predict);
        tracing::info!("Compiled raw predict head:  {}", heads.raw_predict);

        self.state = State::Compiled(Compiled {
            heads,
            optimizer: Box::new(optimizer),
            objective: Box::new(Passthrough),
            learning_rate,
        });
        Ok(())
    }

    // ── checkpoints ──────────────────────────────────────────────────────────

    /// Load weights saved at `path` (with or without the `.mpk.gz`
    /// extension). Returns Ok(false) without touching the model when no
    /// such file exists.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let Some(stem) = checkpoint::existing_weights(path) else {
            tracing::debug!("No checkpoint at '{}', keeping current weights", path.display());
            return Ok(false);
        };
        self.compiled("load_checkpoint")?;

        self.network = checkpoint::load_weights::<B, N>(self.network.clone(), &stem, &self.device)?;
        tracing::info!("Loaded checkpoint '{}'", checkpoint::weights_file(&stem).display());
        Ok(true)
    }

    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        checkpoint::save_weights::<B, N>(&self.network, path.as_ref())
    }

    // ── training ─────────────────────────────────────────────────────────────

    /// Train on batches from `generator`. The generator must yield
    /// batches indefinitely (`steps_per_epoch` per epoch).
    pub fn fit(
        &mut self,
        generator:     BatchSource<CtcBatch<B>>,
        validation:    Option<BatchSource<CtcBatch<B>>>,
        mut callbacks: Callbacks<B, N>,
        options:       &FitOptions,
    ) -> Result<History> {
        self.compiled("fit")?;
        if options.steps_per_epoch == 0 {
            return Err(CtcError::Config("steps_per_epoch must be >= 1".into()));
        }
        let validation_steps = match (&validation, options.validation_steps) {
            (None, _)                                => 0,
            (Some(_), Some(steps))                   => steps,
            (Some(BatchSource::Sequence(seq)), None) => seq.len(),
            (Some(BatchSource::Generator(_)), None)  => {
                return Err(CtcError::Config(
                    "validation_steps is required when validation data is a generator".into(),
                ))
            }
        };

        let mut train_queue = enqueuer_for(generator);
        train_queue.start(options.workers, options.max_queue_size)?;
        let mut val_queue = match validation {
            Some(source) if validation_steps > 0 => {
                let mut queue = enqueuer_for(source);
                queue.start(options.workers, options.max_queue_size)?;
                Some(queue)
            }
            _ => None,
        };

        for callback in callbacks.iter_mut() {
            callback.on_train_begin()?;
        }

        tracing::info!(
            "Training for epochs {}..{} ({} steps each, {} validation steps)",
            options.initial_epoch + 1, options.epochs, options.steps_per_epoch, validation_steps
        );

        let mut history       = History::default();
        let mut stop_training = false;

        for epoch in options.initial_epoch..options.epochs {
            let loss = self.train_epoch(train_queue.as_mut(), epoch, options)?;
            let val_loss = match val_queue.as_mut() {
                Some(queue) => Some(self.validation_loss(queue.as_mut(), validation_steps)?),
                None        => None,
            };

            let State::Compiled(compiled) = &mut self.state else {
                return Err(CtcError::NotCompiled("fit"));
            };
            let logs = EpochMetrics::new(epoch, loss, val_loss, compiled.learning_rate);

            if options.verbose {
                match val_loss {
                    Some(v) => println!(
                        "Epoch {:>3}/{} | loss={:.4} | val_loss={:.4} | lr={:e}",
                        epoch + 1, options.epochs, loss, v, logs.lr
                    ),
                    None => println!(
                        "Epoch {:>3}/{} | loss={:.4} | lr={:e}",
                        epoch + 1, options.epochs, loss, logs.lr
                    ),
                }
            }

            let mut ctx = TrainingContext {
                network:       &mut self.network,
                learning_rate: &mut compiled.learning_rate,
                stop_training: &mut stop_training,
            };
            for callback in callbacks.iter_mut() {
                callback.on_epoch_end(&logs, &mut ctx)?;
            }

            history.epochs.push(logs);
            if stop_training {
                tracing::info!("Training stopped after epoch {}", epoch + 1);
                break;
            }
        }

        if let State::Compiled(compiled) = &mut self.state {
            let mut ctx = TrainingContext {
                network:       &mut self.network,
                learning_rate: &mut compiled.learning_rate,
                stop_training: &mut stop_training,
            };
            for callback in callbacks.iter_mut() {
                callback.on_train_end(&mut ctx)?;
            }
        }

        train_queue.stop();
        if let Some(queue) = val_queue.as_mut() {
            queue.stop();
        }
        tracing::info!("Training complete!");
        Ok(history)
    }

    /// One epoch of optimizer steps; returns the example-weighted mean loss.
    fn train_epoch(
        &mut self,
        queue:   &mut dyn Enqueuer<CtcBatch<B>>,
        epoch:   usize,
        options: &FitOptions,
    ) -> Result<f64> {
        let progress = options.verbose.then(|| progress_bar(options.steps_per_epoch, "steps"));
        let mut total = 0.0f64;
        let mut seen  = 0usize;

        for step in 0..options.steps_per_epoch {
            let batch = queue.next()?;
            let State::Compiled(compiled) = &mut self.state else {
                return Err(CtcError::NotCompiled("fit"));
            };

            let losses    = heads::train_head(&self.network, &batch)?;
            let objective = compiled.objective.compute(None, losses).mean();
            let value     = objective.clone().into_scalar().elem::<f64>();

            // Backward pass + optimizer update
            let grads = GradientsParams::from_grads(objective.backward(), &self.network);
            self.network = compiled.optimizer.step(compiled.learning_rate, self.network.clone(), grads);

            total += value * batch.batch_size() as f64;
            seen  += batch.batch_size();
            tracing::debug!(epoch, step, loss = value, "train step");
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        Ok(if seen > 0 { total / seen as f64 } else { f64::NAN })
    }

    fn validation_loss(&self, queue: &mut dyn Enqueuer<CtcBatch<B>>, steps: usize) -> Result<f64> {
        let network   = self.network.valid();
        let mut total = 0.0f64;
        let mut seen  = 0usize;

        for _ in 0..steps {
            let batch  = queue.next()?;
            let losses = host::float_vec(heads::train_head(&network, &batch.inner())?)?;
            total += losses.iter().map(|&l| l as f64).sum::<f64>();
            seen  += losses.len();
        }
        Ok(if seen > 0 { total / seen as f64 } else { f64::NAN })
    }

    // ── prediction ───────────────────────────────────────────────────────────

    /// Run `options.steps` batches from `source` through the Predict (or
    /// RawPredict) head. Sequences are prefetched in index order,
    /// generators in generation order. The prefetch queue is stopped on
    /// every exit path.
    pub fn predict(
        &self,
        source:  BatchSource<InferenceBatch<B>>,
        options: &PredictOptions,
    ) -> Result<PredictOutput> {
        self.compiled("predict")?;
        if options.use_multiprocessing {
            tracing::debug!("Prefetch workers run as threads");
        }

        let mut queue = enqueuer_for(source);
        queue.start(options.workers, options.max_queue_size)?;
        let outcome = self.predict_steps(queue.as_mut(), options);
        queue.stop();
        outcome
    }

    fn predict_steps(
        &self,
        queue:   &mut dyn Enqueuer<InferenceBatch<B>>,
        options: &PredictOptions,
    ) -> Result<PredictOutput> {
        let progress    = options.verbose.then(|| progress_bar(options.steps, "batches"));
        let mut decoded = Vec::new();
        let mut raw     = Vec::new();

        for step in 0..options.steps {
            let batch = queue.next()?;
            if options.raw_returns {
                raw.extend(self.raw_predict_on_batch(&batch)?);
            } else {
                decoded.extend(self.predict_on_batch(&batch)?.predictions);
            }
            tracing::debug!(step, "predicted batch");
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        Ok(if options.raw_returns {
            PredictOutput::Raw(raw)
        } else {
            PredictOutput::Decoded(decoded)
        })
    }

    /// Decode one batch: `predictions[example][path]` without padding and
    /// `probabilities[example][path]` as exp(log-probability).
    pub fn predict_on_batch(&self, batch: &InferenceBatch<B>) -> Result<BatchPrediction> {
        self.compiled("predict_on_batch")?;
        let network = self.network.valid();
        let out     = heads::predict_head(&network, &batch.inner(), &self.decode)?;

        // [path][example] → [example][path]
        let per_path: Vec<Vec<Vec<u32>>> = out.paths.iter().map(|dense| strip_padding(dense)).collect();
        let predictions = (0..batch.batch_size())
            .map(|b| per_path.iter().map(|path| path[b].clone()).collect())
            .collect();
        let probabilities = out
            .log_probs
            .iter()
            .map(|row| row.iter().map(|lp| lp.exp()).collect())
            .collect();

        Ok(BatchPrediction { predictions, probabilities })
    }

    /// RawPredict head on one batch: `[example][time][class]`.
    pub fn raw_predict_on_batch(&self, batch: &InferenceBatch<B>) -> Result<Vec<Vec<Vec<f32>>>> {
        self.compiled("raw_predict_on_batch")?;
        let network = self.network.valid();
        host::float_cube(heads::raw_predict_head(&network, &batch.inner())?)
    }

    // ── loss ─────────────────────────────────────────────────────────────────

    /// Per-example CTC loss without gradient tracking. A batch with any
    /// zero label length is skipped as a whole (None).
    pub fn get_loss(&self, batch: &CtcBatch<B>) -> Result<Option<LossReport>> {
        self.compiled("get_loss")?;
        let label_lengths = host::int_vec(batch.label_lengths.clone())?;
        if label_lengths.contains(&0) {
            tracing::debug!("Batch has unlabelled examples, loss skipped");
            return Ok(None);
        }

        let network = self.network.valid();
        let losses  = host::float_vec(heads::train_head(&network, &batch.inner())?)?;
        Ok(Some(LossReport::new(losses)))
    }

    // ── summary ──────────────────────────────────────────────────────────────

    /// Describe the Train head. Printed to stdout and, when both are
    /// given, written to `outputs_dir/filename`.
    pub fn summary(&self, outputs_dir: Option<&Path>, filename: Option<&str>) -> Result<String> {
        let heads = &self.compiled("summary")?.heads;
        let text  = self.render_summary(heads);

        if let (Some(dir), Some(name)) = (outputs_dir, filename) {
            fs::create_dir_all(dir)?;
            let path = dir.join(name);
            fs::write(&path, &text)?;
            tracing::info!("Model summary written to '{}'", path.display());
        }
        println!("{text}");
        Ok(text)
    }

    fn render_summary(&self, heads: &CompiledHeads) -> String {
        let rule  = "=".repeat(72);
        let thin  = "_".repeat(72);
        let total = self.network.num_params();
        let mut s = String::new();

        let _ = writeln!(s, "Model: \"ctc_train\"");
        let _ = writeln!(s, "{thin}");
        let _ = writeln!(s, "{:<32}{:<28}{:>12}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(s, "{rule}");
        for node in &heads.train.inputs {
            let shape = node.to_string();
            let shape = shape.strip_prefix(node.name.as_str()).unwrap_or(&shape).trim();
            let _ = writeln!(s, "{:<32}{:<28}{:>12}", format!("{} (Input)", node.name), shape, 0);
        }
        for layer in self.network.layers() {
            let _ = writeln!(
                s, "{:<32}{:<28}{:>12}",
                format!("{} ({})", layer.name, layer.kind), layer.output_shape, layer.params
            );
        }
        let _ = writeln!(s, "{:<32}{:<28}{:>12}", format!("{LOSS_NODE} (Loss)"), "(None, 1)", 0);
        let _ = writeln!(s, "{rule}");
        let _ = writeln!(s, "Total params: {total}");
        let _ = writeln!(s, "Trainable params: {total}");
        let _ = writeln!(s, "Non-trainable params: 0");
        let _ = write!(s, "{thin}");
        s
    }
}

fn progress_bar(len: usize, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template(&format!("[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {unit}"))
    {
        pb.set_style(style);
    }
    pb
}
