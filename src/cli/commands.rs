// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Four subcommands: `train`, `predict`, `evaluate`, `summary`.
// Each *Args struct converts into its application-layer config,
// so Layer 2 never sees clap types.

use clap::{Args, Subcommand};

use crate::application::{
    evaluate_use_case::EvaluateConfig,
    predict_use_case::PredictConfig,
    train_use_case::TrainConfig,
};
use crate::domain::config::DecodeConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a CTC model on a JSON-lines dataset
    Train(TrainArgs),

    /// Transcribe a dataset with a trained model
    Predict(PredictArgs),

    /// Report loss and character error rate on labelled data
    Evaluate(EvaluateArgs),

    /// Print the layer summary of a trained model
    Summary(SummaryArgs),
}

/// Decoding flags shared by `train`, `predict` and `evaluate`.
/// Beam flags left out fall back to the `DecodeConfig` defaults.
#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    /// Best-path decoding instead of beam search
    #[arg(long, conflicts_with_all = ["beam_width", "top_paths"])]
    pub greedy: bool,

    /// Beam width [default: 100]
    #[arg(long)]
    pub beam_width: Option<usize>,

    /// Number of hypotheses returned per example [default: 1]
    #[arg(long)]
    pub top_paths: Option<usize>,
}

impl DecodeArgs {
    fn is_given(&self) -> bool {
        self.greedy || self.beam_width.is_some() || self.top_paths.is_some()
    }
}

impl From<DecodeArgs> for DecodeConfig {
    fn from(a: DecodeArgs) -> Self {
        let defaults = DecodeConfig::default();
        if a.greedy {
            DecodeConfig::greedy()
        } else {
            DecodeConfig::beam_search(
                a.beam_width.unwrap_or(defaults.beam_width),
                a.top_paths.unwrap_or(defaults.top_paths),
            )
        }
    }
}

/// Decode flags on the command line replace the settings saved at
/// training time; without any flag the saved settings are kept.
fn decode_override(a: DecodeArgs) -> Option<DecodeConfig> {
    a.is_given().then(|| DecodeConfig::from(a))
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON-lines file of {"features": [[f32]], "text": "..."} records
    #[arg(long, default_value = "data/train.jsonl")]
    pub train_path: String,

    /// Separate validation file; otherwise the training data is split
    #[arg(long)]
    pub val_path: Option<String>,

    /// Directory for weights, epochs.log, summary and config
    #[arg(long, default_value = "outputs")]
    pub output_dir: String,

    #[arg(long, default_value = "checkpoint_weights")]
    pub checkpoint_name: String,

    /// Ordered character set; derived from the transcriptions when omitted
    #[arg(long)]
    pub charset: Option<String>,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1000)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// LSTM hidden size
    #[arg(long, default_value_t = 128)]
    pub hidden_size: usize,

    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Share of the data used for training when --val-path is absent
    #[arg(long, default_value_t = 0.9)]
    pub train_fraction: f64,

    /// Metric watched by checkpointing, early stopping and LR reduction
    #[arg(long, default_value = "val_loss")]
    pub monitor: String,

    /// Prefetch worker threads
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    #[arg(long, default_value_t = 10)]
    pub max_queue_size: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[command(flatten)]
    pub decode: DecodeArgs,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_path:      a.train_path,
            val_path:        a.val_path,
            output_dir:      a.output_dir,
            checkpoint_name: a.checkpoint_name,
            charset:         a.charset,
            num_features:    0,
            batch_size:      a.batch_size,
            epochs:          a.epochs,
            lr:              a.lr,
            hidden_size:     a.hidden_size,
            dropout:         a.dropout,
            train_fraction:  a.train_fraction,
            monitor:         a.monitor,
            decode:          a.decode.into(),
            workers:         a.workers,
            max_queue_size:  a.max_queue_size,
            seed:            a.seed,
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// JSON-lines file of {"features": [[f32]]} records
    #[arg(long)]
    pub data_path: String,

    /// Output directory of a previous `train` run
    #[arg(long, default_value = "outputs")]
    pub output_dir: String,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    #[arg(long, default_value_t = 10)]
    pub max_queue_size: usize,

    /// Print the softmax matrices as JSON instead of decoded text
    #[arg(long)]
    pub raw: bool,

    #[command(flatten)]
    pub decode: DecodeArgs,
}

impl From<PredictArgs> for PredictConfig {
    fn from(a: PredictArgs) -> Self {
        PredictConfig {
            output_dir:     a.output_dir,
            data_path:      a.data_path,
            batch_size:     a.batch_size,
            workers:        a.workers,
            max_queue_size: a.max_queue_size,
            decode:         decode_override(a.decode),
        }
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// JSON-lines file of labelled records
    #[arg(long)]
    pub data_path: String,

    #[arg(long, default_value = "outputs")]
    pub output_dir: String,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[command(flatten)]
    pub decode: DecodeArgs,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            output_dir: a.output_dir,
            data_path:  a.data_path,
            batch_size: a.batch_size,
            decode:     decode_override(a.decode),
        }
    }
}

#[derive(Args, Debug)]
pub struct SummaryArgs {
    #[arg(long, default_value = "outputs")]
    pub output_dir: String,
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_train_args_into_config() {
        let cli = Cli::try_parse_from([
            "htr-ctc", "train", "--train-path", "lines.jsonl", "--epochs", "5", "--greedy",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };

        let cfg = TrainConfig::from(args);
        assert_eq!(cfg.train_path, "lines.jsonl");
        assert_eq!(cfg.epochs, 5);
        assert!(cfg.decode.greedy);
        assert_eq!(cfg.checkpoint_name, "checkpoint_weights");
    }

    #[test]
    fn test_default_decode_flags_do_not_override() {
        let cli = Cli::try_parse_from(["htr-ctc", "predict", "--data-path", "x.jsonl"]).unwrap();
        let Commands::Predict(args) = cli.command else { panic!("expected predict") };
        assert_eq!(PredictConfig::from(args).decode, None);

        let cli = Cli::try_parse_from([
            "htr-ctc", "evaluate", "--data-path", "x.jsonl", "--top-paths", "3",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command else { panic!("expected evaluate") };
        assert_eq!(EvaluateConfig::from(args).decode, Some(DecodeConfig::beam_search(100, 3)));
    }

    #[test]
    fn test_explicit_default_beam_overrides_saved_decode() {
        let cli = Cli::try_parse_from([
            "htr-ctc", "predict", "--data-path", "x.jsonl", "--beam-width", "100", "--top-paths", "1",
        ])
        .unwrap();
        let Commands::Predict(args) = cli.command else { panic!("expected predict") };
        assert_eq!(PredictConfig::from(args).decode, Some(DecodeConfig::default()));
    }

    #[test]
    fn test_greedy_conflicts_with_beam_flags() {
        let parsed = Cli::try_parse_from([
            "htr-ctc", "predict", "--data-path", "x.jsonl", "--greedy", "--top-paths", "2",
        ]);
        assert!(parsed.is_err());
    }
}
