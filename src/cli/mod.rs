// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and routes each subcommand to its
// Layer 2 use case. Printing results happens here and only here.

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, PredictArgs, TrainArgs};

use crate::application::{
    evaluate_use_case::EvaluateUseCase,
    predict_use_case::PredictUseCase,
    train_use_case::{model_summary, TrainUseCase},
};

#[derive(Parser, Debug)]
#[command(
    name = "htr-ctc",
    version,
    about = "Train and run CTC handwritten text recognition models."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Predict(args)  => run_predict(args),
            Commands::Evaluate(args) => run_evaluate(args),
            // summary() prints the table itself
            Commands::Summary(args)  => model_summary(&args.output_dir).map(|_| ()),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    tracing::info!("Starting training on: {}", args.train_path);

    let output_dir = args.output_dir.clone();
    let history    = TrainUseCase::new(args.into()).execute()?;

    println!("Training finished after {} epochs. Outputs in '{output_dir}'.", history.len());
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let raw      = args.raw;
    let use_case = PredictUseCase::new(args.into())?;

    if raw {
        for matrix in use_case.raw()? {
            println!("{}", serde_json::to_string(&matrix)?);
        }
        return Ok(());
    }
    for line in use_case.transcribe()? {
        println!("{}", line.paths.join("\t"));
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let report = EvaluateUseCase::new(args.into())?.execute()?;

    match report.mean_loss {
        Some(loss) => println!("loss: {loss:.4}"),
        None       => println!("loss: n/a (every batch had an empty label)"),
    }
    println!("cer:  {:.4}", report.cer);
    println!("examples: {}  batches: {}  skipped: {}", report.examples, report.batches, report.skipped_batches);
    Ok(())
}
