use anyhow::Result;
use clap::Parser;
use htr_ctc::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("htr_ctc=info")),
        )
        .init();

    let cli = Cli::parse();
    cli.run()
}
