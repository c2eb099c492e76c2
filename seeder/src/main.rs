use std::process::ExitCode;

use clap::{Parser, Subcommand};
use snafu::{Report, ResultExt};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ObservabilitySnafu, Result},
    preview::PreviewArgs,
    run::RunArgs,
};

mod error;
mod generator_args;
mod helpers;
mod preview;
mod run;

#[derive(Parser)]
#[command(name = "seeder")]
#[command(about = "Bulk load synthetic receivables into Elasticsearch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate records and index them.
    Run {
        #[clap(flatten)]
        inner: RunArgs,
    },
    /// Print a few generated records as JSON.
    Preview {
        #[clap(flatten)]
        inner: PreviewArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("Error: {}", Report::from_error(err));
            ExitCode::from(code)
        }
    }
}

impl Commands {
    async fn run(self) -> Result<()> {
        match self {
            Commands::Preview { inner } => inner.run(),
            Commands::Run { inner } => {
                let guard = seeder_observability::init_observability(
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION"),
                )
                .context(ObservabilitySnafu {})?;

                let ct = CancellationToken::new();

                tokio::spawn({
                    let ct = ct.clone();
                    async move {
                        let _ = tokio::signal::ctrl_c().await;
                        tracing::warn!("interrupted, draining in-flight records");
                        ct.cancel();
                    }
                });

                let result = inner.run(ct).await;
                guard.shutdown();
                result
            }
        }
    }
}
