mod cli;
mod commands;
mod config;
mod error;
mod fetch;
mod ingest;
mod scheduler;
mod state;
mod storage;
mod timestamp;

use std::process::ExitCode;

use anyhow::Result;
use cli::Args;
use state::State;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("GATOR_LOG")
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    set_up_logging();

    match start(CancellationToken::new(), CancellationToken::new()).await {
        Ok(()) => ExitCode::SUCCESS,

        Err(e) => {
            error!("{e:#}");

            ExitCode::FAILURE
        }
    }
}

async fn start(stop: CancellationToken, abort: CancellationToken) -> Result<()> {
    let args = Args::parse();
    let mut cfg = config::load(&config::search_paths(args.config_path.clone()))?;
    cfg.config_mut().update(&args);
    let mut state = State::new(cfg, stop, abort).await?;

    commands::all().run(&mut state, &args.command()).await?;

    Ok(())
}
