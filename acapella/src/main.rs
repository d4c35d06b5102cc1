mod cli;
mod isolate;
mod prompt;
mod setup;
mod train;
mod util;

use std::process::ExitCode;

use clap::Parser;

use cli::Cli;
use setup::{save_env, setup_tracing, ENV_SNAPSHOT};

fn main() -> ExitCode {
  let args = Cli::parse();

  setup_tracing();

  if args.files.is_empty() && args.data.is_none() {
    tracing::error!("Please provide data to train on (--data) or files to infer on");
    return ExitCode::FAILURE;
  }

  let config = args.config();
  if let Err(err) = config.validate() {
    tracing::error!("{err}");
    return ExitCode::FAILURE;
  }

  if let Err(err) = save_env(&config, ENV_SNAPSHOT) {
    tracing::warn!("Failed to save the environment snapshot: {err:#}");
  }

  let result = if args.files.is_empty() {
    tracing::info!("No files provided, attempting to train...");
    train::run(&config)
  } else {
    tracing::info!(files = args.files.len(), "Weights provided, performing inference...");
    isolate::run(&config, &args.files)
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      tracing::error!("{err:#}");
      ExitCode::FAILURE
    }
  }
}
