use clap::Parser;
use dlpipe_core::logging;
use std::process::ExitCode;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging as early as possible; fall back to stderr if the state dir is unusable.
    if cli.log_stderr || logging::init_logging(cli.verbose()).is_err() {
        logging::init_logging_stderr(cli.verbose());
    }

    match cli.run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("dlpipe error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
