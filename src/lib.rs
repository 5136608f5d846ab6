pub mod book;
pub mod cli;
pub mod config;
pub mod job;
pub mod playback;

pub use book::{BookId, BookRepository, Document, HttpBookRepository, Segment, Token};
pub use config::ReaderConfig;
pub use job::{JobError, JobEvent, JobId, JobSubmissionClient, ProgressStream, ProgressUpdate};
pub use playback::{PlaybackController, PlaybackDevice, PlaybackPhase, PlaybackState};

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run() -> ExitCode {
    // Load environment variables from .env file
    let _ = dotenvy::dotenv();

    let args = cli::CliArgs::parse();
    init_tracing(args.debug);

    let mut config = match config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{}; using defaults", e);
            config::ReaderConfig::default()
        }
    };
    if let Some(api_url) = args.api_url.as_deref() {
        config.api_url = config::normalize_url(api_url, config::DEFAULT_API_URL);
    }
    tracing::debug!("Using backend at {}", config.api_url);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(args, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
