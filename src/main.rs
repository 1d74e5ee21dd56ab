use std::{io, process::ExitCode, sync::Arc};

use clap::Parser;
use deposit_tracker::{
    Cli, Config, DepositReporter, EventDecoder, FileStore, OsSignals, ShutdownCoordinator,
    ShutdownOutcome, SyncOrchestrator, Tracker, TrackerError,
    robust_provider::{RobustProvider, RobustProviderBuilder},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version are not failures
            let code = u8::from(err.use_stderr());
            if let Err(print) = err.print() {
                error!(error = %print, "Failed to print usage");
            }
            return ExitCode::from(code);
        }
    };

    let reporter = DepositReporter::stdout();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            fail(&reporter, &err.into());
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            fail(&reporter, &TrackerError::Output(err));
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(config, reporter));
    // a forced shutdown must not wait for tasks that ignored cancellation
    runtime.shutdown_background();
    code
}

async fn run(config: Config, reporter: DepositReporter<io::Stdout>) -> ExitCode {
    let signals = match OsSignals::install() {
        Ok(signals) => signals,
        Err(err) => {
            fail(&reporter, &TrackerError::Output(err));
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let mut coordinator = ShutdownCoordinator::new(signals, cancel.clone());
    let outcome = coordinator.run(track(config, reporter.clone(), cancel)).await;

    if let ShutdownOutcome::Failed(err) = &outcome {
        fail(&reporter, err);
    }
    info!(exit_code = outcome.exit_code(), "Exiting");
    ExitCode::from(outcome.exit_code())
}

async fn track(
    config: Config,
    reporter: DepositReporter<io::Stdout>,
    cancel: CancellationToken,
) -> Result<(), TrackerError> {
    info!(endpoint = %config.endpoint, target = %config.target, "Starting deposit tracker");

    let provider: RobustProvider = RobustProviderBuilder::new(config.endpoint.clone())
        .call_timeout(config.tracker.call_timeout)
        .max_retries(config.tracker.max_retries)
        .min_delay(config.tracker.min_delay)
        .build()
        .await
        .map_err(|err| TrackerError::EngineStart(Box::new(err.into())))?;
    let store = Arc::new(FileStore::open(&config.tracker.store_path)?);
    let tracker = Tracker::new(provider, store, config.tracker)?;

    let orchestrator = SyncOrchestrator::new(tracker, reporter, EventDecoder::deposit());
    let target = config.target;
    tokio::spawn(async move { orchestrator.run(target, cancel).await }).await?
}

fn fail(reporter: &DepositReporter<io::Stdout>, err: &TrackerError) {
    error!(error = %err, "Deposit tracker failed");
    if let Err(write) = reporter.error(err) {
        error!(error = %write, "Failed to report error");
    }
}
