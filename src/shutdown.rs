//! Termination signal handling.
//!
//! The first signal cancels the shared [`CancellationToken`] and lets the workers wind down.
//! A second signal before they are done forces the exit.

use std::{fmt, io};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::TrackerError;

/// Signals that request shutdown. All are handled the same way.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Hangup => "SIGHUP",
        })
    }
}

/// Source of termination signals.
pub trait SignalSource: Send {
    /// Next signal, `None` once the source can produce no more.
    fn recv(&mut self) -> impl Future<Output = Option<TerminationSignal>> + Send;
}

impl SignalSource for mpsc::Receiver<TerminationSignal> {
    async fn recv(&mut self) -> Option<TerminationSignal> {
        mpsc::Receiver::recv(self).await
    }
}

/// Process signals: SIGINT, SIGTERM and SIGHUP on unix, Ctrl+C elsewhere.
#[derive(Debug)]
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl OsSignals {
    /// Installs the handlers. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// If a handler cannot be registered with the OS.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    // Best-effort implementation for non-unix systems
    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }
}

impl SignalSource for OsSignals {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(TerminationSignal::Interrupt),
            Some(()) = self.terminate.recv() => Some(TerminationSignal::Terminate),
            Some(()) = self.hangup.recv() => Some(TerminationSignal::Hangup),
            else => None,
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<TerminationSignal> {
        tokio::signal::ctrl_c().await.ok().map(|()| TerminationSignal::Interrupt)
    }
}

/// How the process ended.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// The workers finished, on their own or after the first signal.
    Graceful,
    /// A second signal arrived before the workers finished.
    Forced,
    /// A worker failed.
    Failed(TrackerError),
}

impl ShutdownOutcome {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            ShutdownOutcome::Graceful => 0,
            ShutdownOutcome::Forced | ShutdownOutcome::Failed(_) => 1,
        }
    }
}

impl From<Result<(), TrackerError>> for ShutdownOutcome {
    fn from(result: Result<(), TrackerError>) -> Self {
        match result {
            Ok(()) => ShutdownOutcome::Graceful,
            Err(err) => ShutdownOutcome::Failed(err),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    Waiting,
    ShuttingDown,
    Done,
}

/// Races termination signals against the completion of the workers.
#[derive(Debug)]
pub struct ShutdownCoordinator<S> {
    signals: S,
    cancel: CancellationToken,
    state: ShutdownState,
}

impl<S: SignalSource> ShutdownCoordinator<S> {
    pub fn new(signals: S, cancel: CancellationToken) -> Self {
        Self { signals, cancel, state: ShutdownState::Waiting }
    }

    #[must_use]
    pub fn state(&self) -> ShutdownState {
        self.state
    }

    /// Drives `workers` to completion or until a second signal, and reports the outcome.
    ///
    /// The token passed to [`ShutdownCoordinator::new`] is cancelled on the first signal.
    /// Signals arriving after the outcome is decided are not observed.
    pub async fn run<F>(&mut self, workers: F) -> ShutdownOutcome
    where
        F: Future<Output = Result<(), TrackerError>>,
    {
        let mut workers = std::pin::pin!(workers);

        let signal = tokio::select! {
            signal = self.signals.recv() => signal,
            result = &mut workers => return self.finish(result.into()),
        };

        let Some(signal) = signal else {
            warn!("Signal source closed, waiting for workers to finish");
            let result = workers.await;
            return self.finish(result.into());
        };

        info!(%signal, "Received termination signal, shutting down gracefully");
        self.state = ShutdownState::ShuttingDown;
        self.cancel.cancel();

        let outcome = tokio::select! {
            result = &mut workers => result.into(),
            Some(signal) = self.signals.recv() => {
                warn!(%signal, "Received second termination signal, forcing shutdown");
                ShutdownOutcome::Forced
            }
        };
        self.finish(outcome)
    }

    fn finish(&mut self, outcome: ShutdownOutcome) -> ShutdownOutcome {
        self.state = ShutdownState::Done;
        match &outcome {
            ShutdownOutcome::Graceful => info!("Shutdown complete"),
            ShutdownOutcome::Forced => warn!("Shutdown forced"),
            ShutdownOutcome::Failed(err) => warn!(error = %err, "Stopped on error"),
        }
        outcome
    }
}
