use std::io::Write;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    TrackerError,
    event::{DecodedDeposit, EventDecoder},
    reporter::DepositReporter,
    types::LogDelta,
};

/// Lifecycle of an [`IngestionLoop`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IngestionState {
    /// Waiting for the first delta.
    Idle,
    /// At least one delta has been processed.
    Running,
    /// Cancellation observed; no further deltas are taken.
    Draining,
    /// The loop has returned.
    Stopped,
}

/// Consumes log deltas from a filter and reports every deposit in their `added` logs.
///
/// Each delta is processed to completion before cancellation is checked again, so a batch is
/// never half-reported. `removed` logs are acknowledged but not reported. The cursor a delta
/// carries is committed only after its deposits were reported, so deltas still queued when the
/// loop stops are delivered again after a restart.
///
/// The current [`IngestionState`] is published on a watch channel, see
/// [`IngestionLoop::subscribe`].
#[derive(Debug)]
pub struct IngestionLoop<W> {
    decoder: EventDecoder,
    reporter: DepositReporter<W>,
    cancel: CancellationToken,
    state: watch::Sender<IngestionState>,
}

impl<W: Write> IngestionLoop<W> {
    pub fn new(
        decoder: EventDecoder,
        reporter: DepositReporter<W>,
        cancel: CancellationToken,
    ) -> Self {
        let state = watch::Sender::new(IngestionState::Idle);
        Self { decoder, reporter, cancel, state }
    }

    #[must_use]
    pub fn state(&self) -> IngestionState {
        *self.state.borrow()
    }

    /// Follows the loop's state, including the final [`IngestionState::Stopped`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<IngestionState> {
        self.state.subscribe()
    }

    /// Runs until cancellation, closure of `events`, or the first fatal error.
    ///
    /// Returns the state the loop stopped from: [`IngestionState::Draining`] when cancellation
    /// ended it, [`IngestionState::Idle`] or [`IngestionState::Running`] when the engine closed
    /// the channel. Subscribers observe [`IngestionState::Stopped`] once it has returned.
    ///
    /// # Errors
    ///
    /// * [`TrackerError::Decode`] if a log matches the event shape but cannot be decoded.
    /// * [`TrackerError::Output`] if the report sink fails.
    /// * [`TrackerError::Store`] if a cursor cannot be committed.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<LogDelta>,
    ) -> Result<IngestionState, TrackerError> {
        let result = self.consume(&mut events).await;
        let last = self.state.send_replace(IngestionState::Stopped);
        info!(ok = result.is_ok(), from = ?last, "Ingestion stopped");
        result
    }

    async fn consume(
        &self,
        events: &mut mpsc::Receiver<LogDelta>,
    ) -> Result<IngestionState, TrackerError> {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    self.state.send_replace(IngestionState::Draining);
                    info!("Cancellation observed, ingestion draining");
                    return Ok(IngestionState::Draining);
                }
                delta = events.recv() => {
                    let Some(delta) = delta else {
                        warn!("Event channel closed by the engine");
                        return Ok(self.state());
                    };
                    self.state.send_if_modified(|state| {
                        if *state != IngestionState::Idle {
                            return false;
                        }
                        *state = IngestionState::Running;
                        true
                    });
                    let reported = self.process(&delta)?;
                    debug!(
                        added = delta.added.len(),
                        removed = delta.removed.len(),
                        reported,
                        "Processed log delta"
                    );
                }
            }
        }
    }

    /// Reports every matching log of `delta.added`, in order, then commits the delta's cursor.
    /// Returns how many deposits were reported.
    ///
    /// # Errors
    ///
    /// See [`IngestionLoop::run`].
    pub fn process(&self, delta: &LogDelta) -> Result<usize, TrackerError> {
        if !delta.removed.is_empty() {
            warn!(count = delta.removed.len(), "Logs removed by reorg");
        }

        let mut reported = 0;
        for log in &delta.added {
            if !self.decoder.matches(log) {
                continue;
            }
            let deposit = DecodedDeposit::decode(&self.decoder, log).map_err(|source| {
                TrackerError::Decode { block: log.block_number.unwrap_or_default(), source }
            })?;
            self.reporter.report(&deposit)?;
            reported += 1;
        }

        if let Some(commit) = &delta.commit {
            commit.commit()?;
            debug!(block_number = commit.block().number, "Cursor committed");
        }
        Ok(reported)
    }
}
