use std::io::Write;

use alloy::primitives::Address;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    TrackerError,
    engine::{Engine, Filter, FilterConfig},
    event::EventDecoder,
    ingestion::IngestionLoop,
    reporter::DepositReporter,
    types::SyncOutcome,
};

/// Drives an [`Engine`] from startup through historical backfill while an [`IngestionLoop`]
/// consumes the filter's deltas.
///
/// The filter is created with asynchronous delivery and ingestion is running before backfill
/// starts, so blocks produced while the history is scanned are not lost.
#[derive(Debug)]
pub struct SyncOrchestrator<E, W> {
    engine: E,
    reporter: DepositReporter<W>,
    decoder: EventDecoder,
}

impl<E, W> SyncOrchestrator<E, W>
where
    E: Engine,
    W: Write + Send + 'static,
{
    pub fn new(engine: E, reporter: DepositReporter<W>, decoder: EventDecoder) -> Self {
        Self { engine, reporter, decoder }
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Tracks deposits emitted by `target` until `cancel` fires or a fatal error occurs.
    ///
    /// Reports readiness, the resumed cursor (if any) and backfill completion; deposits are
    /// reported by the ingestion task. Returns once ingestion has stopped.
    ///
    /// # Errors
    ///
    /// * [`TrackerError::EngineStart`], [`TrackerError::FilterCreate`] and
    ///   [`TrackerError::Sync`] wrapping the cause of the failed phase.
    /// * Any error ending the ingestion task, e.g. [`TrackerError::Decode`].
    /// * [`TrackerError::Output`] if a report line cannot be written.
    pub async fn run(
        &self,
        target: Address,
        cancel: CancellationToken,
    ) -> Result<(), TrackerError> {
        self.engine
            .start(&cancel)
            .await
            .map_err(|err| TrackerError::EngineStart(Box::new(err)))?;
        self.reporter.tracker_ready()?;

        let config = FilterConfig { async_delivery: true, addresses: vec![target] };
        let mut filter = self
            .engine
            .new_filter(config)
            .await
            .map_err(|err| TrackerError::FilterCreate(Box::new(err)))?;

        match filter.last_block().await {
            Ok(Some(block)) => {
                info!(%block, "Resuming from stored cursor");
                self.reporter.last_block(&block)?;
            }
            Ok(None) => info!("No stored cursor, backfilling from genesis"),
            Err(err) => {
                warn!(error = %err, "Failed to read stored cursor, backfilling from genesis");
            }
        }

        let events = filter.event_channel()?;
        let ingestion =
            IngestionLoop::new(self.decoder.clone(), self.reporter.clone(), cancel.clone());
        let mut ingestion = tokio::spawn(ingestion.run(events));

        tokio::select! {
            synced = filter.sync(cancel.clone()) => match synced {
                Ok(SyncOutcome::Completed) => {
                    info!(%target, "Historical sync completed");
                    self.reporter.sync_complete()?;
                }
                Ok(SyncOutcome::Cancelled) => info!("Historical sync cancelled"),
                Err(TrackerError::EventChannelClosed) => {
                    // the consumer went away first, its error is the cause
                    ingestion.await??;
                    return Err(TrackerError::Sync(Box::new(TrackerError::EventChannelClosed)));
                }
                Err(err) => {
                    ingestion.abort();
                    return Err(TrackerError::Sync(Box::new(err)));
                }
            },
            joined = &mut ingestion => {
                let state = joined??;
                info!(?state, "Ingestion stopped before historical sync completed");
                return Ok(());
            }
        }

        let state = ingestion.await??;
        info!(?state, "Tracking stopped");
        Ok(())
    }
}
