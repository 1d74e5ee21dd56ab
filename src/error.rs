use std::{io, sync::Arc};

use alloy::{
    eips::BlockId,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;
use tokio::task::JoinError;

use crate::{
    config::ConfigError, engine::store::StoreError, event::DecodeError,
    robust_provider::Error as RobustProviderError,
};

/// Errors emitted by the tracker.
///
/// The lifecycle variants ([`TrackerError::EngineStart`], [`TrackerError::FilterCreate`] and
/// [`TrackerError::Sync`]) wrap the underlying cause so the top-level report names the phase
/// that failed. Every variant is fatal for the task that produced it; nothing is retried at this
/// level (RPC retries happen inside [`crate::robust_provider::RobustProvider`]).
#[derive(Error, Debug)]
pub enum TrackerError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),

    /// A requested block (by number, hash or tag) could not be retrieved.
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),

    /// A timeout elapsed while waiting for an RPC response.
    #[error("Operation timed out")]
    Timeout,

    /// The command line did not describe a usable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The tracking engine could not be started.
    #[error("Failed to start tracker: {0}")]
    EngineStart(#[source] Box<TrackerError>),

    /// A log filter could not be created.
    #[error("Failed to create filter: {0}")]
    FilterCreate(#[source] Box<TrackerError>),

    /// The historical backfill failed.
    #[error("Historical sync failed: {0}")]
    Sync(#[source] Box<TrackerError>),

    /// A log matched the deposit event shape but its payload could not be decoded.
    #[error("Malformed deposit log in block {block}: {source}")]
    Decode {
        block: u64,
        #[source]
        source: DecodeError,
    },

    /// Reading or writing the cursor store failed.
    #[error("Cursor store error: {0}")]
    Store(#[from] StoreError),

    /// The report sink rejected a write.
    #[error("Failed to write report: {0}")]
    Output(#[from] io::Error),

    /// The filter's event receiver was already handed out.
    #[error("Event channel already taken")]
    EventChannelTaken,

    /// The consumer of the filter's event channel went away before shutdown was requested.
    #[error("Event channel closed")]
    EventChannelClosed,

    /// A filter was requested before the engine was started.
    #[error("Tracker has not been started")]
    NotStarted,

    /// A background task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(#[from] JoinError),

    /// The configured batch size is invalid (must be greater than zero).
    #[error("Batch size must be greater than 0")]
    InvalidBatchSize,

    /// The configured event buffer capacity is invalid (must be greater than zero).
    #[error("Event buffer capacity must be greater than 0")]
    InvalidBufferCapacity,
}

impl From<RobustProviderError> for TrackerError {
    fn from(error: RobustProviderError) -> TrackerError {
        match error {
            RobustProviderError::Timeout => TrackerError::Timeout,
            RobustProviderError::RpcError(err) => TrackerError::RpcError(err),
            RobustProviderError::BlockNotFound(block) => TrackerError::BlockNotFound(block),
        }
    }
}

impl From<RpcError<TransportErrorKind>> for TrackerError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        TrackerError::RpcError(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_name_the_failed_phase() {
        let err = TrackerError::Sync(Box::new(TrackerError::Timeout));
        assert_eq!(err.to_string(), "Historical sync failed: Operation timed out");

        let err = TrackerError::EngineStart(Box::new(TrackerError::NotStarted));
        assert_eq!(err.to_string(), "Failed to start tracker: Tracker has not been started");
    }

    #[test]
    fn decode_error_reports_block() {
        let err = TrackerError::Decode {
            block: 1000,
            source: DecodeError::MissingField("index"),
        };
        assert_eq!(
            err.to_string(),
            "Malformed deposit log in block 1000: Missing field 'index' in decoded payload"
        );
    }

    #[test]
    fn robust_provider_errors_map_one_to_one() {
        assert!(matches!(
            TrackerError::from(RobustProviderError::Timeout),
            TrackerError::Timeout
        ));
        let id = BlockId::number(7);
        assert!(matches!(
            TrackerError::from(RobustProviderError::BlockNotFound(id)),
            TrackerError::BlockNotFound(got) if got == id
        ));
    }
}
