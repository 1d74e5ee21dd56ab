use std::{fmt::Debug, sync::Arc, time::Duration};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::{Ethereum, Network},
    primitives::{Address, Bytes},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, error, warn};

/// Failure of a single [`RobustProvider`] call, after retries.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Operation timed out")]
    Timeout,
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}

/// Provider wrapper with built-in retry and timeout mechanisms.
///
/// Every call is retried with exponential backoff and the whole call, retries included, is
/// bounded by `call_timeout`.
#[derive(Clone, Debug)]
pub struct RobustProvider<N: Network = Ethereum> {
    pub(crate) provider: RootProvider<N>,
    pub(crate) call_timeout: Duration,
    pub(crate) max_retries: usize,
    pub(crate) min_delay: Duration,
}

impl<N: Network> RobustProvider<N> {
    /// Fetch a block by [`BlockNumberOrTag`] with retry and timeout.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors). A block the node does not know is
    /// [`Error::BlockNotFound`].
    pub async fn get_block_by_number(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<N::BlockResponse, Error> {
        debug!(%number, "eth_getBlockByNumber called");
        let result = self
            .try_operation(
                move |provider| async move { provider.get_block_by_number(number).await },
            )
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getBlockByNumber failed");
        }

        result?.ok_or_else(|| Error::BlockNotFound(number.into()))
    }

    /// Fetch the code deployed at `address` as of block `number` with retry and timeout.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_code_at(&self, address: Address, number: u64) -> Result<Bytes, Error> {
        debug!(%address, number, "eth_getCode called");
        let result = self
            .try_operation(move |provider| async move {
                provider.get_code_at(address).number(number).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getCode failed");
        }
        result
    }

    /// Fetch logs for the given [`Filter`] with retry and timeout.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        debug!("eth_getLogs called");
        let result = self
            .try_operation(move |provider| async move { provider.get_logs(filter).await })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Execute `operation` with exponential backoff and a total timeout.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`Error::Timeout`] if `call_timeout` elapses, retries included.
    /// * [`Error::RpcError`] with the last transport error once `max_retries` is exhausted.
    pub(crate) async fn try_operation<T, F, Fut>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(self.provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    warn!(error = %err, "RPC error retrying after {:?}", dur);
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(Error::from)?
        .map_err(Error::from)
    }
}
