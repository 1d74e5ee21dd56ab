use std::ops::RangeInclusive;

use alloy::{
    consensus::BlockHeader,
    eips::BlockNumberOrTag,
    network::{BlockResponse, Network, primitives::HeaderResponse},
    primitives::Address,
    rpc::types::{Filter, Log},
};

use crate::{
    TrackerError,
    robust_provider::{self, RobustProvider},
    types::BlockRef,
};

/// Read access to a chain, as needed by the [`Tracker`](super::Tracker).
pub trait ChainSource: Clone + Send + Sync + 'static {
    /// The current head of the chain.
    fn latest_block(&self) -> impl Future<Output = Result<BlockRef, TrackerError>> + Send;

    /// The canonical block at `number`, `None` if the chain is not that long.
    fn block_by_number(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<Option<BlockRef>, TrackerError>> + Send;

    /// Logs emitted by any of `addresses` in `range`, in node order.
    fn logs(
        &self,
        addresses: &[Address],
        range: RangeInclusive<u64>,
    ) -> impl Future<Output = Result<Vec<Log>, TrackerError>> + Send;

    /// Whether contract code is deployed at `address` as of block `number`.
    fn has_code(
        &self,
        address: Address,
        number: u64,
    ) -> impl Future<Output = Result<bool, TrackerError>> + Send;
}

fn block_ref<N: Network>(block: &N::BlockResponse) -> BlockRef {
    let header = block.header();
    BlockRef::new(header.number(), header.hash())
}

impl<N: Network> ChainSource for RobustProvider<N> {
    async fn latest_block(&self) -> Result<BlockRef, TrackerError> {
        let block = self.get_block_by_number(BlockNumberOrTag::Latest).await?;
        Ok(block_ref::<N>(&block))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRef>, TrackerError> {
        match self.get_block_by_number(BlockNumberOrTag::Number(number)).await {
            Ok(block) => Ok(Some(block_ref::<N>(&block))),
            Err(robust_provider::Error::BlockNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn logs(
        &self,
        addresses: &[Address],
        range: RangeInclusive<u64>,
    ) -> Result<Vec<Log>, TrackerError> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(*range.start())
            .to_block(*range.end());
        Ok(self.get_logs(&filter).await?)
    }

    async fn has_code(&self, address: Address, number: u64) -> Result<bool, TrackerError> {
        Ok(!self.get_code_at(address, number).await?.is_empty())
    }
}
