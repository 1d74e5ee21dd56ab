//! Fixtures shared by unit and integration tests. Enabled by the `test-utils` feature.

#![allow(clippy::missing_panics_doc)]

mod macros;
mod mock_chain;

use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use alloy::{
    primitives::{Address, Bytes, LogData},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};

pub use mock_chain::MockChain;

sol! {
    /// The deposit contract's event, used to encode test logs.
    event DepositEvent(
        bytes pubkey,
        bytes withdrawal_credentials,
        bytes amount,
        bytes signature,
        bytes index
    );
}

/// A `DepositEvent` log emitted by `address` at `block`, with the given raw `index` and
/// `amount` field bytes.
#[must_use]
pub fn deposit_log(address: Address, block: u64, index: &[u8], amount: &[u8]) -> Log {
    let event = DepositEvent {
        pubkey: Bytes::from(vec![0xaa; 48]),
        withdrawal_credentials: Bytes::from(vec![0x01; 32]),
        amount: Bytes::copy_from_slice(amount),
        signature: Bytes::from(vec![0xbb; 96]),
        index: Bytes::copy_from_slice(index),
    };
    raw_log(address, block, event.encode_log_data())
}

/// A log with arbitrary topics and payload.
#[must_use]
pub fn raw_log(address: Address, block: u64, data: LogData) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(block),
        ..Default::default()
    }
}

/// In-memory, clonable [`Write`] sink for capturing report lines.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Everything written so far, split into lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
