//! Retrying, timeout-bounded wrapper around Alloy providers.
//!
//! [`RobustProvider`] wraps Alloy's [`RootProvider`](alloy::providers::RootProvider) and adds:
//! * a total timeout per call, retries included
//! * exponential backoff retries
//!
//! Use [`RobustProviderBuilder`] to construct one with the defaults below.
//!
//! ```rust,no_run
//! use alloy::eips::BlockNumberOrTag;
//! use deposit_tracker::robust_provider::{RobustProvider, RobustProviderBuilder};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let robust: RobustProvider = RobustProviderBuilder::new("http://localhost:8545")
//!     .call_timeout(Duration::from_secs(30))
//!     .build()
//!     .await?;
//!
//! let latest = robust.get_block_by_number(BlockNumberOrTag::Latest).await?;
//! println!("Current block: {}", latest.header.number);
//! # Ok(()) }
//! ```

pub mod builder;
pub mod provider;
pub mod provider_conversion;

pub use builder::*;
pub use provider::{Error, RobustProvider};
pub use provider_conversion::IntoRootProvider;
