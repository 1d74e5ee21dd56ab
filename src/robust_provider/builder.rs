use std::time::Duration;

use alloy::network::Network;
use tracing::{debug, info};

use crate::robust_provider::{Error, IntoRootProvider, RobustProvider};

/// Default timeout used by `RobustProvider`
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default maximum number of retry attempts.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

/// Builder for constructing a [`RobustProvider`].
#[derive(Debug)]
pub struct RobustProviderBuilder<N: Network, P: IntoRootProvider<N>> {
    provider: P,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
    _network: std::marker::PhantomData<N>,
}

impl<N: Network, P: IntoRootProvider<N>> RobustProviderBuilder<N, P> {
    /// Create a new builder with default settings.
    ///
    /// Any type implementing [`IntoRootProvider`] can be used.
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
            _network: std::marker::PhantomData,
        }
    }

    /// Set the maximum timeout for RPC operations.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Build the `RobustProvider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to connect.
    pub async fn build(self) -> Result<RobustProvider<N>, Error> {
        debug!(
            call_timeout_ms = self.call_timeout.as_millis(),
            max_retries = self.max_retries,
            "Building RobustProvider"
        );

        let provider = self.provider.into_root_provider().await?;

        info!("RobustProvider initialized");

        Ok(RobustProvider {
            provider,
            call_timeout: self.call_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
        })
    }
}
