use std::time::Duration;

use thiserror::Error;

use crate::address::AddressError;
use crate::chain::ChainError;

#[derive(Debug, Error)]
pub enum LeaderboardError {
    /// Chain head could not be read, so nothing was scanned.
    #[error("chain unavailable: {0}")]
    Unavailable(#[source] ChainError),
    #[error("leaderboard run exceeded {0:?}")]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("window_size must be positive")]
    ZeroWindowSize,
    #[error("fetch_concurrency must be positive")]
    ZeroConcurrency,
    #[error("contract_address {0:?} is not a valid address: {1}")]
    BadContract(String, AddressError),
}
