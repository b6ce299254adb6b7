//! Per-account stake reads.

use std::sync::Arc;
use std::time::Duration;

use moltrank_core::{metrics, TokenAmount};
use serde::Serialize;
use tracing::{debug, warn};

use crate::address::Address;
use crate::chain::{ChainError, ChainReader, StakeInfo};

/// Current stake state of one account. Zero timestamps from the contract are
/// mapped to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StakeRecord {
    pub address: Address,
    pub staked: TokenAmount,
    pub staked_at: Option<u64>,
    pub penalty_count: u64,
    pub total_slashed: TokenAmount,
    pub pending_unstake: TokenAmount,
    pub unstake_available_at: Option<u64>,
}

impl StakeRecord {
    pub fn zeroed(address: Address) -> Self {
        Self {
            address,
            staked: TokenAmount::ZERO,
            staked_at: None,
            penalty_count: 0,
            total_slashed: TokenAmount::ZERO,
            pending_unstake: TokenAmount::ZERO,
            unstake_available_at: None,
        }
    }

    pub fn from_info(address: Address, info: StakeInfo) -> Self {
        Self {
            address,
            staked: info.amount,
            staked_at: (info.staked_at != 0).then_some(info.staked_at),
            penalty_count: info.slash_count,
            total_slashed: info.total_slashed,
            pending_unstake: info.pending_unstake,
            unstake_available_at: (info.unstake_available_at != 0).then_some(info.unstake_available_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    /// The read reverted or returned nothing.
    NotFound,
    /// Transport error or deadline; the record is zeroed.
    Failed,
}

impl LookupStatus {
    pub const fn as_str(self) -> &'static str {
        match self { LookupStatus::Found => "found", LookupStatus::NotFound => "not_found", LookupStatus::Failed => "failed" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLookup { pub record: StakeRecord, pub status: LookupStatus }

/// One state read per account under a per-call deadline. Failures degrade to
/// a zeroed record and never propagate.
#[derive(Clone)]
pub struct AccountFetcher {
    chain: Arc<dyn ChainReader>,
    call_timeout: Duration,
}

impl AccountFetcher {
    pub fn new(chain: Arc<dyn ChainReader>, call_timeout: Duration) -> Self { Self { chain, call_timeout } }

    pub async fn fetch(&self, address: Address) -> AccountLookup {
        let outcome = match tokio::time::timeout(self.call_timeout, self.chain.stake_info(&address)).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(self.call_timeout)),
        };
        let lookup = match outcome {
            Ok(Some(info)) => AccountLookup { record: StakeRecord::from_info(address, info), status: LookupStatus::Found },
            Ok(None) => {
                debug!(agent = %address, "stake info not resolvable");
                AccountLookup { record: StakeRecord::zeroed(address), status: LookupStatus::NotFound }
            }
            Err(e) => {
                warn!(agent = %address, error = %e, "stake info read failed; treating as zero stake");
                AccountLookup { record: StakeRecord::zeroed(address), status: LookupStatus::Failed }
            }
        };
        metrics::record_account_read(lookup.status.as_str());
        lookup
    }
}
