//! Read-only view of the staking contract that the leaderboard consumes.
//!
//! Implementations: [`crate::rpc::JsonRpcChain`] for a live node and
//! [`crate::memory::MemoryChain`] for offline runs and tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use moltrank_core::TokenAmount;
use serde::Serialize;
use thiserror::Error;

use crate::address::Address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Http(u16),
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("circuit open, provider marked unavailable")]
    CircuitOpen,
}

impl ChainError {
    /// Worth retrying against the same provider.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transport(_) | ChainError::RateLimited | ChainError::Timeout(_) => true,
            ChainError::Http(status) => *status == 429 || *status >= 500,
            // -32005: limit exceeded, -32603: internal error (public Base endpoints)
            ChainError::Rpc { code, .. } => matches!(code, -32005 | -32603),
            ChainError::Decode(_) | ChainError::CircuitOpen => false,
        }
    }
}

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlockRange { pub from: u64, pub to: u64 }

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self { Self { from, to } }

    pub fn len(&self) -> u64 { self.to.saturating_sub(self.from).saturating_add(1) }

    /// Consecutive windows of at most `size` blocks covering `start..=head`.
    /// Empty when `head < start` or `size == 0`.
    pub fn windows(start: u64, head: u64, size: u64) -> impl Iterator<Item = BlockRange> {
        let mut next = if size == 0 { None } else { Some(start) };
        std::iter::from_fn(move || {
            let from = next.filter(|from| *from <= head)?;
            let to = from.saturating_add(size - 1).min(head);
            next = to.checked_add(1);
            Some(BlockRange { from, to })
        })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}-{}", self.from, self.to) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `Staked(address indexed agent, uint256 amount, uint256 totalStaked)`
    Staked,
}

impl EventKind {
    pub const fn signature(self) -> &'static str {
        match self { EventKind::Staked => "Staked(address,uint256,uint256)" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLog { pub agent: Address, pub block_number: u64 }

/// Decoded `getStakeInfo(address)` result. Zero timestamps mean unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StakeInfo {
    pub amount: TokenAmount,
    pub staked_at: u64,
    pub slash_count: u64,
    pub total_slashed: TokenAmount,
    pub pending_unstake: TokenAmount,
    pub unstake_available_at: u64,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number.
    async fn current_height(&self) -> Result<u64, ChainError>;

    /// Events of `kind` emitted by the staking contract within `range`.
    async fn query_events(&self, kind: EventKind, range: BlockRange) -> Result<Vec<EventLog>, ChainError>;

    /// Current stake state; `Ok(None)` when the read reverts or the contract
    /// has nothing for the account.
    async fn stake_info(&self, agent: &Address) -> Result<Option<StakeInfo>, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_contiguous_and_bounded() {
        let w: Vec<_> = BlockRange::windows(100, 25_050, 10_000).collect();
        assert_eq!(w, vec![BlockRange::new(100, 10_099), BlockRange::new(10_100, 20_099), BlockRange::new(20_100, 25_050)]);
        assert!(w.iter().all(|r| r.len() <= 10_000));
        for pair in w.windows(2) { assert_eq!(pair[0].to + 1, pair[1].from); }
    }

    #[test]
    fn windows_edge_cases() {
        assert_eq!(BlockRange::windows(10, 9, 5).count(), 0);
        assert_eq!(BlockRange::windows(10, 20, 0).count(), 0);
        assert_eq!(BlockRange::windows(10, 10, 5).collect::<Vec<_>>(), vec![BlockRange::new(10, 10)]);
        assert_eq!(BlockRange::windows(0, 4, 1).count(), 5);
        let exact: Vec<_> = BlockRange::windows(0, 19, 10).collect();
        assert_eq!(exact, vec![BlockRange::new(0, 9), BlockRange::new(10, 19)]);
        let top: Vec<_> = BlockRange::windows(u64::MAX - 2, u64::MAX, 2).collect();
        assert_eq!(top, vec![BlockRange::new(u64::MAX - 2, u64::MAX - 1), BlockRange::new(u64::MAX, u64::MAX)]);
    }

    #[test]
    fn transient_classification() {
        assert!(ChainError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ChainError::Http(503).is_transient());
        assert!(!ChainError::Http(400).is_transient());
        assert!(ChainError::Rpc { code: -32005, message: "limit".into() }.is_transient());
        assert!(!ChainError::Rpc { code: 3, message: "execution reverted".into() }.is_transient());
        assert!(!ChainError::CircuitOpen.is_transient());
    }
}
