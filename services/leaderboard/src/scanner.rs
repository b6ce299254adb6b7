//! Backfill scan of `Staked` events in bounded block windows.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use moltrank_core::metrics;
use tracing::{debug, info, instrument, warn};

use crate::address::Address;
use crate::chain::{BlockRange, ChainError, ChainReader, EventKind};
use crate::index::AddressIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub agents: BTreeSet<Address>,
    /// Windows actually queried this run.
    pub windows: usize,
    pub failed: Vec<BlockRange>,
    pub from_block: u64,
    pub head: u64,
}

impl ScanReport {
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

pub struct BackfillScanner {
    chain: Arc<dyn ChainReader>,
    deployment_block: u64,
    window_size: u64,
    call_timeout: Duration,
    index: Option<Arc<dyn AddressIndex>>,
}

impl BackfillScanner {
    pub fn new(chain: Arc<dyn ChainReader>, deployment_block: u64, window_size: u64, call_timeout: Duration) -> Self {
        Self { chain, deployment_block, window_size, call_timeout, index: None }
    }

    pub fn with_index(mut self, index: Arc<dyn AddressIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Scans from the start block to `head` one window at a time. A window
    /// that errors or exceeds the call deadline is recorded and skipped.
    #[instrument(skip(self), fields(deployment_block = self.deployment_block, window_size = self.window_size))]
    pub async fn scan(&self, head: u64) -> ScanReport {
        let mut agents = BTreeSet::new();
        let mut from_block = self.deployment_block;
        if let Some(index) = &self.index {
            match index.load() {
                Ok(snapshot) => {
                    from_block = snapshot.next_block.map_or(from_block, |b| b.max(from_block));
                    agents = snapshot.agents;
                    debug!(from_block, known = agents.len(), "resuming from index");
                }
                Err(e) => warn!(error = %e, "index unreadable; rescanning from deployment block"),
            }
        }

        let mut windows = 0usize;
        let mut failed = Vec::new();
        for range in BlockRange::windows(from_block, head, self.window_size) {
            windows += 1;
            let result = match tokio::time::timeout(self.call_timeout, self.chain.query_events(EventKind::Staked, range)).await {
                Ok(r) => r,
                Err(_) => Err(ChainError::Timeout(self.call_timeout)),
            };
            match result {
                Ok(logs) => {
                    metrics::record_window(true);
                    agents.extend(logs.into_iter().map(|log| log.agent));
                }
                Err(e) => {
                    metrics::record_window(false);
                    warn!(%range, error = %e, "event window failed; skipping");
                    failed.push(range);
                }
            }
        }

        if let Some(index) = &self.index {
            let next_block = failed.first().map(|r| r.from).unwrap_or_else(|| head.saturating_add(1)).max(from_block);
            if let Err(e) = index.commit(next_block, &agents) {
                warn!(error = %e, next_block, "failed to persist scan cursor");
            }
        }

        info!(windows, failed = failed.len(), agents = agents.len(), from_block, head, "backfill scan finished");
        ScanReport { agents, windows, failed, from_block, head }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChain;
    use moltrank_core::TokenAmount;

    fn addr(n: u8) -> Address { Address::from_bytes([n; 20]) }

    fn chain() -> Arc<MemoryChain> {
        let chain = Arc::new(MemoryChain::new(1_000));
        chain.stake(addr(1), 100, TokenAmount::from_tokens(1), 1, 0);
        chain.emit_staked(addr(1), 450);
        chain.stake(addr(2), 620, TokenAmount::from_tokens(1), 1, 0);
        chain
    }

    #[tokio::test]
    async fn dedups_across_windows() {
        let chain = chain();
        let report = BackfillScanner::new(chain.clone(), 100, 250, Duration::from_secs(1)).scan(1_000).await;
        assert_eq!(report.agents, BTreeSet::from([addr(1), addr(2)]));
        assert_eq!(report.windows, 4);
        assert!(report.is_complete());
        assert_eq!(chain.event_queries().first(), Some(&BlockRange::new(100, 349)));
    }

    #[tokio::test]
    async fn failed_window_is_skipped() {
        let chain = chain();
        chain.fail_window_at(620);
        let report = BackfillScanner::new(chain, 100, 250, Duration::from_secs(1)).scan(1_000).await;
        assert_eq!(report.agents, BTreeSet::from([addr(1)]));
        assert_eq!(report.failed, vec![BlockRange::new(600, 849)]);
        assert_eq!(report.windows, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_window_hits_deadline_and_is_skipped() {
        let chain = chain();
        chain.set_latency(Duration::from_secs(10));
        let report = BackfillScanner::new(chain.clone(), 100, 250, Duration::from_secs(1)).scan(1_000).await;
        assert!(report.agents.is_empty());
        assert_eq!(report.windows, 4);
        assert_eq!(report.failed.len(), report.windows);
        assert_eq!(report.failed.first(), Some(&BlockRange::new(100, 349)));
        assert_eq!(report.failed.last(), Some(&BlockRange::new(850, 1_000)));
    }

    #[tokio::test]
    async fn head_before_deployment_scans_nothing() {
        let chain = chain();
        let report = BackfillScanner::new(chain.clone(), 2_000, 250, Duration::from_secs(1)).scan(1_000).await;
        assert!(report.agents.is_empty());
        assert_eq!(report.windows, 0);
        assert!(chain.event_queries().is_empty());
    }
}
