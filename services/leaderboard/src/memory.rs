//! In-process [`ChainReader`] with fault injection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moltrank_core::TokenAmount;
use parking_lot::RwLock;

use crate::address::Address;
use crate::chain::{BlockRange, ChainError, ChainReader, EventKind, EventLog, StakeInfo};

#[derive(Default)]
struct State {
    head: u64,
    head_unreachable: bool,
    events: Vec<EventLog>,
    accounts: HashMap<Address, StakeInfo>,
    failing_blocks: HashSet<u64>,
    failing_agents: HashSet<Address>,
    reverting_agents: HashSet<Address>,
    latency: Duration,
}

/// Chain state held in memory. Windows that contain a block registered with
/// [`fail_window_at`](Self::fail_window_at) fail as a provider error would.
#[derive(Default)]
pub struct MemoryChain {
    state: RwLock<State>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    event_queries: RwLock<Vec<BlockRange>>,
    state_reads: AtomicUsize,
}

impl MemoryChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.state.write().head = head;
        chain
    }

    pub fn set_head(&self, head: u64) { self.state.write().head = head; }

    /// Records a `Staked` event and sets the account's current stake.
    pub fn stake(&self, agent: Address, block: u64, amount: TokenAmount, staked_at: u64, slash_count: u64) {
        let mut st = self.state.write();
        st.events.push(EventLog { agent, block_number: block });
        st.accounts.insert(agent, StakeInfo { amount, staked_at, slash_count, ..StakeInfo::default() });
    }

    pub fn emit_staked(&self, agent: Address, block: u64) { self.state.write().events.push(EventLog { agent, block_number: block }); }

    pub fn set_account(&self, agent: Address, info: StakeInfo) { self.state.write().accounts.insert(agent, info); }

    /// Full withdrawal: the account stays in history with zero stake.
    pub fn withdraw(&self, agent: &Address) {
        if let Some(info) = self.state.write().accounts.get_mut(agent) { info.amount = TokenAmount::ZERO; info.pending_unstake = TokenAmount::ZERO; }
    }

    pub fn set_head_unreachable(&self, unreachable: bool) { self.state.write().head_unreachable = unreachable; }
    pub fn fail_window_at(&self, block: u64) { self.state.write().failing_blocks.insert(block); }
    pub fn heal_windows(&self) { self.state.write().failing_blocks.clear(); }
    pub fn fail_account(&self, agent: Address) { self.state.write().failing_agents.insert(agent); }
    pub fn revert_account(&self, agent: Address) { self.state.write().reverting_agents.insert(agent); }
    pub fn set_latency(&self, latency: Duration) { self.state.write().latency = latency; }

    pub fn peak_in_flight(&self) -> usize { self.peak_in_flight.load(Ordering::SeqCst) }
    pub fn event_queries(&self) -> Vec<BlockRange> { self.event_queries.read().clone() }
    pub fn state_reads(&self) -> usize { self.state_reads.load(Ordering::SeqCst) }

    async fn delay(&self) {
        let latency = self.state.read().latency;
        if !latency.is_zero() { tokio::time::sleep(latency).await; }
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn current_height(&self) -> Result<u64, ChainError> {
        let st = self.state.read();
        if st.head_unreachable { return Err(ChainError::Transport("connection refused".into())); }
        Ok(st.head)
    }

    async fn query_events(&self, kind: EventKind, range: BlockRange) -> Result<Vec<EventLog>, ChainError> {
        let EventKind::Staked = kind;
        self.event_queries.write().push(range);
        self.delay().await;
        let st = self.state.read();
        if st.failing_blocks.iter().any(|b| (range.from..=range.to).contains(b)) {
            return Err(ChainError::Rpc { code: -32005, message: format!("query {range} failed") });
        }
        Ok(st.events.iter().filter(|e| (range.from..=range.to).contains(&e.block_number)).copied().collect())
    }

    async fn stake_info(&self, agent: &Address) -> Result<Option<StakeInfo>, ChainError> {
        self.state_reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.delay().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let st = self.state.read();
        if st.failing_agents.contains(agent) { return Err(ChainError::Timeout(Duration::from_secs(10))); }
        if st.reverting_agents.contains(agent) { return Ok(None); }
        Ok(Some(st.accounts.get(agent).copied().unwrap_or_default()))
    }
}
