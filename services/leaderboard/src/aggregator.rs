//! Leaderboard computation: scan, read, score, rank, summarize.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use moltrank_core::{metrics, reputation, round1, stake_days, RankConfig, Tier, TokenAmount};
use moltrank_resilience::Bulkhead;
use tracing::{info, instrument, warn};

use crate::address::Address;
use crate::chain::{BlockRange, ChainError, ChainReader};
use crate::directory::{AgentDirectory, StaticDirectory};
use crate::error::{LeaderboardError, LookupError, SettingsError};
use crate::fetcher::{AccountFetcher, AccountLookup, LookupStatus};
use crate::index::{AddressIndex, SledIndex};
use crate::rpc::{JsonRpcChain, RpcSettings};
use crate::scanner::BackfillScanner;

/// Source of "now" in epoch seconds, sampled once per run.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 { chrono::Utc::now().timestamp() }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 { self.0 }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub deployment_block: u64,
    pub window_size: u64,
    pub fetch_concurrency: usize,
    pub call_timeout: Duration,
    pub run_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self { Self::from_config(&RankConfig::default()) }
}

impl EngineSettings {
    pub fn from_config(cfg: &RankConfig) -> Self {
        Self {
            deployment_block: cfg.deployment_block,
            window_size: cfg.window_size,
            fetch_concurrency: cfg.fetch_concurrency,
            call_timeout: Duration::from_millis(cfg.call_timeout_ms),
            run_timeout: Duration::from_millis(cfg.run_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.window_size == 0 { return Err(SettingsError::ZeroWindowSize); }
        if self.fetch_concurrency == 0 { return Err(SettingsError::ZeroConcurrency); }
        Ok(())
    }
}

/// Scored view of one account.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStanding {
    pub address: Address,
    pub name: String,
    pub staked: TokenAmount,
    pub stake_days: u64,
    pub penalty_count: u64,
    /// Unrounded.
    pub reputation: f64,
    pub tier: Tier,
    pub total_slashed: TokenAmount,
    pub pending_unstake: TokenAmount,
    pub unstake_available_at: Option<u64>,
    pub status: LookupStatus,
}

impl AgentStanding {
    fn unranked(address: Address, name: String, status: LookupStatus) -> Self {
        Self {
            address,
            name,
            staked: TokenAmount::ZERO,
            stake_days: 0,
            penalty_count: 0,
            reputation: 0.0,
            tier: Tier::Unranked,
            total_slashed: TokenAmount::ZERO,
            pending_unstake: TokenAmount::ZERO,
            unstake_available_at: None,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    /// 1-based.
    pub rank: usize,
    pub agent: AgentStanding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_staked: TokenAmount,
    pub total_agents: usize,
    /// Mean of exact scores, rounded to one decimal; zero when empty.
    pub avg_reputation: f64,
}

impl Summary {
    pub fn of(entries: &[LeaderboardEntry]) -> Self {
        let total_staked = entries.iter().map(|e| e.agent.staked).sum();
        let total_agents = entries.len();
        let avg_reputation = if total_agents == 0 {
            0.0
        } else {
            round1(entries.iter().map(|e| e.agent.reputation).sum::<f64>() / total_agents as f64)
        };
        Self { total_staked, total_agents, avg_reputation }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub summary: Summary,
    /// Chain head sampled when the scan started.
    pub head: u64,
    pub windows_scanned: usize,
    pub failed_windows: Vec<BlockRange>,
    pub failed_lookups: usize,
    /// Epoch seconds used for every stake-age computation in this run.
    pub generated_at: i64,
}

impl Leaderboard {
    /// False when some window or account read failed and the board may be
    /// missing agents.
    pub fn is_complete(&self) -> bool { self.failed_windows.is_empty() && self.failed_lookups == 0 }
}

pub struct LeaderboardEngine {
    chain: Arc<dyn ChainReader>,
    settings: EngineSettings,
    bulkhead: Bulkhead,
    index: Option<Arc<dyn AddressIndex>>,
    directory: Arc<dyn AgentDirectory>,
    clock: Arc<dyn Clock>,
}

impl LeaderboardEngine {
    pub fn new(chain: Arc<dyn ChainReader>, settings: EngineSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self {
            chain,
            bulkhead: Bulkhead::new("stake-reads", settings.fetch_concurrency),
            settings,
            index: None,
            directory: Arc::new(StaticDirectory::new()),
            clock: Arc::new(SystemClock),
        })
    }

    /// JSON-RPC chain, configured directory and, when `index_path` is set,
    /// the persistent index.
    pub fn from_config(cfg: &RankConfig) -> anyhow::Result<Self> {
        let contract: Address = cfg
            .contract_address
            .parse()
            .map_err(|e| SettingsError::BadContract(cfg.contract_address.clone(), e))?;
        if contract == Address::ZERO {
            warn!("contract_address is the zero address; no events will match until it is configured");
        }
        let rpc = RpcSettings::from_config(cfg, contract);
        let mut settings = EngineSettings::from_config(cfg);
        let budget = rpc.call_budget();
        if budget > settings.call_timeout {
            warn!(
                call_timeout_ms = settings.call_timeout.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "call_timeout_ms shorter than the RPC retry budget; raising it"
            );
            settings.call_timeout = budget;
        }
        let chain = JsonRpcChain::new(rpc).context("building JSON-RPC client")?;
        let mut engine = Self::new(Arc::new(chain), settings)?
            .with_directory(Arc::new(StaticDirectory::from_config(&cfg.agent_names)));
        if let Some(path) = &cfg.index_path {
            let index = SledIndex::open(path).with_context(|| format!("opening index at {}", path.display()))?;
            info!(path = %path.display(), "incremental index enabled");
            engine = engine.with_index(Arc::new(index));
        }
        Ok(engine)
    }

    pub fn with_index(mut self, index: Arc<dyn AddressIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings { &self.settings }

    /// Full recompute. Partial window or account failures still yield a
    /// board; see [`Leaderboard::is_complete`].
    pub async fn compute_leaderboard(&self) -> Result<Leaderboard, LeaderboardError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.settings.run_timeout, self.run()).await {
            Ok(result) => result,
            Err(_) => Err(LeaderboardError::DeadlineExceeded(self.settings.run_timeout)),
        };
        let seconds = started.elapsed().as_secs_f64();
        match &result {
            Ok(board) => {
                let outcome = if board.is_complete() { "complete" } else { "incomplete" };
                metrics::record_run(outcome, seconds, Some(board.entries.len()));
                info!(
                    agents = board.summary.total_agents,
                    total_staked = %board.summary.total_staked,
                    failed_windows = board.failed_windows.len(),
                    failed_lookups = board.failed_lookups,
                    seconds,
                    "leaderboard computed"
                );
            }
            Err(e @ LeaderboardError::Unavailable(_)) => {
                metrics::record_run("unavailable", seconds, None);
                warn!(error = %e, "leaderboard unavailable");
            }
            Err(e @ LeaderboardError::DeadlineExceeded(_)) => {
                metrics::record_run("timeout", seconds, None);
                warn!(error = %e, "leaderboard run abandoned");
            }
        }
        result
    }

    #[instrument(skip(self))]
    async fn run(&self) -> Result<Leaderboard, LeaderboardError> {
        let head = match tokio::time::timeout(self.settings.call_timeout, self.chain.current_height()).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => return Err(LeaderboardError::Unavailable(e)),
            Err(_) => return Err(LeaderboardError::Unavailable(ChainError::Timeout(self.settings.call_timeout))),
        };
        let now = self.clock.now();

        let report = self.scanner().scan(head).await;

        let fetcher = self.fetcher();
        let lookups = join_all(report.agents.iter().map(|agent| self.bulkhead.run(fetcher.fetch(*agent)))).await;
        let failed_lookups = lookups.iter().filter(|l| l.status == LookupStatus::Failed).count();

        let mut standings: Vec<AgentStanding> = lookups
            .into_iter()
            .filter(|l| !l.record.staked.is_zero())
            .map(|l| self.score(l, now))
            .collect();
        standings.sort_by(|a, b| b.staked.cmp(&a.staked).then_with(|| a.address.cmp(&b.address)));

        let entries: Vec<LeaderboardEntry> = standings
            .into_iter()
            .enumerate()
            .map(|(i, agent)| LeaderboardEntry { rank: i + 1, agent })
            .collect();
        let summary = Summary::of(&entries);

        Ok(Leaderboard {
            entries,
            summary,
            head,
            windows_scanned: report.windows,
            failed_windows: report.failed,
            failed_lookups,
            generated_at: now,
        })
    }

    /// Standing of a single account. The address is validated before any
    /// chain call; zero, unresolvable and failed reads give an unranked,
    /// zeroed standing.
    pub async fn compute_reputation(&self, address: &str) -> Result<AgentStanding, LookupError> {
        let address: Address = address.parse()?;
        let now = self.clock.now();
        let lookup = self.fetcher().fetch(address).await;
        if lookup.record.staked.is_zero() {
            return Ok(AgentStanding::unranked(address, self.directory.display_name(&address), lookup.status));
        }
        Ok(self.score(lookup, now))
    }

    fn scanner(&self) -> BackfillScanner {
        let scanner = BackfillScanner::new(self.chain.clone(), self.settings.deployment_block, self.settings.window_size, self.settings.call_timeout);
        match &self.index {
            Some(index) => scanner.with_index(index.clone()),
            None => scanner,
        }
    }

    fn fetcher(&self) -> AccountFetcher { AccountFetcher::new(self.chain.clone(), self.settings.call_timeout) }

    fn score(&self, lookup: AccountLookup, now: i64) -> AgentStanding {
        let record = lookup.record;
        let days = stake_days(record.staked_at, now);
        AgentStanding {
            address: record.address,
            name: self.directory.display_name(&record.address),
            staked: record.staked,
            stake_days: days,
            penalty_count: record.penalty_count,
            reputation: reputation(record.staked.as_tokens(), days, record.penalty_count),
            tier: Tier::for_amount(record.staked),
            total_slashed: record.total_slashed,
            pending_unstake: record.pending_unstake,
            unstake_available_at: record.unstake_available_at,
            status: lookup.status,
        }
    }
}
