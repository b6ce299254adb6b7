//! Prometheus metric groups for the leaderboard pipeline.
//!
//! Metrics live in the default registry so the health server's `/metrics`
//! route exposes them. Recording before [`init_metrics`] is a no-op.

use anyhow::Result;
use once_cell::sync::OnceCell;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub struct RankMetrics {
    pub scan_windows_total: IntCounterVec,
    pub account_reads_total: IntCounterVec,
    pub runs_total: IntCounterVec,
    pub run_seconds: Histogram,
    pub ranked_agents: IntGauge,
    pub rpc_retries_total: IntCounter,
}

static METRICS: OnceCell<RankMetrics> = OnceCell::new();

impl RankMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let scan_windows_total = IntCounterVec::new(Opts::new("moltrank_scan_windows_total", "Event log windows queried during backfill"), &["outcome"])?;
        let account_reads_total = IntCounterVec::new(Opts::new("moltrank_account_reads_total", "Stake state reads by outcome"), &["outcome"])?;
        let runs_total = IntCounterVec::new(Opts::new("moltrank_leaderboard_runs_total", "Leaderboard computations by outcome"), &["outcome"])?;
        let run_seconds = Histogram::with_opts(HistogramOpts::new("moltrank_leaderboard_run_seconds", "Wall time of a leaderboard computation")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]))?;
        let ranked_agents = IntGauge::new("moltrank_ranked_agents", "Agents on the most recent leaderboard")?;
        let rpc_retries_total = IntCounter::new("moltrank_rpc_retries_total", "JSON-RPC requests re-sent after a transient failure")?;
        registry.register(Box::new(scan_windows_total.clone()))?;
        registry.register(Box::new(account_reads_total.clone()))?;
        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(run_seconds.clone()))?;
        registry.register(Box::new(ranked_agents.clone()))?;
        registry.register(Box::new(rpc_retries_total.clone()))?;
        Ok(Self { scan_windows_total, account_reads_total, runs_total, run_seconds, ranked_agents, rpc_retries_total })
    }
}

/// Registers the metric set in the default registry. Safe to call repeatedly.
pub fn init_metrics() -> Result<()> {
    METRICS.get_or_try_init(|| RankMetrics::register(prometheus::default_registry()))?;
    Ok(())
}

pub fn metrics() -> Option<&'static RankMetrics> { METRICS.get() }

pub fn record_window(ok: bool) {
    if let Some(m) = metrics() { m.scan_windows_total.with_label_values(&[if ok { "ok" } else { "failed" }]).inc(); }
}

/// `outcome` is one of `found`, `not_found`, `failed`.
pub fn record_account_read(outcome: &str) {
    if let Some(m) = metrics() { m.account_reads_total.with_label_values(&[outcome]).inc(); }
}

/// `outcome` is one of `complete`, `incomplete`, `unavailable`, `timeout`.
pub fn record_run(outcome: &str, seconds: f64, ranked: Option<usize>) {
    if let Some(m) = metrics() {
        m.runs_total.with_label_values(&[outcome]).inc();
        m.run_seconds.observe(seconds);
        if let Some(n) = ranked { m.ranked_agents.set(n as i64); }
    }
}

pub fn record_rpc_retry() {
    if let Some(m) = metrics() { m.rpc_retries_total.inc(); }
}
