//! JSON response shapes served to the web front end.
//!
//! Stake is reported in whole tokens and reputation to one decimal; exact
//! values stay in [`Leaderboard`].

use moltrank_core::{round1, TokenAmount};
use serde::Serialize;

use crate::address::Address;
use crate::aggregator::{AgentStanding, Leaderboard, LeaderboardEntry};
use crate::chain::BlockRange;

fn whole_tokens(amount: TokenAmount) -> f64 { amount.as_tokens().round() }

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub rank: usize,
    pub address: Address,
    pub name: String,
    pub staked: f64,
    pub stake_days: u64,
    pub slash_count: u64,
    pub reputation: f64,
    pub tier: &'static str,
}

impl From<&LeaderboardEntry> for EntryView {
    fn from(entry: &LeaderboardEntry) -> Self {
        let agent = &entry.agent;
        Self {
            rank: entry.rank,
            address: agent.address,
            name: agent.name.clone(),
            staked: whole_tokens(agent.staked),
            stake_days: agent.stake_days,
            slash_count: agent.penalty_count,
            reputation: round1(agent.reputation),
            tier: agent.tier.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub total_staked: f64,
    pub total_agents: usize,
    pub avg_reputation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub success: bool,
    pub leaderboard: Vec<EntryView>,
    pub stats: StatsView,
    pub head: u64,
    pub generated_at: i64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_windows: Vec<BlockRange>,
    #[serde(skip_serializing_if = "is_zero")]
    pub failed_lookups: usize,
}

fn is_zero(n: &usize) -> bool { *n == 0 }

impl From<&Leaderboard> for LeaderboardResponse {
    fn from(board: &Leaderboard) -> Self {
        Self {
            success: true,
            leaderboard: board.entries.iter().map(EntryView::from).collect(),
            stats: StatsView {
                total_staked: whole_tokens(board.summary.total_staked),
                total_agents: board.summary.total_agents,
                avg_reputation: board.summary.avg_reputation,
            },
            head: board.head,
            generated_at: board.generated_at,
            incomplete: !board.is_complete(),
            failed_windows: board.failed_windows.clone(),
            failed_lookups: board.failed_lookups,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationResponse {
    pub success: bool,
    pub address: Address,
    pub name: String,
    pub staked: f64,
    pub stake_days: u64,
    pub slash_count: u64,
    pub reputation: f64,
    pub tier: &'static str,
    pub total_slashed: f64,
    pub pending_unstake: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unstake_available_at: Option<u64>,
}

impl From<&AgentStanding> for ReputationResponse {
    fn from(agent: &AgentStanding) -> Self {
        Self {
            success: true,
            address: agent.address,
            name: agent.name.clone(),
            staked: whole_tokens(agent.staked),
            stake_days: agent.stake_days,
            slash_count: agent.penalty_count,
            reputation: round1(agent.reputation),
            tier: agent.tier.label(),
            total_slashed: agent.total_slashed.as_tokens(),
            pending_unstake: agent.pending_unstake.as_tokens(),
            unstake_available_at: agent.unstake_available_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self { Self { success: false, error: error.into() } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Summary;
    use crate::fetcher::LookupStatus;
    use moltrank_core::Tier;
    use serde_json::json;

    fn standing() -> AgentStanding {
        AgentStanding {
            address: Address::from_bytes([0x11; 20]),
            name: "nessie".into(),
            staked: TokenAmount::from_wei(1_499_600_000_000_000_000_000),
            stake_days: 400,
            penalty_count: 1,
            reputation: 69.705,
            tier: Tier::Silver,
            total_slashed: TokenAmount::ZERO,
            pending_unstake: TokenAmount::ZERO,
            unstake_available_at: None,
            status: LookupStatus::Found,
        }
    }

    #[test]
    fn leaderboard_json_contract() {
        let agent = standing();
        let board = Leaderboard {
            summary: Summary { total_staked: agent.staked, total_agents: 1, avg_reputation: 69.7 },
            entries: vec![LeaderboardEntry { rank: 1, agent }],
            head: 42,
            windows_scanned: 1,
            failed_windows: vec![],
            failed_lookups: 0,
            generated_at: 1_700_000_000,
        };
        let value = serde_json::to_value(LeaderboardResponse::from(&board)).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["leaderboard"][0]["rank"], json!(1));
        assert_eq!(value["leaderboard"][0]["staked"], json!(1500.0));
        assert_eq!(value["leaderboard"][0]["stakeDays"], json!(400));
        assert_eq!(value["leaderboard"][0]["slashCount"], json!(1));
        assert_eq!(value["leaderboard"][0]["reputation"], json!(69.7));
        assert_eq!(value["leaderboard"][0]["tier"], json!("Silver"));
        assert_eq!(value["stats"], json!({"totalStaked": 1500.0, "totalAgents": 1, "avgReputation": 69.7}));
        assert!(value.get("incomplete").is_none());
        assert!(value.get("failedWindows").is_none());
    }

    #[test]
    fn incomplete_board_is_flagged() {
        let board = Leaderboard {
            entries: vec![],
            summary: Summary::of(&[]),
            head: 10,
            windows_scanned: 2,
            failed_windows: vec![BlockRange::new(0, 4)],
            failed_lookups: 3,
            generated_at: 0,
        };
        let value = serde_json::to_value(LeaderboardResponse::from(&board)).unwrap();
        assert_eq!(value["incomplete"], json!(true));
        assert_eq!(value["failedWindows"], json!([{"from": 0, "to": 4}]));
        assert_eq!(value["failedLookups"], json!(3));
        assert_eq!(value["stats"]["avgReputation"], json!(0.0));
    }

    #[test]
    fn error_shape() {
        let value = serde_json::to_value(ErrorResponse::new("invalid address")).unwrap();
        assert_eq!(value, json!({"success": false, "error": "invalid address"}));
    }
}
