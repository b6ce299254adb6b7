use std::sync::Arc;
use std::time::Duration;

use moltrank_core::{RankConfig, Tier, TokenAmount};
use moltrank_leaderboard::{
    Address, AddressError, EngineSettings, FixedClock, LeaderboardEngine, LookupError, LookupStatus, MemoryChain, StakeInfo,
    StaticDirectory,
};

const NOW: i64 = 1_700_000_000;
const NESSIE: &str = "0xca6E9A01c6b7E52E56461807336B36bEff08e5B0";

fn engine(chain: &Arc<MemoryChain>) -> LeaderboardEngine {
    let settings = EngineSettings { deployment_block: 0, window_size: 50, call_timeout: Duration::from_secs(5), ..EngineSettings::default() };
    LeaderboardEngine::new(chain.clone(), settings)
        .unwrap()
        .with_clock(Arc::new(FixedClock(NOW)))
        .with_directory(Arc::new(StaticDirectory::from_config(&RankConfig::default().agent_names)))
}

#[tokio::test]
async fn invalid_address_makes_no_call() {
    let chain = Arc::new(MemoryChain::new(10));
    let engine = engine(&chain);
    for bad in ["", "nessie", "0x1234", "0xzz6E9A01c6b7E52E56461807336B36bEff08e5B0"] {
        let err = engine.compute_reputation(bad).await.unwrap_err();
        assert!(matches!(err, LookupError::InvalidAddress(_)), "{bad}: {err}");
    }
    let err = engine.compute_reputation("0xCA6e9A01c6b7E52E56461807336B36bEff08e5B0").await.unwrap_err();
    assert!(matches!(err, LookupError::InvalidAddress(AddressError::BadChecksum)));
    assert_eq!(chain.state_reads(), 0);
}

#[tokio::test]
async fn point_lookup_matches_batch_entry() {
    let nessie: Address = NESSIE.parse().unwrap();
    let chain = Arc::new(MemoryChain::new(200));
    chain.stake(nessie, 42, TokenAmount::from_tokens(12_500), NOW as u64 - 400 * 86_400, 2);
    chain.stake(Address::from_bytes([7; 20]), 43, TokenAmount::from_tokens(300), NOW as u64 - 86_400, 0);
    let engine = engine(&chain);

    let board = engine.compute_leaderboard().await.unwrap();
    let batch = board.entries.iter().find(|e| e.agent.address == nessie).unwrap();
    let single = engine.compute_reputation(&NESSIE.to_lowercase()).await.unwrap();

    assert_eq!(single, batch.agent);
    assert_eq!(single.name, "nessie");
    assert_eq!(single.tier, Tier::Gold);
    assert_eq!(single.stake_days, 400);
    assert_eq!(single.penalty_count, 2);
}

#[tokio::test]
async fn unstaked_account_is_unranked_and_zeroed() {
    let agent = Address::from_bytes([0x42; 20]);
    let chain = Arc::new(MemoryChain::new(10));
    chain.set_account(agent, StakeInfo { amount: TokenAmount::ZERO, staked_at: 1, slash_count: 3, ..StakeInfo::default() });
    let standing = engine(&chain).compute_reputation(&agent.to_lower_hex()).await.unwrap();
    assert_eq!(standing.tier, Tier::Unranked);
    assert_eq!(standing.staked, TokenAmount::ZERO);
    assert_eq!(standing.stake_days, 0);
    assert_eq!(standing.penalty_count, 0);
    assert_eq!(standing.reputation, 0.0);
    assert_eq!(standing.name, agent.short());
    assert_eq!(standing.status, LookupStatus::Found);
}

#[tokio::test]
async fn failed_read_degrades_to_unranked() {
    let agent = Address::from_bytes([0x43; 20]);
    let chain = Arc::new(MemoryChain::new(10));
    chain.set_account(agent, StakeInfo { amount: TokenAmount::from_tokens(5_000), staked_at: 1, ..StakeInfo::default() });
    chain.fail_account(agent);
    let standing = engine(&chain).compute_reputation(&agent.to_checksum()).await.unwrap();
    assert_eq!(standing.tier, Tier::Unranked);
    assert_eq!(standing.status, LookupStatus::Failed);

    chain.revert_account(Address::from_bytes([0x44; 20]));
    let reverted = engine(&chain).compute_reputation(&Address::from_bytes([0x44; 20]).to_lower_hex()).await.unwrap();
    assert_eq!(reverted.status, LookupStatus::NotFound);
    assert_eq!(reverted.reputation, 0.0);
}
