//! MoltRank staker leaderboard.
//!
//! Discovers every account that ever emitted `Staked` on the staking
//! contract, reads its current stake, scores it and ranks the active stakers.
//! [`LeaderboardEngine`] is the entry point; [`ChainReader`] is the seam to
//! the chain.

pub mod address;
pub mod aggregator;
pub mod chain;
pub mod directory;
pub mod error;
pub mod fetcher;
pub mod index;
pub mod memory;
pub mod rpc;
pub mod scanner;
pub mod serve;
pub mod view;

pub use address::{Address, AddressError};
pub use aggregator::{AgentStanding, Clock, EngineSettings, FixedClock, Leaderboard, LeaderboardEngine, LeaderboardEntry, Summary, SystemClock};
pub use chain::{BlockRange, ChainError, ChainReader, EventKind, EventLog, StakeInfo};
pub use directory::{AgentDirectory, StaticDirectory};
pub use error::{LeaderboardError, LookupError, SettingsError};
pub use fetcher::{AccountFetcher, AccountLookup, LookupStatus, StakeRecord};
pub use index::{AddressIndex, IndexError, IndexSnapshot, SledIndex};
pub use memory::MemoryChain;
pub use rpc::{JsonRpcChain, RpcSettings};
pub use scanner::{BackfillScanner, ScanReport};
pub use serve::{refresh_loop, refresh_once, routes, BoardCache};
pub use view::{ErrorResponse, LeaderboardResponse, ReputationResponse};
