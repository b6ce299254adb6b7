//! Persistent scan cursor and discovered-agent set.
//!
//! Off by default: without an index every run rescans from the deployment
//! block.

use std::collections::BTreeSet;
use std::path::Path;

use thiserror::Error;

use crate::address::Address;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index storage: {0}")]
    Storage(#[from] sled::Error),
    #[error("corrupt index entry: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    /// First block not yet scanned. `None` for a fresh index.
    pub next_block: Option<u64>,
    pub agents: BTreeSet<Address>,
}

pub trait AddressIndex: Send + Sync {
    fn load(&self) -> Result<IndexSnapshot, IndexError>;

    /// Adds `agents` to the persisted set and moves the cursor to `next_block`.
    fn commit(&self, next_block: u64, agents: &BTreeSet<Address>) -> Result<(), IndexError>;
}

const CURSOR_KEY: &[u8] = b"cursor";
const AGENT_PREFIX: &[u8] = b"agent/";

pub struct SledIndex {
    db: sled::Db,
}

impl SledIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        Ok(Self { db: sled::open(path)? })
    }

    fn agent_key(agent: &Address) -> Vec<u8> {
        let mut key = Vec::with_capacity(AGENT_PREFIX.len() + 20);
        key.extend_from_slice(AGENT_PREFIX);
        key.extend_from_slice(agent.as_bytes());
        key
    }
}

impl AddressIndex for SledIndex {
    fn load(&self) -> Result<IndexSnapshot, IndexError> {
        let next_block = match self.db.get(CURSOR_KEY)? {
            Some(raw) => {
                let bytes: [u8; 8] = raw[..].try_into().map_err(|_| IndexError::Corrupt(format!("cursor of {} bytes", raw.len())))?;
                Some(u64::from_be_bytes(bytes))
            }
            None => None,
        };
        let mut agents = BTreeSet::new();
        for item in self.db.scan_prefix(AGENT_PREFIX) {
            let (key, _) = item?;
            let raw = &key[AGENT_PREFIX.len()..];
            let bytes: [u8; 20] = raw.try_into().map_err(|_| IndexError::Corrupt(format!("agent key of {} bytes", raw.len())))?;
            agents.insert(Address::from_bytes(bytes));
        }
        Ok(IndexSnapshot { next_block, agents })
    }

    fn commit(&self, next_block: u64, agents: &BTreeSet<Address>) -> Result<(), IndexError> {
        let mut batch = sled::Batch::default();
        for agent in agents {
            batch.insert(Self::agent_key(agent), &[] as &[u8]);
        }
        batch.insert(CURSOR_KEY, next_block.to_be_bytes().to_vec());
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}
