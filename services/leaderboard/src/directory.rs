//! Display names for agents.

use std::collections::HashMap;

use tracing::warn;

use crate::address::Address;

pub trait AgentDirectory: Send + Sync {
    fn display_name(&self, agent: &Address) -> String;
}

/// Fixed address → name table; unknown agents get the short address form.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    names: HashMap<Address, String>,
}

impl StaticDirectory {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, agent: Address, name: impl Into<String>) -> Self {
        self.names.insert(agent, name.into());
        self
    }

    /// Keys are parsed case-insensitively; entries that do not parse are
    /// dropped with a warning.
    pub fn from_config(entries: &HashMap<String, String>) -> Self {
        let mut names = HashMap::with_capacity(entries.len());
        for (raw, name) in entries {
            match raw.to_ascii_lowercase().parse::<Address>() {
                Ok(agent) => { names.insert(agent, name.clone()); }
                Err(e) => warn!(address = %raw, error = %e, "ignoring agent name with invalid address"),
            }
        }
        Self { names }
    }

    pub fn len(&self) -> usize { self.names.len() }
    pub fn is_empty(&self) -> bool { self.names.is_empty() }
}

impl AgentDirectory for StaticDirectory {
    fn display_name(&self, agent: &Address) -> String {
        self.names.get(agent).cloned().unwrap_or_else(|| agent.short())
    }
}
