//! Engine configuration options.

use crate::order::OrderDomain;
use crate::types::Address;
use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// May create markets and rewire observation adders.
    pub governance: Address,
    /// Signing domain every order hash is computed under.
    pub domain: OrderDomain,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            governance: Address::ZERO,
            domain: OrderDomain::default(),
        }
    }
}
