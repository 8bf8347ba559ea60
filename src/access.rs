// 14.0: who may do what. operations take an AuthContext naming the caller; the engine
// checks it against the governance address or a market's observation adder.

use crate::types::{Address, MarketId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of whoever invoked an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub caller: Address,
}

impl AuthContext {
    pub fn new(caller: Address) -> Self {
        Self { caller }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Governance,
    ObservationAdder(MarketId),
    Trader(Address),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Governance => write!(f, "governance"),
            Role::ObservationAdder(market) => write!(f, "observation adder of {}", market),
            Role::Trader(trader) => write!(f, "trader {}", trader),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccessControl {
    governance: Address,
}

impl AccessControl {
    pub fn new(governance: Address) -> Self {
        Self { governance }
    }

    pub fn governance(&self) -> Address {
        self.governance
    }

    pub fn require_governance(&self, ctx: &AuthContext) -> Result<(), AccessError> {
        if ctx.caller != self.governance {
            return Err(AccessError::Unauthorized {
                caller: ctx.caller,
                role: Role::Governance,
            });
        }
        Ok(())
    }

    /// Only the trader acts on their own orders and salts.
    pub fn require_trader(&self, ctx: &AuthContext, trader: Address) -> Result<(), AccessError> {
        if ctx.caller != trader {
            return Err(AccessError::Unauthorized {
                caller: ctx.caller,
                role: Role::Trader(trader),
            });
        }
        Ok(())
    }

    pub fn transfer_governance(&mut self, ctx: &AuthContext, new_governance: Address) -> Result<(), AccessError> {
        self.require_governance(ctx)?;
        self.governance = new_governance;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("{caller} lacks role: {role}")]
    Unauthorized { caller: Address, role: Role },
}
