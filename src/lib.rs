// perp-clearing: perpetual futures clearing core for bilateral signed orders.
// risk-first: every fill passes margin admission before anything is committed.
// all computation is deterministic; the only outside call is the collateral vault.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Address, MarketId, Side, Price, Quote, Timestamp
//   2.x  order.rs: signed order model, hashing, signatures, trigger conditions
//   2.5x matching.rs: fill computation between two orders, fill ledger, salts
//   3.x  margin.rs: initial/maintenance requirements, free collateral admission
//   4.x  position.rs: position struct, pnl, increase/reduce/flip
//   5.x  funding.rs: cumulative premium growth, settlement periods
//   6.x  liquidation.rs: liquidatable size, penalty split
//   7.x  config.rs: fees, margins, liquidation, observation params, env presets
//   8.x  engine/: the facade: matching, funding, accounts, liquidations, prices
//   9.x  observation.rs: index/mark price rings, SMA queries
//   9.4  custody.rs: collateral vault seam (mocked)
//   10.x account.rs: per-trader positions + owed realized pnl
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config, funding state, open interest
//   14.x access.rs: governance and trader authorization

// core clearing modules
pub mod account;
pub mod engine;
pub mod events;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod matching;
pub mod observation;
pub mod order;
pub mod position;
pub mod types;

// integration modules
pub mod access;
pub mod config;
pub mod custody;

// re exports for convenience
pub use access::*;
pub use account::*;
pub use engine::*;
pub use events::*;
pub use funding::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use matching::*;
pub use observation::*;
pub use order::*;
pub use position::*;
pub use types::*;
pub use config::{ClearingConfig, ConfigError, Environment, FeeConfig};
pub use custody::{CollateralVault, CustodyError, InMemoryVault};
