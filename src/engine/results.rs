// 8.0.2: result types and errors for engine operations.

use crate::access::AccessError;
use crate::config::ConfigError;
use crate::custody::CustodyError;
use crate::liquidation::LiquidationError;
use crate::margin::MarginError;
use crate::market::MarketError;
use crate::matching::MatchedFill;
use crate::observation::ObservationError;
use crate::order::OrderError;
use crate::types::{Address, MarketId, OrderHash, Price, Quote, SignedSize};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub market: MarketId,
    pub left_hash: OrderHash,
    pub right_hash: OrderHash,
    pub fill: MatchedFill,
    pub price: Price,
    pub left_fee: Quote,
    pub right_fee: Quote,
    pub left_realized_pnl: Quote,
    pub right_realized_pnl: Quote,
}

/// What a single order could still do if it matched now.
#[derive(Debug, Clone)]
pub struct OrderCheck {
    pub hash: OrderHash,
    pub remaining_base: Decimal,
    pub free_collateral_after: Quote,
}

#[derive(Debug, Clone)]
pub struct LiquidationResult {
    pub trader: Address,
    pub liquidator: Address,
    pub market: MarketId,
    /// change applied to the liquidated position
    pub closed_size: SignedSize,
    pub price: Price,
    pub penalty: Quote,
    pub liquidator_reward: Quote,
    pub realized_pnl: Quote,
}

#[derive(Debug, Clone)]
pub struct FundingSettlement {
    pub market: MarketId,
    /// positive = trader paid
    pub payment: Quote,
}

/// Flat classification of every failure the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Expired,
    Cancelled,
    BadSignature,
    AssetMismatch,
    CounterpartyMismatch,
    NothingToFill,
    ZeroPrice,
    Unauthorized,
    InvalidRange,
    InsufficientFreeCollateral,
    WrongDirection,
    ExceedsAccountValue,
    PositionZero,
    UnfavorablePrice,
    TriggerNotReached,
    OutOfOrder,
    MarketNotFound,
    MarketExists,
    SaltTooLow,
    AmountOutOfRange,
    Custody,
    Config,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Observation error: {0}")]
    Observation(#[from] ObservationError),

    #[error("Margin error: {0}")]
    Margin(#[from] MarginError),

    #[error("Liquidation error: {0}")]
    Liquidation(#[from] LiquidationError),

    #[error("Custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Order(e) => match e {
                OrderError::Expired { .. } => ErrorKind::Expired,
                OrderError::Cancelled(_) => ErrorKind::Cancelled,
                OrderError::SaltTooLow { .. } => ErrorKind::SaltTooLow,
                OrderError::BadSignature(_) | OrderError::InvalidKey | OrderError::Signing(_) => {
                    ErrorKind::BadSignature
                }
                OrderError::AssetMismatch(_) => ErrorKind::AssetMismatch,
                OrderError::CounterpartyMismatch { .. } => ErrorKind::CounterpartyMismatch,
                OrderError::NothingToFill => ErrorKind::NothingToFill,
                OrderError::UnfavorablePrice => ErrorKind::UnfavorablePrice,
                OrderError::TriggerNotReached { .. } => ErrorKind::TriggerNotReached,
                OrderError::AmountOutOfRange(_) | OrderError::Overflow(_) => ErrorKind::AmountOutOfRange,
            },
            EngineError::Observation(e) => match e {
                ObservationError::ZeroPrice => ErrorKind::ZeroPrice,
                ObservationError::Unauthorized { .. } => ErrorKind::Unauthorized,
                ObservationError::InvalidRange { .. } => ErrorKind::InvalidRange,
                ObservationError::OutOfOrder { .. } | ObservationError::FromFuture { .. } => ErrorKind::OutOfOrder,
                ObservationError::UnknownMarket(_) => ErrorKind::MarketNotFound,
            },
            EngineError::Margin(MarginError::InsufficientFreeCollateral { .. }) => {
                ErrorKind::InsufficientFreeCollateral
            }
            EngineError::Liquidation(e) => match e {
                LiquidationError::WrongDirection { .. } => ErrorKind::WrongDirection,
                LiquidationError::ExceedsAccountValue { .. } => ErrorKind::ExceedsAccountValue,
                LiquidationError::PositionZero { .. } => ErrorKind::PositionZero,
            },
            EngineError::Custody(_) => ErrorKind::Custody,
            EngineError::Market(e) => match e {
                MarketError::NotFound(_) => ErrorKind::MarketNotFound,
                MarketError::AlreadyExists(_) => ErrorKind::MarketExists,
                MarketError::SameToken(_) => ErrorKind::AssetMismatch,
                MarketError::InvalidFunding(_) => ErrorKind::Config,
            },
            EngineError::Config(_) => ErrorKind::Config,
            EngineError::Access(AccessError::Unauthorized { .. }) => ErrorKind::Unauthorized,
        }
    }
}
