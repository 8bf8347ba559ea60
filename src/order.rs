// 2.0: signed bilateral orders. a trader signs an order off band, anyone can submit it.
// 2.1 hashing, 2.2 signatures, 2.3 trigger conditions. fill bookkeeping lives in matching.rs.

use crate::types::{Address, MarketId, OrderHash, Price, Side, Timestamp};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

const ORDER_TYPE: &[u8] = b"Order(uint8 orderType,uint64 deadline,address trader,Asset makeAsset,Asset takeAsset,uint256 salt,uint256 triggerPrice,bool isShort)Asset(address token,uint256 value)";
const ASSET_TYPE: &[u8] = b"Asset(address token,uint256 value)";
const DOMAIN_TYPE: &[u8] = b"Domain(string name,string version,uint256 chainId,address verifyingContract)";

/// Largest make or take value an order may carry. The product of any two
/// amounts stays inside `Decimal`'s range.
pub const MAX_ASSET_VALUE: Decimal = dec!(1_000_000_000_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    StopLossIndexPrice,
    TakeProfitIndexPrice,
    StopLossMarkPrice,
    TakeProfitMarkPrice,
    StopLossLastPrice,
    TakeProfitLastPrice,
}

/// Which price a conditional order watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    Index,
    Mark,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

/// How the trigger price should be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// Fires when the reference price is at or above the trigger.
    Above,
    /// Fires when the reference price is at or below the trigger.
    Below,
}

impl TriggerCondition {
    pub fn is_met(&self, reference: Price, trigger: Decimal) -> bool {
        match self {
            TriggerCondition::Above => reference.value() >= trigger,
            TriggerCondition::Below => reference.value() <= trigger,
        }
    }
}

impl OrderType {
    pub fn trigger(&self) -> Option<(TriggerKind, PriceSource)> {
        match self {
            OrderType::Limit => None,
            OrderType::StopLossIndexPrice => Some((TriggerKind::StopLoss, PriceSource::Index)),
            OrderType::TakeProfitIndexPrice => Some((TriggerKind::TakeProfit, PriceSource::Index)),
            OrderType::StopLossMarkPrice => Some((TriggerKind::StopLoss, PriceSource::Mark)),
            OrderType::TakeProfitMarkPrice => Some((TriggerKind::TakeProfit, PriceSource::Mark)),
            OrderType::StopLossLastPrice => Some((TriggerKind::StopLoss, PriceSource::Last)),
            OrderType::TakeProfitLastPrice => Some((TriggerKind::TakeProfit, PriceSource::Last)),
        }
    }

    fn code(&self) -> u8 {
        match self {
            OrderType::Limit => 0,
            OrderType::StopLossIndexPrice => 1,
            OrderType::TakeProfitIndexPrice => 2,
            OrderType::StopLossMarkPrice => 3,
            OrderType::TakeProfitMarkPrice => 4,
            OrderType::StopLossLastPrice => 5,
            OrderType::TakeProfitLastPrice => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub token: Address,
    pub value: Decimal,
}

impl Asset {
    pub fn new(token: Address, value: Decimal) -> Self {
        Self { token, value }
    }
}

/// An order as the trader signed it. Never mutated after signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_type: OrderType,
    pub deadline: Timestamp,
    pub trader: Address,
    pub make_asset: Asset,
    pub take_asset: Asset,
    pub salt: u64,
    /// zero for plain limit orders
    pub trigger_price: Decimal,
    pub is_short: bool,
}

impl Order {
    /// Limit order for `size` base units at `price` quote per base.
    /// A short gives base and takes quote, a long the reverse.
    /// A quote value past `Decimal::MAX` saturates and fails `validate_shape`.
    pub fn new_limit(
        trader: Address,
        market: MarketId,
        quote_token: Address,
        side: Side,
        size: Decimal,
        price: Price,
        deadline: Timestamp,
        salt: u64,
    ) -> Self {
        let base = Asset::new(market.base_token(), size);
        let quote = Asset::new(quote_token, size.checked_mul(price.value()).unwrap_or(Decimal::MAX));
        let (make_asset, take_asset) = match side {
            Side::Short => (base, quote),
            Side::Long => (quote, base),
        };
        Self {
            order_type: OrderType::Limit,
            deadline,
            trader,
            make_asset,
            take_asset,
            salt,
            trigger_price: Decimal::ZERO,
            is_short: side == Side::Short,
        }
    }

    pub fn with_trigger(mut self, order_type: OrderType, trigger_price: Decimal) -> Self {
        self.order_type = order_type;
        self.trigger_price = trigger_price;
        self
    }

    pub fn side(&self) -> Side {
        if self.is_short {
            Side::Short
        } else {
            Side::Long
        }
    }

    pub fn base_asset(&self) -> &Asset {
        if self.is_short {
            &self.make_asset
        } else {
            &self.take_asset
        }
    }

    pub fn quote_asset(&self) -> &Asset {
        if self.is_short {
            &self.take_asset
        } else {
            &self.make_asset
        }
    }

    pub fn market(&self) -> MarketId {
        MarketId(self.base_asset().token)
    }

    /// quote per base as signed. None when the base leg is zero.
    pub fn limit_price(&self) -> Option<Price> {
        let base = self.base_asset().value;
        if base.is_zero() {
            return None;
        }
        self.quote_asset().value.checked_div(base).and_then(Price::new)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.deadline < now
    }

    /// (make, take) still open given the cumulative fill in take units.
    pub fn remaining(&self, filled_take: Decimal) -> Result<(Decimal, Decimal), OrderError> {
        let take = (self.take_asset.value - filled_take).max(Decimal::ZERO);
        if self.take_asset.value.is_zero() {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }
        let make = take
            .checked_mul(self.make_asset.value)
            .and_then(|v| v.checked_div(self.take_asset.value))
            .ok_or(OrderError::Overflow("remaining make value"))?;
        Ok((make, take))
    }

    // 2.3: stop loss sells fire on the way down, buys on the way up. take profit is the reverse.
    pub fn trigger_condition(&self) -> Option<(TriggerCondition, PriceSource)> {
        let (kind, source) = self.order_type.trigger()?;
        let condition = match (kind, self.is_short) {
            (TriggerKind::StopLoss, true) => TriggerCondition::Below,
            (TriggerKind::StopLoss, false) => TriggerCondition::Above,
            (TriggerKind::TakeProfit, true) => TriggerCondition::Above,
            (TriggerKind::TakeProfit, false) => TriggerCondition::Below,
        };
        Some((condition, source))
    }

    pub fn check_trigger(&self, reference: Price) -> Result<(), OrderError> {
        match self.trigger_condition() {
            None => Ok(()),
            Some((condition, _)) if condition.is_met(reference, self.trigger_price) => Ok(()),
            Some(_) => Err(OrderError::TriggerNotReached {
                trigger: self.trigger_price,
                reference,
            }),
        }
    }

    /// Field-level sanity that needs no ledger state.
    pub fn validate_shape(&self) -> Result<(), OrderError> {
        if self.make_asset.token == self.take_asset.token {
            return Err(OrderError::AssetMismatch(format!(
                "make and take token are both {}",
                self.make_asset.token
            )));
        }
        if self.make_asset.value <= Decimal::ZERO || self.take_asset.value <= Decimal::ZERO {
            return Err(OrderError::NothingToFill);
        }
        for value in [self.make_asset.value, self.take_asset.value] {
            if value > MAX_ASSET_VALUE {
                return Err(OrderError::AmountOutOfRange(value));
            }
        }
        Ok(())
    }

    // 2.1: structured hash. domain separated so a signature can't be replayed elsewhere.
    pub fn hash(&self, domain: &OrderDomain) -> OrderHash {
        let struct_hash = keccak(&[
            &keccak(&[ORDER_TYPE]),
            &[self.order_type.code()],
            &self.deadline.as_millis().to_be_bytes(),
            self.trader.as_bytes(),
            &asset_hash(&self.make_asset),
            &asset_hash(&self.take_asset),
            &self.salt.to_be_bytes(),
            &encode_decimal(self.trigger_price),
            &[self.is_short as u8],
        ]);
        OrderHash(keccak(&[&[0x19, 0x01], &domain.separator(), &struct_hash]))
    }
}

/// Signing domain. The chain id and verifying address pin signatures to one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Default for OrderDomain {
    fn default() -> Self {
        Self {
            name: "PerpClearing".to_string(),
            version: "1".to_string(),
            chain_id: 1,
            verifying_contract: Address::ZERO,
        }
    }
}

impl OrderDomain {
    pub fn separator(&self) -> [u8; 32] {
        keccak(&[
            &keccak(&[DOMAIN_TYPE]),
            &keccak(&[self.name.as_bytes()]),
            &keccak(&[self.version.as_bytes()]),
            &self.chain_id.to_be_bytes(),
            self.verifying_contract.as_bytes(),
        ])
    }
}

fn asset_hash(asset: &Asset) -> [u8; 32] {
    keccak(&[
        &keccak(&[ASSET_TYPE]),
        asset.token.as_bytes(),
        &encode_decimal(asset.value),
    ])
}

// normalize first so 1.0 and 1 hash the same
fn encode_decimal(value: Decimal) -> [u8; 16] {
    value.normalize().serialize()
}

pub(crate) fn keccak(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

// 2.2: 65 byte r || s || v signature. v may be 0/1 or 27/28.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct OrderSignature(Vec<u8>);

impl OrderSignature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Placeholder for self-submitted orders, where the caller is the trader.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for OrderSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Contract traders can't produce ECDSA signatures, they register one of these instead.
pub trait SignatureVerifier: fmt::Debug {
    fn is_valid_signature(&self, hash: &OrderHash, signature: &OrderSignature) -> bool;
}

pub fn recover_signer(hash: &OrderHash, signature: &OrderSignature) -> Option<Address> {
    let bytes = signature.as_bytes();
    if bytes.len() != 65 {
        return None;
    }
    let sig = Signature::from_slice(&bytes[..64]).ok()?;
    let v = bytes[64];
    let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })?;
    let key = VerifyingKey::recover_from_prehash(&hash.0, &sig, recovery_id).ok()?;
    Some(address_of(&key))
}

/// Checks the signature against the trader. A registered verifier takes precedence.
pub fn verify_signature(
    order: &Order,
    hash: &OrderHash,
    signature: &OrderSignature,
    verifier: Option<&dyn SignatureVerifier>,
) -> Result<(), OrderError> {
    let valid = match verifier {
        Some(v) => v.is_valid_signature(hash, signature),
        None => recover_signer(hash, signature) == Some(order.trader),
    };
    if valid {
        Ok(())
    } else {
        Err(OrderError::BadSignature(order.trader))
    }
}

fn address_of(key: &VerifyingKey) -> Address {
    let point = key.as_affine().to_encoded_point(false);
    let digest = keccak(&[&point.as_bytes()[1..]]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

/// secp256k1 key that signs orders. Used by tooling and tests.
pub struct OrderSigner {
    key: SigningKey,
}

impl OrderSigner {
    pub fn from_bytes(secret: &[u8]) -> Result<Self, OrderError> {
        let key = SigningKey::from_slice(secret).map_err(|_| OrderError::InvalidKey)?;
        Ok(Self { key })
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self, OrderError> {
        let raw = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let bytes = hex::decode(raw).map_err(|_| OrderError::InvalidKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn address(&self) -> Address {
        address_of(self.key.verifying_key())
    }

    pub fn sign_hash(&self, hash: &OrderHash) -> Result<OrderSignature, OrderError> {
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(&hash.0)
            .map_err(|e| OrderError::Signing(e.to_string()))?;
        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&sig.to_bytes());
        bytes.push(recovery_id.to_byte() + 27);
        Ok(OrderSignature(bytes))
    }

    pub fn sign(&self, order: &Order, domain: &OrderDomain) -> Result<OrderSignature, OrderError> {
        self.sign_hash(&order.hash(domain))
    }
}

impl fmt::Debug for OrderSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderSigner").field("address", &self.address()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order {hash} expired at {deadline}, now {now}")]
    Expired {
        hash: OrderHash,
        deadline: Timestamp,
        now: Timestamp,
    },

    #[error("Order {0} is cancelled")]
    Cancelled(OrderHash),

    #[error("Salt {requested} for {trader} must exceed current minimum {current}")]
    SaltTooLow {
        trader: Address,
        current: u64,
        requested: u64,
    },

    #[error("Signature does not belong to trader {0}")]
    BadSignature(Address),

    #[error("Asset mismatch: {0}")]
    AssetMismatch(String),

    #[error("Counterparty mismatch: expected {expected}, got {actual}")]
    CounterpartyMismatch { expected: Address, actual: Address },

    #[error("Nothing left to fill")]
    NothingToFill,

    #[error("Order prices do not cross")]
    UnfavorablePrice,

    #[error("Trigger {trigger} not reached, reference price {reference}")]
    TriggerNotReached { trigger: Decimal, reference: Price },

    #[error("Order amount {0} exceeds {max}", max = MAX_ASSET_VALUE)]
    AmountOutOfRange(Decimal),

    #[error("Arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Signing failed: {0}")]
    Signing(String),
}
