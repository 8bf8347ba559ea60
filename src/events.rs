// 11.0: every state change produces an event. used for audit trails and notifying
// external systems. the EventPayload enum lists all event types.

use crate::types::{Address, MarketId, OrderHash, Price, Quote, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Trade events
    OrdersMatched(OrdersMatchedEvent),
    PositionChanged(PositionChangedEvent),
    OrderCancelled(OrderCancelledEvent),
    AllOrdersCancelled(AllOrdersCancelledEvent),

    // Price events
    ObservationAdded(ObservationAddedEvent),

    // Funding events
    FundingUpdated(FundingUpdatedEvent),
    FundingPaymentSettled(FundingPaymentSettledEvent),

    // Risk events
    PositionLiquidated(PositionLiquidatedEvent),

    // Account events
    OwedPnlSettled(OwedPnlSettledEvent),

    // Admin events
    MarketCreated(MarketCreatedEvent),
    ObservationAdderChanged(ObservationAdderChangedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersMatchedEvent {
    pub market: MarketId,
    pub left_hash: OrderHash,
    pub right_hash: OrderHash,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub price: Price,
}

/// One per side of every fill and liquidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionChangedEvent {
    pub trader: Address,
    pub market: MarketId,
    pub delta_size: SignedSize,
    pub delta_notional: Quote,
    pub fee: Quote,
    pub realized_pnl: Quote,
    pub new_size: SignedSize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub trader: Address,
    pub hash: OrderHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllOrdersCancelledEvent {
    pub trader: Address,
    pub min_salt: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationAddedEvent {
    pub market: MarketId,
    pub price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingUpdatedEvent {
    pub market: MarketId,
    pub mark_sma: Price,
    pub index_sma: Price,
    pub cumulative_premium_growth: Decimal,
    /// per period rate as a fraction of index
    pub funding_rate: Decimal,
    pub settled_through: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingPaymentSettledEvent {
    pub trader: Address,
    pub market: MarketId,
    /// positive = trader paid
    pub payment: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub trader: Address,
    pub liquidator: Address,
    pub market: MarketId,
    pub closed_size: SignedSize,
    pub price: Price,
    pub penalty: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwedPnlSettledEvent {
    pub trader: Address,
    /// positive = credited to the vault
    pub amount: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market: MarketId,
    pub quote_token: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationAdderChangedEvent {
    pub market: MarketId,
    pub adder: Address,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn events_serialize_to_json() {
        let event = Event::new(
            EventId(7),
            Timestamp::from_millis(1_000),
            EventPayload::PositionChanged(PositionChangedEvent {
                trader: Address::from_low_u64(1),
                market: MarketId(Address::from_low_u64(0xb1)),
                delta_size: SignedSize::new(dec!(10)),
                delta_notional: Quote::new(dec!(-10)),
                fee: Quote::new(dec!(0.005)),
                realized_pnl: Quote::zero(),
                new_size: SignedSize::new(dec!(10)),
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("PositionChanged"));
        assert!(json.contains("0x0000000000000000000000000000000000000001"));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, EventId(7));
        match back.payload {
            EventPayload::PositionChanged(e) => assert_eq!(e.delta_size.value(), dec!(10)),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
