//! Order, trade and market-data types

use crate::types::{Px, Qty, Symbol, Ts};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique order identifier, allocated monotonically
pub type OrderId = u64;

/// Unique trade identifier, allocated monotonically
pub type TradeId = u64;

/// Trading side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy side (bids)
    Buy,
    /// Sell side (asks)
    Sell,
}

impl Side {
    /// The side an order of this side matches against
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Cross with any available price, never rest
    Market,
    /// Cross up to the limit price, rest the remainder
    Limit,
    /// Market order activated when the trade tape crosses the trigger
    Stop,
    /// Limit order activated when the trade tape crosses the trigger
    StopLimit,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good for the trading day
    Day,
    /// Immediate or cancel: remainder after crossing is cancelled
    Ioc,
    /// Fill or kill: rejected unless fully fillable
    Fok,
    /// Good till cancelled
    Gtc,
}

/// Order status; transitions are monotonic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted into the pipeline, no fills yet
    Incoming,
    /// At least one partial fill
    PartiallyFilled,
    /// Fully executed
    Filled,
    /// Cancelled by request or by time-in-force policy
    Cancelled,
    /// Rejected by the risk gate or by fill-or-kill policy
    Rejected,
}

impl OrderStatus {
    /// Terminal states admit no further transitions
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// A client order as it flows through the pipeline
///
/// The submitter sets id, symbol, side, type, time-in-force, price,
/// quantity and timestamp; the engine owns `filled` and `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order id
    pub id: OrderId,
    /// Instrument
    pub symbol: Symbol,
    /// Buy or sell
    pub side: Side,
    /// Market / Limit / Stop / StopLimit
    pub order_type: OrderType,
    /// Day / Ioc / Fok / Gtc
    pub time_in_force: TimeInForce,
    /// Limit price (trigger price for stop orders)
    pub price: Px,
    /// Original quantity
    pub quantity: Qty,
    /// Executed quantity so far
    pub filled: Qty,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Ingress timestamp
    pub ts: Ts,
}

impl Order {
    /// Construct a limit order in its ingress state
    #[must_use]
    pub fn limit(
        id: OrderId,
        symbol: Symbol,
        side: Side,
        price: Px,
        quantity: Qty,
        time_in_force: TimeInForce,
    ) -> Self {
        Self {
            id,
            symbol,
            side,
            order_type: OrderType::Limit,
            time_in_force,
            price,
            quantity,
            filled: Qty::ZERO,
            status: OrderStatus::Incoming,
            ts: Ts::now(),
        }
    }

    /// Construct a market order in its ingress state
    #[must_use]
    pub fn market(id: OrderId, symbol: Symbol, side: Side, quantity: Qty) -> Self {
        Self {
            id,
            symbol,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Ioc,
            price: Px::ZERO,
            quantity,
            filled: Qty::ZERO,
            status: OrderStatus::Incoming,
            ts: Ts::now(),
        }
    }

    /// Quantity still open
    #[must_use]
    pub const fn remaining(&self) -> Qty {
        self.quantity.sub(self.filled)
    }

    /// Effective crossing limit: market orders cross at any price
    #[must_use]
    pub const fn effective_price(&self) -> Px {
        match self.order_type {
            OrderType::Market | OrderType::Stop => match self.side {
                Side::Buy => Px::MAX,
                Side::Sell => Px::ZERO,
            },
            OrderType::Limit | OrderType::StopLimit => self.price,
        }
    }
}

/// An executed match between a buy and a sell order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade id
    pub id: TradeId,
    /// Resting or incoming buy order
    pub buy_order_id: OrderId,
    /// Resting or incoming sell order
    pub sell_order_id: OrderId,
    /// Instrument
    pub symbol: Symbol,
    /// Execution price (always the passive order's price)
    pub price: Px,
    /// Executed quantity
    pub quantity: Qty,
    /// Execution timestamp
    pub ts: Ts,
    /// Side of the later-arriving order
    pub aggressor: Side,
}

/// Normalized market-data event for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTick {
    /// Instrument
    pub symbol: Symbol,
    /// Level price
    pub price: Px,
    /// Absolute quantity now resting at the level (0 removes it)
    pub quantity: Qty,
    /// Side of the book the update applies to
    pub side: Side,
    /// Local ingress timestamp
    pub ts: Ts,
    /// Per-symbol monotonic sequence
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_order_remaining() {
        let mut order = Order::limit(
            1,
            Symbol::new(1),
            Side::Buy,
            Px::from_i64(10_000),
            Qty::from_u64(100),
            TimeInForce::Gtc,
        );
        assert_eq!(order.remaining().as_u64(), 100);
        order.filled = Qty::from_u64(60);
        assert_eq!(order.remaining().as_u64(), 40);
    }

    #[test]
    fn test_market_order_effective_price() {
        let buy = Order::market(1, Symbol::new(1), Side::Buy, Qty::from_u64(10));
        let sell = Order::market(2, Symbol::new(1), Side::Sell, Qty::from_u64(10));
        assert_eq!(buy.effective_price(), Px::MAX);
        assert_eq!(sell.effective_price(), Px::ZERO);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!OrderStatus::Incoming.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_order_serde() -> Result<(), Box<dyn std::error::Error>> {
        let order = Order::limit(
            7,
            Symbol::new(3),
            Side::Sell,
            Px::from_i64(99_000_000_000),
            Qty::from_u64(250),
            TimeInForce::Ioc,
        );
        let encoded = bincode::serialize(&order)?;
        let decoded: Order = bincode::deserialize(&encoded)?;
        assert_eq!(order, decoded);
        Ok(())
    }
}
