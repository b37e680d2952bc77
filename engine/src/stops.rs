//! Stop-order activation off the trade tape
//!
//! Stop and stop-limit orders wait here until an observed trade crosses
//! their trigger; activated orders convert to market or limit form and
//! re-enter the pipeline. The trigger price is the order's price field: a
//! buy stop activates at or above it, a sell stop at or below.

use common::{Order, OrderId, OrderType, Px, Side, Symbol};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Pending stop orders keyed by symbol
#[derive(Default)]
pub struct StopTracker {
    pending: Mutex<FxHashMap<Symbol, Vec<Order>>>,
}

impl StopTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a stop or stop-limit order until its trigger crosses
    pub fn add(&self, order: Order) {
        debug_assert!(matches!(
            order.order_type,
            OrderType::Stop | OrderType::StopLimit
        ));
        self.pending.lock().entry(order.symbol).or_default().push(order);
    }

    /// Remove a parked order before activation
    pub fn remove(&self, symbol: Symbol, order_id: OrderId) -> bool {
        let mut pending = self.pending.lock();
        if let Some(orders) = pending.get_mut(&symbol) {
            if let Some(position) = orders.iter().position(|o| o.id == order_id) {
                orders.swap_remove(position);
                return true;
            }
        }
        false
    }

    /// Activate every parked order whose trigger the trade price crosses
    ///
    /// Stop orders come back as market orders, stop-limits as limits at
    /// their original price.
    pub fn on_trade_price(&self, symbol: Symbol, price: Px) -> Vec<Order> {
        let mut pending = self.pending.lock();
        let Some(orders) = pending.get_mut(&symbol) else {
            return Vec::new();
        };

        let mut activated = Vec::new();
        let mut index = 0;
        while index < orders.len() {
            let triggered = match orders[index].side {
                Side::Buy => price >= orders[index].price,
                Side::Sell => price <= orders[index].price,
            };
            if triggered {
                let mut order = orders.swap_remove(index);
                order.order_type = match order.order_type {
                    OrderType::Stop => OrderType::Market,
                    _ => OrderType::Limit,
                };
                activated.push(order);
            } else {
                index += 1;
            }
        }
        activated
    }

    /// Number of parked orders across all symbols
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Qty, TimeInForce};

    fn stop(id: OrderId, side: Side, trigger: i64, order_type: OrderType) -> Order {
        let mut order = Order::limit(
            id,
            Symbol::new(1),
            side,
            Px::from_i64(trigger),
            Qty::from_u64(10),
            TimeInForce::Gtc,
        );
        order.order_type = order_type;
        order
    }

    #[test]
    fn test_buy_stop_triggers_at_or_above() {
        let tracker = StopTracker::new();
        tracker.add(stop(1, Side::Buy, 10_000, OrderType::Stop));

        assert!(tracker
            .on_trade_price(Symbol::new(1), Px::from_i64(9_999))
            .is_empty());
        let activated = tracker.on_trade_price(Symbol::new(1), Px::from_i64(10_000));
        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].order_type, OrderType::Market);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_sell_stop_limit_triggers_at_or_below() {
        let tracker = StopTracker::new();
        tracker.add(stop(2, Side::Sell, 9_000, OrderType::StopLimit));

        assert!(tracker
            .on_trade_price(Symbol::new(1), Px::from_i64(9_100))
            .is_empty());
        let activated = tracker.on_trade_price(Symbol::new(1), Px::from_i64(8_900));
        assert_eq!(activated.len(), 1);
        assert_eq!(activated[0].order_type, OrderType::Limit);
        assert_eq!(activated[0].price, Px::from_i64(9_000));
    }

    #[test]
    fn test_other_symbols_unaffected() {
        let tracker = StopTracker::new();
        tracker.add(stop(3, Side::Buy, 10_000, OrderType::Stop));
        assert!(tracker
            .on_trade_price(Symbol::new(2), Px::from_i64(20_000))
            .is_empty());
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_remove_parked_order() {
        let tracker = StopTracker::new();
        tracker.add(stop(4, Side::Buy, 10_000, OrderType::Stop));
        assert!(tracker.remove(Symbol::new(1), 4));
        assert!(!tracker.remove(Symbol::new(1), 4));
        assert_eq!(tracker.pending_count(), 0);
    }
}
