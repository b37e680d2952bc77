//! Price-time priority matching engine
//!
//! One matching book per symbol: a `BTreeMap` price ladder per side (bid
//! keys negated so iteration is always best-first) whose levels hold FIFO
//! lists of pooled order nodes linked by index. The engine is the single
//! writer of its books and pools; callers reach it through the approved
//! order queue, so no internal locking is needed.

use crate::memory::{NodePool, NIL};
use common::{
    Order, OrderId, OrderStatus, OrderType, Px, Qty, Side, Symbol, TimeInForce, Trade, TradeId, Ts,
};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Resting order node; prev/next are indices into the owning pool
struct OrderNode {
    order: Order,
    prev: u32,
    next: u32,
}

fn empty_node() -> OrderNode {
    OrderNode {
        order: Order::limit(
            0,
            Symbol::new(0),
            Side::Buy,
            Px::ZERO,
            Qty::ZERO,
            TimeInForce::Gtc,
        ),
        prev: NIL,
        next: NIL,
    }
}

/// One price level: FIFO list of resting orders plus aggregates
struct PriceLevel {
    price: Px,
    total_quantity: Qty,
    order_count: u32,
    head: u32,
    tail: u32,
}

impl PriceLevel {
    const fn new(price: Px) -> Self {
        Self {
            price,
            total_quantity: Qty::ZERO,
            order_count: 0,
            head: NIL,
            tail: NIL,
        }
    }
}

fn push_back(level: &mut PriceLevel, pool: &mut NodePool<OrderNode>, index: u32) {
    let quantity = pool.get(index).order.remaining();
    {
        let node = pool.get_mut(index);
        node.prev = level.tail;
        node.next = NIL;
    }
    if level.tail == NIL {
        level.head = index;
    } else {
        pool.get_mut(level.tail).next = index;
    }
    level.tail = index;
    level.total_quantity = level.total_quantity.add(quantity);
    level.order_count += 1;
}

fn unlink(level: &mut PriceLevel, pool: &mut NodePool<OrderNode>, index: u32) {
    let (prev, next) = {
        let node = pool.get(index);
        (node.prev, node.next)
    };
    if prev == NIL {
        level.head = next;
    } else {
        pool.get_mut(prev).next = next;
    }
    if next == NIL {
        level.tail = prev;
    } else {
        pool.get_mut(next).prev = prev;
    }
    level.order_count -= 1;
}

/// Sort key: bids negated so ascending map order is best-first on both sides
fn price_key(side: Side, price: Px) -> i64 {
    match side {
        Side::Buy => price.as_i64().wrapping_neg(),
        Side::Sell => price.as_i64(),
    }
}

/// Crossing bound for an incoming order against the opposite side's keys
fn cross_bound(side: Side, limit: Px) -> i64 {
    match side {
        // Buy crosses asks with price <= limit
        Side::Buy => limit.as_i64(),
        // Sell crosses bids with price >= limit, i.e. key <= -limit
        Side::Sell => limit.as_i64().wrapping_neg(),
    }
}

#[derive(Default)]
struct MatchBook {
    bids: BTreeMap<i64, PriceLevel>,
    asks: BTreeMap<i64, PriceLevel>,
}

/// Top-of-book view of one matching book
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookState {
    /// Best bid price and level quantity
    pub best_bid: Option<(Px, Qty)>,
    /// Best ask price and level quantity
    pub best_ask: Option<(Px, Qty)>,
    /// Number of bid levels
    pub bid_levels: usize,
    /// Number of ask levels
    pub ask_levels: usize,
}

/// Result of processing one incoming order
#[derive(Debug, Clone, Copy)]
pub struct MatchOutcome {
    /// Final state of the incoming order
    pub order: Order,
    /// Trades produced by this order
    pub trades: u32,
}

/// Matching counters and derived rates
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchingStats {
    /// Orders processed
    pub total_orders: u64,
    /// Trades generated
    pub total_trades: u64,
    /// Units matched
    pub total_volume: u64,
    /// Trades per order
    pub match_rate: f64,
    /// Units per trade
    pub average_fill_size: f64,
    /// Failed order-node acquisitions
    pub order_pool_exhaustions: u64,
    /// Failed trade acquisitions
    pub trade_pool_exhaustions: u64,
}

type TradeSink = Box<dyn FnMut(Trade) + Send>;
type UpdateSink = Box<dyn FnMut(Order) + Send>;

/// Per-symbol price-time priority matcher
pub struct MatchingEngine {
    books: FxHashMap<Symbol, MatchBook>,
    order_lookup: FxHashMap<OrderId, u32>,
    order_pool: NodePool<OrderNode>,
    trade_pool: NodePool<Trade>,
    next_trade_id: TradeId,
    orders_processed: AtomicU64,
    trades_generated: AtomicU64,
    volume_matched: AtomicU64,
    trade_sink: Option<TradeSink>,
    update_sink: Option<UpdateSink>,
}

impl MatchingEngine {
    /// Create an engine with the given pool capacities
    #[must_use]
    pub fn new(order_pool_capacity: usize, trade_pool_capacity: usize) -> Self {
        let placeholder_trade = Trade {
            id: 0,
            buy_order_id: 0,
            sell_order_id: 0,
            symbol: Symbol::new(0),
            price: Px::ZERO,
            quantity: Qty::ZERO,
            ts: Ts::from_nanos(0),
            aggressor: Side::Buy,
        };

        Self {
            books: FxHashMap::default(),
            order_lookup: FxHashMap::default(),
            order_pool: NodePool::new(order_pool_capacity, empty_node),
            trade_pool: NodePool::new(trade_pool_capacity, || placeholder_trade),
            next_trade_id: 1,
            orders_processed: AtomicU64::new(0),
            trades_generated: AtomicU64::new(0),
            volume_matched: AtomicU64::new(0),
            trade_sink: None,
            update_sink: None,
        }
    }

    /// Install the trade consumer. Trades are emitted in production order,
    /// each before the matching order-status updates.
    pub fn set_trade_sink(&mut self, sink: impl FnMut(Trade) + Send + 'static) {
        self.trade_sink = Some(Box::new(sink));
    }

    /// Install the order-update consumer
    pub fn set_update_sink(&mut self, sink: impl FnMut(Order) + Send + 'static) {
        self.update_sink = Some(Box::new(sink));
    }

    /// Match an incoming order against the book
    ///
    /// Produces zero or more trades, then rests, cancels or rejects the
    /// remainder according to order type and time-in-force.
    pub fn process_order(&mut self, order: Order) -> MatchOutcome {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);

        let mut working = order;
        let limit = working.effective_price();

        // Fill-or-kill is all-or-nothing: price the full quantity first
        if working.time_in_force == TimeInForce::Fok
            && self.crossable_depth(working.symbol, working.side, limit) < working.remaining()
        {
            working.status = OrderStatus::Rejected;
            self.emit_update(working);
            return MatchOutcome {
                order: working,
                trades: 0,
            };
        }

        let trades = self.cross(&mut working, limit);

        if working.remaining().is_zero() {
            working.status = OrderStatus::Filled;
            self.emit_update(working);
        } else if Self::rests(&working) {
            working.status = if working.filled.is_zero() {
                OrderStatus::Incoming
            } else {
                OrderStatus::PartiallyFilled
            };
            self.rest(&mut working);
        } else {
            // Market and IOC remainders never rest
            working.status = OrderStatus::Cancelled;
            self.emit_update(working);
        }

        MatchOutcome {
            order: working,
            trades,
        }
    }

    /// Cancel a resting order. Unknown ids are a no-op returning false.
    pub fn cancel_order(&mut self, order_id: OrderId) -> bool {
        let Some(&index) = self.order_lookup.get(&order_id) else {
            return false;
        };

        let order = self.order_pool.get(index).order;
        if let Some(book) = self.books.get_mut(&order.symbol) {
            let ladder = match order.side {
                Side::Buy => &mut book.bids,
                Side::Sell => &mut book.asks,
            };
            let key = price_key(order.side, order.price);
            if let Some(level) = ladder.get_mut(&key) {
                let quantity = order.remaining();
                unlink(level, &mut self.order_pool, index);
                level.total_quantity = level.total_quantity.sub(quantity);
                if level.order_count == 0 {
                    ladder.remove(&key);
                }
            }
        }

        self.order_pool.release(index);
        self.order_lookup.remove(&order_id);

        let mut cancelled = order;
        cancelled.status = OrderStatus::Cancelled;
        self.emit_update(cancelled);
        true
    }

    fn rests(order: &Order) -> bool {
        matches!(order.order_type, OrderType::Limit | OrderType::StopLimit)
            && matches!(order.time_in_force, TimeInForce::Day | TimeInForce::Gtc)
    }

    fn cross(&mut self, working: &mut Order, limit: Px) -> u32 {
        let Some(book) = self.books.get_mut(&working.symbol) else {
            return 0;
        };
        let opposite = match working.side {
            Side::Buy => &mut book.asks,
            Side::Sell => &mut book.bids,
        };
        let bound = cross_bound(working.side, limit);
        let mut trades = 0u32;

        'ladder: while !working.remaining().is_zero() {
            let Some((&key, _)) = opposite.first_key_value() else {
                break;
            };
            if key > bound {
                break;
            }
            let Some(level) = opposite.get_mut(&key) else {
                break;
            };
            let level_price = level.price;

            let mut cursor = level.head;
            while cursor != NIL && !working.remaining().is_zero() {
                let next = self.order_pool.get(cursor).next;
                let resting = self.order_pool.get(cursor).order;
                let trade_qty = working.remaining().min(resting.remaining());

                // The trade either happens in full or not at all: slot
                // acquisition gates the whole step.
                let Some(trade_index) = self.trade_pool.acquire() else {
                    warn!(symbol = %working.symbol, "trade pool exhausted, halting match");
                    break 'ladder;
                };
                let trade = Trade {
                    id: self.next_trade_id,
                    buy_order_id: if working.side == Side::Buy {
                        working.id
                    } else {
                        resting.id
                    },
                    sell_order_id: if working.side == Side::Sell {
                        working.id
                    } else {
                        resting.id
                    },
                    symbol: working.symbol,
                    price: level_price,
                    quantity: trade_qty,
                    ts: Ts::now(),
                    // Later arrival is the aggressor; ties go to the incoming order
                    aggressor: if resting.ts > working.ts {
                        resting.side
                    } else {
                        working.side
                    },
                };
                self.next_trade_id += 1;
                *self.trade_pool.get_mut(trade_index) = trade;
                // The sink consumes by value; the slot frees immediately
                self.trade_pool.release(trade_index);

                working.filled = working.filled.add(trade_qty);
                level.total_quantity = level.total_quantity.sub(trade_qty);
                self.volume_matched
                    .fetch_add(trade_qty.as_u64(), Ordering::Relaxed);
                self.trades_generated.fetch_add(1, Ordering::Relaxed);
                trades += 1;

                let resting_done = {
                    let node = self.order_pool.get_mut(cursor);
                    node.order.filled = node.order.filled.add(trade_qty);
                    node.order.remaining().is_zero()
                };

                if let Some(sink) = self.trade_sink.as_mut() {
                    sink(trade);
                }

                if resting_done {
                    let mut filled = self.order_pool.get(cursor).order;
                    filled.status = OrderStatus::Filled;
                    unlink(level, &mut self.order_pool, cursor);
                    self.order_lookup.remove(&filled.id);
                    self.order_pool.release(cursor);
                    if let Some(sink) = self.update_sink.as_mut() {
                        sink(filled);
                    }
                } else {
                    let node = self.order_pool.get_mut(cursor);
                    node.order.status = OrderStatus::PartiallyFilled;
                    let updated = node.order;
                    if let Some(sink) = self.update_sink.as_mut() {
                        sink(updated);
                    }
                }

                cursor = next;
            }

            if level.order_count == 0 {
                opposite.remove(&key);
            } else {
                // Level still has quantity at an acceptable price but the
                // incoming order is done (or the trade pool is dry)
                break;
            }
        }

        trades
    }

    fn rest(&mut self, working: &mut Order) {
        let Some(index) = self.order_pool.acquire() else {
            warn!(order_id = working.id, "order pool exhausted, dropping remainder");
            working.status = OrderStatus::Cancelled;
            self.emit_update(*working);
            return;
        };

        {
            let node = self.order_pool.get_mut(index);
            node.order = *working;
            node.prev = NIL;
            node.next = NIL;
        }

        let book = self.books.entry(working.symbol).or_default();
        let ladder = match working.side {
            Side::Buy => &mut book.bids,
            Side::Sell => &mut book.asks,
        };
        let key = price_key(working.side, working.price);
        let level = ladder
            .entry(key)
            .or_insert_with(|| PriceLevel::new(working.price));
        push_back(level, &mut self.order_pool, index);
        self.order_lookup.insert(working.id, index);
    }

    /// Total quantity crossable for an order of `side` up to `limit`
    fn crossable_depth(&self, symbol: Symbol, side: Side, limit: Px) -> Qty {
        let Some(book) = self.books.get(&symbol) else {
            return Qty::ZERO;
        };
        let opposite = match side {
            Side::Buy => &book.asks,
            Side::Sell => &book.bids,
        };
        let bound = cross_bound(side, limit);

        let mut available = Qty::ZERO;
        for (&key, level) in opposite {
            if key > bound {
                break;
            }
            available = available.add(level.total_quantity);
        }
        available
    }

    fn emit_update(&mut self, order: Order) {
        if let Some(sink) = self.update_sink.as_mut() {
            sink(order);
        }
    }

    /// Top-of-book view for one symbol
    #[must_use]
    pub fn book_state(&self, symbol: Symbol) -> BookState {
        let Some(book) = self.books.get(&symbol) else {
            return BookState::default();
        };

        BookState {
            best_bid: book
                .bids
                .first_key_value()
                .map(|(_, l)| (l.price, l.total_quantity)),
            best_ask: book
                .asks
                .first_key_value()
                .map(|(_, l)| (l.price, l.total_quantity)),
            bid_levels: book.bids.len(),
            ask_levels: book.asks.len(),
        }
    }

    /// Resting orders at one price in FIFO order (diagnostics and tests)
    #[must_use]
    pub fn level_orders(&self, symbol: Symbol, side: Side, price: Px) -> Vec<Order> {
        let mut out = Vec::new();
        let Some(book) = self.books.get(&symbol) else {
            return out;
        };
        let ladder = match side {
            Side::Buy => &book.bids,
            Side::Sell => &book.asks,
        };
        if let Some(level) = ladder.get(&price_key(side, price)) {
            let mut cursor = level.head;
            while cursor != NIL {
                let node = self.order_pool.get(cursor);
                out.push(node.order);
                cursor = node.next;
            }
        }
        out
    }

    /// Aggregates for one price level: (total quantity, order count)
    #[must_use]
    pub fn level_totals(&self, symbol: Symbol, side: Side, price: Px) -> Option<(Qty, u32)> {
        let book = self.books.get(&symbol)?;
        let ladder = match side {
            Side::Buy => &book.bids,
            Side::Sell => &book.asks,
        };
        ladder
            .get(&price_key(side, price))
            .map(|level| (level.total_quantity, level.order_count))
    }

    /// Number of orders currently resting
    #[must_use]
    pub fn open_orders(&self) -> usize {
        self.order_lookup.len()
    }

    /// Matching counters and derived rates
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> MatchingStats {
        let orders = self.orders_processed.load(Ordering::Relaxed);
        let trades = self.trades_generated.load(Ordering::Relaxed);
        let volume = self.volume_matched.load(Ordering::Relaxed);

        MatchingStats {
            total_orders: orders,
            total_trades: trades,
            total_volume: volume,
            match_rate: if orders > 0 {
                trades as f64 / orders as f64
            } else {
                0.0
            },
            average_fill_size: if trades > 0 {
                volume as f64 / trades as f64
            } else {
                0.0
            },
            order_pool_exhaustions: self.order_pool.exhaustions(),
            trade_pool_exhaustions: self.trade_pool.exhaustions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(1024, 256)
    }

    fn limit(id: OrderId, side: Side, price: i64, qty: u64) -> Order {
        Order::limit(
            id,
            Symbol::new(1),
            side,
            Px::from_i64(price),
            Qty::from_u64(qty),
            TimeInForce::Gtc,
        )
    }

    #[test]
    fn test_resting_order_fills_level_totals() {
        let mut eng = engine();
        let outcome = eng.process_order(limit(1, Side::Buy, 10_000, 100));
        assert_eq!(outcome.trades, 0);
        assert_eq!(outcome.order.status, OrderStatus::Incoming);

        let state = eng.book_state(Symbol::new(1));
        assert_eq!(
            state.best_bid,
            Some((Px::from_i64(10_000), Qty::from_u64(100)))
        );
        assert_eq!(state.best_ask, None);
        assert_eq!(
            eng.level_totals(Symbol::new(1), Side::Buy, Px::from_i64(10_000)),
            Some((Qty::from_u64(100), 1))
        );
    }

    #[test]
    fn test_level_invariant_sum_of_orders() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Sell, 10_000, 40));
        eng.process_order(limit(2, Side::Sell, 10_000, 60));

        let orders = eng.level_orders(Symbol::new(1), Side::Sell, Px::from_i64(10_000));
        let (total, count) = eng
            .level_totals(Symbol::new(1), Side::Sell, Px::from_i64(10_000))
            .expect("level exists");
        assert_eq!(count as usize, orders.len());
        let sum: u64 = orders.iter().map(|o| o.remaining().as_u64()).sum();
        assert_eq!(sum, total.as_u64());
    }

    #[test]
    fn test_partial_fill_keeps_remainder_resting() {
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        eng.process_order(limit(1, Side::Buy, 10_000, 100));
        let outcome = eng.process_order(limit(2, Side::Sell, 10_000, 60));

        assert_eq!(outcome.order.status, OrderStatus::Filled);
        let trades = trades.lock().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, Px::from_i64(10_000));
        assert_eq!(trades[0].quantity, Qty::from_u64(60));
        assert_eq!(trades[0].buy_order_id, 1);
        assert_eq!(trades[0].sell_order_id, 2);
        assert_eq!(trades[0].aggressor, Side::Sell);

        let state = eng.book_state(Symbol::new(1));
        assert_eq!(
            state.best_bid,
            Some((Px::from_i64(10_000), Qty::from_u64(40)))
        );
    }

    #[test]
    fn test_price_time_priority() {
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        eng.process_order(limit(1, Side::Buy, 10_010, 50));
        eng.process_order(limit(2, Side::Buy, 10_010, 50));
        let outcome = eng.process_order(limit(3, Side::Sell, 10_000, 60));

        let trades = trades.lock().unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].buy_order_id, 1);
        assert_eq!(trades[0].quantity, Qty::from_u64(50));
        assert_eq!(trades[0].price, Px::from_i64(10_010));
        assert_eq!(trades[1].buy_order_id, 2);
        assert_eq!(trades[1].quantity, Qty::from_u64(10));
        assert_eq!(outcome.order.status, OrderStatus::Filled);

        let state = eng.book_state(Symbol::new(1));
        assert_eq!(
            state.best_bid,
            Some((Px::from_i64(10_010), Qty::from_u64(40)))
        );
    }

    #[test]
    fn test_execution_at_passive_price_improves_aggressor() {
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        eng.process_order(limit(1, Side::Sell, 9_990, 10));
        // Buyer willing to pay 10_020 executes at the resting 9_990
        eng.process_order(limit(2, Side::Buy, 10_020, 10));

        let trades = trades.lock().unwrap();
        assert_eq!(trades[0].price, Px::from_i64(9_990));
        assert_eq!(trades[0].aggressor, Side::Buy);
    }

    #[test]
    fn test_walks_levels_best_first() {
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        eng.process_order(limit(1, Side::Sell, 10_020, 10));
        eng.process_order(limit(2, Side::Sell, 10_000, 10));
        eng.process_order(limit(3, Side::Sell, 10_010, 10));
        eng.process_order(limit(4, Side::Buy, 10_020, 30));

        let trades = trades.lock().unwrap();
        let prices: Vec<i64> = trades.iter().map(|t| t.price.as_i64()).collect();
        assert_eq!(prices, vec![10_000, 10_010, 10_020]);
    }

    #[test]
    fn test_ioc_remainder_cancelled() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Sell, 10_000, 30));

        let mut ioc = limit(2, Side::Buy, 10_000, 100);
        ioc.time_in_force = TimeInForce::Ioc;
        let outcome = eng.process_order(ioc);

        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(outcome.order.filled, Qty::from_u64(30));
        // Nothing rested
        assert_eq!(eng.book_state(Symbol::new(1)).bid_levels, 0);
    }

    #[test]
    fn test_fok_rejects_without_trades_when_short() {
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        eng.process_order(limit(1, Side::Sell, 10_000, 50));

        let mut fok = limit(2, Side::Buy, 10_000, 100);
        fok.time_in_force = TimeInForce::Fok;
        let outcome = eng.process_order(fok);

        assert_eq!(outcome.order.status, OrderStatus::Rejected);
        assert_eq!(outcome.order.filled, Qty::ZERO);
        assert!(trades.lock().unwrap().is_empty());
        // The resting sell is untouched
        assert_eq!(
            eng.level_totals(Symbol::new(1), Side::Sell, Px::from_i64(10_000)),
            Some((Qty::from_u64(50), 1))
        );
    }

    #[test]
    fn test_fok_fills_when_depth_suffices() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Sell, 10_000, 60));
        eng.process_order(limit(2, Side::Sell, 10_010, 60));

        let mut fok = limit(3, Side::Buy, 10_010, 100);
        fok.time_in_force = TimeInForce::Fok;
        let outcome = eng.process_order(fok);
        assert_eq!(outcome.order.status, OrderStatus::Filled);
        assert_eq!(outcome.trades, 2);
    }

    #[test]
    fn test_market_order_never_rests() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Sell, 10_000, 30));

        let market = Order::market(2, Symbol::new(1), Side::Buy, Qty::from_u64(100));
        let outcome = eng.process_order(market);

        assert_eq!(outcome.order.filled, Qty::from_u64(30));
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(eng.book_state(Symbol::new(1)).bid_levels, 0);
    }

    #[test]
    fn test_market_sell_crosses_any_bid() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Buy, 1, 10));

        let market = Order::market(2, Symbol::new(1), Side::Sell, Qty::from_u64(10));
        let outcome = eng.process_order(market);
        assert_eq!(outcome.order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_cancel_resting_order() {
        let mut eng = engine();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        eng.set_update_sink(move |o| sink.lock().unwrap().push(o));

        eng.process_order(limit(1, Side::Buy, 10_000, 100));
        assert!(eng.cancel_order(1));

        let updates = updates.lock().unwrap();
        let last = updates.last().expect("cancel update");
        assert_eq!(last.id, 1);
        assert_eq!(last.status, OrderStatus::Cancelled);
        assert_eq!(last.filled, Qty::ZERO);

        assert_eq!(eng.book_state(Symbol::new(1)).bid_levels, 0);
        assert_eq!(eng.open_orders(), 0);
    }

    #[test]
    fn test_cancel_unknown_id_is_noop() {
        let mut eng = engine();
        assert!(!eng.cancel_order(42));
        eng.process_order(limit(1, Side::Buy, 10_000, 100));
        assert!(eng.cancel_order(1));
        // Second cancel of the same id fails
        assert!(!eng.cancel_order(1));
    }

    #[test]
    fn test_cancel_middle_of_fifo_preserves_level() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Buy, 10_000, 10));
        eng.process_order(limit(2, Side::Buy, 10_000, 20));
        eng.process_order(limit(3, Side::Buy, 10_000, 30));

        assert!(eng.cancel_order(2));
        let orders = eng.level_orders(Symbol::new(1), Side::Buy, Px::from_i64(10_000));
        assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(
            eng.level_totals(Symbol::new(1), Side::Buy, Px::from_i64(10_000)),
            Some((Qty::from_u64(40), 2))
        );
    }

    #[test]
    fn test_trade_emitted_before_passive_update() {
        let mut eng = engine();
        let log = Arc::new(Mutex::new(Vec::new()));
        let trade_log = Arc::clone(&log);
        eng.set_trade_sink(move |t| trade_log.lock().unwrap().push(format!("trade:{}", t.id)));
        let update_log = Arc::clone(&log);
        eng.set_update_sink(move |o| {
            update_log
                .lock()
                .unwrap()
                .push(format!("update:{}:{:?}", o.id, o.status));
        });

        eng.process_order(limit(1, Side::Buy, 10_000, 50));
        eng.process_order(limit(2, Side::Sell, 10_000, 50));

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "trade:1".to_string(),
                "update:1:Filled".to_string(),
                "update:2:Filled".to_string(),
            ]
        );
    }

    #[test]
    fn test_aggressor_tie_goes_to_incoming() {
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        let mut resting = limit(1, Side::Buy, 10_000, 10);
        resting.ts = Ts::from_nanos(1_000);
        eng.process_order(resting);

        let mut incoming = limit(2, Side::Sell, 10_000, 10);
        incoming.ts = Ts::from_nanos(1_000);
        eng.process_order(incoming);

        assert_eq!(trades.lock().unwrap()[0].aggressor, Side::Sell);
    }

    #[test]
    fn test_resting_order_with_later_ts_is_aggressor() {
        // A stale incoming timestamp loses the aggressor tag to the book
        let mut eng = engine();
        let trades = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&trades);
        eng.set_trade_sink(move |t| sink.lock().unwrap().push(t));

        let mut resting = limit(1, Side::Buy, 10_000, 10);
        resting.ts = Ts::from_nanos(2_000);
        eng.process_order(resting);

        let mut incoming = limit(2, Side::Sell, 10_000, 10);
        incoming.ts = Ts::from_nanos(1_000);
        eng.process_order(incoming);

        assert_eq!(trades.lock().unwrap()[0].aggressor, Side::Buy);
    }

    #[test]
    fn test_order_pool_exhaustion_cancels_remainder() {
        let mut eng = MatchingEngine::new(1, 16);
        eng.process_order(limit(1, Side::Buy, 10_000, 10));

        let outcome = eng.process_order(limit(2, Side::Buy, 9_990, 10));
        assert_eq!(outcome.order.status, OrderStatus::Cancelled);
        assert_eq!(eng.stats().order_pool_exhaustions, 1);
        // The first order still rests
        assert_eq!(eng.open_orders(), 1);
    }

    #[test]
    fn test_trade_pool_exhaustion_rolls_back_step() {
        let mut eng = MatchingEngine::new(16, 0);
        eng.process_order(limit(1, Side::Sell, 10_000, 50));

        let mut ioc = limit(2, Side::Buy, 10_000, 50);
        ioc.time_in_force = TimeInForce::Ioc;
        let outcome = eng.process_order(ioc);

        // No trade emitted and the resting order is untouched
        assert_eq!(outcome.trades, 0);
        assert_eq!(outcome.order.filled, Qty::ZERO);
        assert_eq!(
            eng.level_totals(Symbol::new(1), Side::Sell, Px::from_i64(10_000)),
            Some((Qty::from_u64(50), 1))
        );
        assert_eq!(eng.stats().trade_pool_exhaustions, 1);
    }

    #[test]
    fn test_stats_rates() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Sell, 10_000, 100));
        eng.process_order(limit(2, Side::Buy, 10_000, 40));
        eng.process_order(limit(3, Side::Buy, 10_000, 60));

        let stats = eng.stats();
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.total_volume, 100);
        assert!((stats.match_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.average_fill_size - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_symbols_are_isolated() {
        let mut eng = engine();
        eng.process_order(limit(1, Side::Sell, 10_000, 10));

        let other = Order::limit(
            2,
            Symbol::new(2),
            Side::Buy,
            Px::from_i64(10_000),
            Qty::from_u64(10),
            TimeInForce::Gtc,
        );
        let outcome = eng.process_order(other);
        // No cross across symbols
        assert_eq!(outcome.trades, 0);
        assert_eq!(eng.book_state(Symbol::new(2)).bid_levels, 1);
        assert_eq!(eng.book_state(Symbol::new(1)).ask_levels, 1);
    }
}
