//! Quote book with lock-free best-of-book snapshots

use crate::levels::{Ladder, Level};
use common::{Px, Qty, Side, Symbol, Ts};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Cheap versioned view of the top of the book
///
/// `best_ask == Px::MAX` means an empty ask side, `best_bid == Px::ZERO`
/// an empty bid side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookSnapshot {
    /// Best bid price (ZERO when the side is empty)
    pub best_bid: Px,
    /// Best ask price (MAX when the side is empty)
    pub best_ask: Px,
    /// Quantity at the best bid
    pub best_bid_qty: Qty,
    /// Quantity at the best ask
    pub best_ask_qty: Qty,
    /// Monotonic mutation version
    pub version: u64,
    /// Snapshot timestamp
    pub ts: Ts,
}

/// Per-symbol quote book
///
/// Structural mutation locks the affected side exclusively; best-of-book
/// reads go through release/acquire atomics and never lock.
pub struct QuoteBook {
    symbol: Symbol,
    bids: RwLock<Ladder>,
    asks: RwLock<Ladder>,
    best_bid: AtomicI64,
    best_ask: AtomicI64,
    best_bid_qty: AtomicU64,
    best_ask_qty: AtomicU64,
    version: AtomicU64,
}

impl QuoteBook {
    /// Create an empty book for one symbol
    #[must_use]
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: RwLock::new(Ladder::new(Side::Buy)),
            asks: RwLock::new(Ladder::new(Side::Sell)),
            best_bid: AtomicI64::new(0),
            best_ask: AtomicI64::new(i64::MAX),
            best_bid_qty: AtomicU64::new(0),
            best_ask_qty: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Symbol this book tracks
    #[must_use]
    pub const fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// Absolute-replace one price level: zero quantity removes the level,
    /// otherwise it is updated or inserted. Refreshes the best-of-book
    /// cache and bumps the version once per call.
    pub fn update_level(&self, side: Side, price: Px, quantity: Qty) {
        match side {
            Side::Buy => {
                let mut bids = self.bids.write();
                bids.set(price, quantity);
                let (best, qty) = bids
                    .best()
                    .map_or((0, 0), |l| (l.price.as_i64(), l.quantity.as_u64()));
                self.best_bid.store(best, Ordering::Release);
                self.best_bid_qty.store(qty, Ordering::Release);
            }
            Side::Sell => {
                let mut asks = self.asks.write();
                asks.set(price, quantity);
                let (best, qty) = asks
                    .best()
                    .map_or((i64::MAX, 0), |l| (l.price.as_i64(), l.quantity.as_u64()));
                self.best_ask.store(best, Ordering::Release);
                self.best_ask_qty.store(qty, Ordering::Release);
            }
        }
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Install snapshot levels, replacing the book contents
    ///
    /// The wire snapshot carries no side flag: levels arrive bids first
    /// (descending) followed by asks (ascending), and the side boundary is
    /// the first index where the price ordering reverses.
    pub fn install_snapshot(&self, levels: &[(Px, Qty)]) {
        let split = levels
            .windows(2)
            .position(|pair| pair[1].0 > pair[0].0)
            .map_or(levels.len(), |i| i + 1);

        {
            let mut bids = self.bids.write();
            bids.clear();
            for &(price, quantity) in &levels[..split] {
                bids.set(price, quantity);
            }
            let (best, qty) = bids
                .best()
                .map_or((0, 0), |l| (l.price.as_i64(), l.quantity.as_u64()));
            self.best_bid.store(best, Ordering::Release);
            self.best_bid_qty.store(qty, Ordering::Release);
        }
        {
            let mut asks = self.asks.write();
            asks.clear();
            for &(price, quantity) in &levels[split..] {
                asks.set(price, quantity);
            }
            let (best, qty) = asks
                .best()
                .map_or((i64::MAX, 0), |l| (l.price.as_i64(), l.quantity.as_u64()));
            self.best_ask.store(best, Ordering::Release);
            self.best_ask_qty.store(qty, Ordering::Release);
        }
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Lock-free best-of-book snapshot
    #[must_use]
    pub fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            best_bid: Px::from_i64(self.best_bid.load(Ordering::Acquire)),
            best_ask: Px::from_i64(self.best_ask.load(Ordering::Acquire)),
            best_bid_qty: Qty::from_u64(self.best_bid_qty.load(Ordering::Acquire)),
            best_ask_qty: Qty::from_u64(self.best_ask_qty.load(Ordering::Acquire)),
            version: self.version.load(Ordering::Acquire),
            ts: Ts::now(),
        }
    }

    /// Best bid, if the side is non-empty
    #[must_use]
    pub fn best_bid(&self) -> Option<(Px, Qty)> {
        let price = self.best_bid.load(Ordering::Acquire);
        (price > 0).then(|| {
            (
                Px::from_i64(price),
                Qty::from_u64(self.best_bid_qty.load(Ordering::Acquire)),
            )
        })
    }

    /// Best ask, if the side is non-empty
    #[must_use]
    pub fn best_ask(&self) -> Option<(Px, Qty)> {
        let price = self.best_ask.load(Ordering::Acquire);
        (price < i64::MAX).then(|| {
            (
                Px::from_i64(price),
                Qty::from_u64(self.best_ask_qty.load(Ordering::Acquire)),
            )
        })
    }

    /// Stable copy of the first `k` levels from best outward
    #[must_use]
    pub fn top_k(&self, side: Side, k: usize) -> Vec<Level> {
        match side {
            Side::Buy => self.bids.read().top_k(k),
            Side::Sell => self.asks.read().top_k(k),
        }
    }

    /// Resting quantity at an exact price, if the level exists
    #[must_use]
    pub fn quantity_at(&self, side: Side, price: Px) -> Option<Qty> {
        match side {
            Side::Buy => self.bids.read().quantity_at(price),
            Side::Sell => self.asks.read().quantity_at(price),
        }
    }

    /// Number of levels on a side
    #[must_use]
    pub fn depth(&self, side: Side) -> usize {
        match side {
            Side::Buy => self.bids.read().len(),
            Side::Sell => self.asks.read().len(),
        }
    }

    /// Mid price when both sides are present
    #[must_use]
    pub fn mid(&self) -> Option<Px> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => {
                Some(Px::from_i64((bid.as_i64() + ask.as_i64()) / 2))
            }
            _ => None,
        }
    }

    /// Spread in basis points of the mid price
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn spread_bps(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => {
                let mid = (bid.as_i64() + ask.as_i64()) / 2;
                if mid == 0 {
                    return None;
                }
                Some((ask.as_i64() - bid.as_i64()) as f64 / mid as f64 * 10_000.0)
            }
            _ => None,
        }
    }

    /// True when best bid >= best ask and both sides are present
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        let bid = self.best_bid.load(Ordering::Acquire);
        let ask = self.best_ask.load(Ordering::Acquire);
        bid > 0 && ask < i64::MAX && bid >= ask
    }

    /// Current mutation version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::constants::PRICE_SCALE;

    fn px(units: i64) -> Px {
        Px::from_i64(units * PRICE_SCALE)
    }

    fn qty(units: u64) -> Qty {
        Qty::from_u64(units)
    }

    #[test]
    fn test_empty_book_snapshot() {
        let book = QuoteBook::new(Symbol::new(1));
        let snap = book.snapshot();
        assert_eq!(snap.best_bid, Px::ZERO);
        assert_eq!(snap.best_ask, Px::MAX);
        assert_eq!(snap.version, 0);
        assert!(book.mid().is_none());
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_update_refreshes_best_and_version() {
        let book = QuoteBook::new(Symbol::new(1));
        book.update_level(Side::Buy, px(99), qty(100));
        book.update_level(Side::Sell, px(101), qty(50));

        let snap = book.snapshot();
        assert_eq!(snap.best_bid, px(99));
        assert_eq!(snap.best_ask, px(101));
        assert_eq!(snap.best_bid_qty, qty(100));
        assert_eq!(snap.best_ask_qty, qty(50));
        assert_eq!(snap.version, 2);

        assert_eq!(book.mid(), Some(px(100)));
    }

    #[test]
    fn test_better_bid_takes_top() {
        let book = QuoteBook::new(Symbol::new(1));
        book.update_level(Side::Buy, px(99), qty(100));
        book.update_level(Side::Buy, px(100), qty(25));
        assert_eq!(book.best_bid(), Some((px(100), qty(25))));
        assert_eq!(book.depth(Side::Buy), 2);
    }

    #[test]
    fn test_insert_then_remove_restores_best() {
        let book = QuoteBook::new(Symbol::new(1));
        book.update_level(Side::Sell, px(101), qty(10));
        let before = book.snapshot();

        book.update_level(Side::Sell, px(100), qty(5));
        assert_eq!(book.best_ask(), Some((px(100), qty(5))));

        book.update_level(Side::Sell, px(100), Qty::ZERO);
        let after = book.snapshot();
        assert_eq!(after.best_ask, before.best_ask);
        assert_eq!(after.best_ask_qty, before.best_ask_qty);
        // One bump per mutation
        assert_eq!(after.version, before.version + 2);
    }

    #[test]
    fn test_top_k_is_stable_copy() {
        let book = QuoteBook::new(Symbol::new(1));
        for i in 0..5 {
            book.update_level(Side::Sell, px(100 + i), qty(10 + i as u64));
        }
        let top = book.top_k(Side::Sell, 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].price, px(100));
        assert_eq!(top[2].price, px(102));
    }

    #[test]
    fn test_spread_bps() {
        let book = QuoteBook::new(Symbol::new(1));
        book.update_level(Side::Buy, px(99), qty(1));
        book.update_level(Side::Sell, px(101), qty(1));
        let bps = book.spread_bps().expect("both sides present");
        // 2 / 100 * 10000 = 200 bps
        assert!((bps - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossed_detection() {
        let book = QuoteBook::new(Symbol::new(1));
        book.update_level(Side::Buy, px(102), qty(1));
        assert!(!book.is_crossed());
        book.update_level(Side::Sell, px(101), qty(1));
        assert!(book.is_crossed());
    }

    #[test]
    fn test_install_snapshot_splits_sides() {
        let book = QuoteBook::new(Symbol::new(1));
        let levels = vec![
            (px(100), qty(10)),
            (px(99), qty(20)),
            (px(101), qty(5)),
            (px(102), qty(15)),
        ];
        book.install_snapshot(&levels);

        assert_eq!(book.best_bid(), Some((px(100), qty(10))));
        assert_eq!(book.best_ask(), Some((px(101), qty(5))));
        assert_eq!(book.depth(Side::Buy), 2);
        assert_eq!(book.depth(Side::Sell), 2);
    }

    #[test]
    fn test_install_snapshot_bids_only() {
        let book = QuoteBook::new(Symbol::new(1));
        book.install_snapshot(&[(px(100), qty(10)), (px(99), qty(20))]);
        assert_eq!(book.depth(Side::Buy), 2);
        assert_eq!(book.depth(Side::Sell), 0);
    }
}
