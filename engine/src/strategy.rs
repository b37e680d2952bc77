//! Strategy interface
//!
//! Strategies consume market events and emit orders through callbacks
//! injected at registration; they never hold references into the engine.
//! Event methods take `&self` because fan-out threads and the strategy
//! loop share the instance: implementations queue events internally (see
//! [`EventBuffers`]) and do their work in `process_signals`, which the
//! strategy stage invokes on every iteration and which must not block.

use bus::Spsc;
use common::{MarketTick, Symbol, Trade};
use lob::BookSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trading strategy as seen by the engine
pub trait Strategy: Send + Sync {
    /// Symbol this strategy trades
    fn symbol(&self) -> Symbol;

    /// Disabled strategies are skipped by the strategy stage
    fn is_enabled(&self) -> bool;

    /// A market tick for this strategy's symbol
    fn on_market_data(&self, tick: &MarketTick);

    /// A fresh best-of-book snapshot
    fn on_book_snapshot(&self, snapshot: &BookSnapshot);

    /// An executed trade on this strategy's symbol
    fn on_trade(&self, trade: &Trade);

    /// Drain queued events and emit orders. Non-blocking.
    fn process_signals(&self);

    /// Release resources; called once during engine shutdown
    fn shutdown(&self);
}

/// SPSC event staging for strategy implementations
///
/// Fan-out threads push, `process_signals` drains. Overflow drops the
/// event and counts it; market data is refreshable so dropping under
/// pressure beats blocking the fan-out path.
pub struct EventBuffers {
    ticks: Spsc<MarketTick>,
    trades: Spsc<Trade>,
    snapshots: Spsc<BookSnapshot>,
    dropped: AtomicU64,
}

impl EventBuffers {
    /// Create buffers with the given per-queue capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks: Spsc::new(capacity),
            trades: Spsc::new(capacity),
            snapshots: Spsc::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    /// Stage a tick
    pub fn push_tick(&self, tick: MarketTick) {
        if !self.ticks.try_push(tick) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stage a trade
    pub fn push_trade(&self, trade: Trade) {
        if !self.trades.try_push(trade) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stage a snapshot
    pub fn push_snapshot(&self, snapshot: BookSnapshot) {
        if !self.snapshots.try_push(snapshot) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain staged ticks into `f`
    pub fn drain_ticks(&self, mut f: impl FnMut(MarketTick)) {
        while let Some(tick) = self.ticks.try_pop() {
            f(tick);
        }
    }

    /// Drain staged trades into `f`
    pub fn drain_trades(&self, mut f: impl FnMut(Trade)) {
        while let Some(trade) = self.trades.try_pop() {
            f(trade);
        }
    }

    /// Drain staged snapshots into `f`
    pub fn drain_snapshots(&self, mut f: impl FnMut(BookSnapshot)) {
        while let Some(snapshot) = self.snapshots.try_pop() {
            f(snapshot);
        }
    }

    /// Events dropped to overflow
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Px, Qty, Side, Ts};

    fn tick(sequence: u64) -> MarketTick {
        MarketTick {
            symbol: Symbol::new(1),
            price: Px::from_i64(10_000),
            quantity: Qty::from_u64(10),
            side: Side::Buy,
            ts: Ts::now(),
            sequence,
        }
    }

    #[test]
    fn test_buffers_drain_in_order() {
        let buffers = EventBuffers::new(16);
        buffers.push_tick(tick(0));
        buffers.push_tick(tick(1));

        let mut seen = Vec::new();
        buffers.drain_ticks(|t| seen.push(t.sequence));
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(buffers.dropped(), 0);
    }

    #[test]
    fn test_overflow_counts_drops() {
        let buffers = EventBuffers::new(2);
        // Capacity rounds to 2, one slot usable
        buffers.push_tick(tick(0));
        buffers.push_tick(tick(1));
        buffers.push_tick(tick(2));
        assert!(buffers.dropped() > 0);
    }
}
