//! Pre-trade risk gate and post-trade position accounting
//!
//! Every order passes the check chain below before it may reach the
//! matcher; the first failing check classifies the rejection. After each
//! observed trade the gate updates the symbol's position, tape VWAP,
//! realized P&L and open notional.

use common::constants::NANOS_PER_SEC;
use common::{EngineConfig, Order, Px, Qty, Side, Symbol, Trade, Ts};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use tracing::warn;

/// Outcome of a pre-trade check; the first failing check wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskResult {
    /// All checks passed
    Approved,
    /// Prospective |position| above the cap
    PositionLimit,
    /// Open notional above the cap on an exposure-increasing order
    NotionalLimit,
    /// A token bucket ran dry
    RateLimit,
    /// Realized P&L below the daily loss floor
    LossLimit,
    /// Order quantity above the per-order cap
    OrderSize,
    /// Price too far from the symbol's reference price
    PriceLimit,
}

impl RiskResult {
    /// True when the order may proceed to the matcher
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Stable reason tag for order-update events and logs
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::PositionLimit => "position_limit",
            Self::NotionalLimit => "notional_limit",
            Self::RateLimit => "rate_limit",
            Self::LossLimit => "loss_limit",
            Self::OrderSize => "order_size",
            Self::PriceLimit => "price_limit",
        }
    }
}

impl fmt::Display for RiskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Limit set applied globally or per symbol
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    /// Absolute signed position cap
    pub max_position: i64,
    /// Open notional cap (1e8-scaled)
    pub max_notional: i64,
    /// Per-order quantity cap
    pub max_order_size: u64,
    /// Daily realized loss floor (positive number)
    pub max_loss_per_day: i64,
    /// Absolute deviation from the reference price (1e8-scaled)
    pub max_price_deviation: i64,
}

impl From<&EngineConfig> for RiskLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_position: config.max_position,
            max_notional: config.max_notional,
            max_order_size: config.max_order_size,
            max_loss_per_day: config.max_loss_per_day,
            max_price_deviation: config.max_price_deviation,
        }
    }
}

/// Token bucket rate limiter
///
/// Tokens accrue at `refill_rate` per second since the last observation,
/// capped at `capacity`; consumption is a compare-and-swap retry so
/// concurrent checkers never double-spend a token.
pub struct TokenBucket {
    tokens: AtomicU32,
    last_refill: AtomicU64,
    refill_rate: u32,
    capacity: u32,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(refill_rate: u32, capacity: u32) -> Self {
        Self {
            tokens: AtomicU32::new(capacity),
            last_refill: AtomicU64::new(Ts::now().as_nanos()),
            refill_rate,
            capacity,
        }
    }

    /// Refill by elapsed time, then try to consume one token
    pub fn try_acquire(&self, now: Ts) -> bool {
        let now_ns = now.as_nanos();
        let last = self.last_refill.load(Ordering::Relaxed);

        if now_ns > last {
            let elapsed = now_ns - last;
            let refill =
                u128::from(elapsed) * u128::from(self.refill_rate) / u128::from(NANOS_PER_SEC);
            if refill > 0 {
                let current = self.tokens.load(Ordering::Relaxed);
                let refill = u32::try_from(refill).unwrap_or(u32::MAX);
                self.tokens.store(
                    current.saturating_add(refill).min(self.capacity),
                    Ordering::Relaxed,
                );
                self.last_refill.store(now_ns, Ordering::Relaxed);
            }
        }

        let mut current = self.tokens.load(Ordering::Relaxed);
        while current > 0 {
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Tokens currently available
    #[must_use]
    pub fn available(&self) -> u32 {
        self.tokens.load(Ordering::Relaxed)
    }
}

/// Per-symbol position state, updated lock-free
#[derive(Default)]
struct PositionTracker {
    /// Signed position (positive long, negative short)
    position: AtomicI64,
    /// Open notional of the current exposure (1e8-scaled, never negative)
    notional: AtomicI64,
    /// Realized P&L (1e8-scaled)
    realized_pnl: AtomicI64,
    /// Volume-weighted average trade price on the tape
    vwap: AtomicI64,
    /// Cumulative traded volume
    total_volume: AtomicU64,
    /// Orders approved today
    orders_today: AtomicU32,
}

/// Read-only snapshot of a symbol's position state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionInfo {
    /// Signed position
    pub position: i64,
    /// Open notional (1e8-scaled)
    pub notional: i64,
    /// Realized P&L (1e8-scaled)
    pub realized_pnl: i64,
    /// Tape VWAP
    pub vwap: Px,
    /// Cumulative volume
    pub total_volume: u64,
    /// Orders approved today
    pub orders_today: u32,
}

/// Counter snapshot for monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskMetricsSnapshot {
    /// Orders run through the gate
    pub orders_checked: u64,
    /// Orders approved
    pub orders_approved: u64,
    /// Orders rejected (any reason)
    pub orders_rejected: u64,
    /// Rejections from token buckets
    pub rate_breaches: u64,
    /// Rejections from the position cap
    pub position_breaches: u64,
}

/// Pre-trade risk gate
pub struct RiskGate {
    global_limits: RiskLimits,
    symbol_limits: DashMap<Symbol, RiskLimits>,
    positions: DashMap<Symbol, PositionTracker>,
    global_bucket: TokenBucket,
    symbol_buckets: DashMap<Symbol, TokenBucket>,
    symbol_rate: u32,
    reference_prices: DashMap<Symbol, AtomicI64>,
    orders_checked: AtomicU64,
    orders_approved: AtomicU64,
    orders_rejected: AtomicU64,
    rate_breaches: AtomicU64,
    position_breaches: AtomicU64,
}

impl RiskGate {
    /// Build a gate from engine configuration
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            global_limits: RiskLimits::from(config),
            symbol_limits: DashMap::new(),
            positions: DashMap::new(),
            global_bucket: TokenBucket::new(
                config.max_orders_per_second,
                config.max_orders_per_second.max(1),
            ),
            symbol_buckets: DashMap::new(),
            symbol_rate: config.symbol_orders_per_second,
            reference_prices: DashMap::new(),
            orders_checked: AtomicU64::new(0),
            orders_approved: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            rate_breaches: AtomicU64::new(0),
            position_breaches: AtomicU64::new(0),
        }
    }

    /// Override limits for one symbol
    pub fn set_symbol_limits(&self, symbol: Symbol, limits: RiskLimits) {
        self.symbol_limits.insert(symbol, limits);
    }

    /// Effective limits for a symbol: per-symbol override or global
    #[must_use]
    pub fn limits_for(&self, symbol: Symbol) -> RiskLimits {
        self.symbol_limits
            .get(&symbol)
            .map_or(self.global_limits, |entry| *entry.value())
    }

    /// Run the pre-trade check chain; the first failure classifies the
    /// rejection
    pub fn check_order(&self, order: &Order) -> RiskResult {
        self.orders_checked.fetch_add(1, Ordering::Relaxed);
        let result = self.run_checks(order);

        if result.is_approved() {
            self.orders_approved.fetch_add(1, Ordering::Relaxed);
            self.positions
                .entry(order.symbol)
                .or_default()
                .orders_today
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.orders_rejected.fetch_add(1, Ordering::Relaxed);
            match result {
                RiskResult::RateLimit => {
                    self.rate_breaches.fetch_add(1, Ordering::Relaxed);
                }
                RiskResult::PositionLimit => {
                    self.position_breaches.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
            warn!(order_id = order.id, symbol = %order.symbol, reason = result.reason(),
                "order rejected");
        }
        result
    }

    fn run_checks(&self, order: &Order) -> RiskResult {
        let now = Ts::now();

        // 1. Global rate limit
        if !self.global_bucket.try_acquire(now) {
            return RiskResult::RateLimit;
        }

        // 2. Per-symbol rate limit
        let symbol_ok = self
            .symbol_buckets
            .entry(order.symbol)
            .or_insert_with(|| TokenBucket::new(self.symbol_rate, self.symbol_rate.max(1)))
            .try_acquire(now);
        if !symbol_ok {
            return RiskResult::RateLimit;
        }

        let limits = self.limits_for(order.symbol);

        // 3. Order size
        if order.quantity.as_u64() > limits.max_order_size {
            return RiskResult::OrderSize;
        }

        // 4. Price deviation from the reference, when one is set
        if let Some(reference) = self.reference_price(order.symbol) {
            if reference.is_valid()
                && order.price.distance(reference) > limits.max_price_deviation
            {
                return RiskResult::PriceLimit;
            }
        }

        let (position, notional, realized_pnl) = self.positions.get(&order.symbol).map_or(
            (0, 0, 0),
            |tracker| {
                (
                    tracker.position.load(Ordering::Relaxed),
                    tracker.notional.load(Ordering::Relaxed),
                    tracker.realized_pnl.load(Ordering::Relaxed),
                )
            },
        );

        // 5. Prospective position
        let change = match order.side {
            Side::Buy => order.quantity.as_i64(),
            Side::Sell => -order.quantity.as_i64(),
        };
        let prospective = position.saturating_add(change);
        if prospective.saturating_abs() > limits.max_position {
            return RiskResult::PositionLimit;
        }

        // 6. Notional, only when the order increases directional exposure
        let increases_exposure = prospective != 0 && prospective.signum() == change.signum();
        if increases_exposure {
            let order_notional = order.price.notional(order.quantity);
            if notional.saturating_add(order_notional) > limits.max_notional {
                return RiskResult::NotionalLimit;
            }
        }

        // 7. Daily loss floor (strictly below -max_loss rejects)
        if realized_pnl < -limits.max_loss_per_day {
            return RiskResult::LossLimit;
        }

        RiskResult::Approved
    }

    /// Post-trade update: position, tape VWAP, realized P&L and notional
    ///
    /// The engine treats itself as the aggressor on every observed trade;
    /// a fuller ownership model would consult a map of owned order ids.
    pub fn on_trade(&self, trade: &Trade) {
        let tracker = self.positions.entry(trade.symbol).or_default();

        let qty = trade.quantity.as_i64();
        let change = match trade.aggressor {
            Side::Buy => qty,
            Side::Sell => -qty,
        };

        let old_position = tracker.position.fetch_add(change, Ordering::AcqRel);
        let entry_vwap = tracker.vwap.load(Ordering::Acquire);

        // Tape VWAP: vwap' * volume' == vwap * volume + price * qty
        let old_volume = tracker
            .total_volume
            .fetch_add(trade.quantity.as_u64(), Ordering::AcqRel);
        let new_volume = old_volume + trade.quantity.as_u64();
        if new_volume > 0 {
            let accumulated = i128::from(entry_vwap) * i128::from(old_volume)
                + i128::from(trade.price.as_i64()) * i128::from(qty);
            let vwap = accumulated / i128::from(new_volume);
            tracker
                .vwap
                .store(i64::try_from(vwap).unwrap_or(i64::MAX), Ordering::Release);
        }

        let reducing = (old_position > 0 && change < 0) || (old_position < 0 && change > 0);
        if reducing {
            let closed = old_position.abs().min(qty);
            // Long reductions earn (price - vwap), short reductions (vwap - price)
            let per_unit = if old_position > 0 {
                trade.price.as_i64() - entry_vwap
            } else {
                entry_vwap - trade.price.as_i64()
            };
            let pnl = i128::from(per_unit) * i128::from(closed);
            tracker
                .realized_pnl
                .fetch_add(i64::try_from(pnl).unwrap_or(0), Ordering::AcqRel);
        }

        Self::update_notional(&tracker, old_position, change, trade.price);
    }

    fn update_notional(tracker: &PositionTracker, old_position: i64, change: i64, price: Px) {
        let increasing = old_position == 0 || old_position.signum() == change.signum();
        if increasing {
            let added = price.notional(Qty::from_u64(change.unsigned_abs()));
            tracker.notional.fetch_add(added, Ordering::AcqRel);
            return;
        }

        // Reduction: release notional proportionally to the closed share;
        // a flip opens fresh exposure for the excess
        let closed = old_position.abs().min(change.abs());
        let current = tracker.notional.load(Ordering::Acquire);
        let released = if old_position != 0 {
            let share = i128::from(current) * i128::from(closed) / i128::from(old_position.abs());
            i64::try_from(share).unwrap_or(current)
        } else {
            0
        };
        tracker
            .notional
            .fetch_sub(released.min(current), Ordering::AcqRel);

        let excess = change.abs() - closed;
        if excess > 0 {
            let opened = price.notional(Qty::from_u64(excess.unsigned_abs()));
            tracker.notional.fetch_add(opened, Ordering::AcqRel);
        }
    }

    /// Install or refresh the reference price for a symbol
    pub fn update_reference_price(&self, symbol: Symbol, price: Px) {
        match self.reference_prices.get(&symbol) {
            Some(entry) => entry.store(price.as_i64(), Ordering::Relaxed),
            None => {
                self.reference_prices
                    .insert(symbol, AtomicI64::new(price.as_i64()));
            }
        }
    }

    /// Current reference price, if one has been observed
    #[must_use]
    pub fn reference_price(&self, symbol: Symbol) -> Option<Px> {
        self.reference_prices
            .get(&symbol)
            .map(|entry| Px::from_i64(entry.load(Ordering::Relaxed)))
    }

    /// Snapshot of a symbol's position state
    #[must_use]
    pub fn position(&self, symbol: Symbol) -> PositionInfo {
        self.positions
            .get(&symbol)
            .map_or(PositionInfo::default(), |tracker| PositionInfo {
                position: tracker.position.load(Ordering::Relaxed),
                notional: tracker.notional.load(Ordering::Relaxed),
                realized_pnl: tracker.realized_pnl.load(Ordering::Relaxed),
                vwap: Px::from_i64(tracker.vwap.load(Ordering::Relaxed)),
                total_volume: tracker.total_volume.load(Ordering::Relaxed),
                orders_today: tracker.orders_today.load(Ordering::Relaxed),
            })
    }

    /// Force a symbol's position (tests and recovery tooling)
    pub fn set_position(&self, symbol: Symbol, position: i64) {
        self.positions
            .entry(symbol)
            .or_default()
            .position
            .store(position, Ordering::Release);
    }

    /// Force a symbol's realized P&L (tests and recovery tooling)
    pub fn set_realized_pnl(&self, symbol: Symbol, pnl: i64) {
        self.positions
            .entry(symbol)
            .or_default()
            .realized_pnl
            .store(pnl, Ordering::Release);
    }

    /// Counter snapshot
    #[must_use]
    pub fn metrics(&self) -> RiskMetricsSnapshot {
        RiskMetricsSnapshot {
            orders_checked: self.orders_checked.load(Ordering::Relaxed),
            orders_approved: self.orders_approved.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            rate_breaches: self.rate_breaches.load(Ordering::Relaxed),
            position_breaches: self.position_breaches.load(Ordering::Relaxed),
        }
    }
}
