//! Engine configuration

use crate::constants::{
    DEFAULT_ORDER_POOL_CAPACITY, DEFAULT_QUEUE_CAPACITY, DEFAULT_TRADE_POOL_CAPACITY, PRICE_SCALE,
};
use serde::{Deserialize, Serialize};

/// Engine-wide configuration
///
/// Risk fields become the global limits of the risk gate; queue and pool
/// capacities size the pipeline. Queue capacities are rounded up to a power
/// of two by the queues themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Absolute signed position cap per symbol
    pub max_position: i64,
    /// Cap on open notional per symbol (1e8-scaled)
    pub max_notional: i64,
    /// Global token-bucket refill rate and capacity
    pub max_orders_per_second: u32,
    /// Per-symbol token-bucket refill rate and capacity
    pub symbol_orders_per_second: u32,
    /// Realized-P&L floor: crossing -max_loss_per_day rejects new orders
    /// (1e8-scaled, positive number)
    pub max_loss_per_day: i64,
    /// Per-order quantity cap
    pub max_order_size: u64,
    /// Absolute price deviation allowed from the per-symbol reference
    /// (1e8-scaled)
    pub max_price_deviation: i64,
    /// Per-stage queue capacity (power of two)
    pub queue_capacity: usize,
    /// Matching-book order node pool size
    pub order_pool_capacity: usize,
    /// Trade pool size
    pub trade_pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_position: 1_000_000,
            max_notional: 10_000_000 * PRICE_SCALE,
            max_orders_per_second: 1_000,
            symbol_orders_per_second: 100,
            max_loss_per_day: 100_000 * PRICE_SCALE,
            max_order_size: 100_000,
            max_price_deviation: 10 * PRICE_SCALE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            order_pool_capacity: DEFAULT_ORDER_POOL_CAPACITY,
            trade_pool_capacity: DEFAULT_TRADE_POOL_CAPACITY,
        }
    }
}
