//! Numeric constants shared across the engine

/// Fixed-point scale for prices, notionals and P&L (8 decimal places)
pub const PRICE_SCALE: i64 = 100_000_000;

/// Nanoseconds per second
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds per millisecond
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Default capacity for per-stage queues (must be a power of two)
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Default order-node pool size for the matching book
pub const DEFAULT_ORDER_POOL_CAPACITY: usize = 10_000;

/// Default trade pool size
pub const DEFAULT_TRADE_POOL_CAPACITY: usize = 1_000;

/// Maximum price levels tracked per side of the quote book
pub const MAX_QUOTE_LEVELS: usize = 1_000;
