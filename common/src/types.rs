//! Core fixed-point types for the Quantra trading engine

use crate::constants::{NANOS_PER_MILLI, PRICE_SCALE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Symbol identifier for trading instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub u32);

impl Symbol {
    /// Create a new Symbol with given ID
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric identifier
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SYM_{}", self.0)
    }
}

/// Price type (stored as i64 ticks for determinism, 8 decimal places)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Px(i64);

impl Px {
    /// Zero price
    pub const ZERO: Self = Self(0);

    /// Sentinel for "no ask" in best-of-book snapshots
    pub const MAX: Self = Self(i64::MAX);

    /// Create a price from a float. Boundary use only; internal code stays
    /// in fixed point.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(value: f64) -> Self {
        let scaled = (value * PRICE_SCALE as f64).round();
        if scaled >= i64::MAX as f64 {
            Self(i64::MAX)
        } else if scaled <= i64::MIN as f64 {
            Self(i64::MIN)
        } else {
            Self(scaled as i64)
        }
    }

    /// Price as f64 for external APIs only
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / PRICE_SCALE as f64
    }

    /// Create from i64 ticks
    #[must_use]
    pub const fn from_i64(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Price as i64 ticks
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Absolute distance between two prices, in ticks
    #[must_use]
    pub const fn distance(self, other: Self) -> i64 {
        (self.0 - other.0).abs()
    }

    /// Notional value of `qty` units at this price, in the same 1e8 scale.
    /// Widened to i128 internally so large products saturate instead of
    /// wrapping.
    #[must_use]
    pub fn notional(self, qty: Qty) -> i64 {
        let wide = self.0 as i128 * qty.as_u64() as i128;
        i64::try_from(wide).unwrap_or(i64::MAX)
    }

    /// True for a price that can head a book side
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 > 0 && self.0 < i64::MAX
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / PRICE_SCALE;
        let frac = (self.0 % PRICE_SCALE).abs();
        write!(f, "{whole}.{frac:08}")
    }
}

/// Quantity type for order sizes (unsigned units)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Qty(u64);

impl Qty {
    /// Zero quantity
    pub const ZERO: Self = Self(0);

    /// Create from u64 units
    #[must_use]
    pub const fn from_u64(units: u64) -> Self {
        Self(units)
    }

    /// Quantity as u64 units
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Quantity as i64 (for signed position arithmetic)
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    /// Check if quantity is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Saturating addition
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction
    #[must_use]
    pub const fn sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Smaller of two quantities
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.0 <= other.0 { self } else { other }
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn monotonic_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic timestamp in nanoseconds since process start
///
/// Comparable within a process run; conversion to wall-clock time is a
/// calibration concern handled outside the engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ts(pub u64);

impl Ts {
    /// Current monotonic timestamp
    #[must_use]
    pub fn now() -> Self {
        let nanos = monotonic_epoch().elapsed().as_nanos();
        Self(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Create timestamp from nanoseconds
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Timestamp as nanoseconds
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Timestamp as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / NANOS_PER_MILLI
    }

    /// Nanoseconds elapsed between `self` and a later timestamp
    #[must_use]
    pub const fn elapsed_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
