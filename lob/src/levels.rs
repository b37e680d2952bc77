//! Sorted price ladder for one side of a quote book

use common::constants::MAX_QUOTE_LEVELS;
use common::{Px, Qty, Side};
use rustc_hash::FxHashMap;

/// Maximum price levels tracked per side
pub const MAX_LEVELS: usize = MAX_QUOTE_LEVELS;

/// One aggregated price level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    /// Level price
    pub price: Px,
    /// Total resting quantity
    pub quantity: Qty,
    /// Number of orders at the level
    pub order_count: u32,
}

/// Contiguous sorted ladder plus a price-to-index map
///
/// Bids sort descending, asks ascending, so index 0 is always the best
/// level. Inserts and removals shift the tail and re-point the shifted
/// entries in the index map.
pub(crate) struct Ladder {
    side: Side,
    levels: Vec<Level>,
    index: FxHashMap<i64, usize>,
}

impl Ladder {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            levels: Vec::with_capacity(MAX_LEVELS),
            index: FxHashMap::default(),
        }
    }

    /// Absolute-replace a level: zero quantity removes, otherwise update
    /// or insert. A full ladder drops new inserts silently.
    pub(crate) fn set(&mut self, price: Px, quantity: Qty) {
        if quantity.is_zero() {
            self.remove(price);
        } else if let Some(&pos) = self.index.get(&price.as_i64()) {
            self.levels[pos].quantity = quantity;
        } else {
            self.insert(price, quantity);
        }
    }

    fn insert(&mut self, price: Px, quantity: Qty) {
        if self.levels.len() >= MAX_LEVELS {
            return;
        }

        let pos = match self.side {
            Side::Buy => self.levels.partition_point(|l| l.price > price),
            Side::Sell => self.levels.partition_point(|l| l.price < price),
        };

        self.levels.insert(
            pos,
            Level {
                price,
                quantity,
                order_count: 1,
            },
        );
        self.reindex_from(pos);
    }

    fn remove(&mut self, price: Px) {
        if let Some(pos) = self.index.remove(&price.as_i64()) {
            self.levels.remove(pos);
            self.reindex_from(pos);
        }
    }

    fn reindex_from(&mut self, pos: usize) {
        for (i, level) in self.levels.iter().enumerate().skip(pos) {
            self.index.insert(level.price.as_i64(), i);
        }
    }

    pub(crate) fn best(&self) -> Option<&Level> {
        self.levels.first()
    }

    pub(crate) fn top_k(&self, k: usize) -> Vec<Level> {
        self.levels.iter().take(k).copied().collect()
    }

    pub(crate) fn quantity_at(&self, price: Px) -> Option<Qty> {
        self.index
            .get(&price.as_i64())
            .map(|&pos| self.levels[pos].quantity)
    }

    pub(crate) fn len(&self) -> usize {
        self.levels.len()
    }

    pub(crate) fn clear(&mut self) {
        self.levels.clear();
        self.index.clear();
    }
}
