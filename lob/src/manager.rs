//! Book manager for multiple symbols

use crate::book::QuoteBook;
use common::{MarketTick, Symbol};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Owns one [`QuoteBook`] per active symbol
#[derive(Default)]
pub struct BookManager {
    books: RwLock<FxHashMap<Symbol, Arc<QuoteBook>>>,
}

impl BookManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Book for a symbol, if one exists
    #[must_use]
    pub fn get(&self, symbol: Symbol) -> Option<Arc<QuoteBook>> {
        self.books.read().get(&symbol).cloned()
    }

    /// Book for a symbol, created on first use
    pub fn get_or_create(&self, symbol: Symbol) -> Arc<QuoteBook> {
        if let Some(book) = self.books.read().get(&symbol) {
            return Arc::clone(book);
        }

        let mut books = self.books.write();
        // Double-check: another thread may have created it between locks
        Arc::clone(
            books
                .entry(symbol)
                .or_insert_with(|| Arc::new(QuoteBook::new(symbol))),
        )
    }

    /// Apply a market tick to its symbol's book
    pub fn process_tick(&self, tick: &MarketTick) {
        self.get_or_create(tick.symbol)
            .update_level(tick.side, tick.price, tick.quantity);
    }

    /// Symbols with an active book
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.books.read().keys().copied().collect()
    }

    /// Number of active books
    #[must_use]
    pub fn book_count(&self) -> usize {
        self.books.read().len()
    }
}
