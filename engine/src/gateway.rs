//! Market-data gateway: wire parsing and per-symbol fan-out
//!
//! Raw messages arrive from an external transport through
//! [`MarketDataGateway::process_raw_message`]. Incremental updates become
//! locally-stamped [`MarketTick`]s with a per-symbol sequence and land in
//! that symbol's SPSC ingress ring; a drain thread per subscription
//! applies them to the quote book and invokes the tick callback in
//! sequence order. Snapshots install top levels directly and emit a
//! snapshot event. Malformed input is counted and dropped, ring overflow
//! is counted and reported through the overflow hook; nothing blocks.

use bus::Spsc;
use common::wire::{self, CodecError, MessageType};
use common::{MarketTick, Side, Symbol, Ts};
use lob::{BookManager, BookSnapshot};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Tick fan-out callback
pub type TickCallback = Arc<dyn Fn(&MarketTick) + Send + Sync>;
/// Snapshot event callback
pub type SnapshotCallback = Arc<dyn Fn(Symbol, BookSnapshot) + Send + Sync>;
/// Ring-overflow hook
pub type OverflowCallback = Arc<dyn Fn(Symbol) + Send + Sync>;

/// Gateway counters
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayStats {
    /// Raw messages received
    pub messages_received: u64,
    /// Ticks drained and applied
    pub messages_processed: u64,
    /// Malformed or unexpected messages dropped
    pub parse_errors: u64,
    /// Ticks dropped to ring overflow
    pub messages_dropped: u64,
    /// Symbols with an active processor
    pub active_symbols: usize,
}

struct SymbolProcessor {
    ring: Arc<Spsc<MarketTick>>,
    sequence: AtomicU64,
    dropped: AtomicU64,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Per-symbol market-data fan-out
pub struct MarketDataGateway {
    books: Arc<BookManager>,
    processors: RwLock<FxHashMap<Symbol, SymbolProcessor>>,
    running: AtomicBool,
    queue_capacity: usize,
    tick_callback: Mutex<Option<TickCallback>>,
    snapshot_callback: Mutex<Option<SnapshotCallback>>,
    overflow_callback: Mutex<Option<OverflowCallback>>,
    messages_received: AtomicU64,
    messages_processed: Arc<AtomicU64>,
    parse_errors: AtomicU64,
}

impl MarketDataGateway {
    /// Create a gateway over the given book manager
    #[must_use]
    pub fn new(books: Arc<BookManager>, queue_capacity: usize) -> Self {
        Self {
            books,
            processors: RwLock::new(FxHashMap::default()),
            running: AtomicBool::new(false),
            queue_capacity,
            tick_callback: Mutex::new(None),
            snapshot_callback: Mutex::new(None),
            overflow_callback: Mutex::new(None),
            messages_received: AtomicU64::new(0),
            messages_processed: Arc::new(AtomicU64::new(0)),
            parse_errors: AtomicU64::new(0),
        }
    }

    /// Install the tick callback. Set before subscribing: drain threads
    /// capture the callback at subscription time.
    pub fn set_tick_callback(&self, callback: impl Fn(&MarketTick) + Send + Sync + 'static) {
        *self.tick_callback.lock() = Some(Arc::new(callback));
    }

    /// Install the snapshot callback
    pub fn set_snapshot_callback(
        &self,
        callback: impl Fn(Symbol, BookSnapshot) + Send + Sync + 'static,
    ) {
        *self.snapshot_callback.lock() = Some(Arc::new(callback));
    }

    /// Install the ring-overflow hook
    pub fn set_overflow_callback(&self, callback: impl Fn(Symbol) + Send + Sync + 'static) {
        *self.overflow_callback.lock() = Some(Arc::new(callback));
    }

    /// Mark the gateway running
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("market data gateway started");
        }
    }

    /// Stop all symbol processors and join their drain threads. Idempotent.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);

        let drained: Vec<(Symbol, SymbolProcessor)> =
            self.processors.write().drain().collect();
        for (symbol, mut processor) in drained {
            processor.running.store(false, Ordering::Release);
            if let Some(handle) = processor.handle.take() {
                if handle.join().is_err() {
                    warn!(%symbol, "drain thread panicked");
                }
            }
        }
        if was_running {
            info!("market data gateway stopped");
        }
    }

    /// Create a processor and drain thread for one symbol
    pub fn subscribe(&self, symbol: Symbol) {
        let mut processors = self.processors.write();
        if processors.contains_key(&symbol) {
            debug!(%symbol, "already subscribed");
            return;
        }

        let ring = Arc::new(Spsc::new(self.queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let ring = Arc::clone(&ring);
            let running = Arc::clone(&running);
            let books = Arc::clone(&self.books);
            let processed = Arc::clone(&self.messages_processed);
            let tick_callback = self.tick_callback.lock().clone();

            let spawned = thread::Builder::new()
                .name(format!("md-drain-{}", symbol.id()))
                .spawn(move || {
                    drain_loop(&ring, &running, &books, &processed, tick_callback.as_ref());
                });
            match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(%symbol, error = %err, "failed to spawn drain thread");
                    None
                }
            }
        };

        processors.insert(
            symbol,
            SymbolProcessor {
                ring,
                sequence: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                running,
                handle,
            },
        );
        info!(%symbol, "subscribed");
    }

    /// Stop and remove one symbol's processor
    pub fn unsubscribe(&self, symbol: Symbol) {
        let removed = self.processors.write().remove(&symbol);
        if let Some(mut processor) = removed {
            processor.running.store(false, Ordering::Release);
            if let Some(handle) = processor.handle.take() {
                if handle.join().is_err() {
                    warn!(%symbol, "drain thread panicked");
                }
            }
            info!(%symbol, "unsubscribed");
        }
    }

    /// Validate, dispatch and fan out one raw message
    pub fn process_raw_message(&self, data: &[u8]) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);

        let header = match wire::decode_header(data) {
            Ok(header) => header,
            Err(err) => {
                self.count_parse_error(&err);
                return;
            }
        };

        match header.message_type {
            MessageType::MarketDataIncremental => match wire::decode_incremental(data) {
                Ok(msg) => self.handle_incremental(&msg),
                Err(err) => self.count_parse_error(&err),
            },
            MessageType::MarketDataSnapshot => match wire::decode_snapshot(data) {
                Ok(msg) => self.handle_snapshot(&msg),
                Err(err) => self.count_parse_error(&err),
            },
            _ => {
                // Order-entry traffic does not belong on this feed
                self.parse_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn handle_incremental(&self, msg: &wire::IncrementalMsg) {
        let processors = self.processors.read();
        let Some(processor) = processors.get(&msg.symbol) else {
            // Not subscribed
            return;
        };

        let tick = MarketTick {
            symbol: msg.symbol,
            price: msg.price,
            quantity: msg.quantity,
            side: if msg.side == 0 { Side::Buy } else { Side::Sell },
            ts: Ts::now(),
            sequence: processor.sequence.fetch_add(1, Ordering::Relaxed),
        };

        if !processor.ring.try_push(tick) {
            processor.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %msg.symbol, "ingress ring overflow");
            let overflow = self.overflow_callback.lock().clone();
            if let Some(hook) = overflow {
                hook(msg.symbol);
            }
        }
    }

    fn handle_snapshot(&self, msg: &wire::SnapshotMsg) {
        let book = self.books.get_or_create(msg.symbol);
        book.install_snapshot(&msg.levels);

        let callback = self.snapshot_callback.lock().clone();
        if let Some(callback) = callback {
            callback(msg.symbol, book.snapshot());
        }
    }

    fn count_parse_error(&self, err: &CodecError) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
        debug!(error = %err, "dropped malformed message");
    }

    /// Gateway counters
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        let processors = self.processors.read();
        let dropped = processors
            .values()
            .map(|p| p.dropped.load(Ordering::Relaxed))
            .sum();

        GatewayStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            messages_dropped: dropped,
            active_symbols: processors.len(),
        }
    }

    /// Ticks dropped for one symbol
    #[must_use]
    pub fn dropped_for(&self, symbol: Symbol) -> u64 {
        self.processors
            .read()
            .get(&symbol)
            .map_or(0, |p| p.dropped.load(Ordering::Relaxed))
    }
}

impl Drop for MarketDataGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_loop(
    ring: &Spsc<MarketTick>,
    running: &AtomicBool,
    books: &BookManager,
    processed: &AtomicU64,
    tick_callback: Option<&TickCallback>,
) {
    while running.load(Ordering::Acquire) {
        if let Some(tick) = ring.try_pop() {
            books.process_tick(&tick);
            if let Some(callback) = tick_callback {
                callback(&tick);
            }
            processed.fetch_add(1, Ordering::Relaxed);
        } else {
            thread::yield_now();
        }
    }
}
