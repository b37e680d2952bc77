//! Engine orchestrator
//!
//! Owns the components and the stage queues, and drives four worker
//! threads: risk, matching, strategy and trade notification. Workers
//! busy-poll their input queues, yield when empty, and check the running
//! flag between iterations; shutdown stops the gateway first, flips the
//! flag, joins workers in creation order and finally shuts strategies
//! down. All cross-component wiring is one-directional callbacks
//! injected here, so no component holds a reference back into the
//! engine.

use crate::gateway::{GatewayStats, MarketDataGateway};
use crate::matching::{MatchingEngine, MatchingStats};
use crate::metrics::{LatencyProfiler, Stage};
use crate::risk::{PositionInfo, RiskGate, RiskMetricsSnapshot, RiskResult};
use crate::stops::StopTracker;
use crate::strategy::Strategy;
use anyhow::{bail, Result};
use bus::{Mpsc, Spsc};
use common::{EngineConfig, Order, OrderId, OrderStatus, OrderType, Symbol, Trade, Ts};
use lob::{BookManager, QuoteBook};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Order-status event delivered to the registered update listener
#[derive(Debug, Clone, Copy)]
pub struct OrderUpdate {
    /// Order state after the transition
    pub order: Order,
    /// Classifying reason when the risk gate rejected the order
    pub reject_reason: Option<RiskResult>,
}

/// Update listener type
pub type UpdateCallback = Arc<dyn Fn(&OrderUpdate) + Send + Sync>;

#[derive(Default)]
struct EngineCounters {
    orders_received: AtomicU64,
    orders_processed: AtomicU64,
    orders_rejected: AtomicU64,
    trades_executed: AtomicU64,
    trade_ring_drops: AtomicU64,
}

/// Submit/cancel entry points handed to strategies and clients
///
/// Holds only the queues and matcher it needs, never the engine itself.
#[derive(Clone)]
pub struct EngineHandle {
    incoming: Arc<Mpsc<Order>>,
    matcher: Arc<Mutex<MatchingEngine>>,
    counters: Arc<EngineCounters>,
}

impl EngineHandle {
    /// Push an order into the ingress queue. False when the queue is full;
    /// the caller retries or fails locally.
    pub fn submit_order(&self, order: Order) -> bool {
        self.counters.orders_received.fetch_add(1, Ordering::Relaxed);
        self.incoming.try_push(order)
    }

    /// Cancel a resting order. False for unknown ids.
    pub fn cancel_order(&self, order_id: OrderId) -> bool {
        self.matcher.lock().cancel_order(order_id)
    }
}

/// Aggregated engine statistics
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    /// Orders submitted
    pub orders_received: u64,
    /// Orders that reached the matcher
    pub orders_processed: u64,
    /// Orders rejected by risk or queue pressure
    pub orders_rejected: u64,
    /// Trades executed
    pub trades_executed: u64,
    /// Trade notifications dropped to ring overflow
    pub trade_notifications_dropped: u64,
    /// Seconds since start
    pub uptime_seconds: f64,
    /// Orders matched per second of uptime
    pub order_processing_rate: f64,
    /// Gateway counters
    pub gateway: GatewayStats,
    /// Matching counters
    pub matching: MatchingStats,
    /// Risk gate counters
    pub risk: RiskMetricsSnapshot,
}

/// The trading engine: components, queues and worker stages
pub struct TradingEngine {
    running: Arc<AtomicBool>,
    stopped: AtomicBool,
    risk: Arc<RiskGate>,
    matcher: Arc<Mutex<MatchingEngine>>,
    books: Arc<BookManager>,
    gateway: Arc<MarketDataGateway>,
    stops: Arc<StopTracker>,
    profiler: Arc<LatencyProfiler>,
    incoming: Arc<Mpsc<Order>>,
    approved: Arc<Spsc<Order>>,
    trades: Arc<Mpsc<Trade>>,
    strategies: Arc<RwLock<Vec<Arc<dyn Strategy>>>>,
    update_callback: Arc<Mutex<Option<UpdateCallback>>>,
    counters: Arc<EngineCounters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
}

impl TradingEngine {
    /// Build and wire all components
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let books = Arc::new(BookManager::new());
        let gateway = Arc::new(MarketDataGateway::new(
            Arc::clone(&books),
            config.queue_capacity,
        ));
        let risk = Arc::new(RiskGate::new(config));
        let stops = Arc::new(StopTracker::new());
        let profiler = Arc::new(LatencyProfiler::new());

        let incoming = Arc::new(Mpsc::new(config.queue_capacity));
        let approved = Arc::new(Spsc::new(config.queue_capacity));
        let trades = Arc::new(Mpsc::new(config.queue_capacity));

        let counters = Arc::new(EngineCounters::default());
        let update_callback: Arc<Mutex<Option<UpdateCallback>>> = Arc::new(Mutex::new(None));
        let strategies: Arc<RwLock<Vec<Arc<dyn Strategy>>>> = Arc::new(RwLock::new(Vec::new()));

        let mut matching =
            MatchingEngine::new(config.order_pool_capacity, config.trade_pool_capacity);
        {
            // Matcher output fans into the trade ring; overflow is counted,
            // never blocking the match loop
            let trades = Arc::clone(&trades);
            let counters = Arc::clone(&counters);
            matching.set_trade_sink(move |trade| {
                if !trades.try_push(trade) {
                    counters.trade_ring_drops.fetch_add(1, Ordering::Relaxed);
                    warn!(trade_id = trade.id, "trade ring full, notification dropped");
                }
            });
        }
        {
            let update_callback = Arc::clone(&update_callback);
            matching.set_update_sink(move |order| {
                notify_update(&update_callback, order, None);
            });
        }
        let matcher = Arc::new(Mutex::new(matching));

        {
            // Tick fan-out to strategies, filtered by symbol
            let strategies = Arc::clone(&strategies);
            let profiler = Arc::clone(&profiler);
            gateway.set_tick_callback(move |tick| {
                let start = Ts::now();
                for strategy in strategies.read().iter() {
                    if strategy.symbol() == tick.symbol {
                        strategy.on_market_data(tick);
                    }
                }
                profiler.record(Stage::MarketData, Ts::now().elapsed_since(start));
            });
        }
        {
            let strategies = Arc::clone(&strategies);
            gateway.set_snapshot_callback(move |symbol, snapshot| {
                for strategy in strategies.read().iter() {
                    if strategy.symbol() == symbol {
                        strategy.on_book_snapshot(&snapshot);
                    }
                }
            });
        }

        Self {
            running: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
            risk,
            matcher,
            books,
            gateway,
            stops,
            profiler,
            incoming,
            approved,
            trades,
            strategies,
            update_callback,
            counters,
            workers: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    /// Start the gateway and the four worker stages
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            bail!("engine already running");
        }
        *self.started_at.lock() = Some(Instant::now());

        self.gateway.start();

        let mut workers = self.workers.lock();
        workers.push(spawn_worker("risk", risk_loop(self))?);
        workers.push(spawn_worker("matching", matching_loop(self))?);
        workers.push(spawn_worker("strategy", strategy_loop(self))?);
        workers.push(spawn_worker("trade-notify", notification_loop(self))?);

        info!("trading engine started");
        Ok(())
    }

    /// Stop everything. Idempotent: gateway first, then the running flag,
    /// then workers joined in creation order, strategies last.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stopping trading engine");

        self.gateway.stop();
        self.running.store(false, Ordering::Release);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }

        for strategy in self.strategies.read().iter() {
            strategy.shutdown();
        }
        info!("trading engine stopped");
    }

    /// Submit an order into the pipeline
    pub fn submit_order(&self, order: Order) -> bool {
        self.handle().submit_order(order)
    }

    /// Cancel a resting order
    pub fn cancel_order(&self, order_id: OrderId) -> bool {
        self.handle().cancel_order(order_id)
    }

    /// Submit/cancel handle for strategies and clients
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            incoming: Arc::clone(&self.incoming),
            matcher: Arc::clone(&self.matcher),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Register a strategy and subscribe its symbol's market data
    pub fn add_strategy(&self, strategy: Arc<dyn Strategy>) {
        self.gateway.subscribe(strategy.symbol());
        self.strategies.write().push(strategy);
    }

    /// Register the order-update listener
    pub fn set_update_callback(&self, callback: impl Fn(&OrderUpdate) + Send + Sync + 'static) {
        *self.update_callback.lock() = Some(Arc::new(callback));
    }

    /// Subscribe a symbol's market data without a strategy
    pub fn subscribe_symbol(&self, symbol: Symbol) {
        self.gateway.subscribe(symbol);
    }

    /// Stop a symbol's market-data processor
    pub fn unsubscribe_symbol(&self, symbol: Symbol) {
        self.gateway.unsubscribe(symbol);
    }

    /// The market-data gateway (external transports feed it raw bytes)
    #[must_use]
    pub fn gateway(&self) -> &MarketDataGateway {
        &self.gateway
    }

    /// The risk gate (limit overrides, position queries)
    #[must_use]
    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    /// The latency profiler
    #[must_use]
    pub fn profiler(&self) -> &LatencyProfiler {
        &self.profiler
    }

    /// Quote book for a symbol, if market data has been seen
    #[must_use]
    pub fn book(&self, symbol: Symbol) -> Option<Arc<QuoteBook>> {
        self.books.get(symbol)
    }

    /// Position snapshot for a symbol
    #[must_use]
    pub fn position(&self, symbol: Symbol) -> PositionInfo {
        self.risk.position(symbol)
    }

    /// Top-of-book view of a symbol's matching book
    #[must_use]
    pub fn matching_book_state(&self, symbol: Symbol) -> crate::matching::BookState {
        self.matcher.lock().book_state(symbol)
    }

    /// Aggregated statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> EngineStats {
        let uptime = self
            .started_at
            .lock()
            .map_or(0.0, |started| started.elapsed().as_secs_f64());
        let processed = self.counters.orders_processed.load(Ordering::Relaxed);

        EngineStats {
            orders_received: self.counters.orders_received.load(Ordering::Relaxed),
            orders_processed: processed,
            orders_rejected: self.counters.orders_rejected.load(Ordering::Relaxed),
            trades_executed: self.counters.trades_executed.load(Ordering::Relaxed),
            trade_notifications_dropped: self.counters.trade_ring_drops.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            order_processing_rate: if uptime > 0.0 {
                processed as f64 / uptime
            } else {
                0.0
            },
            gateway: self.gateway.stats(),
            matching: self.matcher.lock().stats(),
            risk: self.risk.metrics(),
        }
    }
}

impl Drop for TradingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(name: &str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    Ok(thread::Builder::new().name(name.to_string()).spawn(body)?)
}

fn notify_update(
    callback: &Mutex<Option<UpdateCallback>>,
    order: Order,
    reject_reason: Option<RiskResult>,
) {
    let callback = callback.lock().clone();
    if let Some(callback) = callback {
        callback(&OrderUpdate {
            order,
            reject_reason,
        });
    }
}

/// Risk stage: ingress orders through the gate into the approved queue
fn risk_loop(engine: &TradingEngine) -> impl FnOnce() + Send + 'static {
    let running = Arc::clone(&engine.running);
    let incoming = Arc::clone(&engine.incoming);
    let approved = Arc::clone(&engine.approved);
    let risk = Arc::clone(&engine.risk);
    let stops = Arc::clone(&engine.stops);
    let counters = Arc::clone(&engine.counters);
    let update_callback = Arc::clone(&engine.update_callback);
    let profiler = Arc::clone(&engine.profiler);

    move || {
        while running.load(Ordering::Acquire) {
            let Some(mut order) = incoming.try_pop() else {
                thread::yield_now();
                continue;
            };

            let start = Ts::now();
            let result = risk.check_order(&order);
            profiler.record(Stage::RiskCheck, Ts::now().elapsed_since(start));

            if !result.is_approved() {
                counters.orders_rejected.fetch_add(1, Ordering::Relaxed);
                order.status = OrderStatus::Rejected;
                notify_update(&update_callback, order, Some(result));
                continue;
            }

            // Approved stops park until the tape crosses their trigger
            if matches!(order.order_type, OrderType::Stop | OrderType::StopLimit) {
                stops.add(order);
                continue;
            }

            if !approved.try_push(order) {
                counters.orders_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(order_id = order.id, "approved queue full, order dropped");
                order.status = OrderStatus::Rejected;
                notify_update(&update_callback, order, None);
            }
        }
    }
}

/// Matching stage: approved orders into the matcher
fn matching_loop(engine: &TradingEngine) -> impl FnOnce() + Send + 'static {
    let running = Arc::clone(&engine.running);
    let approved = Arc::clone(&engine.approved);
    let matcher = Arc::clone(&engine.matcher);
    let counters = Arc::clone(&engine.counters);
    let profiler = Arc::clone(&engine.profiler);

    move || {
        while running.load(Ordering::Acquire) {
            let Some(order) = approved.try_pop() else {
                thread::yield_now();
                continue;
            };

            let start = Ts::now();
            matcher.lock().process_order(order);
            counters.orders_processed.fetch_add(1, Ordering::Relaxed);
            profiler.record(Stage::Matching, Ts::now().elapsed_since(start));
        }
    }
}

/// Strategy stage: periodic signal processing with a small backoff
fn strategy_loop(engine: &TradingEngine) -> impl FnOnce() + Send + 'static {
    let running = Arc::clone(&engine.running);
    let strategies = Arc::clone(&engine.strategies);
    let profiler = Arc::clone(&engine.profiler);

    move || {
        while running.load(Ordering::Acquire) {
            let start = Ts::now();
            for strategy in strategies.read().iter() {
                if strategy.is_enabled() {
                    strategy.process_signals();
                }
            }
            profiler.record(Stage::StrategySignal, Ts::now().elapsed_since(start));
            thread::sleep(Duration::from_micros(100));
        }
    }
}

/// Notification stage: position/P&L update, reference prices, stop
/// triggers and strategy trade fan-out
fn notification_loop(engine: &TradingEngine) -> impl FnOnce() + Send + 'static {
    let running = Arc::clone(&engine.running);
    let trades = Arc::clone(&engine.trades);
    let risk = Arc::clone(&engine.risk);
    let stops = Arc::clone(&engine.stops);
    let incoming = Arc::clone(&engine.incoming);
    let strategies = Arc::clone(&engine.strategies);
    let counters = Arc::clone(&engine.counters);
    let update_callback = Arc::clone(&engine.update_callback);
    let profiler = Arc::clone(&engine.profiler);

    move || {
        while running.load(Ordering::Acquire) {
            let Some(trade) = trades.try_pop() else {
                thread::yield_now();
                continue;
            };

            let start = Ts::now();
            risk.on_trade(&trade);
            risk.update_reference_price(trade.symbol, trade.price);
            counters.trades_executed.fetch_add(1, Ordering::Relaxed);

            for strategy in strategies.read().iter() {
                if strategy.symbol() == trade.symbol {
                    strategy.on_trade(&trade);
                }
            }

            // Activated stops rejoin the pipeline from the top
            for mut activated in stops.on_trade_price(trade.symbol, trade.price) {
                activated.ts = Ts::now();
                if !incoming.try_push(activated) {
                    warn!(order_id = activated.id, "ingress full, stop activation dropped");
                    activated.status = OrderStatus::Cancelled;
                    notify_update(&update_callback, activated, None);
                }
            }

            profiler.record(Stage::TradeReport, Ts::now().elapsed_since(start));
        }
    }
}
