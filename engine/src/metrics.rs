//! Per-stage latency profiling

use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline stages with dedicated latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Stage {
    /// Raw message parse and fan-out
    MarketData = 0,
    /// Pre-trade risk check
    RiskCheck = 1,
    /// Book matching
    Matching = 2,
    /// Trade notification handling
    TradeReport = 3,
    /// Strategy signal processing
    StrategySignal = 4,
}

const STAGE_COUNT: usize = 5;

struct StageStats {
    samples: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl StageStats {
    const fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }
}

/// Latency snapshot for one stage
#[derive(Debug, Clone, Copy, Default)]
pub struct StageSnapshot {
    /// Recorded samples
    pub samples: u64,
    /// Mean latency in nanoseconds
    pub avg_ns: u64,
    /// Fastest sample
    pub min_ns: u64,
    /// Slowest sample
    pub max_ns: u64,
}

/// Lock-free latency profiler shared by all worker threads
///
/// Counters are relaxed; min/max are maintained with compare-exchange
/// retry so concurrent recorders never lose an extreme.
pub struct LatencyProfiler {
    stages: [StageStats; STAGE_COUNT],
}

impl Default for LatencyProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyProfiler {
    /// Create a profiler with zeroed stats
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stages: [
                StageStats::new(),
                StageStats::new(),
                StageStats::new(),
                StageStats::new(),
                StageStats::new(),
            ],
        }
    }

    /// Record one latency sample for a stage
    pub fn record(&self, stage: Stage, latency_ns: u64) {
        let stats = &self.stages[stage as usize];
        stats.samples.fetch_add(1, Ordering::Relaxed);
        stats.total_ns.fetch_add(latency_ns, Ordering::Relaxed);

        let mut current = stats.min_ns.load(Ordering::Relaxed);
        while latency_ns < current {
            match stats.min_ns.compare_exchange_weak(
                current,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let mut current = stats.max_ns.load(Ordering::Relaxed);
        while latency_ns > current {
            match stats.max_ns.compare_exchange_weak(
                current,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Snapshot one stage's stats
    #[must_use]
    pub fn snapshot(&self, stage: Stage) -> StageSnapshot {
        let stats = &self.stages[stage as usize];
        let samples = stats.samples.load(Ordering::Relaxed);
        let total = stats.total_ns.load(Ordering::Relaxed);
        let min = stats.min_ns.load(Ordering::Relaxed);

        StageSnapshot {
            samples,
            avg_ns: if samples > 0 { total / samples } else { 0 },
            min_ns: if min == u64::MAX { 0 } else { min },
            max_ns: stats.max_ns.load(Ordering::Relaxed),
        }
    }

    /// Reset one stage's stats
    pub fn reset(&self, stage: Stage) {
        let stats = &self.stages[stage as usize];
        stats.samples.store(0, Ordering::Relaxed);
        stats.total_ns.store(0, Ordering::Relaxed);
        stats.min_ns.store(u64::MAX, Ordering::Relaxed);
        stats.max_ns.store(0, Ordering::Relaxed);
    }
}
