//! Quantra trading engine
//!
//! The latency-critical matching pipeline: orders enter through the
//! orchestrator, pass the pre-trade risk gate, match on a per-symbol
//! price-time priority book, and leave as trades and order-status
//! updates. Stages run as busy-polling worker threads connected by the
//! bounded queues in the `bus` crate; market data fans out per symbol
//! through the gateway into the `lob` quote books.

#![warn(missing_docs)]

pub mod core;
pub mod gateway;
pub mod matching;
pub mod memory;
pub mod metrics;
pub mod risk;
pub mod stops;
pub mod strategy;

pub use crate::core::{EngineHandle, EngineStats, OrderUpdate, TradingEngine};
pub use gateway::{GatewayStats, MarketDataGateway};
pub use matching::{BookState, MatchOutcome, MatchingEngine, MatchingStats};
pub use memory::NodePool;
pub use metrics::{LatencyProfiler, Stage, StageSnapshot};
pub use risk::{PositionInfo, RiskGate, RiskLimits, RiskMetricsSnapshot, RiskResult, TokenBucket};
pub use stops::StopTracker;
pub use strategy::{EventBuffers, Strategy};
