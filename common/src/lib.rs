//! Common types and utilities for the Quantra trading engine
//!
//! Everything here is shared by the hot path: fixed-point price and
//! quantity types, the order/trade data model, the wire-message codec and
//! the engine configuration. All arithmetic is integer fixed-point; floats
//! appear only at external boundaries.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod market;
pub mod types;
pub mod wire;

pub use config::EngineConfig;
pub use market::{
    MarketTick, Order, OrderId, OrderStatus, OrderType, Side, TimeInForce, Trade, TradeId,
};
pub use types::{Px, Qty, Symbol, Ts};
pub use wire::{CodecError, MessageType};
