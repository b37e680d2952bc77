//! Bounded lock-free queues for ultra-low-latency message passing
//!
//! Three flavors cover the engine's stage wiring:
//! - [`Spsc`]: single producer, single consumer ring for fixed pairings
//! - [`Mpsc`]: multiple producers merging into one consumer
//! - [`Mpmc`]: sequenced-cell ring for general use
//!
//! All queues are bounded with power-of-two capacity. A full queue fails
//! the push; callers count the drop. Nothing here blocks.

#![warn(missing_docs)]

mod mpmc;
mod mpsc;
mod spsc;

pub use mpmc::Mpmc;
pub use mpsc::Mpsc;
pub use spsc::Spsc;
