//! Market-data wire codec
//!
//! Messages are little-endian with fixed field order: an 8-byte header
//! `{type u8, version u8, length u16, sequence u32}` followed by a
//! type-specific body. Decoding never panics; malformed input surfaces as
//! a [`CodecError`] that callers count and drop.

use crate::types::{Px, Qty, Symbol};
use thiserror::Error;

/// Wire message header length in bytes
pub const HEADER_LEN: usize = 8;

/// Incremental message body: symbol u32, price u64, qty u64, side u8, ts u64
pub const INCREMENTAL_BODY_LEN: usize = 29;

/// Snapshot fixed body: symbol u32, level_count u32, ts u64
pub const SNAPSHOT_FIXED_BODY_LEN: usize = 16;

/// One snapshot level: price u64, qty u64
pub const SNAPSHOT_LEVEL_LEN: usize = 16;

/// Protocol version emitted by encoders
pub const WIRE_VERSION: u8 = 1;

/// Wire message discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Single level update
    MarketDataIncremental = 1,
    /// Full top-of-book snapshot
    MarketDataSnapshot = 2,
    /// Client order entry
    NewOrder = 3,
    /// Client cancel request
    CancelOrder = 4,
    /// Outbound execution report
    TradeReport = 5,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(raw: u8) -> Result<Self, CodecError> {
        match raw {
            1 => Ok(Self::MarketDataIncremental),
            2 => Ok(Self::MarketDataSnapshot),
            3 => Ok(Self::NewOrder),
            4 => Ok(Self::CancelOrder),
            5 => Ok(Self::TradeReport),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Decode failures; the gateway counts these and drops the message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input shorter than the structure being decoded
    #[error("truncated message: need {need} bytes, got {got}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes available
        got: usize,
    },

    /// Header type byte is not a known discriminant
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// Side byte is neither 0 (buy) nor 1 (sell)
    #[error("unknown side {0}")]
    UnknownSide(u8),

    /// A u64 field does not fit the engine's signed fixed-point range
    #[error("field value out of range")]
    ValueOutOfRange,
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message discriminant
    pub message_type: MessageType,
    /// Protocol version
    pub version: u8,
    /// Declared total message length
    pub length: u16,
    /// Sender sequence number
    pub sequence: u32,
}

/// Decoded incremental level update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalMsg {
    /// Header fields
    pub header: MessageHeader,
    /// Instrument
    pub symbol: Symbol,
    /// Level price
    pub price: Px,
    /// Level quantity (0 removes the level)
    pub quantity: Qty,
    /// Book side: 0 = buy, 1 = sell
    pub side: u8,
    /// Exchange timestamp as sent on the wire
    pub exchange_ts: u64,
}

/// Decoded book snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMsg {
    /// Header fields
    pub header: MessageHeader,
    /// Instrument
    pub symbol: Symbol,
    /// Exchange timestamp as sent on the wire
    pub exchange_ts: u64,
    /// Top levels, best first
    pub levels: Vec<(Px, Qty)>,
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&data[at..at + 2]);
    u16::from_le_bytes(raw)
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn read_px(data: &[u8], at: usize) -> Result<Px, CodecError> {
    let raw = read_u64(data, at);
    i64::try_from(raw)
        .map(Px::from_i64)
        .map_err(|_| CodecError::ValueOutOfRange)
}

/// Decode the common message header
pub fn decode_header(data: &[u8]) -> Result<MessageHeader, CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            need: HEADER_LEN,
            got: data.len(),
        });
    }

    Ok(MessageHeader {
        message_type: MessageType::try_from(data[0])?,
        version: data[1],
        length: read_u16(data, 2),
        sequence: read_u32(data, 4),
    })
}

/// Decode an incremental update (header included)
pub fn decode_incremental(data: &[u8]) -> Result<IncrementalMsg, CodecError> {
    let header = decode_header(data)?;
    let need = HEADER_LEN + INCREMENTAL_BODY_LEN;
    if data.len() < need {
        return Err(CodecError::Truncated {
            need,
            got: data.len(),
        });
    }

    let side = data[HEADER_LEN + 20];
    if side > 1 {
        return Err(CodecError::UnknownSide(side));
    }

    Ok(IncrementalMsg {
        header,
        symbol: Symbol::new(read_u32(data, HEADER_LEN)),
        price: read_px(data, HEADER_LEN + 4)?,
        quantity: Qty::from_u64(read_u64(data, HEADER_LEN + 12)),
        side,
        exchange_ts: read_u64(data, HEADER_LEN + 21),
    })
}

/// Decode a snapshot (header included)
pub fn decode_snapshot(data: &[u8]) -> Result<SnapshotMsg, CodecError> {
    let header = decode_header(data)?;
    let fixed = HEADER_LEN + SNAPSHOT_FIXED_BODY_LEN;
    if data.len() < fixed {
        return Err(CodecError::Truncated {
            need: fixed,
            got: data.len(),
        });
    }

    let level_count = read_u32(data, HEADER_LEN + 4) as usize;
    let need = level_count
        .checked_mul(SNAPSHOT_LEVEL_LEN)
        .and_then(|bytes| bytes.checked_add(fixed))
        .ok_or(CodecError::ValueOutOfRange)?;
    if data.len() < need {
        return Err(CodecError::Truncated {
            need,
            got: data.len(),
        });
    }

    let mut levels = Vec::with_capacity(level_count);
    for i in 0..level_count {
        let at = fixed + i * SNAPSHOT_LEVEL_LEN;
        levels.push((read_px(data, at)?, Qty::from_u64(read_u64(data, at + 8))));
    }

    Ok(SnapshotMsg {
        header,
        symbol: Symbol::new(read_u32(data, HEADER_LEN)),
        exchange_ts: read_u64(data, HEADER_LEN + 8),
        levels,
    })
}

fn push_header(out: &mut Vec<u8>, message_type: MessageType, length: u16, sequence: u32) {
    out.push(message_type as u8);
    out.push(WIRE_VERSION);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
}

/// Encode an incremental level update
#[must_use]
pub fn encode_incremental(
    sequence: u32,
    symbol: Symbol,
    price: Px,
    quantity: Qty,
    side: u8,
    exchange_ts: u64,
) -> Vec<u8> {
    let total = HEADER_LEN + INCREMENTAL_BODY_LEN;
    let mut out = Vec::with_capacity(total);
    push_header(
        &mut out,
        MessageType::MarketDataIncremental,
        total as u16,
        sequence,
    );
    out.extend_from_slice(&symbol.id().to_le_bytes());
    out.extend_from_slice(&(price.as_i64() as u64).to_le_bytes());
    out.extend_from_slice(&quantity.as_u64().to_le_bytes());
    out.push(side);
    out.extend_from_slice(&exchange_ts.to_le_bytes());
    out
}

/// Encode a book snapshot
#[must_use]
pub fn encode_snapshot(
    sequence: u32,
    symbol: Symbol,
    exchange_ts: u64,
    levels: &[(Px, Qty)],
) -> Vec<u8> {
    let total = HEADER_LEN + SNAPSHOT_FIXED_BODY_LEN + levels.len() * SNAPSHOT_LEVEL_LEN;
    let mut out = Vec::with_capacity(total);
    push_header(
        &mut out,
        MessageType::MarketDataSnapshot,
        total.min(u16::MAX as usize) as u16,
        sequence,
    );
    out.extend_from_slice(&symbol.id().to_le_bytes());
    out.extend_from_slice(&(levels.len() as u32).to_le_bytes());
    out.extend_from_slice(&exchange_ts.to_le_bytes());
    for (price, qty) in levels {
        out.extend_from_slice(&(price.as_i64() as u64).to_le_bytes());
        out.extend_from_slice(&qty.as_u64().to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_roundtrip() {
        let bytes = encode_incremental(
            42,
            Symbol::new(7),
            Px::from_i64(10_050_000_000),
            Qty::from_u64(1_500),
            0,
            123_456,
        );
        assert_eq!(bytes.len(), HEADER_LEN + INCREMENTAL_BODY_LEN);

        let msg = decode_incremental(&bytes).expect("decode");
        assert_eq!(msg.header.message_type, MessageType::MarketDataIncremental);
        assert_eq!(msg.header.sequence, 42);
        assert_eq!(msg.symbol, Symbol::new(7));
        assert_eq!(msg.price, Px::from_i64(10_050_000_000));
        assert_eq!(msg.quantity.as_u64(), 1_500);
        assert_eq!(msg.side, 0);
        assert_eq!(msg.exchange_ts, 123_456);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let levels = vec![
            (Px::from_i64(100), Qty::from_u64(10)),
            (Px::from_i64(99), Qty::from_u64(20)),
        ];
        let bytes = encode_snapshot(9, Symbol::new(3), 777, &levels);
        let msg = decode_snapshot(&bytes).expect("decode");
        assert_eq!(msg.symbol, Symbol::new(3));
        assert_eq!(msg.exchange_ts, 777);
        assert_eq!(msg.levels, levels);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let err = decode_header(&[1, 1, 0]).unwrap_err();
        assert_eq!(err, CodecError::Truncated { need: 8, got: 3 });
    }

    #[test]
    fn test_truncated_body_rejected() {
        let mut bytes = encode_incremental(1, Symbol::new(1), Px::from_i64(1), Qty::ZERO, 1, 0);
        bytes.truncate(HEADER_LEN + 4);
        assert!(matches!(
            decode_incremental(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let bytes = [99u8, 1, 8, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_header(&bytes).unwrap_err(),
            CodecError::UnknownMessageType(99)
        );
    }

    #[test]
    fn test_unknown_side_rejected() {
        let bytes = encode_incremental(1, Symbol::new(1), Px::from_i64(1), Qty::ZERO, 9, 0);
        assert_eq!(
            decode_incremental(&bytes).unwrap_err(),
            CodecError::UnknownSide(9)
        );
    }
}
