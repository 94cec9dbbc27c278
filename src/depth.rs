//! NFCAST differential decompression.
//!
//! The compressed region is the only big-endian part of a datagram. Every
//! field in it is a signed 16-bit differential against a running base:
//! the last traded price for rate-like fields, the last traded quantity
//! for quantity-like fields. Three sentinel values steer the decode:
//!
//! - `32767`: the next four bytes carry the absolute value, which also
//!   replaces the base for subsequent cascades at that position
//! - `32766`: end of the bid side
//! - `-32766`: end of the ask side
//!
//! Depth levels cascade: level 1 decodes against `(ltp, ltq, ltq, ltq)`,
//! each later level against the four values decoded at the level before.
use tracing::debug;

use crate::packet::RawRecord;

/// Next four bytes carry the absolute value.
pub const ESCAPE_FULL_VALUE: i16 = 32767;
/// End of the bid side.
pub const END_OF_BID: i16 = 32766;
/// End of the ask side.
pub const END_OF_ASK: i16 = -32766;
/// Book depth carried by the feed.
pub const MAX_DEPTH: usize = 5;

/// One reconstructed depth level, still paise-scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthLevel {
    pub price_paise: i64,
    pub quantity: i64,
    pub order_count: i64,
}

/// A fully reconstructed market picture for one instrument, paise-scaled.
/// `close` is the last traded price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthRecord {
    pub token: u32,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub prev_close: i64,
    pub volume: i64,
    pub num_trades: u32,
    pub bid_levels: Vec<DepthLevel>,
    pub ask_levels: Vec<DepthLevel>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DepthStats {
    pub records: u64,
    pub passthrough: u64,
    pub fields: u64,
    pub escapes: u64,
    pub levels: u64,
    pub overruns: u64,
}

/// Outcome of one differential read.
enum Diff {
    /// Resolved value (base + differential, or an escaped absolute).
    Value(i64),
    /// A side terminator was consumed instead of a value.
    Terminator(i16),
}

/// Bounded big-endian reader over one record's compressed region.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Cursor<'a> {
    fn read_i16(&mut self) -> Option<i16> {
        if self.pos + 2 > self.end {
            return None;
        }
        let value = i16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Some(value)
    }

    fn read_i32(&mut self) -> Option<i32> {
        if self.pos + 4 > self.end {
            return None;
        }
        let value = i32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Some(value)
    }
}

pub struct Decompressor {
    stats: DepthStats,
}

impl Decompressor {
    pub fn new() -> Self {
        Decompressor {
            stats: DepthStats::default(),
        }
    }

    /// Reconstruct a [`DepthRecord`] from a raw record.
    ///
    /// For the uncompressed variant the decoder's OHLC hints are final and
    /// the depth lists are empty. For the compressed variant the scalar
    /// fields and both book sides are decoded from the record's compressed
    /// region. Returns `None` when decoding runs past the record boundary;
    /// that drops this record only.
    pub fn decompress(&mut self, datagram: &[u8], record: &RawRecord) -> Option<DepthRecord> {
        if !record.compressed {
            self.stats.records += 1;
            self.stats.passthrough += 1;
            return Some(DepthRecord {
                token: record.token,
                open: record.open_hint as i64,
                high: record.high_hint as i64,
                low: record.low_hint as i64,
                close: record.ltp as i64,
                prev_close: record.prev_close as i64,
                volume: record.volume as i64,
                num_trades: record.num_trades,
                bid_levels: Vec::new(),
                ask_levels: Vec::new(),
            });
        }

        let mut cursor = Cursor {
            buf: datagram,
            pos: record.cursor,
            end: record.end.min(datagram.len()),
        };
        match self.decode_compressed(&mut cursor, record) {
            Some(decoded) => {
                self.stats.records += 1;
                Some(decoded)
            }
            None => {
                self.stats.overruns += 1;
                debug!(token = record.token, pos = cursor.pos, "compressed region overrun");
                None
            }
        }
    }

    pub fn stats(&self) -> &DepthStats {
        &self.stats
    }

    fn decode_compressed(
        &mut self,
        cursor: &mut Cursor,
        record: &RawRecord,
    ) -> Option<DepthRecord> {
        let base_rate = record.ltp as i64;
        let base_qty = record.ltq as i64;

        let open = self.scalar(cursor, base_rate)?;
        let prev_close = self.scalar(cursor, base_rate)?;
        let high = self.scalar(cursor, base_rate)?;
        let low = self.scalar(cursor, base_rate)?;
        let _reserved = self.scalar(cursor, base_rate)?;
        let _indicative_eq_price = self.scalar(cursor, base_rate)?;
        let _indicative_eq_qty = self.scalar(cursor, base_qty)?;
        let _total_bid_qty = self.scalar(cursor, base_qty)?;
        let _total_offer_qty = self.scalar(cursor, base_qty)?;
        let _lower_circuit = self.scalar(cursor, base_rate)?;
        let _upper_circuit = self.scalar(cursor, base_rate)?;
        let _weighted_average = self.scalar(cursor, base_rate)?;

        let bid_levels = self.decode_side(cursor, base_rate, base_qty)?;
        let ask_levels = self.decode_side(cursor, base_rate, base_qty)?;

        Some(DepthRecord {
            token: record.token,
            open,
            high,
            low,
            close: base_rate,
            prev_close,
            volume: record.volume as i64,
            num_trades: record.num_trades,
            bid_levels,
            ask_levels,
        })
    }

    /// One scalar field. A terminator in scalar position leaves the field
    /// at its base value; the bytes are consumed either way.
    fn scalar(&mut self, cursor: &mut Cursor, base: i64) -> Option<i64> {
        match self.diff(cursor, base)? {
            Diff::Value(value) => Some(value),
            Diff::Terminator(_) => Some(base),
        }
    }

    fn diff(&mut self, cursor: &mut Cursor, base: i64) -> Option<Diff> {
        let differential = cursor.read_i16()?;
        match differential {
            ESCAPE_FULL_VALUE => {
                let absolute = cursor.read_i32()?;
                self.stats.escapes += 1;
                Some(Diff::Value(absolute as i64))
            }
            END_OF_BID | END_OF_ASK => Some(Diff::Terminator(differential)),
            _ => {
                self.stats.fields += 1;
                Some(Diff::Value(base + differential as i64))
            }
        }
    }

    /// Decode up to [`MAX_DEPTH`] levels of one book side. A terminator at
    /// any of the four positions ends the side; no partial level is
    /// emitted. The cascade carries (rate, qty, orders, implied) forward
    /// as the next level's bases.
    fn decode_side(
        &mut self,
        cursor: &mut Cursor,
        base_rate: i64,
        base_qty: i64,
    ) -> Option<Vec<DepthLevel>> {
        let mut levels = Vec::new();
        let mut bases = (base_rate, base_qty, base_qty, base_qty);
        for _ in 0..MAX_DEPTH {
            let rate = match self.diff(cursor, bases.0)? {
                Diff::Value(value) => value,
                Diff::Terminator(_) => return Some(levels),
            };
            let qty = match self.diff(cursor, bases.1)? {
                Diff::Value(value) => value,
                Diff::Terminator(_) => return Some(levels),
            };
            let orders = match self.diff(cursor, bases.2)? {
                Diff::Value(value) => value,
                Diff::Terminator(_) => return Some(levels),
            };
            let implied = match self.diff(cursor, bases.3)? {
                Diff::Value(value) => value,
                Diff::Terminator(_) => return Some(levels),
            };
            levels.push(DepthLevel {
                price_paise: rate,
                quantity: qty,
                order_count: orders,
            });
            self.stats.levels += 1;
            bases = (rate, qty, orders, implied);
        }
        Some(levels)
    }
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new()
    }
}
