//! Datagram decoding for the BSE Direct NFCAST wire format.
//!
//! A datagram is a 36-byte header followed by fixed 264-byte record slots.
//! The header and the uncompressed record prefix are little-endian; only
//! the compressed region (handled in [`crate::depth`]) is big-endian. The
//! format ID doubles as the datagram length, so geometry is fully
//! determined by the header:
//!
//! - `0x0234` (564 bytes): canonical market picture, 2 record slots,
//!   OHLC carried uncompressed.
//! - `0x0124` (300 bytes): legacy variant, 1 record slot, OHLC and depth
//!   reconstructed differentially from the compressed region.
//!
//! Slots whose token is below [`MIN_REAL_TOKEN`] carry no instrument and
//! are flagged `empty` rather than dropped, so callers can count them.
use tracing::warn;

pub const HEADER_LEN: usize = 36;
pub const RECORD_STRIDE: usize = 264;
/// Canonical 564-byte market-picture format.
pub const FORMAT_CANONICAL: u16 = 0x0234;
/// Legacy 300-byte format, accepted only when configured.
pub const FORMAT_LEGACY: u16 = 0x0124;
/// Market picture, 4-byte instrument codes.
pub const MSG_MARKET_PICTURE: u16 = 2020;
/// Complex market picture, 8-byte instrument codes.
pub const MSG_MARKET_PICTURE_COMPLEX: u16 = 2021;
/// Tokens below this value mark unused record slots.
pub const MIN_REAL_TOKEN: u32 = 2;
/// Offset of the compressed region within a record slot (just past the
/// rate base).
pub const COMPRESSED_OFFSET: usize = 40;

/// Feed wall-clock time from the datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallTime {
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub format_id: u16,
    pub message_type: u16,
    /// `None` when the header carried an out-of-range triple; downstream
    /// stages then stamp quotes with the system clock.
    pub wall_time: Option<WallTime>,
    pub packet_len: usize,
}

/// One record slot, pre-decompression. Prices are in paise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub token: u32,
    pub prev_close: i32,
    pub open_hint: i32,
    pub high_hint: i32,
    pub low_hint: i32,
    pub num_trades: u32,
    pub volume: u32,
    /// Last traded quantity, the quantity base for differential decoding.
    pub ltq: u64,
    /// Last traded price, the rate base for differential decoding.
    pub ltp: i32,
    /// Absolute offset of this record's compressed region in the datagram.
    pub cursor: usize,
    /// Absolute offset one past this record's slot.
    pub end: usize,
    /// Whether OHLC/depth must be reconstructed from the compressed region.
    pub compressed: bool,
    /// Unused slot (token below the empty-slot threshold).
    pub empty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub header: PacketHeader,
    pub records: Vec<RawRecord>,
}

/// Why a datagram was rejected before record extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than the 36-byte header.
    TooShort,
    /// Bytes 0..4 were not all zero.
    BadLeadingBytes,
    /// Format ID is not one of the recognized values.
    UnknownFormat,
    /// Format ID does not equal the datagram length.
    LengthMismatch,
    /// Message type other than 2020/2021.
    UnsupportedType,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecoderStats {
    pub datagrams: u64,
    pub headers_accepted: u64,
    pub live_records: u64,
    pub empty_records: u64,
    pub too_short: u64,
    pub bad_leading_bytes: u64,
    pub unknown_format: u64,
    pub length_mismatch: u64,
    pub unsupported_type: u64,
    pub bad_timestamps: u64,
}

pub struct Decoder {
    accept_legacy: bool,
    min_token: u32,
    stats: DecoderStats,
}

impl Decoder {
    pub fn new(accept_legacy: bool) -> Self {
        Decoder {
            accept_legacy,
            min_token: MIN_REAL_TOKEN,
            stats: DecoderStats::default(),
        }
    }

    /// Raise the empty-slot threshold for captures where the sentinel
    /// range is wider than {0, 1}.
    pub fn with_min_token(mut self, min_token: u32) -> Self {
        self.min_token = min_token;
        self
    }

    /// Decode one datagram into a header plus its record slots.
    ///
    /// Rejection is a [`DropReason`], not an error: the datagram is
    /// counted and the caller moves on to the next receive.
    pub fn decode(&mut self, datagram: &[u8]) -> Result<DecodedPacket, DropReason> {
        self.stats.datagrams += 1;
        let header = match self.parse_header(datagram) {
            Ok(header) => header,
            Err(reason) => {
                self.count_drop(reason);
                return Err(reason);
            }
        };
        self.stats.headers_accepted += 1;

        let compressed = header.format_id != FORMAT_CANONICAL;
        let num_records = (header.packet_len - HEADER_LEN) / RECORD_STRIDE;
        let mut records = Vec::with_capacity(num_records);
        for slot in 0..num_records {
            let start = HEADER_LEN + slot * RECORD_STRIDE;
            let record = self.parse_record(datagram, start, compressed);
            if record.empty {
                self.stats.empty_records += 1;
            } else {
                self.stats.live_records += 1;
            }
            records.push(record);
        }
        Ok(DecodedPacket { header, records })
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    fn parse_header(&mut self, datagram: &[u8]) -> Result<PacketHeader, DropReason> {
        if datagram.len() < HEADER_LEN {
            return Err(DropReason::TooShort);
        }
        if datagram[..4] != [0u8; 4] {
            return Err(DropReason::BadLeadingBytes);
        }
        let format_id = le_u16(datagram, 4);
        let recognized = format_id == FORMAT_CANONICAL
            || (self.accept_legacy && format_id == FORMAT_LEGACY);
        if !recognized {
            return Err(DropReason::UnknownFormat);
        }
        if format_id as usize != datagram.len() {
            return Err(DropReason::LengthMismatch);
        }
        let message_type = le_u16(datagram, 8);
        if message_type != MSG_MARKET_PICTURE && message_type != MSG_MARKET_PICTURE_COMPLEX {
            return Err(DropReason::UnsupportedType);
        }
        let hour = le_u16(datagram, 20);
        let minute = le_u16(datagram, 22);
        let second = le_u16(datagram, 24);
        let wall_time = if hour < 24 && minute < 60 && second < 60 {
            Some(WallTime {
                hour,
                minute,
                second,
            })
        } else {
            self.stats.bad_timestamps += 1;
            warn!(hour, minute, second, "header time out of range, using wall clock");
            None
        };
        Ok(PacketHeader {
            format_id,
            message_type,
            wall_time,
            packet_len: datagram.len(),
        })
    }

    fn parse_record(&self, datagram: &[u8], start: usize, compressed: bool) -> RawRecord {
        let token = le_u32(datagram, start);
        RawRecord {
            token,
            prev_close: le_i32(datagram, start + 4),
            open_hint: le_i32(datagram, start + 8),
            high_hint: le_i32(datagram, start + 12),
            low_hint: le_i32(datagram, start + 16),
            num_trades: le_u32(datagram, start + 20),
            volume: le_u32(datagram, start + 24),
            ltq: le_u64(datagram, start + 28),
            ltp: le_i32(datagram, start + 36),
            cursor: start + COMPRESSED_OFFSET,
            end: start + RECORD_STRIDE,
            compressed,
            empty: token < self.min_token,
        }
    }

    fn count_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::TooShort => self.stats.too_short += 1,
            DropReason::BadLeadingBytes => self.stats.bad_leading_bytes += 1,
            DropReason::UnknownFormat => self.stats.unknown_format += 1,
            DropReason::LengthMismatch => self.stats.length_mismatch += 1,
            DropReason::UnsupportedType => self.stats.unsupported_type += 1,
        }
    }
}

fn le_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn le_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn le_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}
