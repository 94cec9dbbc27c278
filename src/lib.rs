//! BSE Direct NFCAST market-data reader library.
//!
//! This crate provides the stages of the `bse-nfcast` reader binary and the
//! `replay` tool:
//!
//! - `packet`: datagram header and record decoding (mixed-endian layout)
//! - `depth`: NFCAST differential decompression of OHLC and best-five depth
//! - `master`: contract-master loading and token lookup
//! - `quote`: quote normalization, symbol formation and validation
//! - `sink`: daily-rotated JSON-lines and CSV writers
//! - `receiver`: bounded-blocking multicast datagram source
//! - `capture`: raw datagram spooling for offline replay
//!
//! The binaries (`src/main.rs` and `src/bin/replay.rs`) wire these modules
//! into the receive → decode → decompress → normalize → save pipeline.
pub mod capture;
pub mod config;
pub mod depth;
pub mod master;
pub mod packet;
pub mod quote;
pub mod receiver;
pub mod sink;

use time::OffsetDateTime;

/// Current local time, falling back to UTC when the local offset cannot be
/// determined (the feed's exchange runs on IST; operators deploy with TZ set).
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
