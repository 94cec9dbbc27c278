//! Quote normalization: join depth records with the contract master,
//! scale paise to rupees, and stamp the header time onto the system date.
//!
//! Unknown tokens are not dropped; they surface with the `UNKNOWN` symbol
//! so downstream consumers still see the token. Records failing the hard
//! validation (`ltp > 0`, `volume >= 0`) are dropped and counted.
use serde::Serialize;
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::warn;

use crate::depth::DepthRecord;
use crate::master::{Contract, ContractMaster};
use crate::packet::PacketHeader;

pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// One depth level, rupee-scaled and persistence-ready.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuoteLevel {
    pub price: f64,
    pub qty: u64,
    pub orders: u32,
}

/// A normalized quote, ready for the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub token: u32,
    pub symbol: String,
    /// Display name, e.g. `SENSEX27NOV2025_84100CE` or
    /// `SENSEX27NOV2025_FUT`; empty for unknown tokens.
    pub symbol_name: String,
    pub expiry: String,
    pub option_type: String,
    pub strike: f64,
    /// `YYYY-MM-DD HH:MM:SS.mmm`.
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ltp: f64,
    pub volume: u64,
    pub prev_close: f64,
    pub bid_levels: Vec<QuoteLevel>,
    pub ask_levels: Vec<QuoteLevel>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizerStats {
    pub quotes: u64,
    pub unknown_tokens: u64,
    pub dropped_invalid: u64,
    pub levels_dropped: u64,
}

pub struct Normalizer<'a> {
    master: &'a ContractMaster,
    warned_unknown: HashSet<u32>,
    stats: NormalizerStats,
}

impl<'a> Normalizer<'a> {
    pub fn new(master: &'a ContractMaster) -> Self {
        Normalizer {
            master,
            warned_unknown: HashSet::new(),
            stats: NormalizerStats::default(),
        }
    }

    /// Normalize one depth record against the current system clock.
    pub fn normalize(&mut self, header: &PacketHeader, record: &DepthRecord) -> Option<Quote> {
        self.normalize_at(header, record, crate::now_local())
    }

    /// Normalize against an explicit clock reading. The date and the
    /// truncated millisecond come from `now`; hours, minutes and seconds
    /// come from the header unless its time triple was out of range.
    pub fn normalize_at(
        &mut self,
        header: &PacketHeader,
        record: &DepthRecord,
        now: OffsetDateTime,
    ) -> Option<Quote> {
        if record.close <= 0 || record.volume < 0 {
            self.stats.dropped_invalid += 1;
            return None;
        }

        let (symbol, symbol_name, expiry, option_type, strike) =
            match self.master.get(record.token) {
                Some(contract) => (
                    contract.symbol.clone(),
                    format_symbol_name(contract),
                    contract.expiry.clone(),
                    contract.option_type.clone(),
                    contract.strike,
                ),
                None => {
                    self.stats.unknown_tokens += 1;
                    if self.warned_unknown.insert(record.token) {
                        warn!(token = record.token, "token missing from contract master");
                    }
                    (UNKNOWN_SYMBOL.to_string(), String::new(), String::new(), String::new(), 0.0)
                }
            };

        let quote = Quote {
            token: record.token,
            symbol,
            symbol_name,
            expiry,
            option_type,
            strike,
            timestamp: format_timestamp(header, now),
            open: paise_to_rupees(record.open),
            high: paise_to_rupees(record.high),
            low: paise_to_rupees(record.low),
            close: paise_to_rupees(record.close),
            ltp: paise_to_rupees(record.close),
            volume: record.volume as u64,
            prev_close: paise_to_rupees(record.prev_close),
            bid_levels: self.convert_levels(&record.bid_levels),
            ask_levels: self.convert_levels(&record.ask_levels),
        };
        self.stats.quotes += 1;
        Some(quote)
    }

    pub fn stats(&self) -> &NormalizerStats {
        &self.stats
    }

    /// Depth levels with a non-positive price are silently dropped from
    /// their side; negative quantities and order counts clamp to zero.
    fn convert_levels(&mut self, levels: &[crate::depth::DepthLevel]) -> Vec<QuoteLevel> {
        let mut out = Vec::with_capacity(levels.len());
        for level in levels {
            if level.price_paise <= 0 {
                self.stats.levels_dropped += 1;
                continue;
            }
            out.push(QuoteLevel {
                price: paise_to_rupees(level.price_paise),
                qty: level.quantity.max(0) as u64,
                orders: level.order_count.max(0) as u32,
            });
        }
        out
    }
}

pub fn paise_to_rupees(paise: i64) -> f64 {
    paise as f64 / 100.0
}

fn format_symbol_name(contract: &Contract) -> String {
    let expiry = compact_expiry(&contract.expiry);
    if contract.option_type.is_empty() {
        format!("{}{}_FUT", contract.symbol, expiry)
    } else {
        format!(
            "{}{}_{}{}",
            contract.symbol,
            expiry,
            format_strike(contract.strike),
            contract.option_type
        )
    }
}

/// `27-NOV-2025` → `27NOV2025`.
fn compact_expiry(expiry: &str) -> String {
    expiry.replace('-', "").to_uppercase()
}

fn format_strike(strike: f64) -> String {
    if strike.fract() == 0.0 {
        format!("{}", strike as i64)
    } else {
        format!("{strike}")
    }
}

/// Milliseconds are truncated, never rounded up into the next second.
fn format_timestamp(header: &PacketHeader, now: OffsetDateTime) -> String {
    let date = now.date();
    let (hour, minute, second) = match header.wall_time {
        Some(wall) => (wall.hour as u8, wall.minute as u8, wall.second as u8),
        None => (now.hour(), now.minute(), now.second()),
    };
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        date.year(),
        u8::from(date.month()),
        date.day(),
        hour,
        minute,
        second,
        now.millisecond()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::DepthLevel;
    use crate::packet::WallTime;
    use std::collections::HashMap;
    use time::macros::datetime;

    fn master_with(entries: &[(u32, &str, &str, &str, f64)]) -> ContractMaster {
        let mut raw = HashMap::new();
        for (token, symbol, expiry, option_type, strike) in entries {
            raw.insert(
                token.to_string(),
                Contract {
                    symbol: symbol.to_string(),
                    expiry: expiry.to_string(),
                    option_type: option_type.to_string(),
                    strike: *strike,
                    instrument_type: String::new(),
                },
            );
        }
        ContractMaster::from_string_keys(raw)
    }

    fn header_at(hour: u16, minute: u16, second: u16) -> PacketHeader {
        PacketHeader {
            format_id: 564,
            message_type: 2020,
            wall_time: Some(WallTime { hour, minute, second }),
            packet_len: 564,
        }
    }

    fn record(token: u32, close: i64, volume: i64) -> DepthRecord {
        DepthRecord {
            token,
            open: close,
            high: close,
            low: close,
            close,
            prev_close: close,
            volume,
            num_trades: 1,
            bid_levels: Vec::new(),
            ask_levels: Vec::new(),
        }
    }

    #[test]
    fn option_symbol_name_and_scaling() {
        let master = master_with(&[(873870, "SENSEX", "27-NOV-2025", "CE", 84100.0)]);
        let mut normalizer = Normalizer::new(&master);
        let quote = normalizer
            .normalize_at(
                &header_at(10, 15, 30),
                &record(873870, 120775, 480),
                datetime!(2025-11-27 09:00:00.123 UTC),
            )
            .unwrap();
        assert_eq!(quote.symbol, "SENSEX");
        assert_eq!(quote.symbol_name, "SENSEX27NOV2025_84100CE");
        assert_eq!(quote.ltp, 1207.75);
        assert_eq!(quote.close, 1207.75);
        assert_eq!(quote.volume, 480);
        assert_eq!(quote.timestamp, "2025-11-27 10:15:30.123");
    }

    #[test]
    fn futures_symbol_name_has_fut_suffix() {
        let master = master_with(&[(861384, "SENSEX", "27-NOV-2025", "", 0.0)]);
        let mut normalizer = Normalizer::new(&master);
        let quote = normalizer
            .normalize_at(
                &header_at(9, 30, 0),
                &record(861384, 83571, 120),
                datetime!(2025-11-27 09:30:00.0 UTC),
            )
            .unwrap();
        assert_eq!(quote.symbol_name, "SENSEX27NOV2025_FUT");
        assert_eq!(quote.option_type, "");
    }

    #[test]
    fn unknown_token_still_emits_a_quote() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        let quote = normalizer
            .normalize_at(
                &header_at(11, 0, 0),
                &record(999999, 5000, 0),
                datetime!(2025-11-27 11:00:00.0 UTC),
            )
            .unwrap();
        assert_eq!(quote.symbol, UNKNOWN_SYMBOL);
        assert_eq!(quote.symbol_name, "");
        assert_eq!(normalizer.stats().unknown_tokens, 1);
    }

    #[test]
    fn non_positive_ltp_is_dropped() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        assert!(normalizer
            .normalize_at(
                &header_at(11, 0, 0),
                &record(1234, 0, 10),
                datetime!(2025-11-27 11:00:00.0 UTC),
            )
            .is_none());
        assert_eq!(normalizer.stats().dropped_invalid, 1);
        assert_eq!(normalizer.stats().quotes, 0);
    }

    #[test]
    fn negative_volume_is_dropped() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        assert!(normalizer
            .normalize_at(
                &header_at(11, 0, 0),
                &record(1234, 5000, -1),
                datetime!(2025-11-27 11:00:00.0 UTC),
            )
            .is_none());
        assert_eq!(normalizer.stats().dropped_invalid, 1);
    }

    #[test]
    fn non_positive_price_levels_are_dropped_from_their_side() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        let mut rec = record(1234, 10000, 5);
        rec.bid_levels = vec![
            DepthLevel { price_paise: 10000, quantity: 3, order_count: 1 },
            DepthLevel { price_paise: 0, quantity: 4, order_count: 2 },
        ];
        rec.ask_levels = vec![DepthLevel { price_paise: 10100, quantity: -2, order_count: 1 }];
        let quote = normalizer
            .normalize_at(
                &header_at(11, 0, 0),
                &rec,
                datetime!(2025-11-27 11:00:00.0 UTC),
            )
            .unwrap();
        assert_eq!(quote.bid_levels.len(), 1);
        assert_eq!(quote.bid_levels[0].price, 100.0);
        // Negative quantity clamps rather than wrapping.
        assert_eq!(quote.ask_levels[0].qty, 0);
        assert_eq!(normalizer.stats().levels_dropped, 1);
    }

    #[test]
    fn end_of_day_timestamp_keeps_truncated_milliseconds() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        let quote = normalizer
            .normalize_at(
                &header_at(23, 59, 59),
                &record(4242, 100, 0),
                datetime!(2025-11-27 01:02:03.9999 UTC),
            )
            .unwrap();
        assert_eq!(quote.timestamp, "2025-11-27 23:59:59.999");
    }

    #[test]
    fn wall_clock_fallback_uses_system_time_fields() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        let header = PacketHeader {
            format_id: 564,
            message_type: 2020,
            wall_time: None,
            packet_len: 564,
        };
        let quote = normalizer
            .normalize_at(
                &header,
                &record(4242, 100, 0),
                datetime!(2025-11-27 14:05:06.007 UTC),
            )
            .unwrap();
        assert_eq!(quote.timestamp, "2025-11-27 14:05:06.007");
    }

    #[test]
    fn unknown_token_warns_once() {
        let master = master_with(&[]);
        let mut normalizer = Normalizer::new(&master);
        for _ in 0..3 {
            normalizer.normalize_at(
                &header_at(10, 0, 0),
                &record(424242, 100, 0),
                datetime!(2025-11-27 10:00:00.0 UTC),
            );
        }
        assert_eq!(normalizer.stats().unknown_tokens, 3);
        assert_eq!(normalizer.warned_unknown.len(), 1);
    }
}
