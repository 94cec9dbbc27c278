//! Daily-rotated quote persistence: JSON lines and CSV.
//!
//! Two independent writers sit behind one `save` entry point. Files are
//! named `YYYYMMDD_quotes.json` / `YYYYMMDD_quotes.csv`, opened lazily in
//! append mode so a mid-day restart continues the same files, and rotated
//! when the date stamp no longer matches the open file. The CSV header is
//! written exactly once, at file creation.
//!
//! Output contract details:
//! - the CSV timestamp cell is the literal bytes `="YYYY-MM-DD
//!   HH:MM:SS.mmm"` so spreadsheets keep the text verbatim
//! - each non-empty depth list is one double-quoted comma-separated cell
//!
//! Both are byte-level requirements, so rows go through the `csv` writer
//! with quoting disabled and the cells carry their own quotes.
use anyhow::Result;
use csv::{QuoteStyle, WriterBuilder};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::Date;
use tracing::{error, info};

use crate::quote::{Quote, QuoteLevel};

pub const CSV_HEADER: [&str; 20] = [
    "token",
    "symbol",
    "symbol_name",
    "expiry",
    "option_type",
    "strike",
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "ltp",
    "volume",
    "prev_close",
    "bid_prices",
    "bid_qtys",
    "bid_orders",
    "ask_prices",
    "ask_qtys",
    "ask_orders",
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SinkStats {
    pub json_rows: u64,
    pub csv_rows: u64,
    pub write_errors: u64,
    pub rotations: u64,
}

/// One daily append file: `not_opened → open → rotated → open`.
struct DailyFile {
    dir: PathBuf,
    suffix: &'static str,
    current: Option<(String, BufWriter<File>)>,
}

impl DailyFile {
    fn new(dir: &Path, suffix: &'static str) -> Self {
        DailyFile {
            dir: dir.to_path_buf(),
            suffix,
            current: None,
        }
    }

    fn path_for(&self, stamp: &str) -> PathBuf {
        self.dir.join(format!("{stamp}{}", self.suffix))
    }

    /// Writer for the given date stamp, rotating if the date changed.
    /// The boolean is true when the file was newly created.
    fn writer(&mut self, stamp: &str) -> std::io::Result<(&mut BufWriter<File>, bool)> {
        let reuse = matches!(&self.current, Some((open_stamp, _)) if open_stamp == stamp);
        let mut created = false;
        if !reuse {
            // Flush yesterday before switching; errors surface on the
            // new writer path anyway.
            if let Some((_, mut old)) = self.current.take() {
                let _ = old.flush();
            }
            fs::create_dir_all(&self.dir)?;
            let path = self.path_for(stamp);
            created = !path.exists();
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!(path = %path.display(), created, "opened daily output file");
            self.current = Some((stamp.to_string(), BufWriter::new(file)));
        }
        match &mut self.current {
            Some((_, writer)) => Ok((writer, created)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "daily file not open",
            )),
        }
    }

    fn flush(&mut self) {
        if let Some((_, writer)) = &mut self.current {
            let _ = writer.flush();
        }
    }
}

pub struct QuoteSink {
    json: DailyFile,
    csv: DailyFile,
    stats: SinkStats,
}

impl QuoteSink {
    pub fn new(json_dir: &Path, csv_dir: &Path) -> Self {
        QuoteSink {
            json: DailyFile::new(json_dir, "_quotes.json"),
            csv: DailyFile::new(csv_dir, "_quotes.csv"),
            stats: SinkStats::default(),
        }
    }

    /// Persist one quote under today's date. Write failures are logged
    /// and counted; they never propagate to the receive loop.
    pub fn save(&mut self, quote: &Quote) {
        self.save_for_date(quote, crate::now_local().date());
    }

    /// Persist against an explicit date (rotation is keyed on it).
    pub fn save_for_date(&mut self, quote: &Quote, date: Date) {
        let stamp = date_stamp(date);
        // Both files rotate together; count the date change once.
        if let Some((open_stamp, _)) = &self.json.current {
            if *open_stamp != stamp {
                self.stats.rotations += 1;
            }
        }
        if let Err(err) = self.write_json(quote, &stamp) {
            self.stats.write_errors += 1;
            error!(error = %err, "json write failed");
        } else {
            self.stats.json_rows += 1;
        }
        if let Err(err) = self.write_csv(quote, &stamp) {
            self.stats.write_errors += 1;
            error!(error = %err, "csv write failed");
        } else {
            self.stats.csv_rows += 1;
        }
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    pub fn flush(&mut self) {
        self.json.flush();
        self.csv.flush();
    }

    fn write_json(&mut self, quote: &Quote, stamp: &str) -> Result<()> {
        let line = serde_json::to_string(quote)?;
        let (writer, _) = self.json.writer(stamp)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    fn write_csv(&mut self, quote: &Quote, stamp: &str) -> Result<()> {
        let (writer, created) = self.csv.writer(stamp)?;
        let mut rows = WriterBuilder::new()
            .quote_style(QuoteStyle::Never)
            .from_writer(&mut *writer);
        if created {
            rows.write_record(CSV_HEADER)?;
        }
        rows.write_record(csv_fields(quote))?;
        rows.flush()?;
        drop(rows);
        writer.flush()?;
        Ok(())
    }
}

fn date_stamp(date: Date) -> String {
    format!("{:04}{:02}{:02}", date.year(), u8::from(date.month()), date.day())
}

fn csv_fields(quote: &Quote) -> Vec<String> {
    vec![
        quote.token.to_string(),
        quote.symbol.clone(),
        quote.symbol_name.clone(),
        quote.expiry.clone(),
        quote.option_type.clone(),
        format_number(quote.strike),
        format!("=\"{}\"", quote.timestamp),
        format_number(quote.open),
        format_number(quote.high),
        format_number(quote.low),
        format_number(quote.close),
        format_number(quote.ltp),
        quote.volume.to_string(),
        format_number(quote.prev_close),
        depth_cell(&quote.bid_levels, |l| format_number(l.price)),
        depth_cell(&quote.bid_levels, |l| l.qty.to_string()),
        depth_cell(&quote.bid_levels, |l| l.orders.to_string()),
        depth_cell(&quote.ask_levels, |l| format_number(l.price)),
        depth_cell(&quote.ask_levels, |l| l.qty.to_string()),
        depth_cell(&quote.ask_levels, |l| l.orders.to_string()),
    ]
}

/// Comma-separated list wrapped in double quotes; empty cell if no depth.
fn depth_cell<F: Fn(&QuoteLevel) -> String>(levels: &[QuoteLevel], field: F) -> String {
    if levels.is_empty() {
        return String::new();
    }
    let joined = levels.iter().map(field).collect::<Vec<_>>().join(",");
    format!("\"{joined}\"")
}

fn format_number(value: f64) -> String {
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn sample_quote() -> Quote {
        Quote {
            token: 873870,
            symbol: "SENSEX".into(),
            symbol_name: "SENSEX27NOV2025_84100CE".into(),
            expiry: "27-NOV-2025".into(),
            option_type: "CE".into(),
            strike: 84100.0,
            timestamp: "2025-11-27 10:15:30.123".into(),
            open: 1200.0,
            high: 1215.0,
            low: 1185.0,
            close: 1207.75,
            ltp: 1207.75,
            volume: 480,
            prev_close: 1190.0,
            bid_levels: vec![
                QuoteLevel { price: 1207.5, qty: 25, orders: 5 },
                QuoteLevel { price: 1207.0, qty: 30, orders: 6 },
            ],
            ask_levels: Vec::new(),
        }
    }

    #[test]
    fn json_lines_append_one_object_per_quote() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = QuoteSink::new(dir.path(), dir.path());
        let quote = sample_quote();
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        sink.flush();

        let text = fs::read_to_string(dir.path().join("20251127_quotes.json")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["token"], 873870);
        assert_eq!(parsed["symbol_name"], "SENSEX27NOV2025_84100CE");
        assert_eq!(parsed["ltp"], 1207.75);
        assert_eq!(parsed["bid_levels"][0]["qty"], 25);
    }

    #[test]
    fn csv_header_written_once_and_cells_match_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = QuoteSink::new(dir.path(), dir.path());
        let quote = sample_quote();
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        sink.flush();

        let text = fs::read_to_string(dir.path().join("20251127_quotes.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("token,symbol,symbol_name,"));
        // Formula-wrapped timestamp, verbatim.
        assert!(lines[1].contains("=\"2025-11-27 10:15:30.123\""));
        // Flattened depth columns, quoted; empty ask cells stay empty.
        assert!(lines[1].contains("\"1207.5,1207\""));
        assert!(lines[1].contains("\"25,30\""));
        assert!(lines[1].contains("\"5,6\""));
        assert!(lines[1].ends_with(",,,"));
    }

    #[test]
    fn reopening_existing_file_appends_without_second_header() {
        let dir = tempfile::tempdir().unwrap();
        let quote = sample_quote();
        {
            let mut sink = QuoteSink::new(dir.path(), dir.path());
            sink.save_for_date(&quote, date!(2025 - 11 - 27));
            sink.flush();
        }
        // Process restart: a fresh sink must append, not truncate.
        let mut sink = QuoteSink::new(dir.path(), dir.path());
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        sink.flush();

        let text = fs::read_to_string(dir.path().join("20251127_quotes.csv")).unwrap();
        let header_count = text.lines().filter(|l| l.starts_with("token,")).count();
        assert_eq!(header_count, 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn date_change_rotates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = QuoteSink::new(dir.path(), dir.path());
        let quote = sample_quote();
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        sink.save_for_date(&quote, date!(2025 - 11 - 28));
        sink.flush();

        for stamp in ["20251127", "20251128"] {
            let csv = fs::read_to_string(dir.path().join(format!("{stamp}_quotes.csv"))).unwrap();
            assert_eq!(csv.lines().count(), 2, "{stamp} should have header + one row");
            assert!(dir.path().join(format!("{stamp}_quotes.json")).exists());
        }
    }

    #[test]
    fn stats_count_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = QuoteSink::new(dir.path(), dir.path());
        let quote = sample_quote();
        sink.save_for_date(&quote, date!(2025 - 11 - 27));
        assert_eq!(sink.stats().json_rows, 1);
        assert_eq!(sink.stats().csv_rows, 1);
        assert_eq!(sink.stats().write_errors, 0);
    }
}
