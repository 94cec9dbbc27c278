use anyhow::{Context, Result};
use bse_nfcast::capture::CaptureStore;
use bse_nfcast::config::{Config, LogLevel};
use bse_nfcast::depth::Decompressor;
use bse_nfcast::master::ContractMaster;
use bse_nfcast::packet::Decoder;
use bse_nfcast::quote::Normalizer;
use bse_nfcast::receiver::FeedReceiver;
use bse_nfcast::sink::QuoteSink;
use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "BSE Direct NFCAST multicast reader")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "NFCAST_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Stop after this many datagrams (testing aid)
    #[arg(long)]
    max_datagrams: Option<u64>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Datagrams between progress log lines.
const PROGRESS_EVERY: u64 = 1000;

struct Pipeline<'a> {
    decoder: Decoder,
    decompressor: Decompressor,
    normalizer: Normalizer<'a>,
    sink: QuoteSink,
    capture: CaptureStore,
}

impl<'a> Pipeline<'a> {
    fn new(config: &Config, master: &'a ContractMaster) -> Self {
        Pipeline {
            decoder: Decoder::new(config.accept_legacy),
            decompressor: Decompressor::new(),
            normalizer: Normalizer::new(master),
            sink: QuoteSink::new(&config.output_json, &config.output_csv),
            capture: CaptureStore::new(config.raw_packets_dir.clone(), config.store_limit),
        }
    }

    fn process(&mut self, datagram: &[u8], source: SocketAddr) {
        let decoded = match self.decoder.decode(datagram) {
            Ok(decoded) => decoded,
            Err(reason) => {
                debug!(?reason, len = datagram.len(), "datagram dropped");
                return;
            }
        };

        let tokens: Vec<u32> = decoded
            .records
            .iter()
            .filter(|record| !record.empty)
            .map(|record| record.token)
            .collect();
        self.capture
            .store(datagram, decoded.header.message_type, &tokens, source);

        for record in decoded.records.iter().filter(|record| !record.empty) {
            let Some(depth) = self.decompressor.decompress(datagram, record) else {
                continue;
            };
            let Some(quote) = self.normalizer.normalize(&decoded.header, &depth) else {
                continue;
            };
            self.sink.save(&quote);
        }

        let seen = self.decoder.stats().datagrams;
        if seen % PROGRESS_EVERY == 0 {
            info!(
                datagrams = seen,
                quotes = self.normalizer.stats().quotes,
                "progress"
            );
        }
    }

    /// Flush the sinks and log the final statistics snapshot.
    fn finish(&mut self) {
        self.sink.flush();
        let decoder = self.decoder.stats();
        info!(
            datagrams = decoder.datagrams,
            headers_accepted = decoder.headers_accepted,
            live_records = decoder.live_records,
            empty_records = decoder.empty_records,
            bad_leading_bytes = decoder.bad_leading_bytes,
            unknown_format = decoder.unknown_format,
            length_mismatch = decoder.length_mismatch,
            unsupported_type = decoder.unsupported_type,
            too_short = decoder.too_short,
            bad_timestamps = decoder.bad_timestamps,
            "decoder totals"
        );
        let depth = self.decompressor.stats();
        info!(
            records = depth.records,
            passthrough = depth.passthrough,
            fields = depth.fields,
            escapes = depth.escapes,
            levels = depth.levels,
            overruns = depth.overruns,
            "decompressor totals"
        );
        let normalizer = self.normalizer.stats();
        info!(
            quotes = normalizer.quotes,
            unknown_tokens = normalizer.unknown_tokens,
            dropped_invalid = normalizer.dropped_invalid,
            levels_dropped = normalizer.levels_dropped,
            "normalizer totals"
        );
        let sink = self.sink.stats();
        info!(
            json_rows = sink.json_rows,
            csv_rows = sink.csv_rows,
            write_errors = sink.write_errors,
            rotations = sink.rotations,
            "sink totals"
        );
        info!(
            stored = self.capture.stored(),
            errors = self.capture.errors(),
            "capture totals"
        );
    }
}

fn init_tracing(level: &LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

fn run(receiver: &mut FeedReceiver, pipeline: &mut Pipeline, max_datagrams: Option<u64>) -> Result<()> {
    while !SHUTDOWN.load(Ordering::SeqCst) {
        if let Some(max) = max_datagrams {
            if pipeline.decoder.stats().datagrams >= max {
                info!(max, "datagram limit reached");
                break;
            }
        }
        match receiver.next_datagram() {
            Ok(Some((datagram, source))) => pipeline.process(&datagram, source),
            Ok(None) => debug!("no datagram within timeout"),
            Err(err) => {
                error!(error = %err, "socket receive failed");
                return Err(err).context("receiving from multicast socket");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let _ = dotenv();
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    init_tracing(&config.logging_level);

    let master = ContractMaster::load(&config.token_file)?;
    ctrlc::set_handler(|| {
        SHUTDOWN.store(true, Ordering::SeqCst);
    })
    .context("installing shutdown handler")?;

    let mut receiver = FeedReceiver::join(
        &config.multicast,
        config.buffer_size,
        Duration::from_secs(config.timeout.max(1)),
    )?;
    let mut pipeline = Pipeline::new(&config, &master);
    info!(
        group = %config.multicast.ip,
        port = config.multicast.port,
        tokens = master.len(),
        "reader started"
    );

    let outcome = run(&mut receiver, &mut pipeline, args.max_datagrams);

    // Release in reverse order: sinks first, then the socket membership.
    pipeline.finish();
    receiver.leave();
    info!("reader stopped");
    outcome
}
