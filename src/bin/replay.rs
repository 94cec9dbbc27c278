//! Replay captured NFCAST datagrams through the live pipeline.
//!
//! Reads the `.bin` files spooled by the reader (a single file or a whole
//! capture directory, in name order) and runs each datagram through
//! decode → decompress → normalize, writing the same daily JSON/CSV
//! outputs, or printing quotes to stdout with `--dry-run`.
use anyhow::{bail, Context, Result};
use bse_nfcast::config::Config;
use bse_nfcast::depth::Decompressor;
use bse_nfcast::master::ContractMaster;
use bse_nfcast::packet::Decoder;
use bse_nfcast::quote::Normalizer;
use bse_nfcast::sink::QuoteSink;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Replay captured NFCAST datagrams through the pipeline")]
struct Args {
    /// A captured .bin datagram file, or a directory of them
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Path to the JSON configuration file (contract master + outputs)
    #[arg(long, env = "NFCAST_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Print quotes as JSON lines instead of writing the sinks
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn capture_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(input)
        .with_context(|| format!("reading capture directory {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map(|ext| ext == "bin").unwrap_or(false))
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("no .bin datagrams under {}", input.display());
    }
    Ok(files)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let config = Config::load(&args.config)?;
    let master = ContractMaster::load(&config.token_file)?;
    let files = capture_files(&args.input)?;

    let mut decoder = Decoder::new(config.accept_legacy);
    let mut decompressor = Decompressor::new();
    let mut normalizer = Normalizer::new(&master);
    let mut sink = QuoteSink::new(&config.output_json, &config.output_csv);

    let mut quotes = 0u64;
    for path in &files {
        let datagram = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let decoded = match decoder.decode(&datagram) {
            Ok(decoded) => decoded,
            Err(reason) => {
                debug!(?reason, path = %path.display(), "datagram dropped");
                continue;
            }
        };
        for record in decoded.records.iter().filter(|record| !record.empty) {
            let Some(depth) = decompressor.decompress(&datagram, record) else {
                continue;
            };
            let Some(quote) = normalizer.normalize(&decoded.header, &depth) else {
                continue;
            };
            quotes += 1;
            if args.dry_run {
                println!("{}", serde_json::to_string(&quote)?);
            } else {
                sink.save(&quote);
            }
        }
    }
    sink.flush();

    eprintln!(
        "Replayed {} datagrams: {} quotes, {} decode drops, {} overruns.",
        files.len(),
        quotes,
        decoder.stats().datagrams - decoder.stats().headers_accepted,
        decompressor.stats().overruns
    );
    Ok(())
}
