//! Raw datagram spooling.
//!
//! The first `limit` datagrams of a session are stored verbatim as `.bin`
//! files next to a newline-delimited JSON metadata sidecar, enough to
//! replay a capture offline with the `replay` binary or to analyze layout
//! changes byte-by-byte.
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, error, warn};

const META_FILE: &str = "datagrams.json";

#[derive(Serialize)]
struct CaptureMeta<'a> {
    timestamp: String,
    msg_type: u16,
    packet_size: usize,
    tokens: &'a [u32],
    source: String,
    raw_file: &'a str,
}

pub struct CaptureStore {
    dir: PathBuf,
    limit: usize,
    stored: usize,
    seq: u64,
    errors: u64,
}

impl CaptureStore {
    /// A `limit` of 0 disables capture entirely.
    pub fn new(dir: PathBuf, limit: usize) -> Self {
        CaptureStore {
            dir,
            limit,
            stored: 0,
            seq: 0,
            errors: 0,
        }
    }

    /// Spool one datagram plus its metadata line. Storage failures are
    /// logged and counted; the pipeline does not care.
    pub fn store(&mut self, datagram: &[u8], msg_type: u16, tokens: &[u32], source: SocketAddr) {
        if self.limit == 0 {
            return;
        }
        if self.stored >= self.limit {
            if self.stored == self.limit {
                warn!(limit = self.limit, "capture limit reached, no longer storing datagrams");
                self.stored += 1;
            }
            return;
        }
        self.seq += 1;
        let name = format!("{:06}_type{}_packet.bin", self.seq, msg_type);
        if let Err(err) = self.write_files(datagram, msg_type, tokens, source, &name) {
            self.errors += 1;
            error!(error = %err, file = %name, "failed to store raw datagram");
            return;
        }
        self.stored += 1;
        debug!(file = %name, size = datagram.len(), "stored raw datagram");
    }

    pub fn stored(&self) -> usize {
        self.stored.min(self.limit)
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    fn write_files(
        &self,
        datagram: &[u8],
        msg_type: u16,
        tokens: &[u32],
        source: SocketAddr,
        name: &str,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(name), datagram)?;

        let now = crate::now_local();
        let meta = CaptureMeta {
            timestamp: format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                now.year(),
                u8::from(now.month()),
                now.day(),
                now.hour(),
                now.minute(),
                now.second()
            ),
            msg_type,
            packet_size: datagram.len(),
            tokens,
            source: source.to_string(),
            raw_file: name,
        };
        let mut meta_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(META_FILE))?;
        writeln!(meta_file, "{}", serde_json::to_string(&meta)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SocketAddr {
        "226.1.0.1:11401".parse().unwrap()
    }

    #[test]
    fn stores_up_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CaptureStore::new(dir.path().to_path_buf(), 2);
        for _ in 0..5 {
            store.store(&[0u8; 64], 2020, &[873870], source());
        }
        assert_eq!(store.stored(), 2);
        let bins = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().map(|x| x == "bin").unwrap_or(false)
            })
            .count();
        assert_eq!(bins, 2);

        let meta = fs::read_to_string(dir.path().join(META_FILE)).unwrap();
        assert_eq!(meta.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(meta.lines().next().unwrap()).unwrap();
        assert_eq!(first["msg_type"], 2020);
        assert_eq!(first["tokens"][0], 873870);
        assert_eq!(first["packet_size"], 64);
    }

    #[test]
    fn zero_limit_disables_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CaptureStore::new(dir.path().join("never"), 0);
        store.store(&[0u8; 64], 2020, &[], source());
        assert_eq!(store.stored(), 0);
        assert!(!dir.path().join("never").exists());
    }
}
