//! Dedup ledger: the on-disk set of already-processed media ids. Adds go
//! through a background writer thread that flushes periodically; reads hit
//! the in-memory set under a lock.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{error, warn};

const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("ledger blob is malformed: {0}")]
    Decode(#[from] bincode::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

enum WriterMessage {
    Add(String),
    Stop,
}

/// Process-wide set of processed ids, persisted as a zlib-compressed blob.
pub struct DedupLedger {
    path: PathBuf,
    entries: Arc<Mutex<HashSet<String>>>,
    sender: Sender<WriterMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DedupLedger {
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        let entries = Arc::new(Mutex::new(load_blob(&path)?));

        let (sender, receiver) = mpsc::channel::<WriterMessage>();
        let worker_entries = Arc::clone(&entries);
        let worker_path = path.clone();
        let worker = std::thread::Builder::new()
            .name("dedup-ledger".into())
            .spawn(move || {
                let mut dirty = false;
                loop {
                    match receiver.recv_timeout(FLUSH_INTERVAL) {
                        Ok(WriterMessage::Add(id)) => {
                            worker_entries.lock().expect("ledger poisoned").insert(id);
                            dirty = true;
                        }
                        Ok(WriterMessage::Stop) => {
                            let snapshot = worker_entries.lock().expect("ledger poisoned").clone();
                            if let Err(err) = store_blob(&worker_path, &snapshot) {
                                error!(error = %err, "final ledger flush failed");
                            }
                            return;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                    if dirty {
                        let snapshot = worker_entries.lock().expect("ledger poisoned").clone();
                        if let Err(err) = store_blob(&worker_path, &snapshot) {
                            warn!(error = %err, "periodic ledger flush failed");
                        } else {
                            dirty = false;
                        }
                    }
                }
            })
            .expect("failed to spawn ledger writer");

        Ok(Self {
            path,
            entries,
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn add(&self, id: &str) {
        if self.sender.send(WriterMessage::Add(id.to_string())).is_err() {
            // Writer already stopped; record synchronously so nothing is
            // lost on shutdown races.
            self.entries
                .lock()
                .expect("ledger poisoned")
                .insert(id.to_string());
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.entries.lock().expect("ledger poisoned").contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ledger poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the writer thread and flushes remaining entries to disk.
    pub fn flush_and_stop(&self) {
        let _ = self.sender.send(WriterMessage::Stop);
        if let Some(handle) = self.worker.lock().expect("ledger poisoned").take() {
            let _ = handle.join();
        }
        // Catch ids added after the writer drained its queue.
        let snapshot = self.entries.lock().expect("ledger poisoned").clone();
        if let Err(err) = store_blob(&self.path, &snapshot) {
            error!(error = %err, "ledger flush on stop failed");
        }
    }
}

impl Drop for DedupLedger {
    fn drop(&mut self) {
        self.flush_and_stop();
    }
}

fn load_blob(path: &Path) -> LedgerResult<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let compressed = std::fs::read(path).map_err(|source| LedgerError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    if compressed.is_empty() {
        return Ok(HashSet::new());
    }
    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut raw = Vec::new();
    if decoder.read_to_end(&mut raw).is_err() {
        warn!(path = %path.display(), "ledger blob unreadable, starting empty");
        return Ok(HashSet::new());
    }
    match bincode::deserialize(&raw) {
        Ok(set) => Ok(set),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ledger blob malformed, starting empty");
            Ok(HashSet::new())
        }
    }
}

fn store_blob(path: &Path, entries: &HashSet<String>) -> LedgerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    let raw = bincode::serialize(entries)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(|source| LedgerError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let compressed = encoder.finish().map_err(|source| LedgerError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, compressed).map_err(|source| LedgerError::Io {
        source,
        path: tmp.clone(),
    })?;
    std::fs::rename(&tmp, path).map_err(|source| LedgerError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_flush_reopen_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("download_info.bin");
        {
            let ledger = DedupLedger::open(&path).unwrap();
            ledger.add("media-1");
            ledger.add("media-2");
            ledger.flush_and_stop();
        }
        let reopened = DedupLedger::open(&path).unwrap();
        assert!(reopened.exists("media-1"));
        assert!(reopened.exists("media-2"));
        assert!(!reopened.exists("media-3"));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let ledger = DedupLedger::open(dir.path().join("absent.bin")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn corrupt_blob_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("download_info.bin");
        std::fs::write(&path, b"not a zlib blob").unwrap();
        let ledger = DedupLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
    }
}
