//! Image Cache - Durable Append Log
//!
//! Maps a source image path to the embeddable image produced from it, keyed
//! by the source's modification time in milliseconds. Lookups and stores are
//! served from memory; every store is also queued for a single writer thread
//! that appends it to a gzip-compressed log of JSON lines.
//!
//! # Log Format
//!
//! One record per line: `["<path>", "<mtime ms or empty>", "<image>"]`.
//! Runs append new gzip members to the same file. On open the whole log is
//! replayed and later records for a path replace earlier ones.
//!
//! # Durability
//!
//! The writer flushes the compressor after every record, so a crash loses at
//! most the record being written. A log whose last member was cut short is
//! still replayed up to the cut and then rewritten as one complete member.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::UNIX_EPOCH;

use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CACHE_QUEUE;
use crate::error::CardError;

/// Modification time of `path` in whole milliseconds, if readable.
pub fn source_timestamp(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    u64::try_from(millis).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub path: PathBuf,
    pub timestamp: Option<u64>,
    pub image: String,
}

impl CacheRecord {
    fn to_line(&self) -> Result<String, CardError> {
        let path = self.path.to_string_lossy();
        let timestamp = self.timestamp.map(|t| t.to_string()).unwrap_or_default();
        let fields: [&str; 3] = [&path, &timestamp, &self.image];
        Ok(serde_json::to_string(&fields)?)
    }

    /// `None` for anything that is not a three-field record.
    fn from_line(line: &str) -> Option<Self> {
        let fields: Vec<String> = serde_json::from_str(line).ok()?;
        let [path, timestamp, image]: [String; 3] = fields.try_into().ok()?;
        let timestamp = if timestamp.is_empty() {
            None
        } else {
            Some(timestamp.parse().ok()?)
        };
        Some(Self {
            path: PathBuf::from(path),
            timestamp,
            image,
        })
    }
}

/// What happened while replaying the log on open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub records: usize,
    pub skipped: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    timestamp: Option<u64>,
    image: String,
}

type EntryMap = HashMap<PathBuf, Entry>;

pub struct ImageCache {
    log_path: PathBuf,
    entries: RwLock<EntryMap>,
    sender: Mutex<Option<SyncSender<CacheRecord>>>,
    writer: Mutex<Option<JoinHandle<Result<usize, CardError>>>>,
    replay: ReplayStats,
}

impl ImageCache {
    pub fn open(log_path: &Path) -> Result<Self, CardError> {
        Self::open_with_queue(log_path, DEFAULT_CACHE_QUEUE)
    }

    /// Replay `log_path` and start the writer with a queue of `capacity`.
    pub fn open_with_queue(log_path: &Path, capacity: usize) -> Result<Self, CardError> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| CardError::io(parent, e))?;
            }
        }

        let (entries, replay) = if log_path.exists() {
            replay_log(log_path)?
        } else {
            (EntryMap::new(), ReplayStats::default())
        };

        if replay.truncated {
            warn!(
                path = %log_path.display(),
                records = replay.records,
                "image cache log ends in a partial record, compacting"
            );
            compact_log(log_path, &entries)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| CardError::io(log_path, e))?;

        let (sender, receiver) = sync_channel(capacity.max(1));
        let writer_path = log_path.to_path_buf();
        let writer = thread::Builder::new()
            .name("image-cache-writer".into())
            .spawn(move || run_writer(file, receiver, &writer_path))
            .map_err(|e| CardError::io(log_path, e))?;

        info!(
            path = %log_path.display(),
            entries = entries.len(),
            records = replay.records,
            skipped = replay.skipped,
            "image cache opened"
        );

        Ok(Self {
            log_path: log_path.to_path_buf(),
            entries: RwLock::new(entries),
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            replay,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn replay_stats(&self) -> ReplayStats {
        self.replay
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached image for `path`, only if the source still has the timestamp
    /// it was cached with.
    pub fn lookup(&self, path: &Path) -> Option<String> {
        let current = source_timestamp(path)?;
        let entries = self.entries.read();
        let entry = entries.get(path)?;
        if entry.timestamp == Some(current) {
            Some(entry.image.clone())
        } else {
            None
        }
    }

    /// Record a processed image. Visible to lookups immediately; the durable
    /// append blocks only while the writer's queue is full.
    pub fn store(&self, path: &Path, timestamp: Option<u64>, image: String) -> Result<(), CardError> {
        self.entries.write().insert(
            path.to_path_buf(),
            Entry {
                timestamp,
                image: image.clone(),
            },
        );

        let sender = self.sender.lock().clone();
        let sender = sender.ok_or_else(|| self.closed("cache is already drained"))?;
        sender
            .send(CacheRecord {
                path: path.to_path_buf(),
                timestamp,
                image,
            })
            .map_err(|_| self.closed("cache writer has stopped"))
    }

    /// Close the queue and wait for the writer to append everything queued.
    /// Returns the number of records written. Later calls return 0.
    pub fn drain(&self) -> Result<usize, CardError> {
        drop(self.sender.lock().take());
        let handle = self.writer.lock().take();
        let Some(handle) = handle else {
            return Ok(0);
        };
        let written = handle
            .join()
            .map_err(|_| self.closed("cache writer panicked"))??;
        debug!(path = %self.log_path.display(), written, "image cache drained");
        Ok(written)
    }

    fn closed(&self, message: &str) -> CardError {
        CardError::CacheCorruption {
            path: self.log_path.clone(),
            message: message.to_string(),
        }
    }
}

impl Drop for ImageCache {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            warn!(error = %e, "image cache did not drain cleanly");
        }
    }
}

fn run_writer(
    file: File,
    receiver: Receiver<CacheRecord>,
    log_path: &Path,
) -> Result<usize, CardError> {
    // A member is only started once there is something to write.
    let mut encoder: Option<GzEncoder<File>> = None;
    let mut file = Some(file);
    let mut written = 0;

    for record in receiver {
        let line = record.to_line()?;
        let started = match encoder.take() {
            Some(enc) => enc,
            None => {
                let file = file.take().ok_or_else(|| CardError::CacheCorruption {
                    path: log_path.to_path_buf(),
                    message: "log handle lost".into(),
                })?;
                GzEncoder::new(file, Compression::default())
            }
        };
        let enc = encoder.insert(started);
        enc.write_all(line.as_bytes())
            .and_then(|_| enc.write_all(b"\n"))
            .and_then(|_| enc.flush())
            .map_err(|e| CardError::io(log_path, e))?;
        written += 1;
    }

    if let Some(enc) = encoder {
        enc.finish().map_err(|e| CardError::io(log_path, e))?;
    }
    Ok(written)
}

fn replay_log(log_path: &Path) -> Result<(EntryMap, ReplayStats), CardError> {
    let file = File::open(log_path).map_err(|e| CardError::io(log_path, e))?;
    let mut entries = EntryMap::new();
    let mut stats = ReplayStats::default();

    let is_empty = file
        .metadata()
        .map(|m| m.len() == 0)
        .map_err(|e| CardError::io(log_path, e))?;
    if is_empty {
        return Ok((entries, stats));
    }

    let reader = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                stats.truncated = true;
                break;
            }
            Err(e) => {
                return Err(CardError::CacheCorruption {
                    path: log_path.to_path_buf(),
                    message: format!("after {} records: {}", stats.records, e),
                })
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match CacheRecord::from_line(&line) {
            Some(record) => {
                entries.insert(
                    record.path,
                    Entry {
                        timestamp: record.timestamp,
                        image: record.image,
                    },
                );
                stats.records += 1;
            }
            None => {
                stats.skipped += 1;
                warn!(path = %log_path.display(), "skipping malformed image cache record");
            }
        }
    }

    Ok((entries, stats))
}

/// Rewrite the log as a single complete member holding the current entries.
fn compact_log(log_path: &Path, entries: &EntryMap) -> Result<(), CardError> {
    let tmp_path = log_path.with_extension("compact");
    let file = File::create(&tmp_path).map_err(|e| CardError::io(&tmp_path, e))?;
    let mut encoder = GzEncoder::new(file, Compression::default());

    let mut paths: Vec<&PathBuf> = entries.keys().collect();
    paths.sort();
    for path in paths {
        let entry = &entries[path];
        let line = CacheRecord {
            path: path.clone(),
            timestamp: entry.timestamp,
            image: entry.image.clone(),
        }
        .to_line()?;
        encoder
            .write_all(line.as_bytes())
            .and_then(|_| encoder.write_all(b"\n"))
            .map_err(|e| CardError::io(&tmp_path, e))?;
    }
    encoder.finish().map_err(|e| CardError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, log_path).map_err(|e| CardError::io(log_path, e))
}
