//! Image Cache Durability Tests
//!
//! Replay, last-writer-wins, tolerated damage and fatal corruption of the
//! append log.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use cardforge_core::cache::{source_timestamp, ImageCache};
use cardforge_core::CardError;
use flate2::write::GzEncoder;
use flate2::Compression;

fn source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, name.as_bytes()).unwrap();
    path
}

fn gzip_lines(lines: &[&str]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap()
}

#[test]
fn invariant_hit_only_while_timestamp_unchanged() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let owl = source(dir.path(), "owl.png");
    let log = dir.path().join("cache.log.gz");

    {
        let cache = ImageCache::open(&log).unwrap();
        cache.store(&owl, source_timestamp(&owl), "data:owl".into()).unwrap();
        assert_eq!(cache.drain().unwrap(), 1);
    }

    let cache = ImageCache::open(&log).unwrap();
    assert_eq!(cache.lookup(&owl).as_deref(), Some("data:owl"));

    let later = SystemTime::now() + Duration::from_secs(60);
    File::options()
        .write(true)
        .open(&owl)
        .unwrap()
        .set_modified(later)
        .unwrap();
    assert_eq!(cache.lookup(&owl), None);

    fs::remove_file(&owl).unwrap();
    assert_eq!(cache.lookup(&owl), None);
}

#[test]
fn invariant_later_records_win_across_runs() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let owl = source(dir.path(), "owl.png");
    let log = dir.path().join("cache.log.gz");
    let ts = source_timestamp(&owl);

    for version in 1..=3 {
        let cache = ImageCache::open(&log).unwrap();
        cache.store(&owl, ts, format!("v{}", version)).unwrap();
        cache.store(&owl, ts, format!("v{}-final", version)).unwrap();
        cache.drain().unwrap();
    }

    let cache = ImageCache::open(&log).unwrap();
    assert_eq!(cache.replay_stats().records, 6);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.lookup(&owl).as_deref(), Some("v3-final"));
}

#[test]
fn invariant_parallel_stores_all_persisted() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let log = dir.path().join("cache.log.gz");
    // A tiny queue forces producers to wait on the writer.
    let cache = ImageCache::open_with_queue(&log, 2).unwrap();

    thread::scope(|scope| {
        for worker in 0..8 {
            let cache = &cache;
            scope.spawn(move || {
                for i in 0..25 {
                    let path = PathBuf::from(format!("w{}/img{}.png", worker, i));
                    cache.store(&path, Some(i), format!("blob-{}-{}", worker, i)).unwrap();
                }
            });
        }
    });
    assert_eq!(cache.drain().unwrap(), 200);
    drop(cache);

    let reopened = ImageCache::open(&log).unwrap();
    assert_eq!(reopened.replay_stats().records, 200);
    assert_eq!(reopened.len(), 200);
}

#[test]
fn invariant_wrong_arity_records_skipped() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let owl = source(dir.path(), "owl.png");
    let ts = source_timestamp(&owl).unwrap();
    let owl_key = owl.to_string_lossy().into_owned();
    let log = dir.path().join("cache.log.gz");

    let good = serde_json::to_string(&[owl_key.as_str(), ts.to_string().as_str(), "data:owl"]).unwrap();
    let short = serde_json::to_string(&[owl_key.as_str(), "data:short"]).unwrap();
    let long = serde_json::to_string(&["x", "1", "y", "z"]).unwrap();
    fs::write(&log, gzip_lines(&[good.as_str(), short.as_str(), long.as_str()])).unwrap();

    let cache = ImageCache::open(&log).unwrap();
    let stats = cache.replay_stats();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.skipped, 2);
    assert!(!stats.truncated);
    assert_eq!(cache.lookup(&owl).as_deref(), Some("data:owl"));
}

#[test]
fn invariant_truncated_tail_tolerated_and_compacted() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let log = dir.path().join("cache.log.gz");
    let records = [
        r#"["a.png","1","blob-a"]"#,
        r#"["b.png","2","blob-b"]"#,
    ];
    let mut bytes = gzip_lines(&records);
    // Drop the gzip trailer, as a crash before the member was finished would.
    bytes.truncate(bytes.len() - 8);
    fs::write(&log, &bytes).unwrap();

    {
        let cache = ImageCache::open(&log).unwrap();
        let stats = cache.replay_stats();
        assert!(stats.truncated);
        assert_eq!(stats.records, 2);
        assert_eq!(cache.len(), 2);
        cache.store(Path::new("c.png"), Some(3), "blob-c".into()).unwrap();
        cache.drain().unwrap();
    }

    let cache = ImageCache::open(&log).unwrap();
    let stats = cache.replay_stats();
    assert!(!stats.truncated);
    assert_eq!(stats.records, 3);
    assert!(!log.with_extension("compact").exists());
}

#[test]
fn invariant_corrupt_log_is_fatal() {
    let dir = tempfile::tempdir().expect("create tempdir");
    let log = dir.path().join("cache.log.gz");
    fs::write(&log, b"this was never a gzip stream").unwrap();

    match ImageCache::open(&log) {
        Err(CardError::CacheCorruption { path, .. }) => assert_eq!(path, log),
        Err(other) => panic!("expected cache corruption, got {}", other),
        Ok(_) => panic!("expected cache corruption"),
    }
}
