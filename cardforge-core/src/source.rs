//! Item Source - Discovery, Processing, Fixtures
//!
//! Turns a directory tree into ordered item sets. Every sub-directory that
//! holds images becomes a set named after the directory; each image becomes
//! one item labelled with its file stem. Images are processed on a bounded
//! worker pool and passed through the image cache.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{source_timestamp, ImageCache};
use crate::config::IMAGE_EXTENSIONS;
use crate::error::CardError;
use crate::layout::{ItemSet, SourceItem, BLANK_IMAGE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredImage {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSet {
    pub name: String,
    pub images: Vec<DiscoveredImage>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, CardError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CardError::io(dir, e))? {
        let entry = entry.map_err(|e| CardError::io(dir, e))?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn walk(dir: &Path, is_root: bool, sets: &mut Vec<DiscoveredSet>) -> Result<(), CardError> {
    let entries = sorted_entries(dir)?;

    if !is_root {
        let images: Vec<DiscoveredImage> = entries
            .iter()
            .filter(|p| p.is_file() && is_image(p))
            .map(|p| DiscoveredImage {
                label: p
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: p.clone(),
            })
            .collect();

        if !images.is_empty() {
            let name = dir
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!(set = %name, images = images.len(), "discovered image set");
            // Directories sharing a name feed the same set.
            match sets.iter_mut().find(|s| s.name == name) {
                Some(existing) => existing.images.extend(images),
                None => sets.push(DiscoveredSet { name, images }),
            }
        }
    }

    for sub in entries.iter().filter(|p| p.is_dir()) {
        walk(sub, false, sets)?;
    }
    Ok(())
}

/// Discover image sets under `root`, in sorted path order. Images directly in
/// `root` are ignored.
pub fn discover_image_sets(root: &Path) -> Result<Vec<DiscoveredSet>, CardError> {
    if !root.is_dir() {
        return Err(CardError::NoItemsFound(format!(
            "image root {} is not a directory",
            root.display()
        )));
    }
    let mut sets = Vec::new();
    walk(root, true, &mut sets)?;

    let total: usize = sets.iter().map(|s| s.images.len()).sum();
    info!(root = %root.display(), sets = sets.len(), images = total, "image discovery complete");
    Ok(sets)
}

/// Turns a source image into an embeddable image reference.
pub trait ImageProcessor: Send + Sync {
    fn process(&self, path: &Path) -> Result<String, CardError>;
}

/// Centres the image on a white square canvas and returns it as a PNG data URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareCanvasProcessor;

impl SquareCanvasProcessor {
    fn failure(path: &Path, e: impl ToString) -> CardError {
        CardError::ImageProcessing {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

impl ImageProcessor for SquareCanvasProcessor {
    fn process(&self, path: &Path) -> Result<String, CardError> {
        let source = image::open(path).map_err(|e| Self::failure(path, e))?;
        let source = source.to_rgba8();
        let (width, height) = source.dimensions();
        let side = width.max(height);

        let mut canvas = RgbaImage::from_pixel(side, side, Rgba([255, 255, 255, 255]));
        let x = i64::from((side - width) / 2);
        let y = i64::from((side - height) / 2);
        imageops::overlay(&mut canvas, &source, x, y);

        let flattened = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8());
        let mut png = Vec::new();
        flattened
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| Self::failure(path, e))?;

        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        ))
    }
}

/// Counters gathered while collecting items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectStats {
    pub images: usize,
    pub cache_hits: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CollectedItems {
    pub sets: Vec<ItemSet>,
    pub stats: CollectStats,
    /// One message per item that fell back to a placeholder.
    pub warnings: Vec<String>,
}

enum Resolved {
    Cached(String),
    Processed(String),
    Failed(CardError),
}

fn resolve(image: &DiscoveredImage, processor: &dyn ImageProcessor, cache: Option<&ImageCache>) -> Resolved {
    if let Some(blob) = cache.and_then(|c| c.lookup(&image.path)) {
        return Resolved::Cached(blob);
    }
    match processor.process(&image.path) {
        Ok(blob) => {
            if let Some(cache) = cache {
                let timestamp = source_timestamp(&image.path);
                if let Err(e) = cache.store(&image.path, timestamp, blob.clone()) {
                    warn!(path = %image.path.display(), error = %e, "could not cache processed image");
                }
            }
            Resolved::Processed(blob)
        }
        Err(e) => Resolved::Failed(e),
    }
}

/// Process every discovered image on a pool of `workers` threads.
///
/// Items keep their discovery order. An image that cannot be processed is
/// logged and replaced by a placeholder item in the same position.
pub fn collect_items(
    discovered: &[DiscoveredSet],
    processor: &dyn ImageProcessor,
    cache: Option<&ImageCache>,
    workers: usize,
) -> Result<CollectedItems, CardError> {
    let jobs: Vec<(usize, &DiscoveredImage)> = discovered
        .iter()
        .enumerate()
        .flat_map(|(set_index, set)| set.images.iter().map(move |image| (set_index, image)))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("image-worker-{}", i))
        .build()
        .map_err(|e| CardError::InvalidConfiguration(format!("worker pool: {}", e)))?;

    let mut results: Vec<(usize, Resolved)> = pool.install(|| {
        jobs.par_iter()
            .enumerate()
            .map(|(index, (_, image))| (index, resolve(image, processor, cache)))
            .collect()
    });
    results.sort_by_key(|(index, _)| *index);

    let mut sets: Vec<ItemSet> = discovered
        .iter()
        .map(|s| ItemSet::new(s.name.clone(), Vec::with_capacity(s.images.len())))
        .collect();
    let mut stats = CollectStats {
        images: jobs.len(),
        ..CollectStats::default()
    };
    let mut warnings = Vec::new();

    for ((set_index, image), (_, resolved)) in jobs.iter().zip(results) {
        let item = match resolved {
            Resolved::Cached(blob) => {
                stats.cache_hits += 1;
                SourceItem::new(image.label.clone(), blob)
            }
            Resolved::Processed(blob) => {
                stats.processed += 1;
                SourceItem::new(image.label.clone(), blob)
            }
            Resolved::Failed(e) => {
                stats.failed += 1;
                warn!(path = %image.path.display(), error = %e, "image skipped, using placeholder");
                warnings.push(e.to_string());
                SourceItem::failed()
            }
        };
        sets[*set_index].items.push(item);
    }

    info!(
        images = stats.images,
        cache_hits = stats.cache_hits,
        processed = stats.processed,
        failed = stats.failed,
        "items collected"
    );
    Ok(CollectedItems {
        sets,
        stats,
        warnings,
    })
}

/// `Card 01`, `Card 02`, ... for `count` slots.
pub fn sample_labels(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("Card {:02}", i)).collect()
}

/// Synthetic sets for dry runs: `count` items per set, labelled
/// `<set> 01`, `<set> 02`, ... with a blank image.
pub fn synthetic_sets(counts: &[(String, usize)]) -> Vec<ItemSet> {
    counts.iter()
        .map(|(name, count)| {
            let items = (1..=*count)
                .map(|i| SourceItem::new(format!("{} {:02}", name, i), BLANK_IMAGE))
                .collect();
            ItemSet::new(name.clone(), items)
        })
        .collect()
}

/// Parse `A=3,B=5` into `[("A", 3), ("B", 5)]`.
pub fn parse_set_counts(text: &str) -> Result<Vec<(String, usize)>, CardError> {
    let mut counts = Vec::new();
    for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, count) = part.split_once('=').ok_or_else(|| {
            CardError::InvalidConfiguration(format!("expected NAME=COUNT, got '{}'", part))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CardError::InvalidConfiguration(format!(
                "missing set name in '{}'",
                part
            )));
        }
        let count: usize = count.trim().parse().map_err(|_| {
            CardError::InvalidConfiguration(format!("invalid count in '{}'", part))
        })?;
        counts.push((name.to_string(), count));
    }
    if counts.is_empty() {
        return Err(CardError::InvalidConfiguration("no sets given".into()));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoProcessor {
        calls: AtomicUsize,
    }

    impl EchoProcessor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ImageProcessor for EchoProcessor {
        fn process(&self, path: &Path) -> Result<String, CardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            if name.starts_with("bad") {
                return Err(CardError::ImageProcessing {
                    path: path.to_path_buf(),
                    message: "unreadable".into(),
                });
            }
            Ok(format!("img:{}", name))
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_discovery_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("loose.png"));
        touch(&root.join("beta/b2.PNG"));
        touch(&root.join("beta/b1.jpg"));
        touch(&root.join("beta/notes.txt"));
        touch(&root.join("alpha/a1.gif"));
        touch(&root.join("empty/readme.md"));

        let sets = discover_image_sets(root).unwrap();
        let names: Vec<_> = sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        let labels: Vec<_> = sets[1].images.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["b1", "b2"]);
    }

    #[test]
    fn test_discovery_missing_root() {
        let err = discover_image_sets(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, CardError::NoItemsFound(_)));
    }

    #[test]
    fn test_collect_keeps_order_and_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["a1.png", "bad.png", "a3.png"] {
            touch(&root.join("A").join(name));
        }
        touch(&root.join("B/b1.png"));

        let discovered = discover_image_sets(root).unwrap();
        let processor = EchoProcessor::new();
        let collected = collect_items(&discovered, &processor, None, 4).unwrap();

        assert_eq!(collected.sets.len(), 2);
        let a = &collected.sets[0];
        assert_eq!(a.items[0].image, "img:a1.png");
        assert!(a.items[2].placeholder);
        assert_eq!(a.items[2].image, BLANK_IMAGE);
        assert_eq!(a.items[1].image, "img:a3.png");
        assert_eq!(collected.stats.failed, 1);
        assert_eq!(collected.stats.processed, 3);
        assert_eq!(collected.warnings.len(), 1);
    }

    #[test]
    fn test_collect_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("images");
        touch(&root.join("A/a1.png"));
        touch(&root.join("A/a2.png"));
        let discovered = discover_image_sets(&root).unwrap();
        let log = dir.path().join("cache.log.gz");

        let first = EchoProcessor::new();
        {
            let cache = ImageCache::open(&log).unwrap();
            let collected = collect_items(&discovered, &first, Some(&cache), 2).unwrap();
            assert_eq!(collected.stats.processed, 2);
            cache.drain().unwrap();
        }
        assert_eq!(first.calls.load(Ordering::SeqCst), 2);

        let second = EchoProcessor::new();
        let cache = ImageCache::open(&log).unwrap();
        let collected = collect_items(&discovered, &second, Some(&cache), 2).unwrap();
        assert_eq!(collected.stats.cache_hits, 2);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(collected.sets[0].items[1].image, "img:a2.png");
    }

    #[test]
    fn test_square_canvas_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let url = SquareCanvasProcessor.process(&path).unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 4));
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(decoded.get_pixel(0, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_square_canvas_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not an image").unwrap();
        let err = SquareCanvasProcessor.process(&path).unwrap_err();
        assert!(matches!(err, CardError::ImageProcessing { .. }));
    }

    #[test]
    fn test_synthetic_and_labels() {
        let sets = synthetic_sets(&[("A".into(), 2)]);
        assert_eq!(sets[0].items[1].label, "A 02");
        assert_eq!(sample_labels(3), vec!["Card 01", "Card 02", "Card 03"]);
    }

    #[test]
    fn test_parse_set_counts() {
        assert_eq!(
            parse_set_counts("A=3, B=5").unwrap(),
            vec![("A".to_string(), 3), ("B".to_string(), 5)]
        );
        assert!(parse_set_counts("A").is_err());
        assert!(parse_set_counts("A=x").is_err());
        assert!(parse_set_counts("").is_err());
    }
}
