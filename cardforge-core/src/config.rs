//! Run Configuration
//!
//! Everything a run needs besides its inputs. The CLI builds a [`RunConfig`]
//! from flags and `CARDFORGE_*` environment variables; library callers build
//! one directly.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::CardError;
use crate::layout::{CellStacked, LayoutPolicy, ParityStriped, Sequential};

/// Worker threads used for image processing.
pub const DEFAULT_WORKERS: usize = 8;

/// Bounded capacity of the cache's append queue.
pub const DEFAULT_CACHE_QUEUE: usize = 256;

pub const DEFAULT_STACKS: usize = 2;

pub const DEFAULT_OUTPUT_DIR: &str = "dist";

/// Cache log file name inside the output directory.
pub const DEFAULT_CACHE_FILE: &str = "image-cache.log.gz";

/// Source file extensions treated as images (lowercase, no dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Sequential,
    /// Stack-major bands of slice rows.
    Parity,
    /// One cell column per set, stacked windows of cards.
    Cells,
}

impl LayoutMode {
    pub fn policy(self, stacks: usize) -> Box<dyn LayoutPolicy> {
        match self {
            LayoutMode::Sequential => Box::new(Sequential),
            LayoutMode::Parity => Box::new(ParityStriped { stacks }),
            LayoutMode::Cells => Box::new(CellStacked { stacks }),
        }
    }
}

/// Where the image cache lives, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSetting {
    Disabled,
    /// `<output_dir>/image-cache.log.gz`
    Default,
    Path(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub root: PathBuf,
    pub template: PathBuf,
    pub output_dir: PathBuf,
    pub cache: CacheSetting,
    pub copies: usize,
    pub layout: LayoutMode,
    pub stacks: usize,
    pub workers: usize,
    /// Also write the run report to `<output_dir>/run.json`.
    #[serde(default)]
    pub write_report: bool,
}

impl RunConfig {
    pub fn new(root: impl Into<PathBuf>, template: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            template: template.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cache: CacheSetting::Default,
            copies: 1,
            layout: LayoutMode::Sequential,
            stacks: DEFAULT_STACKS,
            workers: DEFAULT_WORKERS,
            write_report: false,
        }
    }

    pub fn validate(&self) -> Result<(), CardError> {
        if self.copies < 1 {
            return Err(CardError::InvalidConfiguration(
                "copies must be at least 1".into(),
            ));
        }
        if self.workers == 0 {
            return Err(CardError::InvalidConfiguration(
                "workers must be at least 1".into(),
            ));
        }
        if self.layout != LayoutMode::Sequential && self.stacks == 0 {
            return Err(CardError::InvalidConfiguration(
                "stacked layouts need at least one stack".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_path(&self) -> Option<PathBuf> {
        match &self.cache {
            CacheSetting::Disabled => None,
            CacheSetting::Default => Some(self.output_dir.join(DEFAULT_CACHE_FILE)),
            CacheSetting::Path(path) => Some(path.clone()),
        }
    }

    pub fn policy(&self) -> Box<dyn LayoutPolicy> {
        self.layout.policy(self.stacks)
    }
}
