//! Error kinds shared by every stage of a card run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("Template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("No eligible slots found in template {}", .0.display())]
    NoEligibleSlots(PathBuf),

    #[error("No items found: {0}")]
    NoItemsFound(String),

    #[error("Layout geometry error: {0}")]
    LayoutGeometry(String),

    #[error("Mutation error: {0}")]
    Mutation(String),

    #[error("Cache corruption in {}: {message}", path.display())]
    CacheCorruption { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Image processing failed for {}: {message}", path.display())]
    ImageProcessing { path: PathBuf, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CardError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name of the error kind, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TemplateNotFound(_) => "template_not_found",
            Self::InvalidTemplate(_) => "invalid_template",
            Self::NoEligibleSlots(_) => "no_eligible_slots",
            Self::NoItemsFound(_) => "no_items_found",
            Self::LayoutGeometry(_) => "layout_geometry",
            Self::Mutation(_) => "mutation",
            Self::CacheCorruption { .. } => "cache_corruption",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::ImageProcessing { .. } => "image_processing",
            Self::Io { .. } => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}
