//! CardForge Core - Card Sheet Compiler
//!
//! Turns a directory tree of labelled images into filled SVG card sheets.
//!
//! # Stages
//! 1. Templates: find the card slots of an SVG template and tokenize them
//! 2. Source: discover image sets and process images through the cache
//! 3. Layout: assign items to page slots under a layout policy
//! 4. Pages: stamp every planned page into a fresh copy of the template
//!
//! [`pipeline::CardPipeline`] runs all of them and returns a [`RunReport`].

pub mod error;
pub mod document;
pub mod templates;
pub mod layout;
pub mod cache;
pub mod source;
pub mod pages;
pub mod hashing;
pub mod config;
pub mod pipeline;

pub use error::CardError;
pub use templates::{SlotGroup, SlotTemplate, SlotToken, TokenKind, SLOT_MARKER};
pub use layout::{
    plan_pages, CellStacked, Geometry, Item, ItemSet, LayoutPolicy, PagePlan, ParityStriped,
    Sequential, SlotSpace, SourceItem,
};
pub use cache::ImageCache;
pub use source::{collect_items, discover_image_sets, ImageProcessor, SquareCanvasProcessor};
pub use pages::{materialize_pages, MemorySink, PageSink, SvgDirectorySink};
pub use hashing::{canonical_json, compute_plan_hash};
pub use config::{CacheSetting, LayoutMode, RunConfig};
pub use pipeline::{preview_plan, CardPipeline, RunReport, RunStatus};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
