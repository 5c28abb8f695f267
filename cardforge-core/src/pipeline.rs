//! Card Pipeline - Single Entry Point
//!
//! One run: template → geometry → cache → discovery → collection → drain →
//! layout → materialization. Any fatal error stops the run before page work
//! and is reported in the returned [`RunReport`]; the pipeline never panics
//! and never returns a bare error to the caller.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{ImageCache, ReplayStats};
use crate::config::{LayoutMode, RunConfig};
use crate::error::CardError;
use crate::hashing::compute_plan_hash;
use crate::layout::{plan_pages, Geometry, PagePlan, SlotSpace};
use crate::pages::{materialize_pages, SvgDirectorySink};
use crate::source::{collect_items, discover_image_sets, synthetic_sets, ImageProcessor, SquareCanvasProcessor};
use crate::templates::SlotTemplate;
use crate::ENGINE_VERSION;

/// File name of the persisted report inside the output directory.
pub const REPORT_FILE: &str = "run.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutReport {
    pub mode: LayoutMode,
    /// Only meaningful for stacked layouts.
    pub stacks: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReport {
    pub path: PathBuf,
    pub replay: ReplayStats,
    pub hits: usize,
    pub written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReport {
    /// 1-based page number.
    pub page: usize,
    pub sets: Vec<String>,
    pub output: Option<PathBuf>,
    pub placeholders: usize,
    pub space: Vec<SlotSpace>,
}

/// Outcome record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub status: RunStatus,
    pub template: PathBuf,
    pub slots_per_page: usize,
    pub slice_size: usize,
    pub slices_per_page: usize,
    pub layout: LayoutReport,
    pub copies: usize,
    pub set_count: usize,
    pub sets: Vec<String>,
    /// Source items that produced a real image.
    pub images_processed: usize,
    pub placeholders: usize,
    pub page_count: usize,
    pub pages: Vec<PageReport>,
    pub plan_hash: Option<String>,
    pub cache: Option<CacheReport>,
    pub output_dir: PathBuf,
    /// Non-fatal problems: skipped items, failed pages, slot mutations.
    pub errors: Vec<String>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl RunReport {
    fn start(config: &RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            status: RunStatus::Processing,
            template: config.template.clone(),
            slots_per_page: 0,
            slice_size: 0,
            slices_per_page: 0,
            layout: LayoutReport {
                mode: config.layout,
                stacks: (config.layout != LayoutMode::Sequential).then_some(config.stacks),
            },
            copies: config.copies,
            set_count: 0,
            sets: Vec::new(),
            images_processed: 0,
            placeholders: 0,
            page_count: 0,
            pages: Vec::new(),
            plan_hash: None,
            cache: None,
            output_dir: config.output_dir.clone(),
            errors: Vec::new(),
            error: None,
            error_kind: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    fn fail(&mut self, e: &CardError) {
        self.status = RunStatus::Error;
        self.error = Some(e.to_string());
        self.error_kind = Some(e.kind().to_string());
    }

    /// Write the report as pretty JSON to `<output_dir>/run.json`.
    pub fn save(&self) -> Result<PathBuf, CardError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| CardError::io(&self.output_dir, e))?;
        let path = self.output_dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| CardError::io(&path, e))?;
        Ok(path)
    }
}

fn load_template(path: &Path) -> Result<(SlotTemplate, Geometry), CardError> {
    let template = SlotTemplate::load(path)?;
    if template.slot_count() == 0 {
        return Err(CardError::NoEligibleSlots(path.to_path_buf()));
    }
    let geometry = Geometry::new(template.slot_count(), template.slice_directive())?;
    Ok((template, geometry))
}

/// The card pipeline - single entry point for full runs
pub struct CardPipeline {
    processor: Box<dyn ImageProcessor>,
}

impl CardPipeline {
    pub fn new(processor: Box<dyn ImageProcessor>) -> Self {
        Self { processor }
    }

    /// Run end to end. The report's status is `ok` only when every stage
    /// before page output succeeded.
    pub fn run(&self, config: &RunConfig) -> RunReport {
        let mut report = RunReport::start(config);
        info!(
            run_id = %report.run_id,
            root = %config.root.display(),
            template = %config.template.display(),
            layout = ?config.layout,
            "run started"
        );

        match self.execute(config, &mut report) {
            Ok(()) => {
                report.status = RunStatus::Ok;
                info!(
                    run_id = %report.run_id,
                    pages = report.page_count,
                    errors = report.errors.len(),
                    "run finished"
                );
            }
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "run failed");
                report.fail(&e);
            }
        }

        if config.write_report {
            if let Err(e) = report.save() {
                warn!(error = %e, "could not write run report");
                report.errors.push(e.to_string());
            }
        }
        report
    }

    fn execute(&self, config: &RunConfig, report: &mut RunReport) -> Result<(), CardError> {
        config.validate()?;

        let (template, geometry) = load_template(&config.template)?;
        report.slots_per_page = geometry.slots_per_page();
        report.slice_size = geometry.slice_size();
        report.slices_per_page = geometry.slices_per_page();
        info!(
            slots = geometry.slots_per_page(),
            slice = geometry.slice_size(),
            tokens = template.total_tokens(),
            "template loaded"
        );

        let cache = match config.cache_path() {
            Some(path) => Some(ImageCache::open(&path)?),
            None => None,
        };

        let discovered = discover_image_sets(&config.root)?;
        if discovered.is_empty() {
            return Err(CardError::NoItemsFound(format!(
                "no image sets under {}",
                config.root.display()
            )));
        }

        let collected = collect_items(&discovered, self.processor.as_ref(), cache.as_ref(), config.workers)?;
        if let Some(cache) = &cache {
            let written = cache.drain()?;
            report.cache = Some(CacheReport {
                path: cache.log_path().to_path_buf(),
                replay: cache.replay_stats(),
                hits: collected.stats.cache_hits,
                written,
            });
        }
        report.images_processed = collected.stats.images - collected.stats.failed;
        report.errors.extend(collected.warnings);
        report.sets = collected.sets.iter().map(|s| s.name.clone()).collect();
        report.set_count = report.sets.len();

        let policy = config.policy();
        let plans = plan_pages(policy.as_ref(), &collected.sets, &geometry, config.copies)?;
        report.plan_hash = Some(compute_plan_hash(&plans)?);
        report.page_count = plans.len();
        report.placeholders = plans.iter().map(PagePlan::placeholder_count).sum();

        let mut sink = SvgDirectorySink::new(&config.output_dir)?;
        let outcome = materialize_pages(&config.template, &plans, &mut sink);
        report.errors.extend(outcome.errors);
        report.pages = plans
            .into_iter()
            .map(|plan| PageReport {
                page: plan.index + 1,
                output: outcome
                    .pages
                    .iter()
                    .find(|p| p.index == plan.index)
                    .and_then(|p| p.output.clone()),
                placeholders: plan.placeholder_count(),
                sets: plan.sets,
                space: plan.space,
            })
            .collect();
        Ok(())
    }
}

impl Default for CardPipeline {
    fn default() -> Self {
        Self::new(Box::new(SquareCanvasProcessor))
    }
}

/// Page plans for synthetic sets, without touching images or output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPreview {
    pub template: PathBuf,
    pub slots_per_page: usize,
    pub slice_size: usize,
    pub layout: LayoutReport,
    pub copies: usize,
    pub plan_hash: String,
    pub pages: Vec<PagePlan>,
}

pub fn preview_plan(
    template: &Path,
    counts: &[(String, usize)],
    mode: LayoutMode,
    stacks: usize,
    copies: usize,
) -> Result<PlanPreview, CardError> {
    let (_, geometry) = load_template(template)?;
    let sets = synthetic_sets(counts);
    let pages = plan_pages(mode.policy(stacks).as_ref(), &sets, &geometry, copies)?;
    Ok(PlanPreview {
        template: template.to_path_buf(),
        slots_per_page: geometry.slots_per_page(),
        slice_size: geometry.slice_size(),
        layout: LayoutReport {
            mode,
            stacks: (mode != LayoutMode::Sequential).then_some(stacks),
        },
        copies,
        plan_hash: compute_plan_hash(&pages)?,
        pages,
    })
}
