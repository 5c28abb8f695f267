//! Page Materializer
//!
//! Stamps each planned page into a freshly parsed copy of the template and
//! hands the result to a [`PageSink`]. A page whose template no longer has the
//! planned number of slots is skipped; per-slot mutation failures are
//! collected and the page is still emitted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CardError;
use crate::layout::PagePlan;
use crate::templates::SlotTemplate;

/// Receives filled templates, one per page.
pub trait PageSink {
    /// Returns where the page ended up, if it was written anywhere.
    fn emit(&mut self, page: &PagePlan, template: &SlotTemplate) -> Result<Option<PathBuf>, CardError>;
}

/// Writes `page_001.svg`, `page_002.svg`, ... into a directory.
#[derive(Debug, Clone)]
pub struct SvgDirectorySink {
    dir: PathBuf,
}

impl SvgDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CardError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CardError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("page_{:03}.svg", index + 1))
    }
}

impl PageSink for SvgDirectorySink {
    fn emit(&mut self, page: &PagePlan, template: &SlotTemplate) -> Result<Option<PathBuf>, CardError> {
        let path = self.page_path(page.index);
        template.save(&path)?;
        Ok(Some(path))
    }
}

/// Keeps serialized pages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub pages: Vec<(usize, String)>,
}

impl PageSink for MemorySink {
    fn emit(&mut self, page: &PagePlan, template: &SlotTemplate) -> Result<Option<PathBuf>, CardError> {
        self.pages.push((page.index, template.to_svg_string()));
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedPage {
    pub index: usize,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeOutcome {
    pub pages: Vec<MaterializedPage>,
    pub errors: Vec<String>,
}

fn stamp(template: &mut SlotTemplate, page: &PagePlan, errors: &mut Vec<String>) {
    for (slot, item) in page.items.iter().enumerate() {
        if let Err(e) = template.modify_group_labels(slot, &item.label) {
            errors.push(format!("page {} slot {}: {}", page.index + 1, slot, e));
        }
        if let Err(e) = template.modify_group_images(slot, &item.image) {
            errors.push(format!("page {} slot {}: {}", page.index + 1, slot, e));
        }
    }
}

/// Materialize every plan. Never aborts; failures land in `errors`.
pub fn materialize_pages(
    template_path: &Path,
    plans: &[PagePlan],
    sink: &mut dyn PageSink,
) -> MaterializeOutcome {
    let mut outcome = MaterializeOutcome::default();

    for page in plans {
        let mut template = match SlotTemplate::load(template_path) {
            Ok(t) => t,
            Err(e) => {
                warn!(page = page.index + 1, error = %e, "template reload failed");
                outcome.errors.push(format!("page {}: {}", page.index + 1, e));
                continue;
            }
        };

        if template.slot_count() != page.items.len() {
            let e = CardError::LayoutGeometry(format!(
                "page {} planned {} slots but template has {}",
                page.index + 1,
                page.items.len(),
                template.slot_count()
            ));
            warn!(error = %e, "page skipped");
            outcome.errors.push(e.to_string());
            continue;
        }

        let before = outcome.errors.len();
        stamp(&mut template, page, &mut outcome.errors);
        if outcome.errors.len() > before {
            warn!(
                page = page.index + 1,
                failures = outcome.errors.len() - before,
                "page stamped with errors"
            );
        }

        match sink.emit(page, &template) {
            Ok(output) => {
                debug!(page = page.index + 1, output = ?output, "page emitted");
                outcome.pages.push(MaterializedPage {
                    index: page.index,
                    output,
                });
            }
            Err(e) => {
                warn!(page = page.index + 1, error = %e, "page sink failed");
                outcome.errors.push(format!("page {}: {}", page.index + 1, e));
            }
        }
    }

    info!(
        planned = plans.len(),
        emitted = outcome.pages.len(),
        errors = outcome.errors.len(),
        "pages materialized"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{plan_pages, Geometry, ItemSet, Sequential, SourceItem};

    const TEMPLATE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
  <g><text>TXT one</text><image xlink:href="a.png"/></g>
  <g><text>TXT two</text><image xlink:href="b.png"/></g>
</svg>"##;

    fn write_template(dir: &Path) -> PathBuf {
        let path = dir.join("template.svg");
        fs::write(&path, TEMPLATE).unwrap();
        path
    }

    fn plans(count: usize) -> Vec<PagePlan> {
        let items = (1..=count)
            .map(|i| SourceItem::new(format!("Bird {}", i), format!("bird{}.png", i)))
            .collect();
        let geometry = Geometry::new(2, None).unwrap();
        plan_pages(&Sequential, &[ItemSet::new("birds", items)], &geometry, 1).unwrap()
    }

    #[test]
    fn test_pages_written_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path());
        let mut sink = SvgDirectorySink::new(dir.path().join("out")).unwrap();

        let outcome = materialize_pages(&template, &plans(3), &mut sink);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.pages.len(), 2);

        let second = fs::read_to_string(dir.path().join("out/page_002.svg")).unwrap();
        assert!(second.contains("Bird 3"));
        assert!(second.contains("bird3.png"));
        assert!(!second.contains("TXT two"));
    }

    #[test]
    fn test_each_page_starts_from_clean_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path());
        let mut sink = MemorySink::default();

        materialize_pages(&template, &plans(3), &mut sink);
        assert_eq!(sink.pages.len(), 2);
        assert!(sink.pages[0].1.contains("Bird 1"));
        assert!(!sink.pages[1].1.contains("Bird 1"));
    }

    #[test]
    fn test_slot_count_mismatch_skips_page() {
        let dir = tempfile::tempdir().unwrap();
        let template = write_template(dir.path());
        let items = vec![SourceItem::new("x", "x.png"); 3];
        let geometry = Geometry::new(3, None).unwrap();
        let plans = plan_pages(&Sequential, &[ItemSet::new("s", items)], &geometry, 1).unwrap();

        let mut sink = MemorySink::default();
        let outcome = materialize_pages(&template, &plans, &mut sink);
        assert!(outcome.pages.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert!(sink.pages.is_empty());
    }

    #[test]
    fn test_missing_template_reported_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = MemorySink::default();
        let outcome = materialize_pages(&dir.path().join("gone.svg"), &plans(2), &mut sink);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Template not found"));
    }
}
