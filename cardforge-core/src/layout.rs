//! Layout Engine - Slot Assignment Policies
//!
//! Items from every set are expanded into copies, cut into slices, and placed
//! onto pages by one of three policies. Every page carries a `space` record
//! per slot describing exactly what landed there.

use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::CardError;

/// Image reference used for every placeholder slot: an empty 1x1 SVG.
pub const BLANK_IMAGE: &str =
    "data:image/svg+xml;utf8,<svg xmlns='http://www.w3.org/2000/svg' width='1' height='1'></svg>";

/// One discovered source item, before expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub label: String,
    pub image: String,
    /// Set when the source could not be processed; the item keeps its
    /// position but renders as a placeholder.
    #[serde(default)]
    pub placeholder: bool,
}

impl SourceItem {
    pub fn new(label: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            image: image.into(),
            placeholder: false,
        }
    }

    pub fn failed() -> Self {
        Self {
            label: String::new(),
            image: BLANK_IMAGE.to_string(),
            placeholder: true,
        }
    }
}

/// A named set of source items in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSet {
    pub name: String,
    pub items: Vec<SourceItem>,
}

impl ItemSet {
    pub fn new(name: impl Into<String>, items: Vec<SourceItem>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMeta {
    pub set_name: Option<String>,
    pub set_index: Option<usize>,
    pub card_index: Option<usize>,
    pub copy_index: usize,
    pub global_index: Option<usize>,
    pub copies: usize,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub label: String,
    pub image: String,
    pub meta: ItemMeta,
}

impl Item {
    /// Placeholder item. Padding inside a set's slice keeps the set's name.
    pub fn placeholder(set: Option<(&str, usize)>) -> Self {
        Self {
            label: String::new(),
            image: BLANK_IMAGE.to_string(),
            meta: ItemMeta {
                set_name: set.map(|(name, _)| name.to_string()),
                set_index: set.map(|(_, index)| index),
                card_index: None,
                copy_index: 0,
                global_index: None,
                copies: 0,
                placeholder: true,
            },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.meta.placeholder
    }
}

/// A set after copy expansion.
#[derive(Debug, Clone)]
pub struct ExpandedSet {
    pub name: String,
    pub set_index: usize,
    pub items: Vec<Item>,
}

impl ExpandedSet {
    fn placeholder(&self) -> Item {
        Item::placeholder(Some((self.name.as_str(), self.set_index)))
    }
}

/// Expand every source item into `copies` consecutive items and drop empty
/// sets. Fails when nothing is left to place.
pub fn expand_sets(sets: &[ItemSet], copies: usize) -> Result<Vec<ExpandedSet>, CardError> {
    if copies < 1 {
        return Err(CardError::InvalidConfiguration(format!(
            "copies must be at least 1, got {}",
            copies
        )));
    }

    let mut expanded = Vec::new();
    let mut global_index = 0;
    for set in sets {
        if set.items.is_empty() {
            debug!(set = %set.name, "dropping empty set");
            continue;
        }
        let set_index = expanded.len();
        let mut items = Vec::with_capacity(set.items.len() * copies);
        for (card_index, source) in set.items.iter().enumerate() {
            for copy_index in 0..copies {
                items.push(Item {
                    label: source.label.clone(),
                    image: source.image.clone(),
                    meta: ItemMeta {
                        set_name: Some(set.name.clone()),
                        set_index: Some(set_index),
                        card_index: Some(card_index),
                        copy_index,
                        global_index: Some(global_index),
                        copies,
                        placeholder: source.placeholder,
                    },
                });
                global_index += 1;
            }
        }
        expanded.push(ExpandedSet {
            name: set.name.clone(),
            set_index,
            items,
        });
    }

    if expanded.is_empty() {
        return Err(CardError::NoItemsFound(
            "every item set is empty".to_string(),
        ));
    }
    Ok(expanded)
}

/// Page geometry taken from the template. Only built through
/// [`Geometry::new`], deserialization included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    slots_per_page: usize,
    slice_size: usize,
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Fields {
            slots_per_page: usize,
            slice_size: usize,
        }

        let fields = Fields::deserialize(deserializer)?;
        Geometry::new(fields.slots_per_page, Some(fields.slice_size)).map_err(de::Error::custom)
    }
}

impl Geometry {
    /// `slice_size` defaults to the whole page.
    pub fn new(slots_per_page: usize, slice_size: Option<usize>) -> Result<Self, CardError> {
        if slots_per_page == 0 {
            return Err(CardError::LayoutGeometry(
                "a page needs at least one slot".into(),
            ));
        }
        let slice_size = slice_size.unwrap_or(slots_per_page);
        if slice_size == 0 {
            return Err(CardError::LayoutGeometry("slice size must be at least 1".into()));
        }
        if slice_size > slots_per_page {
            return Err(CardError::InvalidTemplate(format!(
                "slice size {} exceeds {} slots per page",
                slice_size, slots_per_page
            )));
        }
        if slots_per_page % slice_size != 0 {
            return Err(CardError::LayoutGeometry(format!(
                "{} slots per page cannot be cut into slices of {}",
                slots_per_page, slice_size
            )));
        }
        Ok(Self {
            slots_per_page,
            slice_size,
        })
    }

    pub fn slots_per_page(&self) -> usize {
        self.slots_per_page
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    pub fn slices_per_page(&self) -> usize {
        self.slots_per_page / self.slice_size
    }
}

/// Where one slot's content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpace {
    pub slot: usize,
    pub row: usize,
    pub column: usize,
    pub stack: Option<usize>,
    pub stack_row: Option<usize>,
    pub cell: Option<usize>,
    pub set_name: Option<String>,
    pub set_index: Option<usize>,
    pub card_index: Option<usize>,
    pub copy_index: usize,
    pub global_index: Option<usize>,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagePlan {
    pub index: usize,
    pub items: Vec<Item>,
    /// Sets with at least one real item on this page, in slot order.
    pub sets: Vec<String>,
    pub space: Vec<SlotSpace>,
}

impl PagePlan {
    pub fn real_items(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| !i.is_placeholder())
    }

    pub fn placeholder_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_placeholder()).count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Coords {
    row: usize,
    column: usize,
    stack: Option<usize>,
    stack_row: Option<usize>,
    cell: Option<usize>,
}

fn build_page(index: usize, placed: Vec<(Item, Coords)>) -> PagePlan {
    let mut sets: Vec<String> = Vec::new();
    let mut items = Vec::with_capacity(placed.len());
    let mut space = Vec::with_capacity(placed.len());

    for (slot, (item, coords)) in placed.into_iter().enumerate() {
        if !item.is_placeholder() {
            if let Some(name) = &item.meta.set_name {
                if !sets.contains(name) {
                    sets.push(name.clone());
                }
            }
        }
        space.push(SlotSpace {
            slot,
            row: coords.row,
            column: coords.column,
            stack: coords.stack,
            stack_row: coords.stack_row,
            cell: coords.cell,
            set_name: item.meta.set_name.clone(),
            set_index: item.meta.set_index,
            card_index: item.meta.card_index,
            copy_index: item.meta.copy_index,
            global_index: item.meta.global_index,
            placeholder: item.meta.placeholder,
        });
        items.push(item);
    }

    PagePlan {
        index,
        items,
        sets,
        space,
    }
}

type Slice = Vec<Item>;

/// Every set cut into slices, in set order; a set's last slice is padded.
fn slice_stream(sets: &[ExpandedSet], slice_size: usize) -> Vec<Slice> {
    let mut stream = Vec::new();
    for set in sets {
        for chunk in set.items.chunks(slice_size) {
            let mut slice = chunk.to_vec();
            slice.resize_with(slice_size, || set.placeholder());
            stream.push(slice);
        }
    }
    stream
}

fn placeholder_slice(slice_size: usize) -> Slice {
    (0..slice_size).map(|_| Item::placeholder(None)).collect()
}

fn validate_stacks(stacks: usize, geometry: &Geometry) -> Result<(), CardError> {
    if stacks == 0 {
        return Err(CardError::LayoutGeometry("stack count must be at least 1".into()));
    }
    if stacks > geometry.slots_per_page {
        return Err(CardError::LayoutGeometry(format!(
            "{} stacks exceed {} slots per page",
            stacks, geometry.slots_per_page
        )));
    }
    Ok(())
}

/// A page assignment strategy.
pub trait LayoutPolicy {
    fn name(&self) -> &'static str;
    fn plan(&self, sets: &[ExpandedSet], geometry: &Geometry) -> Result<Vec<PagePlan>, CardError>;
}

/// Slices fill pages in stream order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl LayoutPolicy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn plan(&self, sets: &[ExpandedSet], geometry: &Geometry) -> Result<Vec<PagePlan>, CardError> {
        let rows = geometry.slices_per_page();
        let stream = slice_stream(sets, geometry.slice_size);

        let pages = stream
            .chunks(rows)
            .enumerate()
            .map(|(index, chunk)| {
                let mut page_rows = chunk.to_vec();
                page_rows.resize_with(rows, || placeholder_slice(geometry.slice_size));
                let placed = page_rows
                    .into_iter()
                    .enumerate()
                    .flat_map(|(row, slice)| {
                        slice.into_iter().enumerate().map(move |(column, item)| {
                            let coords = Coords {
                                row,
                                column,
                                ..Coords::default()
                            };
                            (item, coords)
                        })
                    })
                    .collect();
                build_page(index, placed)
            })
            .collect();
        Ok(pages)
    }
}

/// Page rows form `stacks` bands; the slice stream fills band 0 on every
/// page before band 1, so cut-and-stacked bands read in order.
#[derive(Debug, Clone, Copy)]
pub struct ParityStriped {
    pub stacks: usize,
}

impl LayoutPolicy for ParityStriped {
    fn name(&self) -> &'static str {
        "parity"
    }

    fn plan(&self, sets: &[ExpandedSet], geometry: &Geometry) -> Result<Vec<PagePlan>, CardError> {
        validate_stacks(self.stacks, geometry)?;
        let rows = geometry.slices_per_page();
        if rows % self.stacks != 0 {
            return Err(CardError::LayoutGeometry(format!(
                "{} slices per page cannot be split into {} stacks",
                rows, self.stacks
            )));
        }
        let stack_height = rows / self.stacks;
        let stream = slice_stream(sets, geometry.slice_size);
        let page_count = stream.len().div_ceil(rows);

        let mut pages = Vec::with_capacity(page_count);
        for page in 0..page_count {
            let mut placed = Vec::with_capacity(geometry.slots_per_page);
            for stack in 0..self.stacks {
                for stack_row in 0..stack_height {
                    let source = stack * page_count * stack_height + page * stack_height + stack_row;
                    let slice = stream
                        .get(source)
                        .cloned()
                        .unwrap_or_else(|| placeholder_slice(geometry.slice_size));
                    let row = stack * stack_height + stack_row;
                    for (column, item) in slice.into_iter().enumerate() {
                        placed.push((
                            item,
                            Coords {
                                row,
                                column,
                                stack: Some(stack),
                                stack_row: Some(stack_row),
                                cell: None,
                            },
                        ));
                    }
                }
            }
            pages.push(build_page(page, placed));
        }
        Ok(pages)
    }
}

/// Each set owns one cell column of every stack; a group of sets shares a
/// run of pages, stack `s` showing the `s`-th window of each set's cards.
#[derive(Debug, Clone, Copy)]
pub struct CellStacked {
    pub stacks: usize,
}

impl LayoutPolicy for CellStacked {
    fn name(&self) -> &'static str {
        "cells"
    }

    fn plan(&self, sets: &[ExpandedSet], geometry: &Geometry) -> Result<Vec<PagePlan>, CardError> {
        validate_stacks(self.stacks, geometry)?;
        if geometry.slots_per_page % self.stacks != 0 {
            return Err(CardError::LayoutGeometry(format!(
                "{} slots per page cannot be split into {} stacks",
                geometry.slots_per_page, self.stacks
            )));
        }
        let cells = geometry.slots_per_page / self.stacks;

        let mut pages = Vec::new();
        for group in sets.chunks(cells) {
            let longest = group.iter().map(|s| s.items.len()).max().unwrap_or(0);
            let window = longest.div_ceil(self.stacks);

            for cycle in 0..window {
                let mut placed = Vec::with_capacity(geometry.slots_per_page);
                for stack in 0..self.stacks {
                    for cell in 0..cells {
                        let item = match group.get(cell) {
                            Some(set) => set
                                .items
                                .get(stack * window + cycle)
                                .cloned()
                                .unwrap_or_else(|| set.placeholder()),
                            None => Item::placeholder(None),
                        };
                        placed.push((
                            item,
                            Coords {
                                row: stack,
                                column: cell,
                                stack: Some(stack),
                                stack_row: None,
                                cell: Some(cell),
                            },
                        ));
                    }
                }
                pages.push(build_page(pages.len(), placed));
            }
        }
        Ok(pages)
    }
}

/// Expand `sets` and lay them out with `policy`.
pub fn plan_pages(
    policy: &dyn LayoutPolicy,
    sets: &[ItemSet],
    geometry: &Geometry,
    copies: usize,
) -> Result<Vec<PagePlan>, CardError> {
    let expanded = expand_sets(sets, copies)?;
    let pages = policy.plan(&expanded, geometry)?;
    if pages.is_empty() {
        return Err(CardError::NoItemsFound("no pages produced".into()));
    }
    debug!(
        policy = policy.name(),
        pages = pages.len(),
        slots = geometry.slots_per_page,
        "layout planned"
    );
    Ok(pages)
}
