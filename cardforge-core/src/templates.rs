//! Template System - Slot Discovery and Tokenization
//!
//! A template is an SVG document whose card slots are plain `<g>` groups
//! holding a marked `<text>` label and an `<image>` placeholder. Slots are
//! found once per parse, tokenized, and then rewritten in place.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::document::{local_name, prefix, Document, NodeId};
use crate::error::CardError;

/// Case-insensitive substring that marks a text element as a slot label.
pub const SLOT_MARKER: &str = "txt";

/// Label colour used by template authors; normalized when a label is filled.
pub const PLACEHOLDER_COLOR: &str = "#008080";
pub const FOREGROUND_COLOR: &str = "#000000";

pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

const SLICE_DIRECTIVE: &str = "(slice=";

/// What a token is, with the data its mutation rule needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Label,
    /// `attribute` is the href key the image reference is read from and
    /// written to (`xlink:href` when present, otherwise `href`).
    Image { attribute: String },
    Other,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Label => "label",
            TokenKind::Image { .. } => "image",
            TokenKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotToken {
    pub kind: TokenKind,
    pub position: usize,
    content: String,
    original_content: String,
    /// Text of each `tspan` of a label as parsed, so a reset can put back
    /// runs that a label write emptied.
    original_runs: Vec<String>,
    node: NodeId,
}

impl SlotToken {
    fn new(kind: TokenKind, content: String, position: usize, node: NodeId) -> Self {
        Self {
            kind,
            position,
            original_content: content.clone(),
            content,
            original_runs: Vec::new(),
            node,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn original_content(&self) -> &str {
        &self.original_content
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_modified(&self) -> bool {
        self.content != self.original_content
    }
}

#[derive(Debug, Clone)]
pub struct SlotGroup {
    pub id: String,
    pub position: usize,
    node: NodeId,
    tokens: Vec<SlotToken>,
}

impl SlotGroup {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn tokens(&self) -> &[SlotToken] {
        &self.tokens
    }

    pub fn label_tokens(&self) -> impl Iterator<Item = &SlotToken> {
        self.tokens.iter().filter(|t| t.kind == TokenKind::Label)
    }

    pub fn image_tokens(&self) -> impl Iterator<Item = &SlotToken> {
        self.tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Image { .. }))
    }
}

// --- Element classification ---

fn has_local_name(doc: &Document, id: NodeId, name: &str) -> bool {
    doc.element(id).is_some_and(|el| el.local_name() == name)
}

fn is_group(doc: &Document, id: NodeId) -> bool {
    has_local_name(doc, id, "g")
}

fn is_text(doc: &Document, id: NodeId) -> bool {
    has_local_name(doc, id, "text")
}

fn is_image(doc: &Document, id: NodeId) -> bool {
    has_local_name(doc, id, "image")
}

fn is_sub_run(doc: &Document, id: NodeId) -> bool {
    has_local_name(doc, id, "tspan")
}

pub fn contains_marker(text: &str) -> bool {
    text.to_lowercase().contains(SLOT_MARKER)
}

fn is_eligible_group(doc: &Document, group: NodeId) -> bool {
    let children = doc.child_elements(group);
    if children.iter().any(|c| is_group(doc, *c)) {
        return false;
    }

    let has_label = children
        .iter()
        .any(|c| is_text(doc, *c) && contains_marker(&doc.text_content(*c)));
    let has_image = children.iter().any(|c| is_image(doc, *c));
    has_label && has_image
}

/// Eligible slot groups in document pre-order.
pub fn discover_slots(doc: &Document) -> Vec<NodeId> {
    let mut found = Vec::new();
    // The root is the canvas, never a slot.
    let mut pending: Vec<NodeId> = doc.child_elements(doc.root()).into_iter().rev().collect();
    while let Some(id) = pending.pop() {
        if is_group(doc, id) && is_eligible_group(doc, id) {
            found.push(id);
        }
        let children = doc.child_elements(id);
        pending.extend(children.into_iter().rev());
    }
    found
}

/// Key of the attribute holding an image's reference. A namespaced
/// `xlink:href` wins over a plain `href`; with neither, `href` is used.
fn image_href_attribute(doc: &Document, image: NodeId) -> String {
    let Some(el) = doc.element(image) else {
        return "href".to_string();
    };
    el.attributes()
        .iter()
        .find(|a| {
            local_name(&a.key) == "href"
                && prefix(&a.key).is_some_and(|p| {
                    p == "xlink" || doc.namespace_uri(p) == Some(XLINK_NS)
                })
        })
        .map(|a| a.key.clone())
        .unwrap_or_else(|| "href".to_string())
}

/// Tokens for the direct element children of `group`, in document order.
pub fn tokenize(doc: &Document, group: NodeId) -> Vec<SlotToken> {
    doc.child_elements(group)
        .into_iter()
        .enumerate()
        .map(|(position, child)| {
            if is_text(doc, child) {
                let text = doc.text_content(child);
                let kind = if contains_marker(&text) {
                    TokenKind::Label
                } else {
                    TokenKind::Other
                };
                let mut token = SlotToken::new(kind, text, position, child);
                if token.kind == TokenKind::Label {
                    token.original_runs = label_runs(doc, child)
                        .into_iter()
                        .map(|run| doc.text_content(run))
                        .collect();
                }
                token
            } else if is_image(doc, child) {
                let attribute = image_href_attribute(doc, child);
                let href = doc
                    .element(child)
                    .and_then(|el| el.attribute(&attribute))
                    .unwrap_or_default();
                SlotToken::new(TokenKind::Image { attribute }, href, position, child)
            } else {
                SlotToken::new(TokenKind::Other, doc.node_to_string(child), position, child)
            }
        })
        .collect()
}

/// Apply `new_content` to the document node behind `token`.
///
/// Every precondition is checked before the first write, so a failure leaves
/// the node untouched.
pub fn modify_token(
    doc: &mut Document,
    token: &mut SlotToken,
    new_content: &str,
) -> Result<(), CardError> {
    if doc.element(token.node).is_none() {
        return Err(CardError::Mutation(format!(
            "token {} does not reference an element",
            token.position
        )));
    }

    match &token.kind {
        TokenKind::Label => modify_label(doc, token.node, new_content)?,
        TokenKind::Image { attribute } => doc.set_attribute(token.node, attribute, new_content)?,
        TokenKind::Other => {}
    }

    token.content = new_content.to_string();
    Ok(())
}

fn normalize_style(doc: &mut Document, id: NodeId) -> Result<(), CardError> {
    let style = doc.element(id).and_then(|el| el.attribute("style"));
    if let Some(style) = style {
        if style.contains(PLACEHOLDER_COLOR) {
            doc.set_attribute(id, "style", &style.replace(PLACEHOLDER_COLOR, FOREGROUND_COLOR))?;
        }
    }
    Ok(())
}

fn label_runs(doc: &Document, text: NodeId) -> Vec<NodeId> {
    doc.child_elements(text)
        .into_iter()
        .filter(|c| is_sub_run(doc, *c))
        .collect()
}

fn modify_label(doc: &mut Document, text: NodeId, new_content: &str) -> Result<(), CardError> {
    let runs = label_runs(doc, text);

    match runs.split_first() {
        Some((first, rest)) => {
            // The first run carries the label. Extra runs stay in the tree,
            // emptied, so a reset can refill them.
            doc.replace_children_with_text(*first, new_content)?;
            for run in rest {
                doc.replace_children_with_text(*run, "")?;
            }
            normalize_style(doc, text)?;
            normalize_style(doc, *first)?;
        }
        None => doc.replace_children_with_text(text, new_content)?,
    }
    Ok(())
}

/// Put a label's `tspan` texts back the way they were parsed. Falls back to
/// a plain label write when the runs no longer line up.
fn restore_token(doc: &mut Document, token: &mut SlotToken) -> Result<(), CardError> {
    let original = token.original_content.clone();
    if token.kind != TokenKind::Label || token.original_runs.is_empty() {
        return modify_token(doc, token, &original);
    }

    let runs = label_runs(doc, token.node);
    if runs.len() != token.original_runs.len() {
        return modify_token(doc, token, &original);
    }
    for (run, text) in runs.iter().zip(&token.original_runs) {
        doc.replace_children_with_text(*run, text)?;
    }
    token.content = original;
    Ok(())
}

/// Parse the `(slice=N)` directive from raw template text.
pub fn parse_slice_directive(text: &str) -> Result<Option<usize>, CardError> {
    let Some(start) = text.find(SLICE_DIRECTIVE) else {
        return Ok(None);
    };
    let rest = &text[start + SLICE_DIRECTIVE.len()..];
    let end = rest
        .find(')')
        .ok_or_else(|| CardError::InvalidTemplate("unterminated (slice=...) directive".into()))?;
    let value = rest[..end].trim();
    let slice: usize = value.parse().map_err(|_| {
        CardError::InvalidTemplate(format!("slice directive is not an integer: {:?}", value))
    })?;
    if slice == 0 {
        return Err(CardError::InvalidTemplate(
            "slice directive must be at least 1".into(),
        ));
    }
    Ok(Some(slice))
}

// --- Structure export ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub label: usize,
    pub image: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub original_content: String,
    pub position: usize,
    pub group_position: usize,
    pub modified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: String,
    pub position: usize,
    pub token_count: usize,
    pub tokens: Vec<TokenRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStatistics {
    pub total_groups: usize,
    pub total_tokens: usize,
    pub tokens_by_type: TokenCounts,
    pub modified_tokens: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokensByType {
    pub label: Vec<TokenRecord>,
    pub image: Vec<TokenRecord>,
    pub other: Vec<TokenRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStructure {
    pub source_file: String,
    pub slice_directive: Option<usize>,
    pub statistics: TemplateStatistics,
    pub groups: Vec<GroupRecord>,
    pub tokens_by_type: TokensByType,
}

fn token_record(token: &SlotToken, group_position: usize) -> TokenRecord {
    TokenRecord {
        kind: token.kind.name().to_string(),
        content: token.content.clone(),
        original_content: token.original_content.clone(),
        position: token.position,
        group_position,
        modified: token.is_modified(),
    }
}

// --- Parsed template ---

/// One parsed template document with its tokenized slots.
///
/// Each instance owns its own tree; pages are filled from fresh instances.
#[derive(Debug, Clone)]
pub struct SlotTemplate {
    source: PathBuf,
    document: Document,
    groups: Vec<SlotGroup>,
    slice_directive: Option<usize>,
}

impl SlotTemplate {
    pub fn load(path: &Path) -> Result<Self, CardError> {
        if !path.exists() {
            return Err(CardError::TemplateNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|e| CardError::io(path, e))?;
        Self::from_source(path, &text)
    }

    /// Parse template text; `source` only labels the result.
    pub fn from_source(source: impl Into<PathBuf>, text: &str) -> Result<Self, CardError> {
        let document = Document::parse_str(text)?;
        let slice_directive = parse_slice_directive(text)?;

        let groups = discover_slots(&document)
            .into_iter()
            .enumerate()
            .map(|(position, node)| SlotGroup {
                id: format!("slot_{:03}", position),
                position,
                node,
                tokens: tokenize(&document, node),
            })
            .collect();

        Ok(Self {
            source: source.into(),
            document,
            groups,
            slice_directive,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn groups(&self) -> &[SlotGroup] {
        &self.groups
    }

    pub fn group(&self, position: usize) -> Option<&SlotGroup> {
        self.groups.iter().find(|g| g.position == position)
    }

    pub fn slot_count(&self) -> usize {
        self.groups.len()
    }

    pub fn total_tokens(&self) -> usize {
        self.groups.iter().map(|g| g.tokens.len()).sum()
    }

    pub fn slice_directive(&self) -> Option<usize> {
        self.slice_directive
    }

    fn group_index(&self, position: usize) -> Result<usize, CardError> {
        self.groups
            .iter()
            .position(|g| g.position == position)
            .ok_or_else(|| CardError::Mutation(format!("no slot at position {}", position)))
    }

    pub fn modify_token(
        &mut self,
        group_position: usize,
        token_position: usize,
        new_content: &str,
    ) -> Result<(), CardError> {
        let index = self.group_index(group_position)?;
        let group = &mut self.groups[index];
        let token = group
            .tokens
            .iter_mut()
            .find(|t| t.position == token_position)
            .ok_or_else(|| {
                CardError::Mutation(format!(
                    "{} has no token at position {}",
                    group.id, token_position
                ))
            })?;
        modify_token(&mut self.document, token, new_content)
    }

    fn modify_matching(
        &mut self,
        group_position: usize,
        new_content: &str,
        select: fn(&TokenKind) -> bool,
    ) -> Result<usize, CardError> {
        let index = self.group_index(group_position)?;
        let mut modified = 0;
        let mut first_error = None;
        for token in self.groups[index].tokens.iter_mut() {
            if !select(&token.kind) {
                continue;
            }
            match modify_token(&mut self.document, token, new_content) {
                Ok(()) => modified += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(modified),
        }
    }

    /// Set every label token of a slot. Returns the number of tokens written.
    pub fn modify_group_labels(&mut self, position: usize, label: &str) -> Result<usize, CardError> {
        self.modify_matching(position, label, |k| *k == TokenKind::Label)
    }

    /// Set every image token of a slot. Returns the number of tokens written.
    pub fn modify_group_images(&mut self, position: usize, href: &str) -> Result<usize, CardError> {
        self.modify_matching(position, href, |k| matches!(k, TokenKind::Image { .. }))
    }

    /// Restore every modified token of one slot to its original content.
    pub fn reset_group(&mut self, position: usize) -> Result<(), CardError> {
        let index = self.group_index(position)?;
        for token in self.groups[index].tokens.iter_mut() {
            if token.is_modified() {
                restore_token(&mut self.document, token)?;
            }
        }
        Ok(())
    }

    pub fn reset_all(&mut self) -> Result<(), CardError> {
        let positions: Vec<usize> = self.groups.iter().map(|g| g.position).collect();
        for position in positions {
            self.reset_group(position)?;
        }
        Ok(())
    }

    pub fn token_counts(&self) -> TokenCounts {
        let mut counts = TokenCounts::default();
        for token in self.groups.iter().flat_map(|g| g.tokens.iter()) {
            match token.kind {
                TokenKind::Label => counts.label += 1,
                TokenKind::Image { .. } => counts.image += 1,
                TokenKind::Other => counts.other += 1,
            }
        }
        counts
    }

    pub fn statistics(&self) -> TemplateStatistics {
        TemplateStatistics {
            total_groups: self.slot_count(),
            total_tokens: self.total_tokens(),
            tokens_by_type: self.token_counts(),
            modified_tokens: self
                .groups
                .iter()
                .flat_map(|g| g.tokens.iter())
                .filter(|t| t.is_modified())
                .count(),
        }
    }

    /// Diagnostic snapshot of every slot and token.
    pub fn structure(&self) -> TemplateStructure {
        let mut tokens_by_type = TokensByType::default();
        let mut groups = Vec::with_capacity(self.groups.len());

        for group in &self.groups {
            let tokens: Vec<TokenRecord> = group
                .tokens
                .iter()
                .map(|t| token_record(t, group.position))
                .collect();
            for (token, record) in group.tokens.iter().zip(&tokens) {
                let bucket = match token.kind {
                    TokenKind::Label => &mut tokens_by_type.label,
                    TokenKind::Image { .. } => &mut tokens_by_type.image,
                    TokenKind::Other => &mut tokens_by_type.other,
                };
                bucket.push(record.clone());
            }
            groups.push(GroupRecord {
                group_id: group.id.clone(),
                position: group.position,
                token_count: tokens.len(),
                tokens,
            });
        }

        TemplateStructure {
            source_file: self.source.display().to_string(),
            slice_directive: self.slice_directive,
            statistics: self.statistics(),
            groups,
            tokens_by_type,
        }
    }

    pub fn to_svg_string(&self) -> String {
        self.document.to_xml_string()
    }

    /// Write the current tree to `path` exactly as serialized.
    pub fn save(&self, path: &Path) -> Result<(), CardError> {
        fs::write(path, self.to_svg_string()).map_err(|e| CardError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">
  <g id="sheet">
    <g id="card1">
      <rect width="10" height="10"/>
      <text style="fill:#008080"><tspan style="fill:#008080;font-size:4px">NAME_TXT</tspan></text>
      <image xlink:href="placeholder.png"/>
    </g>
    <g id="card2">
      <text>Title</text>
      <text>txt here</text>
      <image href="plain.png"/>
    </g>
  </g>
</svg>"##;

    fn template() -> SlotTemplate {
        SlotTemplate::from_source("test.svg", TEMPLATE).unwrap()
    }

    #[test]
    fn test_discovers_slots_in_document_order() {
        let t = template();
        assert_eq!(t.slot_count(), 2);
        assert_eq!(t.groups()[0].id, "slot_000");
        assert_eq!(t.groups()[1].id, "slot_001");
        assert_eq!(t.groups()[1].position, 1);
    }

    #[test]
    fn test_group_with_nested_group_never_eligible() {
        let svg = r#"<svg>
  <g id="outer">
    <text>txt</text>
    <image href="a.png"/>
    <g id="inner"><text>TXT</text><image href="b.png"/></g>
  </g>
</svg>"#;
        let t = SlotTemplate::from_source("nested.svg", svg).unwrap();
        assert_eq!(t.slot_count(), 1);
        let el = t.document().element(t.groups()[0].node()).unwrap();
        assert_eq!(el.attribute("id").as_deref(), Some("inner"));
    }

    #[test]
    fn test_groups_without_marker_or_image_are_skipped() {
        let svg = r#"<svg><g><text>name</text><image href="a"/></g><g><text>txt</text></g></svg>"#;
        let t = SlotTemplate::from_source("none.svg", svg).unwrap();
        assert_eq!(t.slot_count(), 0);
    }

    #[test]
    fn test_tokenization_kinds_and_positions() {
        let t = template();
        let kinds: Vec<&str> = t.groups()[0].tokens().iter().map(|t| t.kind.name()).collect();
        assert_eq!(kinds, vec!["other", "label", "image"]);
        assert_eq!(t.groups()[0].tokens()[0].content(), r#"<rect width="10" height="10"/>"#);
        assert_eq!(t.groups()[0].tokens()[1].content(), "NAME_TXT");
        assert_eq!(t.groups()[0].tokens()[2].content(), "placeholder.png");
        assert_eq!(
            t.groups()[0].tokens()[2].kind,
            TokenKind::Image { attribute: "xlink:href".into() }
        );

        let second: Vec<&str> = t.groups()[1].tokens().iter().map(|t| t.kind.name()).collect();
        assert_eq!(second, vec!["other", "label", "image"]);
        assert_eq!(t.groups()[1].tokens()[2].content(), "plain.png");
        assert_eq!(t.token_counts(), TokenCounts { label: 2, image: 2, other: 2 });
    }

    #[test]
    fn test_label_modification_normalizes_placeholder_color() {
        let mut t = template();
        assert_eq!(t.modify_group_labels(0, "Falcon").unwrap(), 1);
        let svg = t.to_svg_string();
        assert!(svg.contains(
            r#"<text style="fill:#000000"><tspan style="fill:#000000;font-size:4px">Falcon</tspan></text>"#
        ));
        assert_eq!(t.groups()[0].tokens()[1].content(), "Falcon");
        assert_eq!(t.groups()[0].tokens()[1].original_content(), "NAME_TXT");
    }

    #[test]
    fn test_label_without_sub_run_sets_direct_text() {
        let mut t = template();
        t.modify_group_labels(1, "Owl & co").unwrap();
        assert!(t.to_svg_string().contains("<text>Owl &amp; co</text>"));
    }

    #[test]
    fn test_image_modification_prefers_namespaced_attribute() {
        let mut t = template();
        t.modify_group_images(0, "data:image/png;base64,AAA").unwrap();
        t.modify_group_images(1, "b.png").unwrap();
        let svg = t.to_svg_string();
        assert!(svg.contains(r#"<image xlink:href="data:image/png;base64,AAA"/>"#));
        assert!(svg.contains(r#"<image href="b.png"/>"#));
    }

    #[test]
    fn test_other_token_modification_is_noop_success() {
        let mut t = template();
        let before = t.to_svg_string();
        t.modify_token(0, 0, "<circle/>").unwrap();
        assert_eq!(t.to_svg_string(), before);
        assert!(t.groups()[0].tokens()[0].is_modified());
    }

    #[test]
    fn test_reset_restores_every_token() {
        let mut t = template();
        t.modify_group_labels(0, "A").unwrap();
        t.modify_group_images(0, "x.png").unwrap();
        t.modify_token(0, 0, "other").unwrap();
        t.modify_group_labels(1, "B").unwrap();
        assert_eq!(t.statistics().modified_tokens, 4);

        t.reset_all().unwrap();
        for token in t.groups().iter().flat_map(|g| g.tokens()) {
            assert_eq!(token.content(), token.original_content());
        }
        assert_eq!(t.statistics().modified_tokens, 0);

        let reparsed = SlotTemplate::from_source("again.svg", &t.to_svg_string()).unwrap();
        assert_eq!(reparsed.groups()[0].tokens()[1].content(), "NAME_TXT");
        assert_eq!(reparsed.groups()[0].tokens()[2].content(), "placeholder.png");
    }

    #[test]
    fn test_reset_refills_emptied_label_runs() {
        let svg = r#"<svg><g><text><tspan>NAME</tspan><tspan>TXT</tspan></text><image href="a.png"/></g></svg>"#;
        let mut t = SlotTemplate::from_source("runs.svg", svg).unwrap();
        assert_eq!(t.groups()[0].tokens()[0].content(), "NAMETXT");

        t.modify_group_labels(0, "Falcon").unwrap();
        assert!(t
            .to_svg_string()
            .contains("<text><tspan>Falcon</tspan><tspan></tspan></text>"));

        t.reset_group(0).unwrap();
        assert_eq!(t.to_svg_string(), svg);
        assert!(!t.groups()[0].tokens()[0].is_modified());
    }

    #[test]
    fn test_root_group_is_not_a_slot() {
        let svg = r#"<g><text>TXT</text><image href="a.png"/></g>"#;
        let t = SlotTemplate::from_source("bare.svg", svg).unwrap();
        assert_eq!(t.slot_count(), 0);

        let wrapped = r#"<g><g><text>TXT</text><image href="a.png"/></g></g>"#;
        assert_eq!(SlotTemplate::from_source("wrapped.svg", wrapped).unwrap().slot_count(), 1);
    }

    #[test]
    fn test_failed_label_keeps_sibling_writes() {
        let svg = r#"<svg><g><text>TXT first</text><text>TXT second</text><image href="a.png"/></g></svg>"#;
        let mut t = SlotTemplate::from_source("pair.svg", svg).unwrap();
        // Point the second label at its own text node, which is not an element.
        let text_node = t.document.element(t.groups[0].tokens[1].node).unwrap().children()[0];
        t.groups[0].tokens[1].node = text_node;

        let err = t.modify_group_labels(0, "Wren").unwrap_err();
        assert!(matches!(err, CardError::Mutation(_)));

        let out = t.to_svg_string();
        assert!(out.contains("<text>Wren</text><text>TXT second</text>"));
        assert!(t.groups()[0].tokens()[0].is_modified());
        assert!(!t.groups()[0].tokens()[1].is_modified());
        assert_eq!(t.statistics().modified_tokens, 1);
    }

    #[test]
    fn test_missing_slot_is_mutation_error() {
        let mut t = template();
        let err = t.modify_group_labels(9, "x").unwrap_err();
        assert!(matches!(err, CardError::Mutation(_)));
    }

    #[test]
    fn test_unmodified_template_round_trips() {
        assert_eq!(template().to_svg_string(), TEMPLATE);
    }

    #[test]
    fn test_slice_directive() {
        assert_eq!(parse_slice_directive("<svg/>").unwrap(), None);
        assert_eq!(parse_slice_directive("<!-- (slice=2) --><svg/>").unwrap(), Some(2));
        assert!(parse_slice_directive("(slice=two)").is_err());
        assert!(parse_slice_directive("(slice=0)").is_err());
    }

    #[test]
    fn test_structure_reports_modified_flags() {
        let mut t = template();
        t.modify_group_labels(1, "Heron").unwrap();
        let structure = t.structure();
        assert_eq!(structure.statistics.total_groups, 2);
        assert_eq!(structure.groups[1].token_count, 3);
        assert_eq!(structure.tokens_by_type.label.len(), 2);
        let modified: Vec<bool> = structure.tokens_by_type.label.iter().map(|r| r.modified).collect();
        assert_eq!(modified, vec![false, true]);
        let json = serde_json::to_value(&structure).unwrap();
        assert_eq!(json["groups"][1]["tokens"][1]["type"], "label");
    }

    #[test]
    fn test_load_missing_file() {
        let err = SlotTemplate::load(Path::new("/nonexistent/template.svg")).unwrap_err();
        assert!(matches!(err, CardError::TemplateNotFound(_)));
    }

    #[test]
    fn test_save_writes_without_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.svg");
        let mut t = template();
        t.modify_group_labels(0, "Saved").unwrap();
        t.save(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<svg"));
        assert!(written.contains(">Saved</tspan>"));
    }
}
