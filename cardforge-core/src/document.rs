//! Arena XML Document
//!
//! The document owns every node in a flat arena; everything else refers to
//! nodes through [`NodeId`] handles. Unmodified elements keep their original
//! start-tag bytes, so a parse/save round trip reproduces them exactly.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use quick_xml::escape::{escape, partial_escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::error::CardError;

/// Handle into a [`Document`] arena. Only meaningful for the document that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub key: String,
    /// Value exactly as written in the source, entities still escaped.
    raw: String,
}

impl Attribute {
    pub fn value(&self) -> String {
        unescape_lossy(&self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    /// Qualified name, prefix included (`svg:g`, `g`).
    pub name: String,
    attributes: Vec<Attribute>,
    children: Vec<NodeId>,
    self_closing: bool,
    /// Original start-tag body; dropped as soon as an attribute changes.
    raw_start: Option<String>,
}

impl Element {
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(Attribute::value)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.iter().any(|a| a.key == key)
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    /// Character data, stored escaped.
    Text(String),
    CData(String),
    Comment(String),
    Declaration(String),
    ProcessingInstruction(String),
    DocType(String),
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    top_level: Vec<NodeId>,
    root: NodeId,
    namespaces: BTreeMap<String, String>,
}

/// Local part of a qualified name.
pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Prefix of a qualified name, if any.
pub fn prefix(name: &str) -> Option<&str> {
    name.rsplit_once(':').map(|(p, _)| p)
}

fn unescape_lossy(raw: &str) -> String {
    match unescape(raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, CardError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| CardError::InvalidTemplate(format!("invalid UTF-8: {}", e)))
}

impl Document {
    /// Parse a complete XML document.
    pub fn parse_str(text: &str) -> Result<Self, CardError> {
        let mut reader = Reader::from_str(text);
        let mut nodes: Vec<Node> = Vec::new();
        let mut top_level = Vec::new();
        let mut namespaces = BTreeMap::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            let position = reader.buffer_position();
            let event = reader.read_event().map_err(|e| {
                CardError::InvalidTemplate(format!("malformed markup near byte {}: {}", position, e))
            })?;

            let (node, opens) = match event {
                Event::Start(start) => (
                    Node::Element(element_from_start(&start, false, &mut namespaces)?),
                    true,
                ),
                Event::Empty(start) => (
                    Node::Element(element_from_start(&start, true, &mut namespaces)?),
                    false,
                ),
                Event::End(_) => {
                    if stack.pop().is_none() {
                        return Err(CardError::InvalidTemplate(
                            "closing tag without matching start".into(),
                        ));
                    }
                    continue;
                }
                Event::Text(text) => {
                    let raw = utf8(&text)?;
                    if stack.is_empty() && !raw.trim().is_empty() {
                        return Err(CardError::InvalidTemplate(
                            "text content outside the root element".into(),
                        ));
                    }
                    (Node::Text(raw), false)
                }
                Event::CData(data) => (Node::CData(utf8(&data)?), false),
                Event::Comment(comment) => (Node::Comment(utf8(&comment)?), false),
                Event::Decl(decl) => (Node::Declaration(utf8(&decl)?), false),
                Event::PI(pi) => (Node::ProcessingInstruction(utf8(&pi)?), false),
                Event::DocType(doctype) => (Node::DocType(utf8(&doctype)?), false),
                Event::Eof => break,
            };

            let is_element = matches!(node, Node::Element(_));
            let id = NodeId(nodes.len());
            nodes.push(node);

            match stack.last() {
                Some(parent) => {
                    if let Node::Element(el) = &mut nodes[parent.0] {
                        el.children.push(id);
                    }
                }
                None => {
                    if is_element {
                        if root.is_some() {
                            return Err(CardError::InvalidTemplate(
                                "document has more than one root element".into(),
                            ));
                        }
                        root = Some(id);
                    }
                    top_level.push(id);
                }
            }

            if opens {
                stack.push(id);
            }
        }

        if let Some(open) = stack.last() {
            let name = match &nodes[open.0] {
                Node::Element(el) => el.name.clone(),
                _ => String::new(),
            };
            return Err(CardError::InvalidTemplate(format!(
                "unclosed element <{}>",
                name
            )));
        }

        let root = root
            .ok_or_else(|| CardError::InvalidTemplate("document has no root element".into()))?;

        Ok(Self {
            nodes,
            top_level,
            root,
            namespaces,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.nodes.get(id.0) {
            Some(Node::Element(el)) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element, CardError> {
        match self.nodes.get_mut(id.0) {
            Some(Node::Element(el)) => Ok(el),
            Some(_) => Err(CardError::Mutation(format!(
                "node {} is not an element",
                id.0
            ))),
            None => Err(CardError::Mutation(format!("node {} does not exist", id.0))),
        }
    }

    /// Direct element children of `id`, skipping text, comments and the like.
    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.element(id)
            .map(|el| {
                el.children
                    .iter()
                    .copied()
                    .filter(|c| self.element(*c).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Namespace URI bound to `prefix` anywhere in the document.
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    /// Concatenated, unescaped character data of `id` and its descendants,
    /// trimmed at both ends.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out.trim().to_string()
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.nodes.get(id.0) {
            Some(Node::Text(raw)) => out.push_str(&unescape_lossy(raw)),
            Some(Node::CData(data)) => out.push_str(data),
            Some(Node::Element(el)) => {
                for child in &el.children {
                    self.collect_text(*child, out);
                }
            }
            _ => {}
        }
    }

    // --- Mutation ---

    /// Set (or add) an attribute. `value` is unescaped text.
    pub fn set_attribute(&mut self, id: NodeId, key: &str, value: &str) -> Result<(), CardError> {
        let el = self.element_mut(id)?;
        let raw = escape(value).into_owned();
        match el.attributes.iter_mut().find(|a| a.key == key) {
            Some(attr) => {
                if attr.raw == raw {
                    return Ok(());
                }
                attr.raw = raw;
            }
            None => el.attributes.push(Attribute {
                key: key.to_string(),
                raw,
            }),
        }
        el.raw_start = None;
        Ok(())
    }

    /// Replace every child of `id` with a single text node holding `text`.
    /// Detached nodes stay in the arena but are no longer reachable.
    pub fn replace_children_with_text(&mut self, id: NodeId, text: &str) -> Result<(), CardError> {
        self.element_mut(id)?;
        let text_id = NodeId(self.nodes.len());
        self.nodes
            .push(Node::Text(partial_escape(text).into_owned()));
        let el = self.element_mut(id)?;
        el.children.clear();
        el.children.push(text_id);
        Ok(())
    }

    // --- Serialization ---

    /// Serialize the whole document. Nothing is added that was not in the
    /// source: no declaration, no trailing newline.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        for id in &self.top_level {
            self.write_node(*id, &mut out);
        }
        out
    }

    /// Serialize a single node and its subtree.
    pub fn node_to_string(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        match node {
            Node::Element(el) => {
                out.push('<');
                match &el.raw_start {
                    Some(raw) => out.push_str(raw),
                    None => {
                        out.push_str(&el.name);
                        for attr in &el.attributes {
                            let quote = if attr.raw.contains('"') { '\'' } else { '"' };
                            let _ = write!(out, " {}={}{}{}", attr.key, quote, attr.raw, quote);
                        }
                    }
                }
                if el.self_closing && el.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in &el.children {
                    self.write_node(*child, out);
                }
                let _ = write!(out, "</{}>", el.name);
            }
            Node::Text(raw) => out.push_str(raw),
            Node::CData(data) => {
                let _ = write!(out, "<![CDATA[{}]]>", data);
            }
            Node::Comment(text) => {
                let _ = write!(out, "<!--{}-->", text);
            }
            Node::Declaration(decl) => {
                let _ = write!(out, "<?{}?>", decl);
            }
            Node::ProcessingInstruction(pi) => {
                let _ = write!(out, "<?{}?>", pi);
            }
            Node::DocType(doctype) => {
                let _ = write!(out, "<!DOCTYPE {}>", doctype.trim_start());
            }
        }
    }
}

fn element_from_start(
    start: &BytesStart<'_>,
    self_closing: bool,
    namespaces: &mut BTreeMap<String, String>,
) -> Result<Element, CardError> {
    let name = utf8(start.name().as_ref())?;
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| {
            CardError::InvalidTemplate(format!("bad attribute on <{}>: {}", name, e))
        })?;
        let key = utf8(attr.key.as_ref())?;
        let raw = utf8(&attr.value)?;
        if let Some(ns_prefix) = key.strip_prefix("xmlns:") {
            namespaces
                .entry(ns_prefix.to_string())
                .or_insert_with(|| unescape_lossy(&raw));
        }
        attributes.push(Attribute { key, raw });
    }

    let mut raw_start = utf8(start)?;
    if self_closing && raw_start.ends_with('/') {
        raw_start.pop();
    }

    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        self_closing,
        raw_start: Some(raw_start),
    })
}
