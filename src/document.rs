//! Queryable element tree built from repaired XBRL text
//!
//! Element names and attribute keys are lower-cased while the tree is built,
//! so every lookup is case-insensitive by construction.

use crate::{Error, Result};
use bitflags::bitflags;
use compact_str::CompactString;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// `<![...]>` markup: CDATA sections, and the `<![if ...]>`/`<![endif]>`
/// conditionals Word-generated HTML is full of, which the XML reader rejects.
static CONDITIONAL_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!\[[^<>]*>").expect("invalid conditional markup regex"));

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ElementFlags: u8 {
        /// Written as `<name/>`.
        const SELF_CLOSING = 0b0000_0001;
        /// Never closed by its own tag: closed by an outer closing tag or by
        /// the end of input.
        const IMPLICITLY_CLOSED = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(u32);

impl NodeId {
    #[inline(always)]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: CompactString,
    attributes: Vec<(CompactString, CompactString)>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    flags: ElementFlags,
}

/// Case-insensitive regular expression over element names.
///
/// Matching uses search semantics: `assets` matches `us-gaap:assetscurrent`.
/// Anchor with `^`/`$` for exact names.
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self { regex })
    }

    /// Pattern that matches exactly one element name.
    pub fn exact(name: &str) -> Result<Self> {
        Self::new(&format!("^{}$", regex::escape(name)))
    }

    #[inline]
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Parsed document: an arena of elements in document order.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    prefix: CompactString,
    recoveries: usize,
}

impl Document {
    /// Builds the tree from already repaired text and checks that it looks
    /// like an XBRL instance.
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = TreeBuilder::new().build(text);

        let root_pattern = NamePattern::new("xbrl*:*")?;
        if doc.find_first(&root_pattern).is_none() {
            return Err(Error::EmptyDocument);
        }

        let context_pattern = NamePattern::new("context")?;
        let context = doc
            .find_first(&context_pattern)
            .ok_or(Error::MissingContextRoot)?;
        doc.prefix = match context.name().split_once(':') {
            Some((prefix, _)) => CompactString::from(format!("{}:", prefix)),
            None => CompactString::default(),
        };

        tracing::debug!(
            elements = doc.nodes.len(),
            prefix = %doc.prefix,
            recoveries = doc.recoveries,
            "document indexed"
        );

        Ok(doc)
    }

    /// Namespace alias of the context elements (`"xbrli:"`), or empty.
    pub fn root_prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of times reading resumed after markup the XML reader rejected.
    pub fn recoveries(&self) -> usize {
        self.recoveries
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level elements.
    pub fn roots(&self) -> impl Iterator<Item = Element<'_>> {
        self.roots.iter().map(move |&id| Element { doc: self, id })
    }

    /// Every element in document order.
    pub fn elements(&self) -> impl Iterator<Item = Element<'_>> {
        (0..self.nodes.len()).map(move |i| Element {
            doc: self,
            id: NodeId(i as u32),
        })
    }

    /// Elements whose name matches `pattern`, in document order.
    pub fn matching<'d, 'p>(
        &'d self,
        pattern: &'p NamePattern,
    ) -> impl Iterator<Item = Element<'d>> + 'p
    where
        'd: 'p,
    {
        self.elements().filter(move |e| pattern.is_match(e.name()))
    }

    pub fn find_all(&self, pattern: &NamePattern) -> Vec<Element<'_>> {
        self.matching(pattern).collect()
    }

    pub fn find_first(&self, pattern: &NamePattern) -> Option<Element<'_>> {
        self.matching(pattern).next()
    }

    #[inline(always)]
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
}

/// Borrowed handle to one element of a [`Document`].
#[derive(Clone, Copy)]
pub struct Element<'d> {
    doc: &'d Document,
    id: NodeId,
}

impl<'d> Element<'d> {
    /// Lower-cased qualified name, e.g. `us-gaap:assets`.
    pub fn name(&self) -> &'d str {
        &self.doc.node(self.id).name
    }

    /// Part of the name after the namespace prefix.
    pub fn local_name(&self) -> &'d str {
        let name = self.name();
        name.split_once(':').map_or(name, |(_, local)| local)
    }

    /// Attribute value by key, matched case-insensitively.
    pub fn attr(&self, key: &str) -> Option<&'d str> {
        let node = self.doc.node(self.id);
        node.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Direct text content, entities decoded, CDATA included verbatim.
    pub fn text(&self) -> &'d str {
        &self.doc.node(self.id).text
    }

    pub fn flags(&self) -> ElementFlags {
        self.doc.node(self.id).flags
    }

    pub fn parent(&self) -> Option<Element<'d>> {
        self.doc
            .node(self.id)
            .parent
            .map(|id| Element { doc: self.doc, id })
    }

    pub fn children(&self) -> impl Iterator<Item = Element<'d>> {
        let doc = self.doc;
        doc.node(self.id)
            .children
            .iter()
            .map(move |&id| Element { doc, id })
    }

    /// Direct child with exactly this (lower-cased) name.
    pub fn child(&self, name: &str) -> Option<Element<'d>> {
        self.children().find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Descendants in document order, excluding `self`.
    pub fn descendants(&self) -> Descendants<'d> {
        let mut stack: Vec<NodeId> = self.doc.node(self.id).children.clone();
        stack.reverse();
        Descendants {
            doc: self.doc,
            stack,
        }
    }

    /// First descendant with exactly this name, depth-first.
    pub fn find(&self, name: &str) -> Option<Element<'d>> {
        self.descendants()
            .find(|d| d.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("text", &self.text())
            .finish()
    }
}

pub struct Descendants<'d> {
    doc: &'d Document,
    stack: Vec<NodeId>,
}

impl<'d> Iterator for Descendants<'d> {
    type Item = Element<'d>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.node(id).children.iter().rev().copied());
        Some(Element { doc: self.doc, id })
    }
}

struct TreeBuilder {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    open: Vec<NodeId>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            nodes: Vec::with_capacity(1024),
            roots: Vec::new(),
            open: Vec::with_capacity(32),
        }
    }

    fn build(mut self, text: &str) -> Document {
        let text = CONDITIONAL_MARKUP.replace_all(text, |caps: &regex::Captures<'_>| {
            let markup = &caps[0];
            if markup.starts_with("<![CDATA[") {
                markup.to_string()
            } else {
                String::new()
            }
        });

        let mut offset = 0;
        let mut recoveries = 0;
        while let Some(failed_at) = self.read(&text[offset..]) {
            recoveries += 1;
            match next_tag_start(&text, offset + failed_at + 1) {
                Some(next) => offset = next,
                None => break,
            }
        }

        for id in self.open.drain(..) {
            self.nodes[id.index()].flags |= ElementFlags::IMPLICITLY_CLOSED;
        }

        Document {
            nodes: self.nodes,
            roots: self.roots,
            prefix: CompactString::default(),
            recoveries,
        }
    }

    /// Feeds every event of `text` into the tree. Returns the offset of the
    /// markup the reader rejected, if it stopped on one.
    fn read(&mut self, text: &str) -> Option<usize> {
        let mut reader = Reader::from_str(text);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.check_comments = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = self.push(&e, ElementFlags::empty());
                    self.open.push(id);
                }
                Ok(Event::Empty(e)) => {
                    self.push(&e, ElementFlags::SELF_CLOSING);
                }
                Ok(Event::End(e)) => {
                    let name = lowercase_name(e.name().as_ref());
                    self.close(&name);
                }
                Ok(Event::Text(e)) => {
                    let text = match e.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(_) => String::from_utf8_lossy(&e).into_owned(),
                    };
                    self.append_text(&text);
                }
                Ok(Event::CData(e)) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    self.append_text(&text);
                }
                Ok(Event::Eof) => return None,
                Ok(_) => {}
                Err(e) => {
                    let position = reader.error_position() as usize;
                    tracing::warn!(
                        error = %e,
                        position,
                        "skipping markup the XML reader rejected"
                    );
                    return Some(position);
                }
            }
        }
    }

    fn push(&mut self, start: &BytesStart<'_>, flags: ElementFlags) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let parent = self.open.last().copied();

        let attributes = start
            .attributes()
            .with_checks(false)
            .flatten()
            .map(|attr| {
                let key = lowercase_name(attr.key.as_ref());
                let value = match attr.unescape_value() {
                    Ok(value) => CompactString::from(value.as_ref()),
                    Err(_) => CompactString::from(String::from_utf8_lossy(&attr.value).as_ref()),
                };
                (key, value)
            })
            .collect();

        self.nodes.push(Node {
            name: lowercase_name(start.name().as_ref()),
            attributes,
            text: String::new(),
            parent,
            children: Vec::new(),
            flags,
        });

        match parent {
            Some(parent) => self.nodes[parent.index()].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Closes the nearest open element with this name. Elements opened after
    /// it are closed implicitly; an end tag with no open counterpart is
    /// dropped.
    fn close(&mut self, name: &str) {
        let Some(pos) = self
            .open
            .iter()
            .rposition(|&id| self.nodes[id.index()].name == name)
        else {
            return;
        };

        for id in self.open.drain(pos + 1..) {
            self.nodes[id.index()].flags |= ElementFlags::IMPLICITLY_CLOSED;
        }
        self.open.pop();
    }

    fn append_text(&mut self, text: &str) {
        if let Some(&id) = self.open.last() {
            self.nodes[id.index()].text.push_str(text);
        }
    }
}

/// Byte offset of the first `<` at or after `from`.
fn next_tag_start(text: &str, from: usize) -> Option<usize> {
    text.as_bytes()
        .get(from..)?
        .iter()
        .position(|&b| b == b'<')
        .map(|i| from + i)
}

#[inline]
fn lowercase_name(raw: &[u8]) -> CompactString {
    CompactString::from(String::from_utf8_lossy(raw).to_lowercase())
}
