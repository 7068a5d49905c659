// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-of-element capture over the XML stream
//!
//! A pass declares which elements interest it and which descendant fields it
//! wants. The walker keeps one frame per open element, fills the nearest
//! interesting ancestor while its subtree streams by, and hands the finished
//! capture to the visitor when the end tag arrives. The frame has already
//! been popped at that point, so it is released whatever the visitor does.

use crate::xml::{Attr, OpenTag, ReleaseStats, XmlEvent, XmlStream};
use ifcxml_model::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::BufRead;
use std::path::Path;

/// Reference pointer found inside a captured element
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pointer {
    /// Local name of the direct child the pointer was found under
    pub slot: String,
    /// Local name of the element carrying the pointer
    pub carrier: String,
    /// Pointer value (fragment marker stripped)
    pub target: String,
}

/// Everything captured for one interesting element
#[derive(Clone, Debug, Default)]
pub struct Captured {
    pub local: String,
    pub attrs: Vec<Attr>,
    pub line: u64,
    pub column: u64,
    /// Own character data, trimmed
    pub text: String,
    /// First descendant text per requested field name, in document order
    pub fields: FxHashMap<String, String>,
    pub pointers: Vec<Pointer>,
    /// Direct children with non-empty text, in document order
    pub children: Vec<(String, String)>,
}

impl Captured {
    fn from_tag(tag: OpenTag) -> Self {
        Self {
            local: tag.local,
            attrs: tag.attrs,
            line: tag.line,
            column: tag.column,
            ..Default::default()
        }
    }

    /// Attribute value by local name
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.local == local && !a.qname.starts_with("xmlns"))
            .map(|a| a.value.as_str())
    }

    /// First nested text of a field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Attribute of that name, else the first nested text
    pub fn attr_or_field(&self, name: &str) -> Option<&str> {
        self.attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.field(name))
    }

    /// Pointers found under a direct child slot
    pub fn pointers_in<'a>(&'a self, slot: &'a str) -> impl Iterator<Item = &'a Pointer> + 'a {
        self.pointers.iter().filter(move |p| p.slot == slot)
    }

    /// First pointer found under any of the given slots
    pub fn first_pointer(&self, slots: &[&str]) -> Option<&str> {
        self.pointers
            .iter()
            .find(|p| slots.contains(&p.slot.as_str()))
            .map(|p| p.target.as_str())
    }
}

/// What a pass wants captured
pub struct CaptureSpec<'a> {
    interesting: &'a dyn Fn(&OpenTag) -> bool,
    fields: FxHashSet<String>,
}

impl<'a> CaptureSpec<'a> {
    pub fn new(interesting: &'a dyn Fn(&OpenTag) -> bool) -> Self {
        Self {
            interesting,
            fields: FxHashSet::default(),
        }
    }

    /// Request first-descendant text for these element names
    pub fn with_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(names.into_iter().map(Into::into));
        self
    }
}

struct Frame {
    local: String,
    /// Present on interesting elements
    captured: Option<Captured>,
    /// Sequence number at which each captured field was first seen
    field_seq: FxHashMap<String, u64>,
    /// Stack index of the nearest interesting ancestor
    owner: Option<usize>,
    /// Depth below the owner (1 = direct child)
    rel_depth: usize,
    slot: Option<String>,
    seq: u64,
    text: String,
}

/// Stream a document and call `visit` on every interesting element
///
/// Returns the release instrumentation of the underlying stream.
pub fn walk<R, F>(stream: &mut XmlStream<R>, spec: &CaptureSpec<'_>, mut visit: F) -> Result<ReleaseStats>
where
    R: BufRead,
    F: FnMut(Captured) -> Result<()>,
{
    let mut stack: Vec<Frame> = Vec::new();
    let mut seq: u64 = 0;

    loop {
        match stream.next_event()? {
            XmlEvent::Open(tag) => {
                seq += 1;
                let (owner, rel_depth, slot) = match stack.last() {
                    Some(parent) if parent.captured.is_some() => {
                        (Some(stack.len() - 1), 1, Some(tag.local.clone()))
                    }
                    Some(parent) => match parent.owner {
                        Some(owner) => (Some(owner), parent.rel_depth + 1, parent.slot.clone()),
                        None => (None, 0, None),
                    },
                    None => (None, 0, None),
                };

                if let (Some(owner), Some(slot)) = (owner, slot.as_ref()) {
                    if let Some(target) = pointer_at(&tag, rel_depth) {
                        if let Some(captured) = stack[owner].captured.as_mut() {
                            captured.pointers.push(Pointer {
                                slot: slot.clone(),
                                carrier: tag.local.clone(),
                                target,
                            });
                        }
                    }
                }

                let local = tag.local.clone();
                let captured = (spec.interesting)(&tag).then(|| Captured::from_tag(tag));
                stack.push(Frame {
                    local,
                    captured,
                    field_seq: FxHashMap::default(),
                    owner,
                    rel_depth,
                    slot,
                    seq,
                    text: String::new(),
                });
            }
            XmlEvent::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    if top.captured.is_some() || top.owner.is_some() {
                        top.text.push_str(&text);
                    }
                }
            }
            XmlEvent::Close { .. } => {
                let Some(frame) = stack.pop() else {
                    continue;
                };
                if let Some(mut captured) = frame.captured {
                    captured.text = frame.text.trim().to_string();
                    visit(captured)?;
                } else if let Some(owner) = frame.owner {
                    let text = frame.text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let owner_frame = &mut stack[owner];
                    let Some(captured) = owner_frame.captured.as_mut() else {
                        continue;
                    };
                    if frame.rel_depth == 1 {
                        captured.children.push((frame.local.clone(), text.to_string()));
                    }
                    if spec.fields.contains(&frame.local) {
                        let earlier = owner_frame
                            .field_seq
                            .get(&frame.local)
                            .is_some_and(|&s| s < frame.seq);
                        if !earlier {
                            owner_frame.field_seq.insert(frame.local.clone(), frame.seq);
                            captured.fields.insert(frame.local, text.to_string());
                        }
                    }
                }
            }
            XmlEvent::Eof => return Ok(stream.stats()),
        }
    }
}

/// Open `path` and walk it
pub fn walk_file<F>(path: &Path, spec: &CaptureSpec<'_>, visit: F) -> Result<ReleaseStats>
where
    F: FnMut(Captured) -> Result<()>,
{
    let mut stream = XmlStream::open(path)?;
    walk(&mut stream, spec, visit)
}

/// Pointer contributed by an element at `rel_depth` below its owner
///
/// The slot element and its direct children may carry `href`/`ref`. A direct
/// child of the slot without one is an inline definition and points at its
/// own identifier.
fn pointer_at(tag: &OpenTag, rel_depth: usize) -> Option<String> {
    if rel_depth == 0 || rel_depth > 2 {
        return None;
    }
    if let Some(p) = tag.pointer() {
        return Some(p.to_string());
    }
    if rel_depth == 2 {
        return tag
            .attr("id")
            .or_else(|| tag.attr("GlobalId"))
            .map(str::to_string);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r##"<root>
  <Thing id="t1" Name="attr-name">
    <Description>outer</Description>
    <Wrapper><Description>inner</Description></Wrapper>
    <IsDefinedBy><IfcRelDefinesByProperties ref="p1"/></IsDefinedBy>
    <IsDefinedBy href="#p2"/>
    <Nested><Thing id="t2"><Description>nested</Description></Thing></Nested>
    <Tag>T-1</Tag>
  </Thing>
</root>"##;

    fn capture(xml: &str) -> (Vec<Captured>, ReleaseStats) {
        let interesting = |t: &OpenTag| t.local == "Thing";
        let spec = CaptureSpec::new(&interesting).with_fields(["Description", "Tag"]);
        let mut out = Vec::new();
        let mut stream = XmlStream::from_text(xml);
        let stats = walk(&mut stream, &spec, |c| {
            out.push(c);
            Ok(())
        })
        .unwrap();
        (out, stats)
    }

    #[test]
    fn test_nested_capture_stops_at_entity_boundary() {
        let (items, _) = capture(DOC);
        assert_eq!(items.len(), 2);
        // Inner entity closes first
        assert_eq!(items[0].attr("id"), Some("t2"));
        assert_eq!(items[0].field("Description"), Some("nested"));

        let outer = &items[1];
        assert_eq!(outer.field("Description"), Some("outer"));
        assert_eq!(outer.field("Tag"), Some("T-1"));
        assert_eq!(outer.attr_or_field("Name"), Some("attr-name"));
    }

    #[test]
    fn test_pointers_keyed_by_slot() {
        let (items, _) = capture(DOC);
        let outer = &items[1];
        let defs: Vec<_> = outer
            .pointers_in("IsDefinedBy")
            .map(|p| p.target.as_str())
            .collect();
        assert_eq!(defs, vec!["p1", "p2"]);
        // Inline nested entity contributes its own id under its slot
        assert_eq!(outer.first_pointer(&["Nested"]), Some("t2"));
    }

    #[test]
    fn test_first_descendant_in_document_order() {
        let xml = "<root><Thing><Description>a<Description>b</Description></Description></Thing></root>";
        let (items, _) = capture(xml);
        // Own text wins over the nested element's
        assert_eq!(items[0].field("Description"), Some("a"));

        let xml = "<root><Thing><W><Description>first</Description></W><Description>second</Description></Thing></root>";
        let (items, _) = capture(xml);
        assert_eq!(items[0].field("Description"), Some("first"));
    }

    #[test]
    fn test_direct_children_text() {
        let (items, _) = capture(DOC);
        let outer = &items[1];
        assert!(outer
            .children
            .contains(&("Description".to_string(), "outer".to_string())));
        assert!(outer.children.contains(&("Tag".to_string(), "T-1".to_string())));
        assert!(!outer.children.iter().any(|(k, _)| k == "Wrapper"));
    }

    #[test]
    fn test_live_frames_bounded_by_depth() {
        let mut xml = String::from("<root>");
        for i in 0..500 {
            xml.push_str(&format!("<Thing id=\"t{i}\"><Description>d</Description></Thing>"));
        }
        xml.push_str("</root>");
        let (items, stats) = capture(&xml);
        assert_eq!(items.len(), 500);
        assert_eq!(stats.released, 1001);
        assert_eq!(stats.peak_live, 3);
    }
}
