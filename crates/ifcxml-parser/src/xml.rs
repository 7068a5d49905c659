// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Forward-only XML event stream with positions
//!
//! Wraps `quick-xml` and adds what every ingestion pass needs on top of raw
//! events: line/column of each event, well-formedness checks and a stack of
//! open element names that is the only document state ever held. Frames are
//! released on their end tag, so live memory follows document depth.

use ifcxml_model::{IngestError, Result};
use memchr::memchr_iter;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Read buffer for file-backed streams
const READ_CAPACITY: usize = 64 * 1024;

/// Line/column bookkeeping over a buffered byte source
///
/// Only newlines that the reader has consumed but not yet been asked about
/// are kept, so memory stays bounded by the read-ahead window.
pub struct PositionTracker<R> {
    inner: R,
    consumed: u64,
    newlines: VecDeque<u64>,
    line: u64,
    line_start: u64,
}

impl<R: BufRead> PositionTracker<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            consumed: 0,
            newlines: VecDeque::new(),
            line: 1,
            line_start: 0,
        }
    }

    /// 1-based line and column of a consumed byte offset
    ///
    /// Offsets must be queried in non-decreasing order.
    pub fn locate(&mut self, offset: u64) -> (u64, u64) {
        while let Some(&nl) = self.newlines.front() {
            if nl >= offset {
                break;
            }
            self.newlines.pop_front();
            self.line += 1;
            self.line_start = nl + 1;
        }
        (self.line, offset.saturating_sub(self.line_start) + 1)
    }

    fn record(&mut self, bytes: &[u8]) {
        let base = self.consumed;
        self.newlines
            .extend(memchr_iter(b'\n', bytes).map(|i| base + i as u64));
        self.consumed += bytes.len() as u64;
    }
}

impl<R: BufRead> Read for PositionTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.record(&buf[..n]);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for PositionTracker<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if let Ok(buf) = self.inner.fill_buf() {
            let end = amt.min(buf.len());
            let base = self.consumed;
            self.newlines
                .extend(memchr_iter(b'\n', &buf[..end]).map(|i| base + i as u64));
        }
        self.consumed += amt as u64;
        self.inner.consume(amt);
    }
}

/// One attribute of a start tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attr {
    /// Qualified name as written (`xmlns:ifc`, `xsi:nil`, `id`)
    pub qname: String,
    /// Name without prefix
    pub local: String,
    /// Unescaped value
    pub value: String,
}

/// A start tag (or the opening half of an empty element)
#[derive(Clone, Debug)]
pub struct OpenTag {
    pub qname: String,
    pub local: String,
    pub attrs: Vec<Attr>,
    pub line: u64,
    pub column: u64,
    /// Nesting depth, 1 for the root
    pub depth: usize,
}

impl OpenTag {
    /// Attribute value by local name
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.local == local && !a.qname.starts_with("xmlns"))
            .map(|a| a.value.as_str())
    }

    /// Namespace declarations made on this tag, as `(prefix, uri)`
    pub fn namespace_decls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().filter_map(|a| {
            if a.qname == "xmlns" {
                Some(("", a.value.as_str()))
            } else {
                a.qname
                    .strip_prefix("xmlns:")
                    .map(|prefix| (prefix, a.value.as_str()))
            }
        })
    }

    /// Reference pointer carried by the tag (`href` first, then `ref`)
    ///
    /// A leading `#` fragment marker is stripped.
    pub fn pointer(&self) -> Option<&str> {
        self.attr("href")
            .map(|h| h.trim_start_matches('#'))
            .or_else(|| self.attr("ref"))
            .filter(|p| !p.is_empty())
    }
}

/// Stream event
#[derive(Clone, Debug)]
pub enum XmlEvent {
    Open(OpenTag),
    /// Character data (entities already expanded)
    Text(String),
    Close { local: String, depth: usize },
    Eof,
}

/// Node release instrumentation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleaseStats {
    /// Frames dropped so far (monotonic)
    pub released: u64,
    /// Most frames simultaneously open (bounded by document depth)
    pub peak_live: usize,
}

/// Forward-only, well-formedness checking XML stream
pub struct XmlStream<R: BufRead> {
    reader: Reader<PositionTracker<R>>,
    buf: Vec<u8>,
    open: Vec<String>,
    seen_root: bool,
    pending_close: bool,
    position: (u64, u64),
    stats: ReleaseStats,
}

impl XmlStream<BufReader<File>> {
    /// Open a file-backed stream
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::with_capacity(READ_CAPACITY, file)))
    }
}

impl<'a> XmlStream<&'a [u8]> {
    /// Stream over an in-memory document
    pub fn from_text(content: &'a str) -> Self {
        Self::from_reader(content.as_bytes())
    }
}

impl<R: BufRead> XmlStream<R> {
    pub fn from_reader(inner: R) -> Self {
        let mut reader = Reader::from_reader(PositionTracker::new(inner));
        // End names are matched against our own stack
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            buf: Vec::with_capacity(1024),
            open: Vec::new(),
            seen_root: false,
            pending_close: false,
            position: (1, 1),
            stats: ReleaseStats::default(),
        }
    }

    /// Line and column of the most recent event
    pub fn position(&self) -> (u64, u64) {
        self.position
    }

    /// Current nesting depth
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn stats(&self) -> ReleaseStats {
        self.stats
    }

    fn syntax(&self, message: impl Into<String>) -> IngestError {
        IngestError::syntax(self.position.0, self.position.1, message)
    }

    fn push(&mut self, qname: String) -> Result<()> {
        if self.open.is_empty() && self.seen_root {
            return Err(self.syntax("Extra content at the end of the document"));
        }
        self.seen_root = true;
        self.open.push(qname);
        self.stats.peak_live = self.stats.peak_live.max(self.open.len());
        Ok(())
    }

    fn pop(&mut self, qname: Option<&str>) -> Result<(String, usize)> {
        let depth = self.open.len();
        let expected = self
            .open
            .pop()
            .ok_or_else(|| self.syntax("Unexpected end tag"))?;
        self.stats.released += 1;
        if let Some(found) = qname {
            if found != expected {
                return Err(self.syntax(format!(
                    "Opening and ending tag mismatch: {} and {}",
                    expected, found
                )));
            }
        }
        Ok((local_part(&expected).to_string(), depth))
    }

    fn open_tag(&self, start: &BytesStart<'_>) -> Result<OpenTag> {
        let qname = utf8(start.name().as_ref()).map_err(|m| self.syntax(m))?;
        let local = utf8(start.local_name().as_ref()).map_err(|m| self.syntax(m))?;
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.syntax(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| self.syntax(e.to_string()))?
                .into_owned();
            attrs.push(Attr {
                qname: utf8(attr.key.as_ref()).map_err(|m| self.syntax(m))?,
                local: utf8(attr.key.local_name().as_ref()).map_err(|m| self.syntax(m))?,
                value,
            });
        }
        Ok(OpenTag {
            qname,
            local,
            attrs,
            line: self.position.0,
            column: self.position.1,
            depth: self.open.len() + 1,
        })
    }

    /// Next event
    ///
    /// Empty elements are reported as an `Open` immediately followed by a
    /// `Close`. Comments, processing instructions and declarations are skipped.
    pub fn next_event(&mut self) -> Result<XmlEvent> {
        if self.pending_close {
            self.pending_close = false;
            let (local, depth) = self.pop(None)?;
            return Ok(XmlEvent::Close { local, depth });
        }
        loop {
            let start = self.reader.buffer_position() as u64;
            self.position = self.reader.get_mut().locate(start);
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => return Err(self.syntax(e.to_string())),
            };
            match event {
                Event::Start(ref e) => {
                    let tag = self.open_tag(e)?;
                    self.push(tag.qname.clone())?;
                    return Ok(XmlEvent::Open(tag));
                }
                Event::Empty(ref e) => {
                    let tag = self.open_tag(e)?;
                    self.push(tag.qname.clone())?;
                    self.pending_close = true;
                    return Ok(XmlEvent::Open(tag));
                }
                Event::End(ref e) => {
                    let qname = utf8(e.name().as_ref()).map_err(|m| self.syntax(m))?;
                    let (local, depth) = self.pop(Some(&qname))?;
                    return Ok(XmlEvent::Close { local, depth });
                }
                Event::Text(ref t) => {
                    let text = t.unescape().map_err(|e| self.syntax(e.to_string()))?;
                    if self.open.is_empty() {
                        if text.trim().is_empty() {
                            continue;
                        }
                        let message = if self.seen_root {
                            "Extra content at the end of the document"
                        } else {
                            "Start tag expected, '<' not found"
                        };
                        return Err(self.syntax(message));
                    }
                    return Ok(XmlEvent::Text(text.into_owned()));
                }
                Event::CData(ref c) => {
                    if self.open.is_empty() {
                        return Err(self.syntax("CDATA section outside the root element"));
                    }
                    let text = utf8(c).map_err(|m| self.syntax(m))?;
                    return Ok(XmlEvent::Text(text));
                }
                Event::Eof => {
                    if let Some(name) = self.open.last() {
                        return Err(self.syntax(format!("Premature end of data in tag {}", name)));
                    }
                    if !self.seen_root {
                        return Err(self.syntax("Document is empty"));
                    }
                    return Ok(XmlEvent::Eof);
                }
                _ => continue,
            }
        }
    }

    /// Consume the rest of the document, checking well-formedness only
    pub fn drain(&mut self) -> Result<ReleaseStats> {
        while !matches!(self.next_event()?, XmlEvent::Eof) {}
        Ok(self.stats)
    }
}

/// Strip a namespace prefix from a qualified name
pub fn local_part(qname: &str) -> &str {
    qname.rsplit_once(':').map(|(_, l)| l).unwrap_or(qname)
}

fn utf8(bytes: &[u8]) -> std::result::Result<String, String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| format!("invalid UTF-8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(xml: &str) -> Result<Vec<XmlEvent>> {
        let mut stream = XmlStream::from_text(xml);
        let mut out = Vec::new();
        loop {
            let event = stream.next_event()?;
            if matches!(event, XmlEvent::Eof) {
                return Ok(out);
            }
            out.push(event);
        }
    }

    #[test]
    fn test_positions() {
        let xml = "<?xml version=\"1.0\"?>\n<root>\n  <child a=\"1\"/>\n    <other>t</other>\n</root>\n";
        let mut stream = XmlStream::from_text(xml);
        let mut opens = Vec::new();
        loop {
            match stream.next_event().unwrap() {
                XmlEvent::Open(tag) => {
                    assert!(tag.column >= 1);
                    opens.push((tag.local, tag.line));
                }
                XmlEvent::Eof => break,
                _ => {}
            }
        }
        assert_eq!(
            opens,
            vec![
                ("root".to_string(), 2),
                ("child".to_string(), 3),
                ("other".to_string(), 4),
            ]
        );
    }

    #[test]
    fn test_empty_element_closes() {
        let evs = events("<a><b x=\"&amp;1\"/></a>").unwrap();
        assert!(matches!(&evs[1], XmlEvent::Open(t) if t.attr("x") == Some("&1")));
        assert!(matches!(&evs[2], XmlEvent::Close { local, depth: 2 } if local == "b"));
    }

    #[test]
    fn test_mismatched_end_tag() {
        let err = events("<a>\n<b></c></a>").unwrap_err();
        match err {
            IngestError::XmlSyntax { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("mismatch"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_and_extra_roots() {
        assert!(matches!(
            events("<a><b></b>"),
            Err(IngestError::XmlSyntax { .. })
        ));
        assert!(matches!(
            events("<a/><b/>"),
            Err(IngestError::XmlSyntax { .. })
        ));
        assert!(matches!(
            events("<a/>trailing"),
            Err(IngestError::XmlSyntax { .. })
        ));
        assert!(matches!(events("   "), Err(IngestError::XmlSyntax { .. })));
    }

    #[test]
    fn test_release_stats_track_depth() {
        let mut stream = XmlStream::from_text("<a><b><c/></b><b><c/><c/></b></a>");
        let stats = stream.drain().unwrap();
        assert_eq!(stats.released, 6);
        assert_eq!(stats.peak_live, 3);
    }

    #[test]
    fn test_pointer_strips_fragment() {
        let evs = events("<r><s href=\"#i42\"/><t ref=\"i7\"/></r>").unwrap();
        let pointers: Vec<_> = evs
            .iter()
            .filter_map(|e| match e {
                XmlEvent::Open(t) => t.pointer().map(str::to_string),
                _ => None,
            })
            .collect();
        assert_eq!(pointers, vec!["i42", "i7"]);
    }
}
