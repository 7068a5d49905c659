// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Schema dialect detection from the document prologue

use crate::xml::{OpenTag, XmlEvent, XmlStream};
use ifcxml_model::{IfcVersion, IngestError, Result};
use log::debug;
use memchr::memmem;
use std::io::BufRead;
use std::path::Path;

/// Classifies a document as IFC2X3 or IFC4
///
/// Reads up to the root start tag and no further.
#[derive(Clone, Copy, Debug, Default)]
pub struct VersionDetector;

impl VersionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect the dialect of a file
    ///
    /// `Ok(None)` means no known pattern matched, including a prologue that is
    /// not well-formed. IO failures are returned as errors.
    pub fn detect(&self, path: &Path) -> Result<Option<IfcVersion>> {
        let mut stream = XmlStream::open(path)?;
        self.detect_stream(&mut stream)
    }

    /// Detect the dialect of a stream positioned at the document start
    pub fn detect_stream<R: BufRead>(&self, stream: &mut XmlStream<R>) -> Result<Option<IfcVersion>> {
        loop {
            match stream.next_event() {
                Ok(XmlEvent::Open(root)) => {
                    let version = detect_root(&root);
                    debug!("root <{}> detected as {:?}", root.qname, version);
                    return Ok(version);
                }
                Ok(XmlEvent::Eof) => return Ok(None),
                Ok(_) => continue,
                Err(IngestError::Io(e)) => return Err(IngestError::Io(e)),
                Err(e) => {
                    debug!("prologue unreadable: {}", e);
                    return Ok(None);
                }
            }
        }
    }
}

/// Classify a root start tag by its namespace declarations, then its name
pub fn detect_root(root: &OpenTag) -> Option<IfcVersion> {
    root.namespace_decls()
        .find_map(|(_, uri)| from_namespace(uri))
        .or_else(|| {
            let prefix = root.qname.split_once(':').map(|(p, _)| p).unwrap_or("");
            let uri = root
                .namespace_decls()
                .find(|(p, _)| *p == prefix)
                .map(|(_, uri)| uri)
                .unwrap_or("");
            from_name(&format!("{{{}}}{}", uri, root.qname))
        })
}

/// `ifcxml` together with a dialect marker, case-insensitive
fn from_namespace(uri: &str) -> Option<IfcVersion> {
    let lower = uri.to_ascii_lowercase();
    if memmem::find(lower.as_bytes(), b"ifcxml").is_none() {
        return None;
    }
    from_name(&lower)
}

fn from_name(name: &str) -> Option<IfcVersion> {
    let lower = name.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    if memmem::find(bytes, b"ifc2x3").is_some() {
        Some(IfcVersion::Ifc2x3)
    } else if memmem::find(bytes, b"ifc4").is_some() {
        Some(IfcVersion::Ifc4)
    } else {
        None
    }
}
