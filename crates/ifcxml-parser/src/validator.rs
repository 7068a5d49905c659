// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Schema validation
//!
//! Validation reads the document twice. The first pass checks
//! well-formedness and, when enabled, asserts every element that has a
//! global declaration against that declaration in isolation. Those early
//! diagnostics are useful on very large files but cannot see ordering or
//! sibling constraints, so they never decide validity. The second pass walks
//! the content models from the root and is the only one whose errors count.

use crate::content::Term;
use crate::schema::{ChildMatch, CompiledSchema, ContentSpec, TypeDef, TypeId};
use crate::xml::{OpenTag, XmlEvent, XmlStream};
use ifcxml_model::{IfcVersion, IngestError, Result, SchemaLocator, ValidationIssue};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Outcome of validating one document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub version: IfcVersion,
    /// True iff the authoritative pass reported no errors
    pub is_valid: bool,
    /// Authoritative errors
    pub errors: Vec<ValidationIssue>,
    /// Per-element diagnostics from the first pass (informational)
    pub early_diagnostics: Vec<ValidationIssue>,
}

/// Validator with a per-dialect compiled schema cache
pub struct SchemaValidator {
    locator: Arc<dyn SchemaLocator>,
    cache: RwLock<FxHashMap<IfcVersion, Arc<CompiledSchema>>>,
    early_assertions: bool,
    max_early: usize,
}

impl SchemaValidator {
    pub fn new(locator: Arc<dyn SchemaLocator>) -> Self {
        Self {
            locator,
            cache: RwLock::new(FxHashMap::default()),
            early_assertions: true,
            max_early: 100,
        }
    }

    /// Validator taking its schema paths and early-tier settings from `config`
    pub fn from_config(config: &crate::IngestConfig) -> Self {
        Self {
            early_assertions: config.early_assertions,
            max_early: config.max_early_diagnostics,
            ..Self::new(Arc::new(config.clone()))
        }
    }

    /// Compiled schema for a dialect, loading it on first use
    ///
    /// A failed load is not cached, so the next call tries again.
    pub fn schema(&self, version: IfcVersion) -> Result<Arc<CompiledSchema>> {
        if let Some(cached) = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(&version).cloned())
        {
            return Ok(cached);
        }

        let path = self.locator.schema_path(version).ok_or_else(|| {
            IngestError::schema_unavailable(version, "no schema resource configured")
        })?;
        let schema = match CompiledSchema::load(&path) {
            Ok(schema) => Arc::new(schema),
            Err(err) => {
                warn!("loading {} schema from {} failed: {}", version, path.display(), err);
                return Err(IngestError::schema_unavailable(version, err.to_string()));
            }
        };
        info!(
            "compiled {} schema from {} ({} global elements)",
            version,
            path.display(),
            schema.global_count()
        );
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(version, Arc::clone(&schema));
        }
        Ok(schema)
    }

    /// Drop every cached schema
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Validate `path` against the schema of `version`
    ///
    /// Errors are reserved for conditions that prevent validation: missing
    /// schema, unreadable file, or a document that is not well-formed.
    pub fn validate(&self, path: &Path, version: IfcVersion) -> Result<ValidationReport> {
        let schema = self.schema(version)?;

        let early_diagnostics = self.first_pass(path, &schema)?;
        let errors = authoritative_pass(path, &schema)?;

        let is_valid = errors.is_empty();
        info!(
            "validated {} against {}: {} error(s), {} early diagnostic(s)",
            path.display(),
            version,
            errors.len(),
            early_diagnostics.len()
        );
        Ok(ValidationReport {
            version,
            is_valid,
            errors,
            early_diagnostics,
        })
    }

    /// Well-formedness plus the opportunistic per-element tier
    fn first_pass(&self, path: &Path, schema: &CompiledSchema) -> Result<Vec<ValidationIssue>> {
        let mut stream = XmlStream::open(path)?;
        let mut out = Vec::new();
        if !self.early_assertions {
            stream.drain()?;
            return Ok(out);
        }

        // Open elements with a simple global type, collecting their text
        let mut stack: Vec<Option<(OpenTag, TypeId, String)>> = Vec::new();
        loop {
            match stream.next_event()? {
                XmlEvent::Open(tag) => {
                    let Some(decl) = schema.global(&tag.local) else {
                        stack.push(None);
                        continue;
                    };
                    let ty = schema.decl(decl).ty;
                    if out.len() < self.max_early {
                        check_attributes(schema, ty, &tag, &mut |m| out.push(located(&tag, m)));
                    }
                    let frame = schema.simple_of(ty).is_some().then(|| (tag, ty, String::new()));
                    stack.push(frame);
                }
                XmlEvent::Text(text) => {
                    if let Some(Some((_, _, buf))) = stack.last_mut() {
                        buf.push_str(&text);
                    }
                }
                XmlEvent::Close { .. } => {
                    if let Some(Some((tag, ty, text))) = stack.pop() {
                        if let Some(message) = schema.check_simple(ty, &text) {
                            out.push(issue(&tag, message));
                        }
                    }
                }
                XmlEvent::Eof => break,
            }
        }
        out.truncate(self.max_early);
        Ok(out)
    }
}

fn located(tag: &OpenTag, message: String) -> ValidationIssue {
    ValidationIssue::new(tag.line, tag.column, message).with_element(tag.local.clone())
}

fn issue(tag: &OpenTag, message: String) -> ValidationIssue {
    located(tag, format!("Element '{}': {}", tag.local, message))
}

fn is_schema_instance_attribute(qname: &str) -> bool {
    qname == "xmlns"
        || qname.starts_with("xmlns:")
        || qname.starts_with("xsi:")
        || qname.starts_with("xml:")
}

/// Attribute checks for one element against its type; messages are complete
fn check_attributes(
    schema: &CompiledSchema,
    ty: TypeId,
    tag: &OpenTag,
    report: &mut dyn FnMut(String),
) {
    let instance = tag
        .attrs
        .iter()
        .filter(|a| !is_schema_instance_attribute(&a.qname));
    match schema.type_def(ty) {
        TypeDef::Simple(_) => {
            for attr in instance {
                report(not_allowed(tag, &attr.local));
            }
        }
        TypeDef::Complex(complex) => {
            for attr in instance {
                match complex.attributes.iter().find(|u| u.name == attr.local) {
                    Some(declared) => {
                        let problem = declared
                            .ty
                            .and_then(|t| schema.check_simple(t, &attr.value));
                        if let Some(problem) = problem {
                            report(format!(
                                "Element '{}', attribute '{}': {}",
                                tag.local, attr.local, problem
                            ));
                        }
                    }
                    None if complex.any_attribute => {}
                    None => report(not_allowed(tag, &attr.local)),
                }
            }
            for required in complex.attributes.iter().filter(|u| u.required) {
                if tag.attr(&required.name).is_none() {
                    report(format!(
                        "Element '{}': The attribute '{}' is required but missing.",
                        tag.local, required.name
                    ));
                }
            }
        }
    }
}

fn not_allowed(tag: &OpenTag, attribute: &str) -> String {
    format!(
        "Element '{}', attribute '{}': The attribute '{}' is not allowed.",
        tag.local, attribute, attribute
    )
}

enum Frame {
    /// Element with a content model
    Complex {
        tag: OpenTag,
        ty: TypeId,
        set: Vec<usize>,
        /// A child was rejected, the rest of the content is not checked
        failed: bool,
        text_reported: bool,
    },
    /// Element with text-only content
    Simple { tag: OpenTag, ty: TypeId, text: String },
    /// Wildcard content: children are checked only against global declarations
    Lax,
    /// Not validated
    Skip,
}

fn expected_list(schema: &CompiledSchema, terms: &[Term]) -> String {
    let names: Vec<String> = terms.iter().map(|t| schema.term_name(t)).collect();
    if names.is_empty() {
        String::new()
    } else {
        format!(" Expected is ( {} ).", names.join(", "))
    }
}

struct Walker<'s> {
    schema: &'s CompiledSchema,
    stack: Vec<Frame>,
    errors: Vec<ValidationIssue>,
}

impl<'s> Walker<'s> {
    fn report(&mut self, tag: &OpenTag, message: String) {
        self.errors.push(issue(tag, message));
    }

    /// Frame for an element validated against `decl`
    fn enter_decl(&mut self, decl: usize, tag: OpenTag) -> Frame {
        let schema = self.schema;
        let decl = schema.decl(decl);
        if decl.is_abstract {
            self.report(&tag, "The element declaration is abstract.".to_string());
            return Frame::Skip;
        }
        if decl.nillable && tag.attrs.iter().any(|a| a.qname == "xsi:nil" && a.value == "true") {
            return Frame::Skip;
        }

        let mut messages = Vec::new();
        check_attributes(schema, decl.ty, &tag, &mut |m| messages.push(m));
        self.errors
            .extend(messages.into_iter().map(|m| located(&tag, m)));

        match schema.type_def(decl.ty) {
            TypeDef::Simple(_) => Frame::Simple {
                tag,
                ty: decl.ty,
                text: String::new(),
            },
            TypeDef::Complex(complex) => match (&complex.content, &complex.nfa) {
                (ContentSpec::Simple(_), _) => Frame::Simple {
                    tag,
                    ty: decl.ty,
                    text: String::new(),
                },
                (ContentSpec::Any, _) | (_, None) => Frame::Lax,
                (_, Some(nfa)) => Frame::Complex {
                    tag,
                    ty: decl.ty,
                    set: nfa.start_set(),
                    failed: false,
                    text_reported: false,
                },
            },
        }
    }

    /// Frame for an element matched by a wildcard
    fn enter_lax(&mut self, tag: OpenTag) -> Frame {
        match self.schema.global(&tag.local) {
            Some(decl) => self.enter_decl(decl, tag),
            None => Frame::Lax,
        }
    }

    fn open(&mut self, tag: OpenTag) {
        let schema = self.schema;
        let frame = match self.stack.last_mut() {
            None => match schema.global(&tag.local) {
                Some(decl) => self.enter_decl(decl, tag),
                None => {
                    self.report(
                        &tag,
                        "No matching global declaration available for the validation root."
                            .to_string(),
                    );
                    Frame::Skip
                }
            },
            Some(Frame::Skip) => Frame::Skip,
            Some(Frame::Lax) => self.enter_lax(tag),
            Some(Frame::Simple { tag: parent, .. }) => {
                let parent = parent.clone();
                self.report(
                    &parent,
                    "Element content is not allowed, because the content type is a simple type definition."
                        .to_string(),
                );
                Frame::Skip
            }
            Some(Frame::Complex { failed: true, .. }) => Frame::Skip,
            Some(Frame::Complex {
                ty, set, failed, ..
            }) => match complex_nfa(schema, *ty) {
                None => Frame::Skip,
                Some(nfa) => {
                    let (next, chosen) =
                        nfa.step(set, |term| schema.match_child(term, &tag.local).is_some());
                    match chosen.and_then(|term| schema.match_child(&term, &tag.local)) {
                        Some(matched) if !next.is_empty() => {
                            *set = next;
                            match matched {
                                ChildMatch::Decl(decl) => self.enter_decl(decl, tag),
                                ChildMatch::Lax => self.enter_lax(tag),
                            }
                        }
                        _ => {
                            let expected = expected_list(schema, &nfa.expected(set));
                            *failed = true;
                            self.report(
                                &tag,
                                format!("This element is not expected.{}", expected),
                            );
                            Frame::Skip
                        }
                    }
                }
            },
        };
        self.stack.push(frame);
    }

    fn text(&mut self, content: &str) {
        let schema = self.schema;
        let report = match self.stack.last_mut() {
            Some(Frame::Simple { text, .. }) => {
                text.push_str(content);
                None
            }
            Some(Frame::Complex {
                tag,
                ty,
                text_reported,
                ..
            }) if !*text_reported && !content.trim().is_empty() => {
                match schema.type_def(*ty) {
                    TypeDef::Complex(complex) if !complex.mixed => {
                        *text_reported = true;
                        let kind = match complex.content {
                            ContentSpec::Empty => "empty",
                            _ => "element-only",
                        };
                        Some((
                            tag.clone(),
                            format!(
                                "Character content other than whitespace is not allowed because the content type is '{}'.",
                                kind
                            ),
                        ))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some((tag, message)) = report {
            self.report(&tag, message);
        }
    }

    fn close(&mut self) {
        let schema = self.schema;
        match self.stack.pop() {
            Some(Frame::Simple { tag, ty, text }) => {
                if let Some(message) = schema.check_simple(ty, &text) {
                    self.report(&tag, message);
                }
            }
            Some(Frame::Complex {
                tag,
                ty,
                set,
                failed: false,
                ..
            }) => {
                if let Some(nfa) = complex_nfa(schema, ty) {
                    if !nfa.accepts(&set) {
                        let expected = expected_list(schema, &nfa.expected(&set));
                        self.report(&tag, format!("Missing child element(s).{}", expected));
                    }
                }
            }
            _ => {}
        }
    }
}

fn complex_nfa(schema: &CompiledSchema, ty: TypeId) -> Option<&crate::content::Nfa> {
    match schema.type_def(ty) {
        TypeDef::Complex(complex) => complex.nfa.as_ref(),
        TypeDef::Simple(_) => None,
    }
}

/// Whole-document pass; its error list alone decides validity
fn authoritative_pass(path: &Path, schema: &CompiledSchema) -> Result<Vec<ValidationIssue>> {
    let mut stream = XmlStream::open(path)?;
    let mut walker = Walker {
        schema,
        stack: Vec::new(),
        errors: Vec::new(),
    };
    loop {
        match stream.next_event()? {
            XmlEvent::Open(tag) => walker.open(tag),
            XmlEvent::Text(text) => walker.text(&text),
            XmlEvent::Close { .. } => walker.close(),
            XmlEvent::Eof => break,
        }
    }
    debug!(
        "authoritative pass over {} released {} frames (peak {})",
        path.display(),
        stream.stats().released,
        stream.stats().peak_live
    );
    Ok(walker.errors)
}
