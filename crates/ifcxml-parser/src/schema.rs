// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! XML Schema compilation
//!
//! Compiles the subset of XSD used by the ifcXML schemas into element
//! declarations, simple and complex types and content automata. Schema
//! documents are small, so they are loaded as trees; instance documents are
//! never materialized.
//!
//! Supported: global and local elements (`ref`, `type`, occurrence bounds,
//! `abstract`, `substitutionGroup`), named and anonymous complex types,
//! `sequence`/`choice`/`all`/`any`/`group`, complex content extension and
//! restriction, simple content, attributes and attribute groups, simple type
//! restrictions with enumerations, and `include`/`import` of sibling files.
//! Anything else is accepted without checks.

use crate::content::{DeclId, Nfa, Particle, Term};
use crate::xml::{local_part, Attr, XmlEvent, XmlStream};
use ifcxml_model::IngestError;
use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// Index into the compiled type table
pub type TypeId = usize;

/// The ur-type (`xs:anyType`) is always the first type
pub const ANY_TYPE: TypeId = 0;

/// Schema loading failures
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not well-formed: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("{0} is not an XML schema document")]
    NotASchema(PathBuf),

    #[error("unresolved reference to {kind} '{name}'")]
    Unresolved { kind: &'static str, name: String },

    #[error("schema declares no global elements")]
    NoGlobalElements,
}

/// Built-in simple type families with a lexical check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    AnySimple,
    String,
    Boolean,
    Decimal,
    Integer,
    NonNegativeInteger,
    PositiveInteger,
    Double,
}

impl Builtin {
    fn from_name(local: &str) -> Option<Self> {
        Some(match local {
            "anySimpleType" => Builtin::AnySimple,
            "string" | "normalizedString" | "token" | "language" | "Name" | "NCName" | "ID"
            | "IDREF" | "IDREFS" | "ENTITY" | "ENTITIES" | "NMTOKEN" | "NMTOKENS" | "anyURI"
            | "QName" | "NOTATION" | "dateTime" | "date" | "time" | "duration" | "gYear"
            | "gYearMonth" | "gMonth" | "gMonthDay" | "gDay" | "hexBinary"
            | "base64Binary" => Builtin::String,
            "boolean" => Builtin::Boolean,
            "decimal" => Builtin::Decimal,
            "integer" | "long" | "int" | "short" | "byte" | "nonPositiveInteger"
            | "negativeInteger" => Builtin::Integer,
            "nonNegativeInteger" | "unsignedLong" | "unsignedInt" | "unsignedShort"
            | "unsignedByte" => Builtin::NonNegativeInteger,
            "positiveInteger" => Builtin::PositiveInteger,
            "double" | "float" => Builtin::Double,
            _ => return None,
        })
    }

    /// Lexical check of a value (whitespace already collapsed at the ends)
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Builtin::AnySimple | Builtin::String => true,
            Builtin::Boolean => matches!(value, "true" | "false" | "1" | "0"),
            Builtin::Decimal => is_decimal(value),
            Builtin::Integer => is_integer(value),
            Builtin::NonNegativeInteger => {
                is_integer(value) && (!value.starts_with('-') || digits_are_zero(value))
            }
            Builtin::PositiveInteger => {
                is_integer(value) && !value.starts_with('-') && !digits_are_zero(value)
            }
            Builtin::Double => {
                matches!(value, "INF" | "+INF" | "-INF" | "NaN")
                    || (!value.is_empty()
                        && value
                            .bytes()
                            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
                        && lexical_core::parse::<f64>(value.as_bytes()).is_ok())
            }
        }
    }
}

fn unsigned_digits(value: &str) -> &str {
    value.strip_prefix(['+', '-']).unwrap_or(value)
}

fn is_integer(value: &str) -> bool {
    let digits = unsigned_digits(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn digits_are_zero(value: &str) -> bool {
    unsigned_digits(value).bytes().all(|b| b == b'0' || b == b'.')
}

fn is_decimal(value: &str) -> bool {
    let digits = unsigned_digits(value);
    let mut parts = digits.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    let frac = parts.next().unwrap_or("");
    (!whole.is_empty() || !frac.is_empty())
        && whole.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

/// Simple type: a built-in family plus an optional enumeration facet
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleType {
    /// Name used in messages (`xs:double`, `IfcLengthMeasure`)
    pub display: String,
    pub builtin: Builtin,
    pub enumeration: Vec<String>,
}

/// One attribute use of a complex type
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeUse {
    pub name: String,
    pub required: bool,
    pub ty: Option<TypeId>,
}

/// Content of a complex type
#[derive(Clone, Debug)]
pub enum ContentSpec {
    /// No children, no text
    Empty,
    /// Text of the given simple type
    Simple(TypeId),
    /// Children per particle
    Particle(Particle),
    /// Anything (ur-type)
    Any,
}

#[derive(Clone, Debug)]
pub struct ComplexType {
    pub attributes: Vec<AttributeUse>,
    pub any_attribute: bool,
    pub mixed: bool,
    pub content: ContentSpec,
    /// Automaton for particle content, built once compilation completes
    pub nfa: Option<Nfa>,
}

impl ComplexType {
    fn ur_type() -> Self {
        Self {
            attributes: Vec::new(),
            any_attribute: true,
            mixed: true,
            content: ContentSpec::Any,
            nfa: None,
        }
    }

    fn empty(mixed: bool) -> Self {
        Self {
            attributes: Vec::new(),
            any_attribute: false,
            mixed,
            content: ContentSpec::Empty,
            nfa: None,
        }
    }

    fn put_attribute(&mut self, attribute: AttributeUse) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TypeDef {
    Simple(SimpleType),
    Complex(ComplexType),
}

/// Element declaration
#[derive(Clone, Debug)]
pub struct ElementDecl {
    pub name: String,
    pub ty: TypeId,
    pub is_abstract: bool,
    pub global: bool,
    pub nillable: bool,
    substitution_head: Option<String>,
}

/// How a child element matched a content model edge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildMatch {
    /// Validate against this declaration
    Decl(DeclId),
    /// Wildcard: validate against a global declaration if there is one
    Lax,
}

/// A compiled schema, ready for validation
#[derive(Debug)]
pub struct CompiledSchema {
    decls: Vec<ElementDecl>,
    types: Vec<TypeDef>,
    globals: FxHashMap<String, DeclId>,
    /// Head element name → every (transitive) member of its substitution group
    substitutes: FxHashMap<String, FxHashSet<String>>,
}

impl CompiledSchema {
    /// Compile the schema at `path` and everything it includes
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let mut compiler = Compiler::default();
        compiler.collect(path, &mut FxHashSet::default())?;
        compiler.compile()
    }

    /// Global element declaration by local name
    pub fn global(&self, name: &str) -> Option<DeclId> {
        self.globals.get(name).copied()
    }

    pub fn decl(&self, id: DeclId) -> &ElementDecl {
        &self.decls[id]
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id]
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Whether an edge label accepts a child named `name`
    pub fn match_child(&self, term: &Term, name: &str) -> Option<ChildMatch> {
        match term {
            Term::Any => Some(ChildMatch::Lax),
            Term::Element(id) => {
                let decl = &self.decls[*id];
                if decl.name == name {
                    return (!decl.is_abstract).then_some(ChildMatch::Decl(*id));
                }
                if !decl.global {
                    return None;
                }
                let member = self.substitutes.get(&decl.name)?.contains(name);
                if member {
                    self.global(name).map(ChildMatch::Decl)
                } else {
                    None
                }
            }
        }
    }

    /// Label text for "Expected is ( ... )" lists
    pub fn term_name(&self, term: &Term) -> String {
        match term {
            Term::Any => "##any".to_string(),
            Term::Element(id) => self.decls[*id].name.clone(),
        }
    }

    /// Simple type governing a type's text, if any
    pub fn simple_of(&self, ty: TypeId) -> Option<&SimpleType> {
        match &self.types[ty] {
            TypeDef::Simple(simple) => Some(simple),
            TypeDef::Complex(ComplexType {
                content: ContentSpec::Simple(inner),
                ..
            }) => self.simple_of(*inner),
            TypeDef::Complex(_) => None,
        }
    }

    /// Check a value against a simple type; the message follows libxml2
    pub fn check_simple(&self, ty: TypeId, value: &str) -> Option<String> {
        let simple = self.simple_of(ty)?;
        let trimmed = value.trim();
        if !simple.builtin.accepts(trimmed) {
            return Some(format!(
                "'{}' is not a valid value of the atomic type '{}'.",
                trimmed, simple.display
            ));
        }
        if !simple.enumeration.is_empty() && !simple.enumeration.iter().any(|e| e == trimmed) {
            let set = simple
                .enumeration
                .iter()
                .map(|e| format!("'{}'", e))
                .collect::<Vec<_>>()
                .join(", ");
            return Some(format!(
                "[facet 'enumeration'] The value '{}' is not an element of the set {{{}}}.",
                trimmed, set
            ));
        }
        None
    }
}

/// Schema document node
#[derive(Debug)]
struct XsNode {
    name: String,
    attrs: Vec<Attr>,
    children: Vec<XsNode>,
}

impl XsNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.qname == name)
            .map(|a| a.value.as_str())
    }

    fn occurs(&self) -> (u32, Option<u32>) {
        let min = self
            .attr("minOccurs")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);
        let max = match self.attr("maxOccurs").map(str::trim) {
            Some("unbounded") => None,
            Some(v) => Some(v.parse().unwrap_or(1)),
            None => Some(1),
        };
        (min, max)
    }

    fn is_particle(&self) -> bool {
        matches!(
            self.name.as_str(),
            "element" | "any" | "sequence" | "choice" | "all" | "group"
        )
    }
}

fn load_tree(path: &Path) -> Result<XsNode, SchemaError> {
    let syntax = |err: IngestError| match err {
        IngestError::Io(source) => SchemaError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => SchemaError::Syntax {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    };
    let mut stream = XmlStream::open(path).map_err(syntax)?;
    let mut stack: Vec<XsNode> = Vec::new();
    let mut root = None;
    loop {
        match stream.next_event().map_err(syntax)? {
            XmlEvent::Open(tag) => stack.push(XsNode {
                name: tag.local,
                attrs: tag.attrs,
                children: Vec::new(),
            }),
            XmlEvent::Close { .. } => {
                if let Some(node) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => root = Some(node),
                    }
                }
            }
            XmlEvent::Text(_) => {}
            XmlEvent::Eof => break,
        }
    }
    root.filter(|r| r.name == "schema")
        .ok_or_else(|| SchemaError::NotASchema(path.to_path_buf()))
}

#[derive(Default)]
struct Compiler {
    elements: FxHashMap<String, Rc<XsNode>>,
    complex: FxHashMap<String, Rc<XsNode>>,
    simple: FxHashMap<String, Rc<XsNode>>,
    groups: FxHashMap<String, Rc<XsNode>>,
    attribute_groups: FxHashMap<String, Rc<XsNode>>,
    /// Prefixes bound to the XSD namespace ("" for a default binding)
    xs_prefixes: FxHashSet<String>,
    named_types: FxHashMap<String, TypeId>,
    builtin_types: FxHashMap<String, TypeId>,
    decls: Vec<ElementDecl>,
    types: Vec<TypeDef>,
    globals: FxHashMap<String, DeclId>,
}

impl Compiler {
    fn collect(&mut self, path: &Path, visited: &mut FxHashSet<PathBuf>) -> Result<(), SchemaError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !visited.insert(canonical) {
            return Ok(());
        }
        let root = load_tree(path)?;
        debug!("loading schema document {}", path.display());

        for attr in &root.attrs {
            if attr.value != XSD_NAMESPACE {
                continue;
            }
            if attr.qname == "xmlns" {
                self.xs_prefixes.insert(String::new());
            } else if let Some(prefix) = attr.qname.strip_prefix("xmlns:") {
                self.xs_prefixes.insert(prefix.to_string());
            }
        }

        for child in root.children {
            let name = child.attr("name").map(str::to_string);
            match (child.name.as_str(), name) {
                ("include" | "import", _) => {
                    let Some(location) = child.attr("schemaLocation") else {
                        continue;
                    };
                    let target = path
                        .parent()
                        .map(|dir| dir.join(location))
                        .unwrap_or_else(|| PathBuf::from(location));
                    if target.exists() {
                        self.collect(&target, visited)?;
                    } else {
                        warn!("schema location {} not found, skipped", target.display());
                    }
                }
                ("element", Some(name)) => {
                    self.elements.insert(name, Rc::new(child));
                }
                ("complexType", Some(name)) => {
                    self.complex.insert(name, Rc::new(child));
                }
                ("simpleType", Some(name)) => {
                    self.simple.insert(name, Rc::new(child));
                }
                ("group", Some(name)) => {
                    self.groups.insert(name, Rc::new(child));
                }
                ("attributeGroup", Some(name)) => {
                    self.attribute_groups.insert(name, Rc::new(child));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn compile(mut self) -> Result<CompiledSchema, SchemaError> {
        self.types.push(TypeDef::Complex(ComplexType::ur_type()));

        let mut names: Vec<String> = self.elements.keys().cloned().collect();
        if names.is_empty() {
            return Err(SchemaError::NoGlobalElements);
        }
        names.sort();
        for name in &names {
            self.global_element(name)?;
        }

        let substitutes = self.substitution_groups();
        for ty in &mut self.types {
            if let TypeDef::Complex(complex) = ty {
                complex.nfa = match &complex.content {
                    ContentSpec::Particle(particle) => Some(Nfa::build(particle)),
                    ContentSpec::Empty | ContentSpec::Simple(_) => Some(Nfa::empty()),
                    ContentSpec::Any => None,
                };
            }
        }

        debug!(
            "compiled schema: {} global elements, {} types",
            self.globals.len(),
            self.types.len()
        );
        Ok(CompiledSchema {
            decls: self.decls,
            types: self.types,
            globals: self.globals,
            substitutes,
        })
    }

    fn substitution_groups(&self) -> FxHashMap<String, FxHashSet<String>> {
        let mut groups: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
        for (name, &id) in &self.globals {
            let mut head = self.decls[id].substitution_head.clone();
            let mut seen = FxHashSet::default();
            while let Some(h) = head {
                if !seen.insert(h.clone()) {
                    break;
                }
                groups.entry(h.clone()).or_default().insert(name.clone());
                head = self
                    .globals
                    .get(&h)
                    .and_then(|&hid| self.decls[hid].substitution_head.clone());
            }
        }
        groups
    }

    fn is_xsd(&self, qname: &str) -> bool {
        let prefix = qname.split_once(':').map(|(p, _)| p).unwrap_or("");
        self.xs_prefixes.contains(prefix)
    }

    fn global_element(&mut self, name: &str) -> Result<DeclId, SchemaError> {
        if let Some(&id) = self.globals.get(name) {
            return Ok(id);
        }
        let node = self
            .elements
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::Unresolved {
                kind: "element",
                name: name.to_string(),
            })?;
        let id = self.declare(&node, name, true);
        self.globals.insert(name.to_string(), id);
        let ty = self.element_type(&node)?;
        self.decls[id].ty = ty;
        Ok(id)
    }

    fn declare(&mut self, node: &XsNode, name: &str, global: bool) -> DeclId {
        self.decls.push(ElementDecl {
            name: name.to_string(),
            ty: ANY_TYPE,
            is_abstract: node.attr("abstract") == Some("true"),
            global,
            nillable: node.attr("nillable") == Some("true"),
            substitution_head: node.attr("substitutionGroup").map(|h| local_part(h).to_string()),
        });
        self.decls.len() - 1
    }

    fn local_element(&mut self, node: &XsNode) -> Result<DeclId, SchemaError> {
        if let Some(reference) = node.attr("ref") {
            return self.global_element(local_part(reference));
        }
        let name = node.attr("name").unwrap_or_default().to_string();
        let id = self.declare(node, &name, false);
        let ty = self.element_type(node)?;
        self.decls[id].ty = ty;
        Ok(id)
    }

    fn element_type(&mut self, node: &XsNode) -> Result<TypeId, SchemaError> {
        if let Some(qname) = node.attr("type") {
            return self.resolve_type(qname);
        }
        for child in &node.children {
            match child.name.as_str() {
                "complexType" => {
                    let def = self.complex_type(child)?;
                    return Ok(self.push_type(def));
                }
                "simpleType" => {
                    let def = self.simple_type(child)?;
                    return Ok(self.push_type(def));
                }
                _ => {}
            }
        }
        if let Some(head) = node.attr("substitutionGroup") {
            let head = self.global_element(local_part(head))?;
            return Ok(self.decls[head].ty);
        }
        Ok(ANY_TYPE)
    }

    fn push_type(&mut self, def: TypeDef) -> TypeId {
        self.types.push(def);
        self.types.len() - 1
    }

    fn builtin_type(&mut self, local: &str) -> TypeId {
        if let Some(&id) = self.builtin_types.get(local) {
            return id;
        }
        let builtin = Builtin::from_name(local).unwrap_or_else(|| {
            warn!("unsupported built-in type xs:{}, value not checked", local);
            Builtin::AnySimple
        });
        let id = self.push_type(TypeDef::Simple(SimpleType {
            display: format!("xs:{}", local),
            builtin,
            enumeration: Vec::new(),
        }));
        self.builtin_types.insert(local.to_string(), id);
        id
    }

    fn resolve_type(&mut self, qname: &str) -> Result<TypeId, SchemaError> {
        let local = local_part(qname);
        let user_defined = self.complex.contains_key(local) || self.simple.contains_key(local);
        if self.is_xsd(qname) && !(user_defined && !qname.contains(':')) {
            return Ok(match local {
                "anyType" => ANY_TYPE,
                _ => self.builtin_type(local),
            });
        }
        if let Some(&id) = self.named_types.get(local) {
            return Ok(id);
        }
        if let Some(node) = self.complex.get(local).cloned() {
            // Reserve first so recursive references resolve
            let id = self.push_type(TypeDef::Complex(ComplexType::ur_type()));
            self.named_types.insert(local.to_string(), id);
            self.types[id] = self.complex_type(&node)?;
            return Ok(id);
        }
        if let Some(node) = self.simple.get(local).cloned() {
            let id = self.push_type(TypeDef::Simple(SimpleType {
                display: local.to_string(),
                builtin: Builtin::AnySimple,
                enumeration: Vec::new(),
            }));
            self.named_types.insert(local.to_string(), id);
            let mut def = self.simple_type(&node)?;
            if let TypeDef::Simple(simple) = &mut def {
                simple.display = local.to_string();
            }
            self.types[id] = def;
            return Ok(id);
        }
        warn!("type {} is not declared, treated as xs:anyType", qname);
        Ok(ANY_TYPE)
    }

    fn simple_type(&mut self, node: &XsNode) -> Result<TypeDef, SchemaError> {
        let mut out = SimpleType {
            display: "xs:anySimpleType".to_string(),
            builtin: Builtin::AnySimple,
            enumeration: Vec::new(),
        };
        let Some(restriction) = node.children.iter().find(|c| c.name == "restriction") else {
            // list and union are not checked
            return Ok(TypeDef::Simple(out));
        };
        let base = match restriction.attr("base") {
            Some(qname) => Some(self.resolve_type(qname)?),
            None => match restriction.children.iter().find(|c| c.name == "simpleType") {
                Some(inline) => {
                    let def = self.simple_type(inline)?;
                    Some(self.push_type(def))
                }
                None => None,
            },
        };
        if let Some(TypeDef::Simple(base)) = base.map(|b| &self.types[b]) {
            out = base.clone();
        }
        let own: Vec<String> = restriction
            .children
            .iter()
            .filter(|c| c.name == "enumeration")
            .filter_map(|c| c.attr("value").map(str::to_string))
            .collect();
        if !own.is_empty() {
            out.enumeration = own;
        }
        Ok(TypeDef::Simple(out))
    }

    fn complex_type(&mut self, node: &XsNode) -> Result<TypeDef, SchemaError> {
        let mut complex = ComplexType::empty(node.attr("mixed") == Some("true"));
        for child in &node.children {
            match child.name.as_str() {
                _ if child.is_particle() => {
                    complex.content = ContentSpec::Particle(self.particle(child)?);
                }
                "complexContent" => self.complex_content(child, &mut complex)?,
                "simpleContent" => self.simple_content(child, &mut complex)?,
                _ => self.attribute_decl(child, &mut complex)?,
            }
        }
        Ok(TypeDef::Complex(complex))
    }

    fn derivation<'n>(node: &'n XsNode) -> Option<&'n XsNode> {
        node.children
            .iter()
            .find(|c| c.name == "extension" || c.name == "restriction")
    }

    fn complex_content(&mut self, node: &XsNode, complex: &mut ComplexType) -> Result<(), SchemaError> {
        if let Some(mixed) = node.attr("mixed") {
            complex.mixed = mixed == "true";
        }
        let Some(derivation) = Self::derivation(node) else {
            return Ok(());
        };
        let base = match derivation.attr("base") {
            Some(qname) => self.resolve_type(qname)?,
            None => ANY_TYPE,
        };
        let base = match &self.types[base] {
            TypeDef::Complex(base) => Some(base.clone()),
            TypeDef::Simple(_) => None,
        };
        let extending = derivation.name == "extension";

        let mut own = None;
        for child in &derivation.children {
            if child.is_particle() {
                own = Some(self.particle(child)?);
            }
        }

        if let Some(base) = &base {
            complex.any_attribute = base.any_attribute;
            complex.attributes = base.attributes.clone();
        }
        for child in &derivation.children {
            if !child.is_particle() {
                self.attribute_decl(child, complex)?;
            }
        }

        complex.content = match (extending, base.map(|b| b.content), own) {
            (true, Some(ContentSpec::Any), _) => ContentSpec::Any,
            (true, Some(ContentSpec::Particle(inherited)), Some(own)) => {
                ContentSpec::Particle(Particle::Sequence {
                    items: vec![inherited, own],
                    min: 1,
                    max: Some(1),
                })
            }
            (true, Some(ContentSpec::Particle(inherited)), None) => {
                ContentSpec::Particle(inherited)
            }
            (true, Some(ContentSpec::Simple(simple)), None) => ContentSpec::Simple(simple),
            (_, _, Some(own)) => ContentSpec::Particle(own),
            (_, _, None) => ContentSpec::Empty,
        };
        Ok(())
    }

    fn simple_content(&mut self, node: &XsNode, complex: &mut ComplexType) -> Result<(), SchemaError> {
        let Some(derivation) = Self::derivation(node) else {
            return Ok(());
        };
        let base = match derivation.attr("base") {
            Some(qname) => self.resolve_type(qname)?,
            None => ANY_TYPE,
        };
        let mut text_type = match &self.types[base] {
            TypeDef::Simple(_) => Some(base),
            TypeDef::Complex(inherited) => {
                complex.attributes = inherited.attributes.clone();
                complex.any_attribute = inherited.any_attribute;
                match inherited.content {
                    ContentSpec::Simple(t) => Some(t),
                    _ => None,
                }
            }
        };

        let facets: Vec<String> = derivation
            .children
            .iter()
            .filter(|c| c.name == "enumeration")
            .filter_map(|c| c.attr("value").map(str::to_string))
            .collect();
        if !facets.is_empty() {
            let mut restricted = text_type
                .and_then(|t| match &self.types[t] {
                    TypeDef::Simple(s) => Some(s.clone()),
                    TypeDef::Complex(_) => None,
                })
                .unwrap_or(SimpleType {
                    display: "xs:anySimpleType".to_string(),
                    builtin: Builtin::AnySimple,
                    enumeration: Vec::new(),
                });
            restricted.enumeration = facets;
            text_type = Some(self.push_type(TypeDef::Simple(restricted)));
        }

        for child in &derivation.children {
            self.attribute_decl(child, complex)?;
        }
        complex.content = match text_type {
            Some(t) => ContentSpec::Simple(t),
            None => ContentSpec::Any,
        };
        Ok(())
    }

    fn attribute_decl(&mut self, node: &XsNode, complex: &mut ComplexType) -> Result<(), SchemaError> {
        match node.name.as_str() {
            "attribute" => {
                let Some(name) = node.attr("name").map(str::to_string) else {
                    return Ok(());
                };
                let ty = match node.attr("type") {
                    Some(qname) => Some(self.resolve_type(qname)?),
                    None => match node.children.iter().find(|c| c.name == "simpleType") {
                        Some(inline) => {
                            let def = self.simple_type(inline)?;
                            Some(self.push_type(def))
                        }
                        None => None,
                    },
                };
                complex.put_attribute(AttributeUse {
                    name,
                    required: node.attr("use") == Some("required"),
                    ty,
                });
            }
            "attributeGroup" => {
                let Some(reference) = node.attr("ref") else {
                    return Ok(());
                };
                match self.attribute_groups.get(local_part(reference)).cloned() {
                    Some(group) => {
                        for child in &group.children {
                            self.attribute_decl(child, complex)?;
                        }
                    }
                    None => warn!("attribute group {} is not declared", reference),
                }
            }
            "anyAttribute" => complex.any_attribute = true,
            _ => {}
        }
        Ok(())
    }

    fn particle(&mut self, node: &XsNode) -> Result<Particle, SchemaError> {
        let (min, max) = node.occurs();
        Ok(match node.name.as_str() {
            "element" => Particle::Element {
                decl: self.local_element(node)?,
                min,
                max,
            },
            "any" => Particle::Any { min, max },
            "sequence" => Particle::Sequence {
                items: self.particles(node)?,
                min,
                max,
            },
            "choice" => Particle::Choice {
                items: self.particles(node)?,
                min,
                max,
            },
            // Members in any order, each optional
            "all" => Particle::Choice {
                items: self.particles(node)?,
                min: 0,
                max: None,
            },
            "group" => {
                let reference = node.attr("ref").unwrap_or_default();
                let group = self
                    .groups
                    .get(local_part(reference))
                    .cloned()
                    .ok_or_else(|| SchemaError::Unresolved {
                        kind: "group",
                        name: reference.to_string(),
                    })?;
                Particle::Sequence {
                    items: self.particles(&group)?,
                    min,
                    max,
                }
            }
            _ => Particle::Sequence {
                items: Vec::new(),
                min: 1,
                max: Some(1),
            },
        })
    }

    fn particles(&mut self, node: &XsNode) -> Result<Vec<Particle>, SchemaError> {
        let mut items = Vec::new();
        for child in node.children.iter().filter(|c| c.is_particle()) {
            items.push(self.particle(child)?);
        }
        Ok(items)
    }
}
