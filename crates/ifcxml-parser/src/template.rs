// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declarative normalization templates
//!
//! A template is a JSON document naming the output root and a list of
//! collections. Each collection selects elements by tag name or prefix and
//! maps output keys to path expressions:
//!
//! ```text
//! @Name | Name        attribute, else first nested <Name> text
//! name()              local tag name
//! text()              own character data
//! refs(RelatedObjects) pointers found under a direct child slot
//! 'IFC'               literal
//! ```
//!
//! Alternatives are tried left to right; the first one that yields a value
//! wins, and keys without a value are left out.

use crate::capture::Captured;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, value},
    multi::separated_list1,
    sequence::delimited,
    IResult, Parser,
};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Template loading failures
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("cannot read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed template: {0}")]
    Json(#[from] serde_json::Error),

    #[error("collection '{collection}', key '{key}': invalid path expression '{expr}'")]
    InvalidPath {
        collection: String,
        key: String,
        expr: String,
    },

    #[error("collection '{0}' selects no elements")]
    EmptySelector(String),
}

/// Template document as written on disk
#[derive(Clone, Debug, Deserialize)]
pub struct TemplateSpec {
    pub root: String,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// Exact local tag names
    #[serde(default, rename = "match")]
    pub tags: Vec<String>,
    /// Local tag name prefixes
    #[serde(default)]
    pub prefix: Vec<String>,
    pub fields: BTreeMap<String, String>,
    /// Keys coerced to numbers when their value parses as one
    #[serde(default)]
    pub numeric: Vec<String>,
}

/// One alternative of a path expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Attr(String),
    Name,
    Text,
    Refs(String),
    Literal(String),
    Field(String),
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')).parse(input)
}

fn attribute(input: &str) -> IResult<&str, Source> {
    let (input, _) = char('@').parse(input)?;
    let (input, name) = ident(input)?;
    Ok((input, Source::Attr(name.to_string())))
}

fn refs(input: &str) -> IResult<&str, Source> {
    map(
        delimited(
            tag("refs("),
            delimited(multispace0, ident, multispace0),
            char(')'),
        ),
        |slot: &str| Source::Refs(slot.to_string()),
    )
    .parse(input)
}

fn literal(input: &str) -> IResult<&str, Source> {
    map(
        delimited(char('\''), take_till(|c: char| c == '\''), char('\'')),
        |text: &str| Source::Literal(text.to_string()),
    )
    .parse(input)
}

fn source(input: &str) -> IResult<&str, Source> {
    delimited(
        multispace0,
        alt((
            attribute,
            value(Source::Name, tag("name()")),
            value(Source::Text, tag("text()")),
            refs,
            literal,
            map(ident, |name: &str| Source::Field(name.to_string())),
        )),
        multispace0,
    )
    .parse(input)
}

/// Parse a path expression into its alternatives
pub fn parse_path(expr: &str) -> Option<Vec<Source>> {
    all_consuming(separated_list1(char('|'), source))
        .parse(expr)
        .ok()
        .map(|(_, alternatives)| alternatives)
}

/// Value of one path expression on a captured element
#[derive(Clone, Debug, PartialEq)]
enum Extracted<'c> {
    Str(&'c str),
    List(Vec<&'c str>),
}

fn extract<'c>(alternatives: &'c [Source], element: &'c Captured) -> Option<Extracted<'c>> {
    alternatives.iter().find_map(|source| match source {
        Source::Attr(name) => element.attr(name).map(Extracted::Str),
        Source::Name => Some(Extracted::Str(element.local.as_str())),
        Source::Text => Some(element.text.as_str())
            .filter(|t| !t.is_empty())
            .map(Extracted::Str),
        Source::Refs(slot) => {
            let targets: Vec<&str> = element
                .pointers_in(slot)
                .map(|p| p.target.as_str())
                .collect();
            (!targets.is_empty()).then_some(Extracted::List(targets))
        }
        Source::Literal(text) => Some(Extracted::Str(text.as_str())),
        Source::Field(name) => element.field(name).map(Extracted::Str),
    })
}

/// Compiled collection
#[derive(Clone, Debug)]
pub struct Collection {
    pub name: String,
    tags: FxHashSet<String>,
    prefixes: Vec<String>,
    fields: Vec<(String, Vec<Source>)>,
    numeric: FxHashSet<String>,
}

impl Collection {
    pub fn matches(&self, local: &str) -> bool {
        self.tags.contains(local) || self.prefixes.iter().any(|p| local.starts_with(p.as_str()))
    }

    /// Append the JSON object for one element to `out`
    pub fn render(&self, element: &Captured, out: &mut String) -> Result<(), serde_json::Error> {
        out.push('{');
        let mut first = true;
        for (key, alternatives) in &self.fields {
            let Some(extracted) = extract(alternatives, element) else {
                continue;
            };
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(&serde_json::to_string(key)?);
            out.push(':');
            match extracted {
                Extracted::Str(text) => {
                    let number = self
                        .numeric
                        .contains(key)
                        .then(|| lexical_core::parse::<f64>(text.trim().as_bytes()).ok())
                        .flatten()
                        .and_then(serde_json::Number::from_f64);
                    match number {
                        Some(number) => out.push_str(&number.to_string()),
                        None => out.push_str(&serde_json::to_string(text)?),
                    }
                }
                Extracted::List(items) => out.push_str(&serde_json::to_string(&items)?),
            }
        }
        out.push('}');
        Ok(())
    }
}

/// Compiled template
#[derive(Clone, Debug)]
pub struct Template {
    root: String,
    collections: Vec<Collection>,
}

impl Template {
    /// Load and compile a template file
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let file = File::open(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let spec: TemplateSpec = serde_json::from_reader(BufReader::new(file))?;
        Self::compile(spec)
    }

    pub fn from_json(text: &str) -> Result<Self, TemplateError> {
        Self::compile(serde_json::from_str(text)?)
    }

    pub fn compile(spec: TemplateSpec) -> Result<Self, TemplateError> {
        let mut collections = Vec::with_capacity(spec.collections.len());
        for c in spec.collections {
            if c.tags.is_empty() && c.prefix.is_empty() {
                return Err(TemplateError::EmptySelector(c.name));
            }
            let mut fields = Vec::with_capacity(c.fields.len());
            for (key, expr) in c.fields {
                let Some(alternatives) = parse_path(&expr) else {
                    return Err(TemplateError::InvalidPath {
                        collection: c.name,
                        key,
                        expr,
                    });
                };
                fields.push((key, alternatives));
            }
            collections.push(Collection {
                name: c.name,
                tags: c.tags.into_iter().collect(),
                prefixes: c.prefix,
                fields,
                numeric: c.numeric.into_iter().collect(),
            });
        }
        Ok(Self {
            root: spec.root,
            collections,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// Whether any collection selects this tag
    pub fn selects(&self, local: &str) -> bool {
        self.collections.iter().any(|c| c.matches(local))
    }

    /// Nested element names whose text some expression reads
    pub fn field_names(&self) -> FxHashSet<String> {
        self.collections
            .iter()
            .flat_map(|c| c.fields.iter())
            .flat_map(|(_, alternatives)| alternatives.iter())
            .filter_map(|source| match source {
                Source::Field(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Pointer;
    use crate::xml::Attr;

    fn attr(name: &str, value: &str) -> Attr {
        Attr {
            qname: name.to_string(),
            local: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("@Name | Name"),
            Some(vec![
                Source::Attr("Name".into()),
                Source::Field("Name".into())
            ])
        );
        assert_eq!(
            parse_path("refs( RelatedObjects )|'none'"),
            Some(vec![
                Source::Refs("RelatedObjects".into()),
                Source::Literal("none".into())
            ])
        );
        assert_eq!(parse_path("name()"), Some(vec![Source::Name]));
        assert_eq!(parse_path("text()|''"), Some(vec![Source::Text, Source::Literal(String::new())]));
        assert_eq!(parse_path(""), None);
        assert_eq!(parse_path("@"), None);
        assert_eq!(parse_path("Name|"), None);
        assert_eq!(parse_path("'open"), None);
    }

    #[test]
    fn test_compile_errors() {
        let err = Template::from_json(
            r#"{"root":"r","collections":[{"name":"c","match":["A"],"fields":{"k":"@@"}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidPath { ref key, .. } if key == "k"));

        let err = Template::from_json(r#"{"root":"r","collections":[{"name":"c","fields":{}}]}"#)
            .unwrap_err();
        assert!(matches!(err, TemplateError::EmptySelector(_)));

        assert!(matches!(
            Template::from_json("{"),
            Err(TemplateError::Json(_))
        ));
    }

    #[test]
    fn test_render() {
        let template = Template::from_json(
            r#"{"root":"r","collections":[{
                "name":"storeys",
                "prefix":["IfcBuildingSt"],
                "fields":{
                    "type":"name()",
                    "name":"@Name|Name",
                    "elevation":"Elevation",
                    "missing":"@Nope",
                    "parts":"refs(IsDecomposedBy)"
                },
                "numeric":["elevation"]
            }]}"#,
        )
        .unwrap();
        let collection = &template.collections()[0];
        assert!(collection.matches("IfcBuildingStorey"));
        assert!(!collection.matches("IfcWall"));
        assert_eq!(template.field_names().len(), 2);

        let mut element = Captured {
            local: "IfcBuildingStorey".into(),
            attrs: vec![attr("Name", "Level \"1\"")],
            ..Default::default()
        };
        element.fields.insert("Elevation".into(), "3.5".into());
        element.pointers.push(Pointer {
            slot: "IsDecomposedBy".into(),
            carrier: "IfcRelAggregates".into(),
            target: "i9".into(),
        });

        let mut out = String::new();
        collection.render(&element, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "IfcBuildingStorey",
                "name": "Level \"1\"",
                "elevation": 3.5,
                "parts": ["i9"]
            })
        );
    }
}
