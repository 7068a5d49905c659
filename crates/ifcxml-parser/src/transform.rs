// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Normalization transform engine
//!
//! Projects a document onto the canonical JSON shape described by a
//! template. The output text is assembled per collection while streaming and
//! parsed once at the end. Every failure here is a `Transform` error, which
//! the pipeline treats as recoverable.

use crate::capture::{walk_file, CaptureSpec};
use crate::template::Template;
use crate::xml::OpenTag;
use crate::IngestConfig;
use ifcxml_model::{IfcVersion, IngestError, Result};
use log::{debug, info};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Template-driven JSON projection with a compiled template cache
pub struct TransformEngine {
    template_path: PathBuf,
    cache: RwLock<FxHashMap<PathBuf, Arc<Template>>>,
}

impl TransformEngine {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.template_path.clone())
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Compiled template for `path`, compiling on first use
    pub fn template(&self, path: &Path) -> Result<Arc<Template>> {
        if let Some(cached) = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(path).cloned())
        {
            return Ok(cached);
        }
        let template = Template::load(path)
            .map(Arc::new)
            .map_err(|e| IngestError::transform(e.to_string()))?;
        debug!(
            "compiled template {} ({} collections)",
            path.display(),
            template.collections().len()
        );
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(path.to_path_buf(), Arc::clone(&template));
        }
        Ok(template)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    /// Transform `path` with the configured template
    pub fn transform(&self, path: &Path, version: IfcVersion) -> Result<serde_json::Value> {
        self.transform_with(&self.template_path, path, version)
    }

    /// Transform `path` with an explicit template
    pub fn transform_with(
        &self,
        template_path: &Path,
        path: &Path,
        version: IfcVersion,
    ) -> Result<serde_json::Value> {
        let template = self.template(template_path)?;
        let document = render(&template, path, version).map_err(as_transform_failure)?;
        let value = serde_json::from_str(&document)
            .map_err(|e| IngestError::transform(format!("template produced invalid JSON: {}", e)))?;
        info!("normalized {} with {}", path.display(), template_path.display());
        Ok(value)
    }
}

fn as_transform_failure(err: IngestError) -> IngestError {
    match err {
        IngestError::Transform { .. } => err,
        other => IngestError::transform(other.to_string()),
    }
}

/// Stream the document once and assemble the output JSON text
fn render(template: &Template, path: &Path, version: IfcVersion) -> Result<String> {
    let collections = template.collections();
    let mut buffers = vec![String::new(); collections.len()];

    // Reference stubs are pointers, not objects of their own
    let interesting = |tag: &OpenTag| tag.pointer().is_none() && template.selects(&tag.local);
    let spec = CaptureSpec::new(&interesting).with_fields(template.field_names());
    walk_file(path, &spec, |element| {
        for (collection, buffer) in collections.iter().zip(buffers.iter_mut()) {
            if !collection.matches(&element.local) {
                continue;
            }
            if !buffer.is_empty() {
                buffer.push(',');
            }
            collection
                .render(&element, buffer)
                .map_err(|e| IngestError::transform(e.to_string()))?;
        }
        Ok(())
    })?;

    let mut out = String::new();
    out.push('{');
    out.push_str(&quote(template.root())?);
    out.push_str(":{\"schema\":");
    out.push_str(&quote(version.as_str())?);
    for (collection, buffer) in collections.iter().zip(&buffers) {
        out.push(',');
        out.push_str(&quote(&collection.name)?);
        out.push_str(":[");
        out.push_str(buffer);
        out.push(']');
    }
    out.push_str("}}");
    Ok(out)
}

fn quote(text: &str) -> Result<String> {
    serde_json::to_string(text).map_err(|e| IngestError::transform(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const TEMPLATE: &str = r#"{
  "root": "ifc",
  "collections": [
    {
      "name": "storeys",
      "match": ["IfcBuildingStorey"],
      "fields": { "id": "@id", "name": "@Name|Name", "elevation": "@Elevation|Elevation" },
      "numeric": ["elevation"]
    },
    {
      "name": "elements",
      "match": ["IfcWall"],
      "prefix": ["IfcBuildingElement"],
      "fields": { "id": "@id", "type": "name()", "name": "Name" }
    },
    {
      "name": "relationships",
      "match": ["IfcRelContainedInSpatialStructure"],
      "fields": {
        "type": "name()",
        "relating": "refs(RelatingStructure)",
        "related": "refs(RelatedElements)"
      }
    }
  ]
}"#;

    const DOC: &str = r##"<ifcXML>
  <IfcBuildingStorey id="l1" Name="Ground" Elevation="0.0"/>
  <IfcWall id="w1"><Name>North &amp; wall</Name></IfcWall>
  <IfcBuildingElementProxy id="x1"/>
  <IfcRelContainedInSpatialStructure>
    <RelatingStructure><IfcBuildingStorey href="#l1"/></RelatingStructure>
    <RelatedElements><IfcWall ref="w1"/><IfcBuildingElementProxy ref="x1"/></RelatedElements>
  </IfcRelContainedInSpatialStructure>
</ifcXML>"##;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn test_transform_document() {
        let dir = tempfile::tempdir().unwrap();
        let template = write(dir.path(), "t.json", TEMPLATE);
        let doc = write(dir.path(), "d.xml", DOC);

        let engine = TransformEngine::new(&template);
        let value = engine.transform(&doc, IfcVersion::Ifc4).unwrap();
        assert_eq!(
            value,
            json!({
                "ifc": {
                    "schema": "IFC4",
                    "storeys": [{ "id": "l1", "name": "Ground", "elevation": 0.0 }],
                    "elements": [
                        { "id": "w1", "type": "IfcWall", "name": "North & wall" },
                        { "id": "x1", "type": "IfcBuildingElementProxy" }
                    ],
                    "relationships": [{
                        "type": "IfcRelContainedInSpatialStructure",
                        "relating": ["l1"],
                        "related": ["w1", "x1"]
                    }]
                }
            })
        );
    }

    #[test]
    fn test_template_cache() {
        let dir = tempfile::tempdir().unwrap();
        let template = write(dir.path(), "t.json", TEMPLATE);
        let doc = write(dir.path(), "d.xml", DOC);
        let engine = TransformEngine::new(&template);

        let first = engine.template(&template).unwrap();
        std::fs::remove_file(&template).unwrap();
        let second = engine.template(&template).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(engine.transform(&doc, IfcVersion::Ifc2x3).is_ok());

        engine.clear_cache();
        let err = engine.transform(&doc, IfcVersion::Ifc2x3).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_failures_are_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let template = write(dir.path(), "t.json", TEMPLATE);
        let broken = write(dir.path(), "broken.xml", "<ifcXML><IfcWall></ifcXML>");
        let engine = TransformEngine::new(&template);
        let err = engine.transform(&broken, IfcVersion::Ifc4).unwrap_err();
        assert!(matches!(err, IngestError::Transform { .. }));

        let bad_template = write(dir.path(), "bad.json", r#"{"root": "x", "collections": 3}"#);
        let err = engine
            .transform_with(&bad_template, &dir.path().join("d.xml"), IfcVersion::Ifc4)
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
