// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming entity extraction
//!
//! One forward pass over the document. Every hierarchy entity and building
//! element is turned into rows as soon as its end tag is read; the element is
//! released right after. Malformed or GUID-less elements are skipped and
//! counted. Storage failures abort the pass.

use crate::capture::{walk_file, CaptureSpec, Captured};
use crate::session::ParseSession;
use crate::xml::OpenTag;
use ifcxml_model::{
    Guid, HierarchyKind, IngestError, ModelStore, NewEntity, ReferenceMarker, Result, Space,
    Storey, TagClass,
};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;

/// Slot holding inline storey containment on building elements
pub const CONTAINED_IN_STRUCTURE: &str = "ContainedInStructure";

/// Slot holding property and quantity set definitions
pub const IS_DEFINED_BY: &str = "IsDefinedBy";

/// Nested element names read as fallback values
const FIELDS: &[&str] = &["GlobalId", "Name", "Description", "Tag", "Elevation"];

/// Counters of one extraction pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionSummary {
    /// Hierarchy entities and building elements inserted
    pub elements: usize,
    pub storeys: usize,
    pub spaces: usize,
    /// Entities skipped for a missing or unparseable GUID
    pub skipped: usize,
    pub project_guid: Option<Guid>,
    /// Most XML frames held at once
    pub peak_live: usize,
    /// Total XML frames released
    pub released: u64,
}

/// Entity extraction pass
#[derive(Clone, Copy, Debug, Default)]
pub struct EntityExtractor;

impl EntityExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract all entities of `path` into `store`
    ///
    /// Identifiers are registered in `session` for the resolver, and inline
    /// containment links are queued there.
    pub fn extract<S>(
        &self,
        path: &Path,
        session: &mut ParseSession,
        store: &mut S,
    ) -> Result<ExtractionSummary>
    where
        S: ModelStore + ?Sized,
    {
        let interesting = |tag: &OpenTag| is_entity_tag(tag);
        let spec = CaptureSpec::new(&interesting).with_fields(FIELDS.iter().copied());
        let mut summary = ExtractionSummary::default();

        let stats = walk_file(path, &spec, |element| {
            extract_one(element, session, store, &mut summary)
        })
        .map_err(as_extraction_failure)?;

        summary.peak_live = stats.peak_live;
        summary.released = stats.released;

        let totals = &mut session.stats;
        totals.elements += summary.elements;
        totals.storeys += summary.storeys;
        totals.spaces += summary.spaces;
        totals.skipped += summary.skipped;
        if totals.project_guid.is_none() {
            totals.project_guid = summary.project_guid;
        }

        info!(
            "extracted {} entities ({} storeys, {} spaces, {} skipped) from {}",
            summary.elements,
            summary.storeys,
            summary.spaces,
            summary.skipped,
            path.display()
        );
        Ok(summary)
    }
}

/// Entity tags, excluding reference stubs (`<IfcWall ref="i3"/>`)
fn is_entity_tag(tag: &OpenTag) -> bool {
    TagClass::classify(&tag.local).is_entity() && tag.pointer().is_none()
}

fn as_extraction_failure(err: IngestError) -> IngestError {
    match err {
        IngestError::Extraction { .. } => err,
        other => IngestError::extraction(other.to_string()),
    }
}

/// GUID text: `GlobalId` attribute, nested `GlobalId`, then the `id` attribute
///
/// The first one present decides.
fn guid_text(element: &Captured) -> Option<&str> {
    element
        .attr_or_field("GlobalId")
        .or_else(|| element.attr("id").map(str::trim).filter(|s| !s.is_empty()))
}

/// Elevation as authored; anything non-numeric reads as missing
pub fn parse_elevation(text: &str) -> Option<f64> {
    lexical_core::parse::<f64>(text.trim().as_bytes())
        .ok()
        .filter(|v| v.is_finite())
}

fn extract_one<S>(
    element: Captured,
    session: &mut ParseSession,
    store: &mut S,
    summary: &mut ExtractionSummary,
) -> Result<()>
where
    S: ModelStore + ?Sized,
{
    let class = TagClass::classify(&element.local);

    let Some(text) = guid_text(&element) else {
        debug!(
            "skipping <{}> at {}:{}: no GUID",
            element.local, element.line, element.column
        );
        summary.skipped += 1;
        return Ok(());
    };
    let Some(guid) = Guid::parse(text) else {
        debug!(
            "skipping <{}> at {}:{}: unparseable GUID {:?}",
            element.local, element.line, element.column, text
        );
        summary.skipped += 1;
        return Ok(());
    };

    let owned = |name: &str| element.attr_or_field(name).map(str::to_string);
    let (property_refs, quantity_refs) = definition_markers(&element);
    let attributes = match class {
        TagClass::BuildingElement => element
            .children
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => BTreeMap::new(),
    };

    let id = store.insert_entity(NewEntity {
        model_id: session.model_id(),
        tenant_id: session.tenant_id(),
        guid,
        ifc_type: element.local.clone(),
        name: owned("Name"),
        description: owned("Description"),
        tag: owned("Tag"),
        property_refs,
        quantity_refs,
        attributes,
    })?;
    session.register(guid, element.attr("id"), id, class);
    summary.elements += 1;

    match class {
        TagClass::Hierarchy(HierarchyKind::Project) => {
            if summary.project_guid.is_none() {
                summary.project_guid = Some(guid);
            }
        }
        TagClass::Hierarchy(HierarchyKind::Storey) => {
            store.insert_storey(Storey {
                entity_id: id,
                model_id: session.model_id(),
                tenant_id: session.tenant_id(),
                guid,
                name: owned("Name"),
                elevation: element.attr_or_field("Elevation").and_then(parse_elevation),
            })?;
            summary.storeys += 1;
        }
        TagClass::Hierarchy(HierarchyKind::Space) => {
            store.insert_space(Space {
                entity_id: id,
                model_id: session.model_id(),
                tenant_id: session.tenant_id(),
                guid,
                name: owned("Name"),
                number: owned("Tag"),
            })?;
            summary.spaces += 1;
        }
        TagClass::BuildingElement => {
            if let Some(reference) = element.first_pointer(&[CONTAINED_IN_STRUCTURE]) {
                session.queue_storey_link(id, reference);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Property and quantity set markers from the `IsDefinedBy` slot
///
/// Pointers carried by a quantity definition go to the quantity list;
/// everything else is treated as a property set reference.
fn definition_markers(element: &Captured) -> (Vec<ReferenceMarker>, Vec<ReferenceMarker>) {
    let mut properties = Vec::new();
    let mut quantities = Vec::new();
    for pointer in element.pointers_in(IS_DEFINED_BY) {
        let marker = ReferenceMarker::new(pointer.target.clone());
        if pointer.carrier.contains("Quantit") {
            quantities.push(marker);
        } else {
            properties.push(marker);
        }
    }
    (properties, quantities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use ifcxml_model::{ModelId, TenantId};
    use std::io::Write;

    const SAMPLE: &str = r##"<?xml version="1.0"?>
<ifcXML xmlns="http://www.buildingsmart-tech.org/ifcXML/IFC4/final">
  <IfcProject id="i1" GlobalId="2O2Fr$t4X7Zf8NOew3FLOH" Name="Tower"/>
  <IfcBuildingStorey id="i2">
    <GlobalId>11111111-1111-1111-1111-111111111111</GlobalId>
    <Name>Level 1</Name>
    <Elevation> 3.5 </Elevation>
  </IfcBuildingStorey>
  <IfcBuildingStorey id="i3" GlobalId="22222222-2222-2222-2222-222222222222" Elevation="n/a"/>
  <IfcSpace GlobalId="33333333-3333-3333-3333-333333333333" Name="Office">
    <Tag>101</Tag>
  </IfcSpace>
  <IfcWall GlobalId="44444444-4444-4444-4444-444444444444">
    <Name>Wall A</Name>
    <PredefinedType>STANDARD</PredefinedType>
    <ContainedInStructure><IfcRelContainedInSpatialStructure ref="i2"/></ContainedInStructure>
    <IsDefinedBy><IfcPropertySet ref="ps1"/></IsDefinedBy>
    <IsDefinedBy><IfcElementQuantity ref="qt1"/></IsDefinedBy>
  </IfcWall>
  <IfcSlab id="not-a-guid"/>
  <IfcBeam/>
  <IfcPropertySet id="ps1" GlobalId="55555555-5555-5555-5555-555555555555"/>
</ifcXML>"##;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn run(content: &str) -> (ExtractionSummary, ParseSession, MemoryStore) {
        let file = write_temp(content);
        let mut store = MemoryStore::new();
        let mut session = ParseSession::new(ModelId::new_v4(), TenantId::new_v4());
        let summary = EntityExtractor::new()
            .extract(file.path(), &mut session, &mut store)
            .unwrap();
        (summary, session, store)
    }

    #[test]
    fn test_counts_and_skips() {
        let (summary, session, _) = run(SAMPLE);
        assert_eq!(summary.elements, 5);
        assert_eq!(summary.storeys, 2);
        assert_eq!(summary.spaces, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(session.stats.elements, 5);
        assert_eq!(
            summary.project_guid,
            Guid::parse("2O2Fr$t4X7Zf8NOew3FLOH")
        );
    }

    #[test]
    fn test_storey_elevation() {
        let (_, session, store) = run(SAMPLE);
        let storeys = store.storeys_of(session.model_id()).unwrap();
        assert_eq!(storeys[0].name.as_deref(), Some("Level 1"));
        assert_eq!(storeys[0].elevation, Some(3.5));
        // Non-numeric elevation is null, not an error
        assert_eq!(storeys[1].elevation, None);
    }

    #[test]
    fn test_space_number_from_tag() {
        let (_, session, store) = run(SAMPLE);
        let spaces = store.spaces_of(session.model_id()).unwrap();
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].number.as_deref(), Some("101"));
        assert_eq!(spaces[0].name.as_deref(), Some("Office"));
    }

    #[test]
    fn test_building_element_details() {
        let (_, session, store) = run(SAMPLE);
        let wall = store
            .entities_of(session.model_id())
            .unwrap()
            .into_iter()
            .find(|e| e.ifc_type == "IfcWall")
            .unwrap();
        assert_eq!(wall.name.as_deref(), Some("Wall A"));
        assert_eq!(
            wall.attributes.get("PredefinedType").map(String::as_str),
            Some("STANDARD")
        );
        assert_eq!(wall.property_refs, vec![ReferenceMarker::new("ps1")]);
        assert_eq!(wall.quantity_refs, vec![ReferenceMarker::new("qt1")]);

        let links = session.pending_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].element, wall.id);
        assert_eq!(links[0].reference, "i2");
    }

    #[test]
    fn test_duplicate_guid_aborts_pass() {
        let xml = r#"<ifcXML>
  <IfcWall GlobalId="44444444-4444-4444-4444-444444444444"/>
  <IfcSlab GlobalId="44444444-4444-4444-4444-444444444444"/>
</ifcXML>"#;
        let file = write_temp(xml);
        let mut store = MemoryStore::new();
        let mut session = ParseSession::new(ModelId::new_v4(), TenantId::new_v4());
        let err = EntityExtractor::new()
            .extract(file.path(), &mut session, &mut store)
            .unwrap_err();
        match err {
            IngestError::Extraction { reason } => assert!(reason.contains("duplicate GUID")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_memory_bounded_by_depth() {
        let mut xml = String::from("<ifcXML>");
        for i in 0..1000 {
            xml.push_str(&format!(
                "<IfcWall GlobalId=\"00000000-0000-0000-0000-{:012}\"><Name>w</Name></IfcWall>",
                i
            ));
        }
        xml.push_str("</ifcXML>");
        let (summary, _, _) = run(&xml);
        assert_eq!(summary.elements, 1000);
        assert_eq!(summary.peak_live, 3);
        assert_eq!(summary.released, 2001);
    }

    #[test]
    fn test_parse_elevation() {
        assert_eq!(parse_elevation("0"), Some(0.0));
        assert_eq!(parse_elevation("-2.75"), Some(-2.75));
        assert_eq!(parse_elevation("1e3"), Some(1000.0));
        assert_eq!(parse_elevation(""), None);
        assert_eq!(parse_elevation("3,5"), None);
    }
}
