// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two-phase reference resolution
//!
//! Phase A settles the storey links queued during extraction. Phase B
//! re-reads the document, looking only at the four relationship element
//! kinds, and turns them into edges between already extracted entities.

use crate::capture::{walk_file, CaptureSpec, Captured};
use crate::session::{ParseSession, Resolved};
use crate::xml::OpenTag;
use ifcxml_model::{
    HierarchyKind, IngestError, ModelStore, Relationship, RelationshipType, Result, TagClass,
};
use log::{debug, info};
use std::path::Path;

/// Slots naming the relating side of a relationship
pub const RELATING_ROLES: &[&str] = &[
    "RelatingObject",
    "RelatingStructure",
    "RelatingBuildingElement",
    "RelatingOpeningElement",
];

/// Slots naming the related side of a relationship
pub const RELATED_ROLES: &[&str] = &[
    "RelatedObjects",
    "RelatedElements",
    "RelatedOpeningElement",
    "RelatedBuildingElement",
];

/// Counters of one resolution run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub storey_links_resolved: usize,
    pub storey_links_dropped: usize,
    /// Edges inserted
    pub relationships: usize,
    /// Relationship elements whose relating side did not resolve
    pub skipped_relationships: usize,
    /// Related references that did not resolve
    pub dropped_references: usize,
}

/// Reference resolution pass
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Run both phases against `path`
    pub fn resolve<S>(
        &self,
        path: &Path,
        session: &mut ParseSession,
        store: &mut S,
    ) -> Result<ResolutionSummary>
    where
        S: ModelStore + ?Sized,
    {
        let mut summary = ResolutionSummary::default();
        self.resolve_storey_links(session, store, &mut summary)
            .map_err(as_extraction_failure)?;
        self.resolve_relationships(path, session, store, &mut summary)
            .map_err(as_extraction_failure)?;

        session.stats.relationships += summary.relationships;
        info!(
            "resolved {} storey links ({} dropped), {} relationships ({} skipped, {} references dropped)",
            summary.storey_links_resolved,
            summary.storey_links_dropped,
            summary.relationships,
            summary.skipped_relationships,
            summary.dropped_references
        );
        Ok(summary)
    }

    /// Phase A: queued inline containment links
    fn resolve_storey_links<S>(
        &self,
        session: &mut ParseSession,
        store: &mut S,
        summary: &mut ResolutionSummary,
    ) -> Result<()>
    where
        S: ModelStore + ?Sized,
    {
        for link in session.take_pending() {
            let storey = match session.lookup(&link.reference) {
                Some(resolved) if resolved.class == TagClass::Hierarchy(HierarchyKind::Storey) => {
                    store.storey_by_entity(resolved.id)?
                }
                _ => None,
            };
            match storey {
                Some(storey) => {
                    store.set_hierarchy_ref(link.element, HierarchyKind::Storey, storey.entity_id)?;
                    summary.storey_links_resolved += 1;
                }
                None => {
                    debug!("dropping storey link {} -> {}", link.element, link.reference);
                    summary.storey_links_dropped += 1;
                }
            }
        }
        Ok(())
    }

    /// Phase B: relationship elements
    fn resolve_relationships<S>(
        &self,
        path: &Path,
        session: &ParseSession,
        store: &mut S,
        summary: &mut ResolutionSummary,
    ) -> Result<()>
    where
        S: ModelStore + ?Sized,
    {
        // Stubs such as `<IfcRelContainedInSpatialStructure ref="r1"/>` only point at a relationship
        let interesting = |tag: &OpenTag| {
            RelationshipType::is_relationship_tag(&tag.local) && tag.pointer().is_none()
        };
        let spec = CaptureSpec::new(&interesting);
        walk_file(path, &spec, |element| {
            resolve_one(&element, session, store, summary)
        })?;
        Ok(())
    }
}

fn as_extraction_failure(err: IngestError) -> IngestError {
    match err {
        IngestError::Extraction { .. } => err,
        other => IngestError::extraction(other.to_string()),
    }
}

fn resolve_one<S>(
    element: &Captured,
    session: &ParseSession,
    store: &mut S,
    summary: &mut ResolutionSummary,
) -> Result<()>
where
    S: ModelStore + ?Sized,
{
    let kind = RelationshipType::from_tag(&element.local);
    let relating = element
        .first_pointer(RELATING_ROLES)
        .and_then(|r| session.lookup(r));
    let Some(from) = relating else {
        debug!(
            "skipping <{}> at {}:{}: relating reference unresolved",
            element.local, element.line, element.column
        );
        summary.skipped_relationships += 1;
        return Ok(());
    };

    let related = element
        .pointers
        .iter()
        .filter(|p| RELATED_ROLES.contains(&p.slot.as_str()));
    for pointer in related {
        let Some(to) = session.lookup(&pointer.target) else {
            summary.dropped_references += 1;
            continue;
        };
        store.insert_relationship(Relationship {
            model_id: session.model_id(),
            tenant_id: session.tenant_id(),
            kind,
            from: from.id,
            to: to.id,
        })?;
        summary.relationships += 1;
        link_hierarchy(kind, from, to, store)?;
    }
    Ok(())
}

/// Back-reference implied by an edge, set only when still unset
fn link_hierarchy<S>(kind: RelationshipType, from: Resolved, to: Resolved, store: &mut S) -> Result<()>
where
    S: ModelStore + ?Sized,
{
    let TagClass::Hierarchy(parent) = from.class else {
        return Ok(());
    };
    let applies = match kind {
        RelationshipType::Contains => {
            matches!(parent, HierarchyKind::Storey | HierarchyKind::Space)
        }
        RelationshipType::Aggregates => matches!(
            parent,
            HierarchyKind::Project | HierarchyKind::Site | HierarchyKind::Building
        ),
        _ => false,
    };
    if !applies {
        return Ok(());
    }
    let unset = store
        .entity(to.id)?
        .is_some_and(|e| e.hierarchy.slot(parent).is_none());
    if unset {
        store.set_hierarchy_ref(to.id, parent, from.id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::EntityExtractor;
    use crate::store::MemoryStore;
    use ifcxml_model::{EntityId, ModelId, TenantId};
    use std::io::Write;

    const MODEL: &str = r##"<ifcXML>
  <IfcProject id="p" GlobalId="00000000-0000-0000-0000-00000000000a"/>
  <IfcSite id="s" GlobalId="00000000-0000-0000-0000-00000000000b"/>
  <IfcBuildingStorey id="l1" GlobalId="00000000-0000-0000-0000-00000000000c"/>
  <IfcSpace id="r1" GlobalId="00000000-0000-0000-0000-00000000000d"/>
  <IfcWall id="w1" GlobalId="00000000-0000-0000-0000-00000000000e">
    <ContainedInStructure href="#l1"/>
  </IfcWall>
  <IfcDoor id="d1" GlobalId="00000000-0000-0000-0000-00000000000f">
    <ContainedInStructure><IfcRelContainedInSpatialStructure ref="unknown"/></ContainedInStructure>
  </IfcDoor>
  <IfcRelAggregates>
    <RelatingObject><IfcProject ref="p"/></RelatingObject>
    <RelatedObjects><IfcSite ref="s"/><IfcSite ref="missing"/></RelatedObjects>
  </IfcRelAggregates>
  <IfcRelContainedInSpatialStructure>
    <RelatingStructure><IfcSpace href="#r1"/></RelatingStructure>
    <RelatedElements><IfcDoor ref="d1"/></RelatedElements>
  </IfcRelContainedInSpatialStructure>
  <IfcRelVoidsElement>
    <RelatingBuildingElement><IfcWall ref="nowhere"/></RelatingBuildingElement>
    <RelatedOpeningElement><IfcOpeningElement ref="w1"/></RelatedOpeningElement>
  </IfcRelVoidsElement>
</ifcXML>"##;

    struct Fixture {
        session: ParseSession,
        store: MemoryStore,
        summary: ResolutionSummary,
    }

    fn run(content: &str) -> Fixture {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let mut store = MemoryStore::new();
        let mut session = ParseSession::new(ModelId::new_v4(), TenantId::new_v4());
        EntityExtractor::new()
            .extract(file.path(), &mut session, &mut store)
            .unwrap();
        let summary = ReferenceResolver::new()
            .resolve(file.path(), &mut session, &mut store)
            .unwrap();
        Fixture {
            session,
            store,
            summary,
        }
    }

    fn id_of(fixture: &Fixture, xml_id: &str) -> EntityId {
        fixture.session.lookup(xml_id).unwrap().id
    }

    #[test]
    fn test_storey_links() {
        let f = run(MODEL);
        assert_eq!(f.summary.storey_links_resolved, 1);
        assert_eq!(f.summary.storey_links_dropped, 1);
        let wall = f.store.entity(id_of(&f, "w1")).unwrap().unwrap();
        assert_eq!(wall.hierarchy.storey, Some(id_of(&f, "l1")));
    }

    #[test]
    fn test_edges_only_between_resolved_endpoints() {
        let f = run(MODEL);
        let edges = f.store.relationships(f.session.model_id()).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(f.summary.relationships, 2);
        assert_eq!(f.summary.dropped_references, 1);
        assert_eq!(f.summary.skipped_relationships, 1);
        assert_eq!(f.session.stats.relationships, 2);

        let aggregate = edges
            .iter()
            .find(|e| e.kind == RelationshipType::Aggregates)
            .unwrap();
        assert_eq!(aggregate.from, id_of(&f, "p"));
        assert_eq!(aggregate.to, id_of(&f, "s"));
    }

    #[test]
    fn test_relationship_stubs_are_not_relationships() {
        let xml = r#"<ifcXML>
  <IfcBuildingStorey id="l1" GlobalId="00000000-0000-0000-0000-00000000000c"/>
  <IfcWall id="w1" GlobalId="00000000-0000-0000-0000-00000000000e">
    <ContainedInStructure><IfcRelContainedInSpatialStructure ref="r1"/></ContainedInStructure>
  </IfcWall>
  <IfcRelContainedInSpatialStructure id="r1">
    <RelatedElements><IfcWall ref="w1"/></RelatedElements>
    <RelatingStructure><IfcBuildingStorey ref="l1"/></RelatingStructure>
  </IfcRelContainedInSpatialStructure>
</ifcXML>"#;
        let f = run(xml);
        assert_eq!(f.summary.relationships, 1);
        assert_eq!(f.summary.skipped_relationships, 0);
        assert_eq!(f.summary.storey_links_dropped, 1);
        let wall = f.store.entity(id_of(&f, "w1")).unwrap().unwrap();
        assert_eq!(wall.hierarchy.storey, Some(id_of(&f, "l1")));
    }

    #[test]
    fn test_hierarchy_back_references() {
        let f = run(MODEL);
        let site = f.store.entity(id_of(&f, "s")).unwrap().unwrap();
        assert_eq!(site.hierarchy.project, Some(id_of(&f, "p")));

        let door = f.store.entity(id_of(&f, "d1")).unwrap().unwrap();
        assert_eq!(door.hierarchy.space, Some(id_of(&f, "r1")));
        assert_eq!(door.hierarchy.storey, None);
    }

    #[test]
    fn test_inline_related_definitions() {
        let xml = r#"<ifcXML>
  <IfcBuildingStorey id="l1" GlobalId="00000000-0000-0000-0000-00000000000c"/>
  <IfcRelContainedInSpatialStructure>
    <RelatingStructure><IfcBuildingStorey ref="l1"/></RelatingStructure>
    <RelatedElements>
      <IfcWall id="w9" GlobalId="00000000-0000-0000-0000-000000000019"/>
    </RelatedElements>
  </IfcRelContainedInSpatialStructure>
</ifcXML>"#;
        let f = run(xml);
        assert_eq!(f.summary.relationships, 1);
        let wall = f.store.entity(id_of(&f, "w9")).unwrap().unwrap();
        assert_eq!(wall.hierarchy.storey, Some(id_of(&f, "l1")));
    }
}
