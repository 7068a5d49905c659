// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-run scratch state shared by extraction and resolution
//!
//! A `ParseSession` is created for one file and dropped when the run ends. It
//! is never stored on a component, so nothing leaks between files or tenants.

use ifcxml_model::{EntityId, Guid, ModelId, ModelStatistics, TagClass, TenantId};
use rustc_hash::FxHashMap;

/// Entity an identifier resolved to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub id: EntityId,
    pub class: TagClass,
}

/// Inline containment link waiting for the resolver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingLink {
    pub element: EntityId,
    pub reference: String,
}

/// Scratch state of one processing run
#[derive(Debug)]
pub struct ParseSession {
    model_id: ModelId,
    tenant_id: TenantId,
    /// Canonical GUID text and raw XML ids → entity
    index: FxHashMap<String, Resolved>,
    pending: Vec<PendingLink>,
    /// Statistics accumulated by the passes
    pub stats: ModelStatistics,
}

impl ParseSession {
    pub fn new(model_id: ModelId, tenant_id: TenantId) -> Self {
        Self {
            model_id,
            tenant_id,
            index: FxHashMap::default(),
            pending: Vec::new(),
            stats: ModelStatistics::default(),
        }
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Record an inserted entity under its GUID and its XML id, if any
    pub fn register(&mut self, guid: Guid, xml_id: Option<&str>, id: EntityId, class: TagClass) {
        let resolved = Resolved { id, class };
        self.index.insert(guid.to_string(), resolved);
        if let Some(xml_id) = xml_id.map(str::trim).filter(|s| !s.is_empty()) {
            self.index.entry(xml_id.to_string()).or_insert(resolved);
        }
    }

    /// Resolve a reference pointer
    ///
    /// Tries the raw text first (XML ids), then the text read as a GUID in
    /// any accepted form.
    pub fn lookup(&self, reference: &str) -> Option<Resolved> {
        let reference = reference.trim();
        self.index.get(reference).copied().or_else(|| {
            Guid::parse(reference).and_then(|guid| self.index.get(&guid.to_string()).copied())
        })
    }

    /// Queue an element → storey link found inline during extraction
    pub fn queue_storey_link(&mut self, element: EntityId, reference: impl Into<String>) {
        self.pending.push(PendingLink {
            element,
            reference: reference.into(),
        });
    }

    pub fn pending_links(&self) -> &[PendingLink] {
        &self.pending
    }

    /// Take the queued links, leaving the queue empty
    pub fn take_pending(&mut self) -> Vec<PendingLink> {
        std::mem::take(&mut self.pending)
    }

    /// Number of distinct lookup keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifcxml_model::HierarchyKind;

    #[test]
    fn test_lookup_by_any_guid_form() {
        let mut session = ParseSession::new(ModelId::new_v4(), TenantId::new_v4());
        let guid = Guid::parse("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0").unwrap();
        session.register(guid, Some("i12"), EntityId(3), TagClass::BuildingElement);

        assert_eq!(session.lookup("i12").map(|r| r.id), Some(EntityId(3)));
        assert_eq!(
            session.lookup("0F1E2D3C4B5A69788796A5B4C3D2E1F0").map(|r| r.id),
            Some(EntityId(3))
        );
        assert_eq!(session.lookup(&guid.to_compressed()).map(|r| r.id), Some(EntityId(3)));
        assert_eq!(session.lookup("i13"), None);
    }

    #[test]
    fn test_xml_id_does_not_shadow_earlier_entity() {
        let mut session = ParseSession::new(ModelId::new_v4(), TenantId::new_v4());
        let a = Guid::parse("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Guid::parse("00000000-0000-0000-0000-000000000002").unwrap();
        let storey = TagClass::Hierarchy(HierarchyKind::Storey);
        session.register(a, Some("dup"), EntityId(1), storey);
        session.register(b, Some("dup"), EntityId(2), TagClass::BuildingElement);
        assert_eq!(session.lookup("dup").map(|r| r.id), Some(EntityId(1)));
    }

    #[test]
    fn test_take_pending_empties_queue() {
        let mut session = ParseSession::new(ModelId::new_v4(), TenantId::new_v4());
        session.queue_storey_link(EntityId(9), "i4");
        assert_eq!(session.pending_links().len(), 1);
        let links = session.take_pending();
        assert_eq!(links[0].reference, "i4");
        assert!(session.pending_links().is_empty());
    }
}
