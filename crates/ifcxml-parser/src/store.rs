// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transactional store
//!
//! Committed tables are shared behind an `Arc<RwLock<..>>`; every session
//! handle keeps its own pending overlay that becomes visible to other
//! sessions only on `commit`.

use ifcxml_model::{
    Entity, EntityId, Guid, HierarchyKind, Job, JobId, ModelId, ModelRecord, ModelStatistics,
    ModelStore, NewEntity, NewModel, Relationship, Space, StoreError, StoreResult, Storey,
};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug, Default)]
struct Tables {
    jobs: FxHashMap<JobId, Job>,
    models: FxHashMap<ModelId, ModelRecord>,
    entities: FxHashMap<EntityId, Entity>,
    guids: FxHashMap<(ModelId, Guid), EntityId>,
    storeys: FxHashMap<EntityId, Storey>,
    spaces: FxHashMap<EntityId, Space>,
    relationships: Vec<Relationship>,
}

impl Tables {
    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
            && self.models.is_empty()
            && self.entities.is_empty()
            && self.storeys.is_empty()
            && self.spaces.is_empty()
            && self.relationships.is_empty()
    }
}

/// Thread-safe in-memory `ModelStore`
pub struct MemoryStore {
    committed: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicU64>,
    pending: Tables,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(Tables::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Tables::default(),
        }
    }

    /// New unit of work over the same committed tables
    pub fn session(&self) -> Self {
        Self {
            committed: Arc::clone(&self.committed),
            next_id: Arc::clone(&self.next_id),
            pending: Tables::default(),
        }
    }

    /// Whether this handle holds uncommitted writes
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.committed
            .read()
            .map_err(|_| StoreError::backend("committed tables lock poisoned"))
    }

    /// Committed and pending entities of a model, ordered by id
    pub fn entities_of(&self, model: ModelId) -> StoreResult<Vec<Entity>> {
        let committed = self.read()?;
        let mut merged: FxHashMap<EntityId, Entity> = committed
            .entities
            .iter()
            .filter(|(_, e)| e.model_id == model)
            .map(|(id, e)| (*id, e.clone()))
            .collect();
        for (id, e) in &self.pending.entities {
            if e.model_id == model {
                merged.insert(*id, e.clone());
            }
        }
        let mut out: Vec<_> = merged.into_values().collect();
        out.sort_by_key(|e| e.id);
        Ok(out)
    }

    /// Committed and pending models created for a job
    pub fn models_of_job(&self, job: JobId) -> StoreResult<Vec<ModelRecord>> {
        let committed = self.read()?;
        let mut merged: FxHashMap<ModelId, ModelRecord> = committed
            .models
            .iter()
            .filter(|(_, m)| m.job_id == job)
            .map(|(id, m)| (*id, m.clone()))
            .collect();
        for (id, m) in &self.pending.models {
            if m.job_id == job {
                merged.insert(*id, m.clone());
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Storey rows of a model
    pub fn storeys_of(&self, model: ModelId) -> StoreResult<Vec<Storey>> {
        let committed = self.read()?;
        let mut out: Vec<_> = committed
            .storeys
            .values()
            .chain(self.pending.storeys.values())
            .filter(|s| s.model_id == model)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.entity_id);
        Ok(out)
    }

    /// Space rows of a model
    pub fn spaces_of(&self, model: ModelId) -> StoreResult<Vec<Space>> {
        let committed = self.read()?;
        let mut out: Vec<_> = committed
            .spaces
            .values()
            .chain(self.pending.spaces.values())
            .filter(|s| s.model_id == model)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.entity_id);
        Ok(out)
    }
}

impl ModelStore for MemoryStore {
    fn job(&self, id: JobId) -> StoreResult<Option<Job>> {
        if let Some(job) = self.pending.jobs.get(&id) {
            return Ok(Some(job.clone()));
        }
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    fn save_job(&mut self, job: &Job) -> StoreResult<()> {
        self.pending.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn create_model(&mut self, model: NewModel) -> StoreResult<ModelId> {
        let id = ModelId::new_v4();
        self.pending.models.insert(
            id,
            ModelRecord {
                id,
                job_id: model.job_id,
                tenant_id: model.tenant_id,
                name: model.name,
                project_guid: None,
                statistics: ModelStatistics::default(),
                normalized_json: None,
            },
        );
        Ok(id)
    }

    fn model(&self, id: ModelId) -> StoreResult<Option<ModelRecord>> {
        if let Some(model) = self.pending.models.get(&id) {
            return Ok(Some(model.clone()));
        }
        Ok(self.read()?.models.get(&id).cloned())
    }

    fn update_model(&mut self, model: &ModelRecord) -> StoreResult<()> {
        if self.model(model.id)?.is_none() {
            return Err(StoreError::not_found("model", model.id));
        }
        self.pending.models.insert(model.id, model.clone());
        Ok(())
    }

    fn insert_entity(&mut self, entity: NewEntity) -> StoreResult<EntityId> {
        let key = (entity.model_id, entity.guid);
        if self.pending.guids.contains_key(&key) || self.read()?.guids.contains_key(&key) {
            return Err(StoreError::DuplicateGuid {
                model: entity.model_id,
                guid: entity.guid,
            });
        }
        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.guids.insert(key, id);
        self.pending.entities.insert(id, Entity::from_new(id, entity));
        Ok(id)
    }

    fn entity(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        if let Some(entity) = self.pending.entities.get(&id) {
            return Ok(Some(entity.clone()));
        }
        Ok(self.read()?.entities.get(&id).cloned())
    }

    fn entity_by_guid(&self, model: ModelId, guid: Guid) -> StoreResult<Option<Entity>> {
        let id = match self.pending.guids.get(&(model, guid)) {
            Some(id) => Some(*id),
            None => self.read()?.guids.get(&(model, guid)).copied(),
        };
        match id {
            Some(id) => self.entity(id),
            None => Ok(None),
        }
    }

    fn insert_storey(&mut self, storey: Storey) -> StoreResult<()> {
        if self.entity(storey.entity_id)?.is_none() {
            return Err(StoreError::not_found("entity", storey.entity_id));
        }
        self.pending.storeys.insert(storey.entity_id, storey);
        Ok(())
    }

    fn storey_by_entity(&self, entity: EntityId) -> StoreResult<Option<Storey>> {
        if let Some(storey) = self.pending.storeys.get(&entity) {
            return Ok(Some(storey.clone()));
        }
        Ok(self.read()?.storeys.get(&entity).cloned())
    }

    fn insert_space(&mut self, space: Space) -> StoreResult<()> {
        if self.entity(space.entity_id)?.is_none() {
            return Err(StoreError::not_found("entity", space.entity_id));
        }
        self.pending.spaces.insert(space.entity_id, space);
        Ok(())
    }

    fn insert_relationship(&mut self, relationship: Relationship) -> StoreResult<()> {
        for endpoint in [relationship.from, relationship.to] {
            match self.entity(endpoint)? {
                Some(e) if e.model_id == relationship.model_id => {}
                _ => return Err(StoreError::not_found("entity", endpoint)),
            }
        }
        self.pending.relationships.push(relationship);
        Ok(())
    }

    fn relationships(&self, model: ModelId) -> StoreResult<Vec<Relationship>> {
        let committed = self.read()?;
        Ok(committed
            .relationships
            .iter()
            .chain(self.pending.relationships.iter())
            .filter(|r| r.model_id == model)
            .copied()
            .collect())
    }

    fn set_hierarchy_ref(
        &mut self,
        entity: EntityId,
        kind: HierarchyKind,
        target: EntityId,
    ) -> StoreResult<()> {
        // Copy-on-write into the overlay
        let mut row = self
            .entity(entity)?
            .ok_or_else(|| StoreError::not_found("entity", entity))?;
        row.hierarchy.set(kind, target);
        self.pending.entities.insert(entity, row);
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        let mut committed = self
            .committed
            .write()
            .map_err(|_| StoreError::backend("committed tables lock poisoned"))?;

        for (key, id) in &self.pending.guids {
            if committed.guids.get(key).is_some_and(|existing| existing != id) {
                return Err(StoreError::DuplicateGuid {
                    model: key.0,
                    guid: key.1,
                });
            }
        }

        let pending = std::mem::take(&mut self.pending);
        committed.jobs.extend(pending.jobs);
        committed.models.extend(pending.models);
        committed.entities.extend(pending.entities);
        committed.guids.extend(pending.guids);
        committed.storeys.extend(pending.storeys);
        committed.spaces.extend(pending.spaces);
        committed.relationships.extend(pending.relationships);
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending = Tables::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifcxml_model::{RelationshipType, TenantId};
    use std::collections::BTreeMap;

    fn new_entity(model: ModelId, tenant: TenantId, guid: &str) -> NewEntity {
        NewEntity {
            model_id: model,
            tenant_id: tenant,
            guid: Guid::parse(guid).unwrap(),
            ifc_type: "IfcWall".to_string(),
            name: None,
            description: None,
            tag: None,
            property_refs: Vec::new(),
            quantity_refs: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    const G1: &str = "00000000-0000-0000-0000-000000000001";
    const G2: &str = "00000000-0000-0000-0000-000000000002";

    #[test]
    fn test_generated_ids_visible_before_commit() {
        let mut store = MemoryStore::new();
        let (model, tenant) = (ModelId::new_v4(), TenantId::new_v4());
        let id = store.insert_entity(new_entity(model, tenant, G1)).unwrap();
        assert!(store.entity(id).unwrap().is_some());

        // Other sessions see nothing until commit
        let other = store.session();
        assert!(other.entity(id).unwrap().is_none());
        store.commit().unwrap();
        assert!(other.entity(id).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_guid_rejected() {
        let mut store = MemoryStore::new();
        let (model, tenant) = (ModelId::new_v4(), TenantId::new_v4());
        store.insert_entity(new_entity(model, tenant, G1)).unwrap();
        let err = store.insert_entity(new_entity(model, tenant, G1)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateGuid { .. }));

        // Same GUID in another model is fine
        store
            .insert_entity(new_entity(ModelId::new_v4(), tenant, G1))
            .unwrap();
    }

    #[test]
    fn test_duplicate_across_sessions_fails_on_commit() {
        let root = MemoryStore::new();
        let (model, tenant) = (ModelId::new_v4(), TenantId::new_v4());
        let mut a = root.session();
        let mut b = root.session();
        a.insert_entity(new_entity(model, tenant, G1)).unwrap();
        b.insert_entity(new_entity(model, tenant, G1)).unwrap();
        a.commit().unwrap();
        assert!(matches!(
            b.commit(),
            Err(StoreError::DuplicateGuid { .. })
        ));
    }

    #[test]
    fn test_rollback_discards_pending() {
        let mut store = MemoryStore::new();
        let (model, tenant) = (ModelId::new_v4(), TenantId::new_v4());
        let id = store.insert_entity(new_entity(model, tenant, G1)).unwrap();
        store.rollback();
        assert!(!store.has_pending());
        assert!(store.entity(id).unwrap().is_none());
    }

    #[test]
    fn test_relationship_endpoints_must_exist() {
        let mut store = MemoryStore::new();
        let (model, tenant) = (ModelId::new_v4(), TenantId::new_v4());
        let a = store.insert_entity(new_entity(model, tenant, G1)).unwrap();
        let b = store.insert_entity(new_entity(model, tenant, G2)).unwrap();
        let edge = Relationship {
            model_id: model,
            tenant_id: tenant,
            kind: RelationshipType::Contains,
            from: a,
            to: b,
        };
        store.insert_relationship(edge).unwrap();
        assert!(store
            .insert_relationship(Relationship { to: EntityId(999), ..edge })
            .is_err());
        assert_eq!(store.relationships(model).unwrap().len(), 1);
    }

    #[test]
    fn test_hierarchy_ref_copy_on_write() {
        let mut store = MemoryStore::new();
        let (model, tenant) = (ModelId::new_v4(), TenantId::new_v4());
        let wall = store.insert_entity(new_entity(model, tenant, G1)).unwrap();
        let storey = store.insert_entity(new_entity(model, tenant, G2)).unwrap();
        store.commit().unwrap();

        let mut session = store.session();
        session
            .set_hierarchy_ref(wall, HierarchyKind::Storey, storey)
            .unwrap();
        assert_eq!(
            session.entity(wall).unwrap().unwrap().hierarchy.storey,
            Some(storey)
        );
        assert_eq!(store.entity(wall).unwrap().unwrap().hierarchy.storey, None);
    }
}
