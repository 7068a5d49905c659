// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborator traits
//!
//! The ingestion core never talks to a database directly. It drives a
//! [`ModelStore`] unit of work and looks schema resources up through a
//! [`SchemaLocator`].

use crate::{
    Entity, EntityId, Guid, HierarchyKind, IfcVersion, Job, JobId, ModelId, ModelRecord,
    NewEntity, NewModel, Relationship, Space, Storey, StoreError,
};
use std::path::PathBuf;

/// Result alias for storage calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Transactional storage collaborator
///
/// Inserts are flushed immediately: the generated identifier is returned and
/// the row is visible to subsequent queries on the same unit of work. Nothing
/// becomes durable until [`ModelStore::commit`].
///
/// # Example
///
/// ```ignore
/// let id = store.insert_entity(new_entity)?;
/// store.insert_storey(Storey { entity_id: id, .. })?;
/// store.commit()?;
/// ```
pub trait ModelStore {
    /// Load a job record
    fn job(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// Insert or replace a job record
    fn save_job(&mut self, job: &Job) -> StoreResult<()>;

    /// Create the model aggregate and return its generated id
    fn create_model(&mut self, model: NewModel) -> StoreResult<ModelId>;

    /// Load a model aggregate
    fn model(&self, id: ModelId) -> StoreResult<Option<ModelRecord>>;

    /// Replace a model aggregate
    fn update_model(&mut self, model: &ModelRecord) -> StoreResult<()>;

    /// Insert an entity row
    ///
    /// Fails with [`StoreError::DuplicateGuid`] when the GUID already exists
    /// in the same model.
    fn insert_entity(&mut self, entity: NewEntity) -> StoreResult<EntityId>;

    /// Load an entity row
    fn entity(&self, id: EntityId) -> StoreResult<Option<Entity>>;

    /// Find an entity by GUID within a model
    fn entity_by_guid(&self, model: ModelId, guid: Guid) -> StoreResult<Option<Entity>>;

    /// Insert a storey row
    fn insert_storey(&mut self, storey: Storey) -> StoreResult<()>;

    /// Storey row belonging to an entity
    fn storey_by_entity(&self, entity: EntityId) -> StoreResult<Option<Storey>>;

    /// Insert a space row
    fn insert_space(&mut self, space: Space) -> StoreResult<()>;

    /// Insert a relationship edge
    fn insert_relationship(&mut self, relationship: Relationship) -> StoreResult<()>;

    /// Relationship edges of a model
    fn relationships(&self, model: ModelId) -> StoreResult<Vec<Relationship>>;

    /// Set one hierarchy back-reference of an entity
    fn set_hierarchy_ref(
        &mut self,
        entity: EntityId,
        kind: HierarchyKind,
        target: EntityId,
    ) -> StoreResult<()>;

    /// Make all pending writes durable
    fn commit(&mut self) -> StoreResult<()>;

    /// Discard all pending writes
    fn rollback(&mut self);
}

/// Schema resource lookup: dialect → schema file
pub trait SchemaLocator: Send + Sync {
    /// Path of the schema for `version`, or `None` when not configured
    fn schema_path(&self, version: IfcVersion) -> Option<PathBuf>;
}
