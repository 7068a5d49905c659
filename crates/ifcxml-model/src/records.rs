// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted records: entities, storeys, spaces, relationship edges, models and jobs

use crate::{EntityId, Guid, HierarchyKind, IfcVersion, JobId, ModelId, RelationshipType, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Opaque pointer to a property or quantity set definition
///
/// Captured as-is; the definition itself is never expanded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMarker {
    pub reference: String,
}

impl ReferenceMarker {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Hierarchy back-references of an entity (relations, not ownership)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyRefs {
    pub project: Option<EntityId>,
    pub site: Option<EntityId>,
    pub building: Option<EntityId>,
    pub storey: Option<EntityId>,
    pub space: Option<EntityId>,
}

impl HierarchyRefs {
    /// Back-reference slot for a hierarchy kind
    pub fn slot(&self, kind: HierarchyKind) -> Option<EntityId> {
        match kind {
            HierarchyKind::Project => self.project,
            HierarchyKind::Site => self.site,
            HierarchyKind::Building => self.building,
            HierarchyKind::Storey => self.storey,
            HierarchyKind::Space => self.space,
        }
    }

    /// Set the back-reference slot for a hierarchy kind
    pub fn set(&mut self, kind: HierarchyKind, target: EntityId) {
        let slot = match kind {
            HierarchyKind::Project => &mut self.project,
            HierarchyKind::Site => &mut self.site,
            HierarchyKind::Building => &mut self.building,
            HierarchyKind::Storey => &mut self.storey,
            HierarchyKind::Space => &mut self.space,
        };
        *slot = Some(target);
    }
}

/// Entity row to be inserted
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntity {
    pub model_id: ModelId,
    pub tenant_id: TenantId,
    pub guid: Guid,
    /// Dialect-specific type tag (local XML name, e.g. "IfcWall")
    pub ifc_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tag: Option<String>,
    pub property_refs: Vec<ReferenceMarker>,
    pub quantity_refs: Vec<ReferenceMarker>,
    /// Direct child elements with text, keyed by local tag name
    pub attributes: BTreeMap<String, String>,
}

/// Persisted entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub model_id: ModelId,
    pub tenant_id: TenantId,
    pub guid: Guid,
    pub ifc_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tag: Option<String>,
    pub property_refs: Vec<ReferenceMarker>,
    pub quantity_refs: Vec<ReferenceMarker>,
    pub attributes: BTreeMap<String, String>,
    pub hierarchy: HierarchyRefs,
}

impl Entity {
    /// Materialize a new entity row with its generated id
    pub fn from_new(id: EntityId, new: NewEntity) -> Self {
        Self {
            id,
            model_id: new.model_id,
            tenant_id: new.tenant_id,
            guid: new.guid,
            ifc_type: new.ifc_type,
            name: new.name,
            description: new.description,
            tag: new.tag,
            property_refs: new.property_refs,
            quantity_refs: new.quantity_refs,
            attributes: new.attributes,
            hierarchy: HierarchyRefs::default(),
        }
    }
}

/// Storey row (one per IfcBuildingStorey entity)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Storey {
    pub entity_id: EntityId,
    pub model_id: ModelId,
    pub tenant_id: TenantId,
    pub guid: Guid,
    pub name: Option<String>,
    /// Elevation in the authored unit; `None` when missing or non-numeric
    pub elevation: Option<f64>,
}

/// Space row (one per IfcSpace entity)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub entity_id: EntityId,
    pub model_id: ModelId,
    pub tenant_id: TenantId,
    pub guid: Guid,
    pub name: Option<String>,
    /// Room number taken from the `Tag` child
    pub number: Option<String>,
}

/// Relationship edge between two entities of the same model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub model_id: ModelId,
    pub tenant_id: TenantId,
    pub kind: RelationshipType,
    pub from: EntityId,
    pub to: EntityId,
}

/// Accumulated statistics of a processed model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStatistics {
    pub elements: usize,
    pub spaces: usize,
    pub storeys: usize,
    pub relationships: usize,
    pub project_guid: Option<Guid>,
    /// Entities skipped for a missing or unparseable GUID
    #[serde(default)]
    pub skipped: usize,
    /// Diagnostic left by a failed normalization step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_error: Option<String>,
}

/// Model aggregate row to be created
#[derive(Clone, Debug, PartialEq)]
pub struct NewModel {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub name: String,
}

/// Model aggregate: one per processed file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub name: String,
    pub project_guid: Option<Guid>,
    pub statistics: ModelStatistics,
    pub normalized_json: Option<serde_json::Value>,
}

/// One entry of a structured validation error list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub line: u64,
    pub column: u64,
    pub message: String,
    /// Local tag of the offending element, when known
    #[serde(default)]
    pub element: Option<String>,
}

impl ValidationIssue {
    pub fn new(line: u64, column: u64, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
            element: None,
        }
    }

    /// Issue without a position (whole-document problems)
    pub fn general(message: impl Into<String>) -> Self {
        Self::new(0, 0, message)
    }

    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Job lifecycle
///
/// `Pending → Validating → Valid → Parsing → Transforming → Done`, with
/// `Failed` reachable from `Validating` and `Parsing` only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Validating,
    Valid,
    Parsing,
    Transforming,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Validating => "VALIDATING",
            JobStatus::Valid => "VALID",
            JobStatus::Parsing => "PARSING",
            JobStatus::Transforming => "TRANSFORMING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether the state machine allows `self → next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Valid)
                | (Valid, Parsing)
                | (Parsing, Transforming)
                | (Transforming, Done)
                | (Validating, Failed)
                | (Parsing, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload job record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub filename: String,
    pub file_path: PathBuf,
    pub status: JobStatus,
    pub ifc_version: Option<IfcVersion>,
    pub error_message: Option<String>,
    pub validation_errors: Vec<ValidationIssue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job at upload time, in `Pending`
    pub fn new_pending(tenant_id: TenantId, file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: JobId::new_v4(),
            tenant_id,
            filename,
            file_path,
            status: JobStatus::Pending,
            ifc_version: None,
            error_message: None,
            validation_errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, stamping start/completion times
    pub fn transition(&mut self, next: JobStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::IngestError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            JobStatus::Validating => self.started_at = Some(now),
            JobStatus::Done | JobStatus::Failed => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Validating));
        assert!(JobStatus::Validating.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Parsing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Transforming.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Valid.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Parsing));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_job_transition_stamps_times() {
        let mut job = Job::new_pending(TenantId::new_v4(), "/tmp/model.ifcxml");
        assert_eq!(job.filename, "model.ifcxml");
        job.transition(JobStatus::Validating).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Failed).unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.transition(JobStatus::Parsing).is_err());
    }

    #[test]
    fn test_hierarchy_refs_slots() {
        let mut refs = HierarchyRefs::default();
        refs.set(HierarchyKind::Storey, EntityId(7));
        assert_eq!(refs.slot(HierarchyKind::Storey), Some(EntityId(7)));
        assert_eq!(refs.slot(HierarchyKind::Space), None);
    }

    #[test]
    fn test_statistics_json_shape() {
        let stats = ModelStatistics {
            elements: 5,
            relationships: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["elements"], 5);
        assert!(json.get("transform_error").is_none());
    }
}
