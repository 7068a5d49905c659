// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Job orchestration
//!
//! Drives one upload job through
//! `PENDING → VALIDATING → VALID → PARSING → TRANSFORMING → DONE`.
//! Every transition is committed before the next step starts, so an
//! interrupted run leaves the job at its last committed state. Validation and
//! parsing failures end in `FAILED`; a normalization failure is recorded on
//! the model statistics and the job still completes.

use crate::detector::VersionDetector;
use crate::extractor::EntityExtractor;
use crate::resolver::ReferenceResolver;
use crate::session::ParseSession;
use crate::transform::TransformEngine;
use crate::validator::SchemaValidator;
use crate::IngestConfig;
use ifcxml_model::{
    IfcVersion, IngestError, Job, JobId, JobStatus, ModelId, ModelRecord, ModelStatistics,
    ModelStore, NewModel, Result, StoreError, ValidationIssue,
};
use log::{debug, info, warn};

/// How a run ended
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    /// The job was not pending; nothing was touched
    Skipped { status: JobStatus },
    /// The job ended in `FAILED`
    Failed { reason: String },
    /// The job reached `DONE`
    Completed {
        model_id: ModelId,
        statistics: ModelStatistics,
    },
}

/// Per-file pipeline state machine
pub struct JobOrchestrator {
    detector: VersionDetector,
    validator: SchemaValidator,
    extractor: EntityExtractor,
    resolver: ReferenceResolver,
    transform: TransformEngine,
    transform_enabled: bool,
}

impl JobOrchestrator {
    pub fn new(validator: SchemaValidator, transform: TransformEngine) -> Self {
        Self {
            detector: VersionDetector::new(),
            validator,
            extractor: EntityExtractor::new(),
            resolver: ReferenceResolver::new(),
            transform,
            transform_enabled: true,
        }
    }

    /// Orchestrator with every component built from `config`
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            SchemaValidator::from_config(config),
            TransformEngine::from_config(config),
        )
        .with_transform_enabled(config.transform_enabled)
    }

    pub fn with_transform_enabled(mut self, enabled: bool) -> Self {
        self.transform_enabled = enabled;
        self
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    pub fn transform_engine(&self) -> &TransformEngine {
        &self.transform
    }

    /// Process one job
    ///
    /// `Err` is returned only when the job cannot be loaded or a state
    /// transition cannot be persisted; pipeline failures are reported through
    /// the job record and [`JobOutcome::Failed`].
    pub fn run<S>(&self, store: &mut S, job_id: JobId) -> Result<JobOutcome>
    where
        S: ModelStore + ?Sized,
    {
        let mut job = store
            .job(job_id)?
            .ok_or(IngestError::JobNotFound(job_id))?;
        if job.status != JobStatus::Pending {
            info!("job {} is {}, skipping", job.id, job.status);
            return Ok(JobOutcome::Skipped { status: job.status });
        }

        advance(store, &mut job, JobStatus::Validating)?;
        if !job.file_path.is_file() {
            return fail(store, &mut job, "file not found".to_string(), Vec::new());
        }
        let version = match self.validate(&mut job) {
            Ok(version) => version,
            Err(err) => {
                let message = match &err {
                    IngestError::SchemaValidationFailed { errors } => {
                        format!("Validation failed: {} error(s)", errors.len())
                    }
                    other => other.to_string(),
                };
                return fail(store, &mut job, message, err.validation_issues());
            }
        };
        advance(store, &mut job, JobStatus::Valid)?;

        advance(store, &mut job, JobStatus::Parsing)?;
        let mut model = match self.parse(store, &job) {
            Ok(model) => model,
            Err(err) => {
                store.rollback();
                return fail(store, &mut job, err.to_string(), Vec::new());
            }
        };
        advance(store, &mut job, JobStatus::Transforming)?;

        if self.transform_enabled {
            match self.transform.transform(&job.file_path, version) {
                Ok(json) => model.normalized_json = Some(json),
                Err(err) => {
                    warn!("job {}: normalization failed, continuing: {}", job.id, err);
                    model.statistics.transform_error = Some(err.to_string());
                }
            }
            store.update_model(&model)?;
        }

        advance(store, &mut job, JobStatus::Done)?;
        Ok(JobOutcome::Completed {
            model_id: model.id,
            statistics: model.statistics,
        })
    }

    /// Detection and authoritative validation
    fn validate(&self, job: &mut Job) -> Result<IfcVersion> {
        let version = self
            .detector
            .detect(&job.file_path)?
            .ok_or(IngestError::VersionUndetected)?;
        job.ifc_version = Some(version);

        let report = self.validator.validate(&job.file_path, version)?;
        for diagnostic in &report.early_diagnostics {
            debug!("job {}: early diagnostic {}", job.id, diagnostic);
        }
        if !report.is_valid {
            return Err(IngestError::SchemaValidationFailed {
                errors: report.errors,
            });
        }
        Ok(version)
    }

    /// Model creation, extraction and resolution, each pass committed
    fn parse<S>(&self, store: &mut S, job: &Job) -> Result<ModelRecord>
    where
        S: ModelStore + ?Sized,
    {
        let model_id = store.create_model(NewModel {
            job_id: job.id,
            tenant_id: job.tenant_id,
            name: job.filename.clone(),
        })?;
        store.commit()?;

        let mut session = ParseSession::new(model_id, job.tenant_id);
        self.extractor.extract(&job.file_path, &mut session, store)?;
        store.commit()?;
        self.resolver.resolve(&job.file_path, &mut session, store)?;
        store.commit()?;

        let mut model = store
            .model(model_id)?
            .ok_or_else(|| StoreError::not_found("model", model_id))?;
        model.project_guid = session.stats.project_guid;
        model.statistics = session.stats;
        store.update_model(&model)?;
        Ok(model)
    }
}

/// Transition, persist and commit
fn advance<S>(store: &mut S, job: &mut Job, next: JobStatus) -> Result<()>
where
    S: ModelStore + ?Sized,
{
    let from = job.status;
    job.transition(next)?;
    store.save_job(job)?;
    store.commit()?;
    info!("job {}: {} -> {}", job.id, from, next);
    Ok(())
}

fn fail<S>(
    store: &mut S,
    job: &mut Job,
    reason: String,
    issues: Vec<ValidationIssue>,
) -> Result<JobOutcome>
where
    S: ModelStore + ?Sized,
{
    warn!("job {} failed in {}: {}", job.id, job.status, reason);
    job.error_message = Some(reason.clone());
    job.validation_errors = issues;
    advance(store, job, JobStatus::Failed)?;
    Ok(JobOutcome::Failed { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use ifcxml_model::TenantId;

    fn orchestrator() -> JobOrchestrator {
        JobOrchestrator::from_config(&IngestConfig::default().with_xsd_dir("/nonexistent"))
    }

    #[test]
    fn test_unknown_job() {
        let mut store = MemoryStore::new();
        let id = JobId::new_v4();
        let err = orchestrator().run(&mut store, id).unwrap_err();
        assert!(matches!(err, IngestError::JobNotFound(missing) if missing == id));
    }

    #[test]
    fn test_missing_file_fails_in_validation() {
        let mut store = MemoryStore::new();
        let job = Job::new_pending(TenantId::new_v4(), "/nonexistent/upload.xml");
        store.save_job(&job).unwrap();
        store.commit().unwrap();

        let outcome = orchestrator().run(&mut store, job.id).unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: "file not found".to_string()
            }
        );
        let job = store.job(job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_schema_unavailable_fails_with_issue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.xml");
        std::fs::write(
            &path,
            r#"<ifc:ifcXML xmlns:ifc="http://www.buildingsmart-tech.org/ifcXML/IFC4/final"/>"#,
        )
        .unwrap();
        let mut store = MemoryStore::new();
        let job = Job::new_pending(TenantId::new_v4(), &path);
        store.save_job(&job).unwrap();

        let outcome = orchestrator().run(&mut store, job.id).unwrap();
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        let job = store.job(job.id).unwrap().unwrap();
        assert_eq!(job.ifc_version, Some(IfcVersion::Ifc4));
        assert_eq!(job.validation_errors.len(), 1);
        assert!(job.validation_errors[0].message.contains("unavailable"));
    }

    #[test]
    fn test_undetected_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.xml");
        std::fs::write(&path, "<catalog/>").unwrap();
        let mut store = MemoryStore::new();
        let job = Job::new_pending(TenantId::new_v4(), &path);
        store.save_job(&job).unwrap();

        orchestrator().run(&mut store, job.id).unwrap();
        let job = store.job(job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("unable to detect the IFC version")
        );
    }
}
