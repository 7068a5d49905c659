// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ifcXML Parser - Streaming ifcXML ingestion pipeline
//!
//! This crate turns uploaded ifcXML files into the entity/relationship graph
//! described by `ifcxml-model`, without ever holding a document tree in
//! memory.
//!
//! # Features
//!
//! - **Streaming reader** on `quick-xml` with line/column tracking (`memchr`)
//! - **Version detection** from the root element only
//! - **XSD validation** with a compiled, per-dialect cached schema
//! - **Two-pass extraction** of entities and relationships
//! - **Template-driven normalization** into canonical JSON
//! - **Job state machine** persisting every transition
//!
//! # Example
//!
//! ```ignore
//! use ifcxml_parser::{IngestConfig, JobOrchestrator, MemoryStore};
//! use ifcxml_model::{Job, ModelStore, TenantId};
//!
//! let orchestrator = JobOrchestrator::from_config(&IngestConfig::from_env());
//! let mut store = MemoryStore::new();
//! let job = Job::new_pending(TenantId::new_v4(), "uploads/house.ifcxml");
//! store.save_job(&job)?;
//! store.commit()?;
//!
//! let outcome = orchestrator.run(&mut store, job.id)?;
//! println!("{:?}", outcome);
//! ```

mod capture;
mod config;
mod content;
mod detector;
mod extractor;
mod orchestrator;
mod resolver;
mod schema;
mod session;
mod store;
mod template;
mod transform;
mod validator;
mod xml;

pub use capture::{walk, walk_file, CaptureSpec, Captured, Pointer};
pub use config::{
    IngestConfig, ENV_TEMPLATE, ENV_TRANSFORM_ENABLED, ENV_XSD_DIR, ENV_XSD_IFC2X3, ENV_XSD_IFC4,
};
pub use detector::{detect_root, VersionDetector};
pub use extractor::{parse_elevation, EntityExtractor, ExtractionSummary};
pub use orchestrator::{JobOrchestrator, JobOutcome};
pub use resolver::{ReferenceResolver, ResolutionSummary, RELATED_ROLES, RELATING_ROLES};
pub use schema::{CompiledSchema, SchemaError};
pub use session::{ParseSession, PendingLink, Resolved};
pub use store::MemoryStore;
pub use template::{Template, TemplateError};
pub use transform::TransformEngine;
pub use validator::{SchemaValidator, ValidationReport};
pub use xml::{Attr, OpenTag, ReleaseStats, XmlEvent, XmlStream};

use ifcxml_model::{IngestError, Result};
use std::path::Path;

/// Run the whole pipeline for a file already registered as a pending job
///
/// Convenience wrapper for callers that do not keep an orchestrator around.
pub fn ingest<S>(config: &IngestConfig, store: &mut S, job_id: ifcxml_model::JobId) -> Result<JobOutcome>
where
    S: ifcxml_model::ModelStore + ?Sized,
{
    JobOrchestrator::from_config(config).run(store, job_id)
}

/// Detect and validate a file without touching any store
pub fn validate_file(config: &IngestConfig, path: &Path) -> Result<ValidationReport> {
    let version = VersionDetector::new()
        .detect(path)?
        .ok_or(IngestError::VersionUndetected)?;
    SchemaValidator::from_config(config).validate(path, version)
}
