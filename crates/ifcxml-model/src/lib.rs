// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ifcXML Model - Shared types and collaborator traits for ifcXML ingestion
//!
//! This crate holds everything the ingestion pipeline and its collaborators
//! agree on: identifiers, the tag classification, persisted records, the job
//! state machine and the error taxonomy.
//!
//! # Architecture
//!
//! - [`ModelStore`] - Transactional storage collaborator
//! - [`SchemaLocator`] - Dialect to schema resource lookup
//! - [`IngestError`] - Error taxonomy shared by every pipeline stage
//! - [`Guid`] - Entity GUIDs (UUID text or compressed IFC form)
//!
//! # Example
//!
//! ```ignore
//! use ifcxml_model::{Job, JobStatus, TenantId};
//!
//! let mut job = Job::new_pending(TenantId::new_v4(), "uploads/tower.ifcxml");
//! job.transition(JobStatus::Validating)?;
//! store.save_job(&job)?;
//! store.commit()?;
//! ```

pub mod error;
pub mod guid;
pub mod records;
pub mod traits;
pub mod types;

// Re-export all public types
pub use error::*;
pub use guid::*;
pub use records::*;
pub use traits::*;
pub use types::*;
