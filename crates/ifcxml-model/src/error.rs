// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for ifcXML ingestion

use crate::{Guid, IfcVersion, JobId, JobStatus, ModelId, ValidationIssue};
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors raised by the storage collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint on (model, GUID) violated
    #[error("duplicate GUID {guid} in model {model}")]
    DuplicateGuid { model: ModelId, guid: Guid },

    /// Referenced row does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Backend failure (lock poisoning, connection loss, ...)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }
}

/// Errors that can occur while ingesting an ifcXML file
#[derive(Error, Debug)]
pub enum IngestError {
    /// No known namespace or root tag pattern matched
    #[error("unable to detect the IFC version")]
    VersionUndetected,

    /// Schema resource missing or not compilable
    #[error("XSD schema for {version} unavailable: {reason}")]
    SchemaUnavailable { version: IfcVersion, reason: String },

    /// Document is not well-formed XML
    #[error("XML syntax error at {line}:{column}: {message}")]
    XmlSyntax {
        line: u64,
        column: u64,
        message: String,
    },

    /// Authoritative schema validation reported errors
    #[error("validation failed: {} error(s)", errors.len())]
    SchemaValidationFailed { errors: Vec<ValidationIssue> },

    /// Entity extraction or reference resolution failed
    #[error("parsing error: {reason}")]
    Extraction { reason: String },

    /// Normalization step failed (recoverable)
    #[error("transform error: {reason}")]
    Transform { reason: String },

    /// Job state machine violation
    #[error("invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Job record missing
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// Storage collaborator failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Create an extraction failure
    pub fn extraction(reason: impl Into<String>) -> Self {
        IngestError::Extraction {
            reason: reason.into(),
        }
    }

    /// Create a transform failure
    pub fn transform(reason: impl Into<String>) -> Self {
        IngestError::Transform {
            reason: reason.into(),
        }
    }

    /// Create a syntax error
    pub fn syntax(line: u64, column: u64, message: impl Into<String>) -> Self {
        IngestError::XmlSyntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// Create a schema-unavailable error
    pub fn schema_unavailable(version: IfcVersion, reason: impl Into<String>) -> Self {
        IngestError::SchemaUnavailable {
            version,
            reason: reason.into(),
        }
    }

    /// Whether the pipeline may continue past this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IngestError::Transform { .. })
    }

    /// Structured error list for the job record
    ///
    /// Validation-phase failures carry their own positions; everything else
    /// becomes a single unpositioned entry.
    pub fn validation_issues(&self) -> Vec<ValidationIssue> {
        match self {
            IngestError::SchemaValidationFailed { errors } => errors.clone(),
            IngestError::XmlSyntax {
                line,
                column,
                message,
            } => vec![ValidationIssue::new(
                *line,
                *column,
                format!("XML syntax error: {}", message),
            )],
            other => vec![ValidationIssue::general(other.to_string())],
        }
    }
}
