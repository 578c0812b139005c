// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the QueryHub federation core
//!
//! Request-level errors (`DuplicateQueryIdentifier`, `QueryParameterMismatch`)
//! abort a request before any dispatch work. Everything else is scoped to a
//! single sub-query and ends up embedded in that query's response entry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FailureKind, QueryFailure};

/// Unified error type for all federation operations
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineError {
    #[error("Malformed query '{ref_id}': {message}")]
    MalformedQuery { ref_id: String, message: String },

    #[error("Duplicate query identifier: {ref_id}")]
    DuplicateQueryIdentifier { ref_id: String },

    #[error("Query parameters do not match request: {message}")]
    QueryParameterMismatch { message: String },

    #[error("Backend request failed: {message}")]
    BackendFailure { message: String },

    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Data source not found: {uid}")]
    DataSourceNotFound { uid: String },

    #[error("Invalid resource request: {message}")]
    InvalidResource { message: String },

    #[error("Response exceeded the limit of {limit_bytes} bytes")]
    ResponseTooLarge { limit_bytes: u64 },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl EngineError {
    pub fn malformed(ref_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedQuery {
            ref_id: ref_id.into(),
            message: msg.into(),
        }
    }

    pub fn duplicate_ref_id(ref_id: impl Into<String>) -> Self {
        Self::DuplicateQueryIdentifier { ref_id: ref_id.into() }
    }

    pub fn parameter_mismatch(msg: impl Into<String>) -> Self {
        Self::QueryParameterMismatch { message: msg.into() }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendFailure { message: msg.into() }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled { reason: reason.into() }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation { message: msg.into() }
    }

    pub fn datasource_not_found(uid: impl Into<String>) -> Self {
        Self::DataSourceNotFound { uid: uid.into() }
    }

    pub fn invalid_resource(msg: impl Into<String>) -> Self {
        Self::InvalidResource { message: msg.into() }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { message: msg.into() }
    }

    /// Returns true for errors that reject the whole request.
    pub fn is_request_level(&self) -> bool {
        matches!(
            self,
            Self::DuplicateQueryIdentifier { .. } | Self::QueryParameterMismatch { .. }
        )
    }

    /// Classifies this error for embedding in a per-query response entry.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::MalformedQuery { .. } => FailureKind::MalformedQuery,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            _ => FailureKind::BackendFailure,
        }
    }
}

impl From<EngineError> for QueryFailure {
    fn from(err: EngineError) -> Self {
        let kind = err.failure_kind();
        let message = match err {
            EngineError::BackendFailure { message } => message,
            EngineError::Cancelled { reason } => reason,
            other => other.to_string(),
        };
        QueryFailure { kind, message }
    }
}

/// Result type alias for federation operations
pub type EngineResult<T> = Result<T, EngineError>;
