//! # Error Types
//!
//! Errors surfaced by shared resources and the resource manager. Creation
//! failures are never raised from `require()`; they travel through the value
//! handle and the `error` lifecycle event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::value::Value;
use crate::utils::ids::ResourceId;

/// The failure a resource factory reports through its completion callback.
///
/// Remote errors usually carry an error code and a reason next to the
/// human readable message; both are optional.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CreationError {
    /// Machine readable error code, e.g. `"not-authorized"`.
    pub error: Option<String>,
    /// Short explanation supplied by the remote side.
    pub reason: Option<String>,
    /// Full message.
    pub message: String,
}

impl CreationError {
    /// Creates an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: None,
            reason: None,
            message: message.into(),
        }
    }

    /// Attaches an error code.
    pub fn with_code(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Errors returned by resource handles and manager operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    /// The external factory reported a failure for this creation attempt.
    #[error("resource creation failed: {0}")]
    Creation(#[from] CreationError),

    /// `refresh` was called for a request that no listener currently holds.
    #[error("unknown resource: {request}")]
    UnknownResource {
        /// The request that had no record.
        request: Value,
    },

    /// The record was torn down before its value settled.
    #[error("resource {id} was destroyed before it settled")]
    Destroyed {
        /// Id of the destroyed record.
        id: ResourceId,
    },
}
