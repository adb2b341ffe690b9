//! Error types for the convergence engine.
//!
//! The taxonomy follows the failure semantics of a convergence pass:
//! validation errors are raised before any mutation, external-tool and
//! key persistence errors abort the pass, document persistence and
//! firewall errors are reported per artifact.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for convergence operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

/// Errors that can occur while converging an interface.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The interface spec violates an invariant. Raised before any write.
    #[error("invalid spec field '{field}': {reason}")]
    Validation {
        /// The spec field that failed validation.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Key generation or derivation failed. Aborts the pass.
    #[error("key tool '{tool}' failed: {reason}")]
    ExternalTool {
        /// The collaborator that failed.
        tool: String,
        /// The failure reason as reported by the tool.
        reason: String,
    },

    /// A file read or write failed. Reported per artifact.
    #[error("persistence failed for {path}: {source}")]
    Persistence {
        /// The path that could not be read or written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Firewall rule assertion failed. Does not block document rendering.
    #[error("firewall rule '{rule}' could not be asserted: {reason}")]
    Firewall {
        /// The name of the rule.
        rule: String,
        /// Why the assertion failed.
        reason: String,
    },
}

impl ConvergeError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an external-tool error.
    #[must_use]
    pub fn external_tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Creates a persistence error for the given path.
    #[must_use]
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Creates a firewall error.
    #[must_use]
    pub fn firewall(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Firewall {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a spec validation failure.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
