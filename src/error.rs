//! Error handling for the tag communication engine
//!
//! This module defines the error taxonomy used by the protocol backends and
//! the worker loop, plus a Result alias. Errors never cross the public engine
//! boundary: they are logged, latched, and turned into notifications.

use crate::backend::{PlcStatus, UaStatusCode};
use crate::types::ScalarKind;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum CommsError {
    /// The PLC library could not create a handle for a tag
    #[error("Failed to create tag {tag}: {status}")]
    TagCreate { tag: String, status: PlcStatus },

    /// A read on an established PLC handle failed
    #[error("Failed to read tag {tag}: {status}")]
    TagRead { tag: String, status: PlcStatus },

    /// A write on an established PLC handle failed
    #[error("Failed to write tag {tag}: {status}")]
    TagWrite { tag: String, status: PlcStatus },

    /// The OPC UA session could not be established
    #[error("The OPC UA connection to {endpoint} failed with status code {status}")]
    OpcUaConnect {
        endpoint: String,
        status: UaStatusCode,
    },

    /// The OPC UA session exists but does not report a good state
    #[error("OPC UA session for tag group {group} is not connected ({status})")]
    NotConnected { group: String, status: UaStatusCode },

    /// Reading a node's value attribute failed
    #[error("OPC UA failed to read {tag} with status code {status}")]
    OpcUaRead { tag: String, status: UaStatusCode },

    /// Writing a node's value attribute failed
    #[error("OPC UA failed to write {tag} with status code {status}")]
    OpcUaWrite { tag: String, status: UaStatusCode },

    /// A write carried a value that does not match the expected kind
    #[error("Supplied data type incorrect for {tag}: expected {expected}, got {actual}")]
    TypeMismatch {
        tag: String,
        expected: ScalarKind,
        actual: String,
    },

    /// A tag group name that was never registered
    #[error("Tag group [{0}] does not exist")]
    UnknownGroup(String),

    /// A tag name that was never registered in its group
    #[error("Tag [{tag}] does not exist in tag group [{group}]")]
    UnknownTag { group: String, tag: String },

    /// A tag that is already registered in its group
    #[error("Tag [{tag}] already exists in tag group [{group}]")]
    DuplicateTag { group: String, tag: String },

    /// A write reached a tag that has not been initialized by a read yet
    #[error("Tag {0} has not been initialized")]
    TagNotInitialized(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CommsError>,
    },
}

impl CommsError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CommsError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error concerns reaching the remote endpoint at all
    ///
    /// Connection errors are retried from scratch on the next cycle.
    pub fn is_connection_error(&self) -> bool {
        match self {
            CommsError::TagCreate { .. }
            | CommsError::OpcUaConnect { .. }
            | CommsError::NotConnected { .. } => true,
            CommsError::WithContext { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, CommsError>;

/// Lazily attach a message to a failing result
pub trait ResultExt<T> {
    fn with_context(self, message: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, message: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.with_context(message()))
    }
}
