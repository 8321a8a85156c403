//! Pending write requests
//!
//! Producers append without ever blocking on protocol work; the worker
//! drains the whole queue before every ticket it handles.

use crate::error::{CommsError, Result};
use crate::types::{DynamicValue, ScalarKind, ScalarValue};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Value carried by a write request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestValue {
    /// Already typed by the caller
    Scalar(ScalarValue),
    /// Loosely typed; checked against `kind` by the worker
    Dynamic { kind: ScalarKind, value: DynamicValue },
}

impl RequestValue {
    /// The kind the request will be written as
    pub fn kind(&self) -> ScalarKind {
        match self {
            RequestValue::Scalar(value) => value.kind(),
            RequestValue::Dynamic { kind, .. } => *kind,
        }
    }

    /// Produce the typed value, rejecting mismatched dynamic input
    pub fn resolve(&self, tag: &str) -> Result<ScalarValue> {
        match self {
            RequestValue::Scalar(value) => Ok(*value),
            RequestValue::Dynamic { kind, value } => {
                value.coerce(*kind).ok_or_else(|| CommsError::TypeMismatch {
                    tag: tag.to_string(),
                    expected: *kind,
                    actual: value.type_name().to_string(),
                })
            }
        }
    }
}

/// One pending write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub group: String,
    pub tag: String,
    pub value: RequestValue,
}

impl WriteRequest {
    pub fn new(group: impl Into<String>, tag: impl Into<String>, value: RequestValue) -> Self {
        Self {
            group: group.into(),
            tag: tag.into(),
            value,
        }
    }
}

/// FIFO of pending writes
#[derive(Debug, Default)]
pub struct WriteQueue {
    requests: Mutex<VecDeque<WriteRequest>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request
    pub fn push(&self, request: WriteRequest) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(request);
    }

    /// Take every pending request, oldest first
    pub fn drain(&self) -> Vec<WriteRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
