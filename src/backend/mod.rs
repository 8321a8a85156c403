//! Protocol backends
//!
//! Every tag group is served by exactly one protocol backend. Both backends
//! run only on the worker thread and share one capability set, dispatched
//! through [`GroupBackend`]:
//!
//! - `sync_tags` - pick up tags registered since the last pass
//! - `read_all` - one read pass over every tag of the group
//! - `write_one` - apply a single write request
//! - `teardown` - release every native handle or session of the group
//!
//! # Components
//!
//! - [`PlcLibrary`] / [`PlcGroup`] - request/response tag-handle library and
//!   the per-tag handle lifecycle built on it
//! - [`OpcUaConnector`] / [`OpcUaSession`] / [`OpcUaGroup`] - session-based
//!   client and the per-group session lifecycle built on it
//! - [`sim`] - in-memory implementations of both libraries (feature-gated)
//!
//! # Example
//!
//! ```ignore
//! use tagcomms_rs::backend::sim::{SimOpcUaServer, SimPlcLibrary};
//! use tagcomms_rs::backend::ProtocolLibraries;
//!
//! let libraries = ProtocolLibraries::new(
//!     Box::new(SimPlcLibrary::new()),
//!     Box::new(SimOpcUaServer::new()),
//! );
//! ```

pub mod opcua;
pub mod plc;
#[cfg(any(test, feature = "sim-backend"))]
pub mod sim;

pub use opcua::{NodeId, OpcUaConnector, OpcUaGroup, OpcUaSession, OpcUaTag, UaStatusCode, UaVariant};
pub use plc::{PlcGroup, PlcHandle, PlcLibrary, PlcStatus, PlcTag, CACHED_BYTES};

use crate::engine::registry::GroupEntry;
use crate::error::{CommsError, Result};
use crate::types::{Protocol, ScalarValue};
use std::time::Duration;

/// Per-pass inputs shared by both backends
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// Registry entry of the group being served
    pub entry: &'a GroupEntry,
    /// Bound on each blocking library call
    pub timeout: Duration,
}

/// Result of one read pass
#[derive(Debug, Default)]
pub struct ReadPass {
    /// Tags whose value was refreshed
    pub tags_read: usize,
    /// Per-tag failures that did not abort the pass
    pub failures: Vec<CommsError>,
}

/// What happened to a write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Sent to the remote side
    Applied,
    /// Dropped because the tag has no native binding yet
    Skipped,
}

/// The two client libraries the worker talks through
pub struct ProtocolLibraries {
    pub plc: Box<dyn PlcLibrary>,
    pub opcua: Box<dyn OpcUaConnector>,
}

impl ProtocolLibraries {
    /// Bundle both libraries
    pub fn new(plc: Box<dyn PlcLibrary>, opcua: Box<dyn OpcUaConnector>) -> Self {
        Self { plc, opcua }
    }
}

impl std::fmt::Debug for ProtocolLibraries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolLibraries").finish_non_exhaustive()
    }
}

/// Worker-side state of one tag group
#[derive(Debug)]
pub enum GroupBackend {
    Plc(PlcGroup),
    OpcUa(OpcUaGroup),
}

impl GroupBackend {
    /// Build the backend matching the group's protocol
    pub fn for_entry(entry: &GroupEntry) -> Self {
        let spec = entry.spec();
        match &spec.protocol {
            Protocol::Plc(family) => GroupBackend::Plc(PlcGroup::new(family, spec)),
            Protocol::OpcUa => GroupBackend::OpcUa(OpcUaGroup::new(entry.name(), spec)),
        }
    }

    /// Pick up tags registered since the last pass
    pub fn sync_tags(&mut self, entry: &GroupEntry) {
        match self {
            GroupBackend::Plc(group) => group.sync_tags(entry),
            GroupBackend::OpcUa(group) => group.sync_tags(entry),
        }
    }

    /// Run one read pass
    pub fn read_all(&mut self, libraries: &mut ProtocolLibraries, ctx: &PassContext<'_>) -> Result<ReadPass> {
        match self {
            GroupBackend::Plc(group) => group.read_all(libraries.plc.as_mut(), ctx),
            GroupBackend::OpcUa(group) => group.read_all(libraries.opcua.as_mut(), ctx),
        }
    }

    /// Apply one write
    pub fn write_one(
        &mut self,
        libraries: &mut ProtocolLibraries,
        ctx: &PassContext<'_>,
        tag: &str,
        value: ScalarValue,
    ) -> Result<WriteOutcome> {
        match self {
            GroupBackend::Plc(group) => group.write_one(libraries.plc.as_mut(), ctx, tag, value),
            GroupBackend::OpcUa(group) => group.write_one(ctx, tag, value),
        }
    }

    /// Release every native resource of the group
    pub fn teardown(&mut self, libraries: &mut ProtocolLibraries, entry: &GroupEntry) {
        match self {
            GroupBackend::Plc(group) => group.teardown(libraries.plc.as_mut(), entry),
            GroupBackend::OpcUa(group) => group.teardown(entry),
        }
    }

    /// Check if this group talks OPC UA
    pub fn is_opc_ua(&self) -> bool {
        matches!(self, GroupBackend::OpcUa(_))
    }
}
