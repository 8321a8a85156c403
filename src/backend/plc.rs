//! PLC backend: per-tag handle lifecycle over a tag-handle library
//!
//! The library is modelled by the [`PlcLibrary`] trait (create / read / write /
//! destroy a handle, typed set / raw get on the handle's buffer). Every call
//! happens on the worker thread.
//!
//! # Read pass
//!
//! Tags are visited in name order. A tag without a handle first gets one,
//! built from the group's attribute string. A failed create or a failed read
//! aborts the remainder of the pass; the group is retried whole next cycle.
//! A successful read caches the leading bytes of the buffer, clears the dirty
//! flag and marks the tag initialized.

use super::{PassContext, ReadPass, WriteOutcome};
use crate::engine::registry::{CachedValue, GroupEntry, TagCell};
use crate::error::{CommsError, Result};
use crate::types::{GroupSpec, ScalarValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Bytes cached per tag; wide enough for every scalar kind
pub const CACHED_BYTES: usize = 8;

/// Opaque, non-negative identifier of a created tag binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlcHandle(i32);

impl PlcHandle {
    /// Wrap a raw handle; negative values are status codes, not handles
    pub fn new(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    /// The raw handle value
    pub fn raw(self) -> i32 {
        self.0
    }
}

/// Status code reported by the tag-handle library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlcStatus(pub i32);

impl PlcStatus {
    pub const OK: PlcStatus = PlcStatus(0);
    pub const PENDING: PlcStatus = PlcStatus(1);
    pub const ERR_ABORT: PlcStatus = PlcStatus(-1);
    pub const ERR_BAD_CONFIG: PlcStatus = PlcStatus(-2);
    pub const ERR_BAD_CONNECTION: PlcStatus = PlcStatus(-3);
    pub const ERR_BAD_DATA: PlcStatus = PlcStatus(-4);
    pub const ERR_BAD_DEVICE: PlcStatus = PlcStatus(-5);
    pub const ERR_BAD_GATEWAY: PlcStatus = PlcStatus(-6);
    pub const ERR_BAD_PARAM: PlcStatus = PlcStatus(-7);
    pub const ERR_NOT_FOUND: PlcStatus = PlcStatus(-19);
    pub const ERR_OUT_OF_BOUNDS: PlcStatus = PlcStatus(-21);
    pub const ERR_TIMEOUT: PlcStatus = PlcStatus(-32);

    /// Check if this is the OK status
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Symbolic name of the status
    pub fn name(self) -> &'static str {
        match self {
            Self::OK => "PLCTAG_STATUS_OK",
            Self::PENDING => "PLCTAG_STATUS_PENDING",
            Self::ERR_ABORT => "PLCTAG_ERR_ABORT",
            Self::ERR_BAD_CONFIG => "PLCTAG_ERR_BAD_CONFIG",
            Self::ERR_BAD_CONNECTION => "PLCTAG_ERR_BAD_CONNECTION",
            Self::ERR_BAD_DATA => "PLCTAG_ERR_BAD_DATA",
            Self::ERR_BAD_DEVICE => "PLCTAG_ERR_BAD_DEVICE",
            Self::ERR_BAD_GATEWAY => "PLCTAG_ERR_BAD_GATEWAY",
            Self::ERR_BAD_PARAM => "PLCTAG_ERR_BAD_PARAM",
            Self::ERR_NOT_FOUND => "PLCTAG_ERR_NOT_FOUND",
            Self::ERR_OUT_OF_BOUNDS => "PLCTAG_ERR_OUT_OF_BOUNDS",
            Self::ERR_TIMEOUT => "PLCTAG_ERR_TIMEOUT",
            _ => "PLCTAG_ERR_UNKNOWN",
        }
    }
}

impl std::fmt::Display for PlcStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Capability set of a request/response tag-handle library
///
/// Implementations must be `Send`; they are moved into the worker thread
/// and only ever used from there.
#[cfg_attr(test, mockall::automock)]
pub trait PlcLibrary: Send {
    /// Create a handle from an attribute string, waiting up to `timeout`
    fn create(&mut self, attributes: &str, timeout: Duration) -> std::result::Result<PlcHandle, PlcStatus>;

    /// Refresh the handle's buffer from the controller
    fn read(&mut self, handle: PlcHandle, timeout: Duration) -> std::result::Result<(), PlcStatus>;

    /// Push the handle's buffer to the controller
    fn write(&mut self, handle: PlcHandle, timeout: Duration) -> std::result::Result<(), PlcStatus>;

    /// Release the handle
    fn destroy(&mut self, handle: PlcHandle);

    /// Typed setter on the handle's buffer
    fn set_scalar(
        &mut self,
        handle: PlcHandle,
        offset: usize,
        value: ScalarValue,
    ) -> std::result::Result<(), PlcStatus>;

    /// Copy up to `len` bytes of the handle's buffer starting at `offset`
    fn get_bytes(
        &self,
        handle: PlcHandle,
        offset: usize,
        len: usize,
    ) -> std::result::Result<Vec<u8>, PlcStatus>;
}

fn tag_attributes(base: &str, elem_count: usize, tag: &str) -> String {
    format!("{}&elem_count={}&name={}", base, elem_count, tag)
}

/// Worker-side state of one PLC tag
#[derive(Debug)]
pub struct PlcTag {
    handle: Option<PlcHandle>,
    cell: Arc<TagCell>,
}

impl PlcTag {
    fn new(cell: Arc<TagCell>) -> Self {
        Self { handle: None, cell }
    }

    /// The handle, once created
    pub fn handle(&self) -> Option<PlcHandle> {
        self.handle
    }
}

/// Worker-side state of a PLC-backed tag group
#[derive(Debug)]
pub struct PlcGroup {
    base_attributes: String,
    tags: BTreeMap<String, PlcTag>,
}

impl PlcGroup {
    /// Create the group state from its registration
    pub fn new(family: &str, spec: &GroupSpec) -> Self {
        Self {
            base_attributes: format!(
                "protocol={}&gateway={}&path={}&cpu={}",
                family, spec.gateway, spec.path, spec.cpu
            ),
            tags: BTreeMap::new(),
        }
    }

    /// Attribute string for one tag
    pub fn attributes(&self, tag: &str, elem_count: usize) -> String {
        tag_attributes(&self.base_attributes, elem_count, tag)
    }

    /// Pick up tags registered since the last pass
    pub fn sync_tags(&mut self, entry: &GroupEntry) {
        for (name, cell) in entry.tags() {
            self.tags.entry(name).or_insert_with(|| PlcTag::new(cell));
        }
    }

    /// Look up a tag's worker-side state
    pub fn tag(&self, name: &str) -> Option<&PlcTag> {
        self.tags.get(name)
    }

    /// Read every tag, creating handles on demand
    pub fn read_all(&mut self, library: &mut dyn PlcLibrary, ctx: &PassContext<'_>) -> Result<ReadPass> {
        let mut pass = ReadPass::default();

        for (name, tag) in self.tags.iter_mut() {
            let handle = match tag.handle {
                Some(handle) => handle,
                None => {
                    let attributes =
                        tag_attributes(&self.base_attributes, tag.cell.elem_count(), name);
                    let handle = library
                        .create(&attributes, ctx.timeout)
                        .map_err(|status| CommsError::TagCreate {
                            tag: name.clone(),
                            status,
                        })?;
                    tracing::debug!("Created handle {} for tag {}", handle.raw(), name);
                    tag.handle = Some(handle);
                    handle
                }
            };

            library
                .read(handle, ctx.timeout)
                .map_err(|status| CommsError::TagRead {
                    tag: name.clone(),
                    status,
                })?;

            match library.get_bytes(handle, 0, CACHED_BYTES) {
                Ok(bytes) => tag.cell.store(CachedValue::Raw(bytes)),
                Err(status) => {
                    return Err(CommsError::TagRead {
                        tag: name.clone(),
                        status,
                    })
                }
            }

            // if read was successful, the tag read is now clean
            tag.cell.set_dirty(false);
            if tag.cell.mark_initialized() {
                ctx.entry.note_tag_initialized();
            }
            pass.tags_read += 1;
        }

        Ok(pass)
    }

    /// Apply one write through the typed setter, then push it
    pub fn write_one(
        &mut self,
        library: &mut dyn PlcLibrary,
        ctx: &PassContext<'_>,
        tag_name: &str,
        value: ScalarValue,
    ) -> Result<WriteOutcome> {
        let tag = self.tags.get(tag_name).ok_or_else(|| CommsError::UnknownTag {
            group: ctx.entry.name().to_string(),
            tag: tag_name.to_string(),
        })?;

        let Some(handle) = tag.handle else {
            return Ok(WriteOutcome::Skipped);
        };

        let to_err = |status| CommsError::TagWrite {
            tag: tag_name.to_string(),
            status,
        };
        library.set_scalar(handle, 0, value).map_err(to_err)?;
        library.write(handle, ctx.timeout).map_err(to_err)?;

        tag.cell.set_dirty(true);
        Ok(WriteOutcome::Applied)
    }

    /// Destroy every handle and forget all cached state
    pub fn teardown(&mut self, library: &mut dyn PlcLibrary, entry: &GroupEntry) {
        for tag in self.tags.values_mut() {
            if let Some(handle) = tag.handle.take() {
                library.destroy(handle);
            }
            tag.cell.reset();
        }
        entry.reset_initialized_tags();
    }

    /// Number of live handles
    pub fn live_handles(&self) -> usize {
        self.tags.values().filter(|t| t.handle.is_some()).count()
    }
}
