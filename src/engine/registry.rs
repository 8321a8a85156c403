//! Tag group registry
//!
//! The registry is the caller-visible catalog of tag groups and their tags.
//! Every group is held as an `Arc<GroupEntry>` and every tag as an
//! `Arc<TagCell>`, so the read entry points can look a value up without
//! holding any lock across a protocol call.
//!
//! Native handles and sessions are *not* stored here. They live in the worker
//! thread's runtime state, keyed by the entry's registration generation. The
//! worker is the only writer of the flags and cached values inside a
//! [`TagCell`]; callers only read them.
//!
//! Re-registering a group replaces its entry with a fresh one (new
//! generation, no tags), which the worker notices and answers by tearing the
//! old native state down.

use crate::backend::UaVariant;
use crate::error::{CommsError, Result};
use crate::types::{GroupSpec, ScalarKind, ScalarValue};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Last value the worker fetched for a tag
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CachedValue {
    /// Nothing read yet
    #[default]
    Empty,
    /// Leading bytes of a PLC tag buffer
    Raw(Vec<u8>),
    /// Typed value reported by an OPC UA server
    Variant(UaVariant),
}

impl CachedValue {
    /// Interpret the cached value as `kind`
    pub fn decode(&self, kind: ScalarKind) -> Option<ScalarValue> {
        match self {
            CachedValue::Empty => None,
            CachedValue::Raw(bytes) => kind.decode_le(bytes),
            CachedValue::Variant(variant) => variant.to_scalar(kind),
        }
    }
}

/// Shared per-tag state: cached value plus worker-maintained flags
#[derive(Debug)]
pub struct TagCell {
    elem_count: usize,
    value: Mutex<CachedValue>,
    initialized: AtomicBool,
    dirty: AtomicBool,
}

impl TagCell {
    /// Create an uninitialized cell
    pub fn new(elem_count: usize) -> Self {
        Self {
            elem_count,
            value: Mutex::new(CachedValue::Empty),
            initialized: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Array width the tag was registered with
    pub fn elem_count(&self) -> usize {
        self.elem_count
    }

    /// Decode the cached value, if the tag has been read at least once
    pub fn load(&self, kind: ScalarKind) -> Option<ScalarValue> {
        if !self.is_initialized() {
            return None;
        }
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decode(kind)
    }

    /// Snapshot of the raw cached value
    pub fn cached(&self) -> CachedValue {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn store(&self, value: CachedValue) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Whether at least one read has succeeded since the last teardown
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Marks the cell initialized; true if it was not before
    pub(crate) fn mark_initialized(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }

    /// Advisory: written since the last successful read
    ///
    /// This is documentation of the staleness window, not a guard. A caller
    /// reading a dirty tag still receives the last value read.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.store(CachedValue::Empty);
    }
}

/// Elapsed-time accumulator driving a group's polling cadence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollTimer {
    /// Milliseconds accumulated since the last poll
    pub elapsed_ms: f64,
}

impl PollTimer {
    /// Starts full so the first active tick polls immediately
    pub fn new(interval_ms: u64) -> Self {
        Self {
            elapsed_ms: interval_ms as f64,
        }
    }

    /// Accumulate `delta_ms`; returns true (and resets) when the interval elapsed
    pub fn advance(&mut self, delta_ms: f64, interval_ms: u64) -> bool {
        if delta_ms.is_finite() && delta_ms > 0.0 {
            self.elapsed_ms += delta_ms;
        }
        if self.elapsed_ms >= interval_ms as f64 {
            self.elapsed_ms = 0.0;
            true
        } else {
            false
        }
    }
}

/// One registered tag group
#[derive(Debug)]
pub struct GroupEntry {
    name: String,
    spec: GroupSpec,
    generation: u64,
    tags: RwLock<BTreeMap<String, Arc<TagCell>>>,
    timer: Mutex<PollTimer>,
    initialized_tags: AtomicUsize,
    fully_initialized: AtomicBool,
}

impl GroupEntry {
    fn new(name: String, spec: GroupSpec, generation: u64) -> Self {
        let timer = PollTimer::new(spec.polling_interval_ms);
        Self {
            name,
            spec,
            generation,
            tags: RwLock::new(BTreeMap::new()),
            timer: Mutex::new(timer),
            initialized_tags: AtomicUsize::new(0),
            fully_initialized: AtomicBool::new(false),
        }
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection settings
    pub fn spec(&self) -> &GroupSpec {
        &self.spec
    }

    /// Registration generation; changes whenever the name is re-registered
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look a tag up
    pub fn tag(&self, name: &str) -> Option<Arc<TagCell>> {
        self.tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All tags in name order
    pub fn tags(&self) -> Vec<(String, Arc<TagCell>)> {
        self.tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect()
    }

    /// Number of registered tags
    pub fn tag_count(&self) -> usize {
        self.tags.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn insert_tag(&self, tag: &str, elem_count: usize) -> Result<Arc<TagCell>> {
        let mut tags = self.tags.write().unwrap_or_else(PoisonError::into_inner);
        if tags.contains_key(tag) {
            return Err(CommsError::DuplicateTag {
                group: self.name.clone(),
                tag: tag.to_string(),
            });
        }
        let cell = Arc::new(TagCell::new(elem_count.max(1)));
        tags.insert(tag.to_string(), cell.clone());
        Ok(cell)
    }

    /// Advance the polling timer; true when a poll is due
    pub fn advance_timer(&self, delta_ms: f64) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(delta_ms, self.spec.polling_interval_ms)
    }

    /// Milliseconds accumulated towards the next poll
    pub fn elapsed_ms(&self) -> f64 {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed_ms
    }

    /// Number of tags that completed their first read
    pub fn initialized_tag_count(&self) -> usize {
        self.initialized_tags.load(Ordering::Acquire)
    }

    pub(crate) fn note_tag_initialized(&self) {
        self.initialized_tags.fetch_add(1, Ordering::AcqRel);
    }

    /// Forget every first read; the group may report itself initialized again
    pub(crate) fn reset_initialized_tags(&self) {
        self.initialized_tags.store(0, Ordering::Release);
        self.fully_initialized.store(false, Ordering::Release);
    }

    /// Whether the "group initialized" notification has fired since the
    /// last teardown
    pub fn is_fully_initialized(&self) -> bool {
        self.fully_initialized.load(Ordering::Acquire)
    }

    /// Sets the one-shot flag; true only for the call that set it
    pub(crate) fn try_mark_fully_initialized(&self) -> bool {
        self.fully_initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Map of group name to group entry
#[derive(Debug, Default)]
pub struct TagGroupRegistry {
    groups: RwLock<BTreeMap<String, Arc<GroupEntry>>>,
    next_generation: AtomicU64,
}

impl TagGroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a group
    ///
    /// Returns the previous entry when the name was already taken.
    pub fn register_group(&self, name: &str, spec: GroupSpec) -> Option<Arc<GroupEntry>> {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let entry = Arc::new(GroupEntry::new(name.to_string(), spec, generation));
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), entry)
    }

    /// Register a tag in an existing group
    pub fn register_tag(&self, group: &str, tag: &str, elem_count: usize) -> Result<Arc<TagCell>> {
        let entry = self
            .group(group)
            .ok_or_else(|| CommsError::UnknownGroup(group.to_string()))?;
        entry.insert_tag(tag, elem_count)
    }

    /// Look a group up
    pub fn group(&self, name: &str) -> Option<Arc<GroupEntry>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Look a tag up
    pub fn tag(&self, group: &str, tag: &str) -> Result<Arc<TagCell>> {
        let entry = self
            .group(group)
            .ok_or_else(|| CommsError::UnknownGroup(group.to_string()))?;
        entry.tag(tag).ok_or_else(|| CommsError::UnknownTag {
            group: group.to_string(),
            tag: tag.to_string(),
        })
    }

    /// All groups in name order
    pub fn snapshot(&self) -> Vec<Arc<GroupEntry>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// All group names in order
    pub fn names(&self) -> Vec<String> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of registered groups
    pub fn len(&self) -> usize {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if no group is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
