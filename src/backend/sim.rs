//! In-memory protocol libraries for offline use and tests
//!
//! These simulate the remote side of both protocols well enough to drive the
//! engine end to end without hardware:
//!
//! - [`SimPlcLibrary`] - a tag-handle library backed by a map of tag buffers
//! - [`SimOpcUaServer`] - an OPC UA connector backed by a map of nodes
//! - [`SimFrameClock`] - a host tick source that becomes ready on demand
//!
//! All three are cheap to clone; clones share state, so a test keeps one
//! clone to inspect and steer while the engine owns the other.
//!
//! # Failure injection
//!
//! `fail_creates`, `fail_reads` and `fail_writes` make every following PLC
//! call of that kind return the given status until cleared with `None`.
//! `fail_next_connects(n)` rejects the next `n` OPC UA connects, and
//! `set_online(false)` drops the server so live sessions report a bad state.

use super::opcua::{NodeId, OpcUaConnector, OpcUaSession, UaStatusCode, UaVariant};
use super::plc::{PlcHandle, PlcLibrary, PlcStatus};
use crate::engine::watchdog::{HostTickSource, TickHandler};
use crate::types::{ScalarKind, ScalarValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bytes allocated per array element of a simulated tag
const ELEMENT_BYTES: usize = 8;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call observed by the simulated PLC library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimPlcOp {
    Create(String),
    Read(String),
    Write(String),
    Destroy(String),
}

#[derive(Debug)]
struct SimHandle {
    tag: String,
    buffer: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimPlcState {
    next_handle: i32,
    handles: BTreeMap<i32, SimHandle>,
    remote: BTreeMap<String, Vec<u8>>,
    fail_create: Option<PlcStatus>,
    fail_read: Option<PlcStatus>,
    fail_write: Option<PlcStatus>,
    ops: Vec<SimPlcOp>,
}

/// Parse `key=value&key=value` attribute strings
fn parse_attributes(attributes: &str) -> BTreeMap<&str, &str> {
    attributes
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

/// Simulated tag-handle library
#[derive(Debug, Clone, Default)]
pub struct SimPlcLibrary {
    state: Arc<Mutex<SimPlcState>>,
}

impl SimPlcLibrary {
    /// Create a library with no remote tags
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag's value on the simulated controller
    pub fn set_remote(&self, tag: &str, value: ScalarValue) {
        let mut bytes = value.to_le_bytes();
        bytes.resize(ELEMENT_BYTES, 0);
        lock(&self.state).remote.insert(tag.to_string(), bytes);
    }

    /// A tag's value on the simulated controller, decoded as `kind`
    pub fn remote_value(&self, tag: &str, kind: ScalarKind) -> Option<ScalarValue> {
        lock(&self.state)
            .remote
            .get(tag)
            .and_then(|bytes| kind.decode_le(bytes))
    }

    /// Make every following create fail with `status`
    pub fn fail_creates(&self, status: Option<PlcStatus>) {
        lock(&self.state).fail_create = status;
    }

    /// Make every following read fail with `status`
    pub fn fail_reads(&self, status: Option<PlcStatus>) {
        lock(&self.state).fail_read = status;
    }

    /// Make every following write fail with `status`
    pub fn fail_writes(&self, status: Option<PlcStatus>) {
        lock(&self.state).fail_write = status;
    }

    /// Calls observed so far
    pub fn ops(&self) -> Vec<SimPlcOp> {
        lock(&self.state).ops.clone()
    }

    /// Number of calls of one kind observed so far
    pub fn count_ops(&self, matches: impl Fn(&SimPlcOp) -> bool) -> usize {
        lock(&self.state).ops.iter().filter(|op| matches(op)).count()
    }

    /// Number of handles created and not yet destroyed
    pub fn live_handles(&self) -> usize {
        lock(&self.state).handles.len()
    }
}

impl PlcLibrary for SimPlcLibrary {
    fn create(&mut self, attributes: &str, _timeout: Duration) -> Result<PlcHandle, PlcStatus> {
        let mut state = lock(&self.state);
        state.ops.push(SimPlcOp::Create(attributes.to_string()));
        if let Some(status) = state.fail_create {
            return Err(status);
        }

        let attrs = parse_attributes(attributes);
        let tag = match attrs.get("name") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(PlcStatus::ERR_BAD_PARAM),
        };
        if !attrs.contains_key("gateway") {
            return Err(PlcStatus::ERR_BAD_GATEWAY);
        }
        let elem_count = match attrs.get("elem_count") {
            Some(raw) => raw.parse::<usize>().map_err(|_| PlcStatus::ERR_BAD_PARAM)?,
            None => 1,
        };

        let raw = state.next_handle;
        let handle = PlcHandle::new(raw).ok_or(PlcStatus::ERR_ABORT)?;
        state.next_handle += 1;
        state.handles.insert(
            raw,
            SimHandle {
                tag,
                buffer: vec![0; elem_count.max(1) * ELEMENT_BYTES],
            },
        );
        Ok(handle)
    }

    fn read(&mut self, handle: PlcHandle, _timeout: Duration) -> Result<(), PlcStatus> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let sim = state
            .handles
            .get_mut(&handle.raw())
            .ok_or(PlcStatus::ERR_NOT_FOUND)?;
        state.ops.push(SimPlcOp::Read(sim.tag.clone()));
        if let Some(status) = state.fail_read {
            return Err(status);
        }
        if let Some(remote) = state.remote.get(&sim.tag) {
            let len = remote.len().min(sim.buffer.len());
            sim.buffer[..len].copy_from_slice(&remote[..len]);
        }
        Ok(())
    }

    fn write(&mut self, handle: PlcHandle, _timeout: Duration) -> Result<(), PlcStatus> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let sim = state
            .handles
            .get(&handle.raw())
            .ok_or(PlcStatus::ERR_NOT_FOUND)?;
        state.ops.push(SimPlcOp::Write(sim.tag.clone()));
        if let Some(status) = state.fail_write {
            return Err(status);
        }
        state.remote.insert(sim.tag.clone(), sim.buffer.clone());
        Ok(())
    }

    fn destroy(&mut self, handle: PlcHandle) {
        let mut state = lock(&self.state);
        if let Some(sim) = state.handles.remove(&handle.raw()) {
            state.ops.push(SimPlcOp::Destroy(sim.tag));
        }
    }

    fn set_scalar(&mut self, handle: PlcHandle, offset: usize, value: ScalarValue) -> Result<(), PlcStatus> {
        let mut state = lock(&self.state);
        let sim = state
            .handles
            .get_mut(&handle.raw())
            .ok_or(PlcStatus::ERR_NOT_FOUND)?;
        let bytes = value.to_le_bytes();
        let end = offset + bytes.len();
        if end > sim.buffer.len() {
            return Err(PlcStatus::ERR_OUT_OF_BOUNDS);
        }
        // The typed setters clear the whole element before storing
        let buf_len = sim.buffer.len();
        sim.buffer[offset..offset + ELEMENT_BYTES.min(buf_len - offset)].fill(0);
        sim.buffer[offset..end].copy_from_slice(&bytes);
        Ok(())
    }

    fn get_bytes(&self, handle: PlcHandle, offset: usize, len: usize) -> Result<Vec<u8>, PlcStatus> {
        let state = lock(&self.state);
        let sim = state
            .handles
            .get(&handle.raw())
            .ok_or(PlcStatus::ERR_NOT_FOUND)?;
        if offset > sim.buffer.len() {
            return Err(PlcStatus::ERR_OUT_OF_BOUNDS);
        }
        let end = (offset + len).min(sim.buffer.len());
        Ok(sim.buffer[offset..end].to_vec())
    }
}

/// One call observed by the simulated OPC UA server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimUaOp {
    Connect(String),
    Read(NodeId),
    Write(NodeId),
    Disconnect,
}

#[derive(Debug)]
struct SimUaState {
    nodes: BTreeMap<NodeId, UaVariant>,
    online: bool,
    connect_failures: usize,
    open_sessions: usize,
    ops: Vec<SimUaOp>,
}

impl Default for SimUaState {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            online: true,
            connect_failures: 0,
            open_sessions: 0,
            ops: Vec::new(),
        }
    }
}

/// Simulated OPC UA server and client connector
#[derive(Debug, Clone, Default)]
pub struct SimOpcUaServer {
    state: Arc<Mutex<SimUaState>>,
}

impl SimOpcUaServer {
    /// Create an online server with no nodes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a node
    pub fn set_node(&self, namespace: u16, identifier: &str, value: UaVariant) {
        lock(&self.state)
            .nodes
            .insert(NodeId::string(namespace, identifier), value);
    }

    /// Current value of a node
    pub fn node(&self, namespace: u16, identifier: &str) -> Option<UaVariant> {
        lock(&self.state)
            .nodes
            .get(&NodeId::string(namespace, identifier))
            .cloned()
    }

    /// Reject the next `count` connect attempts
    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.state).connect_failures = count;
    }

    /// Take the server up or down; live sessions follow
    pub fn set_online(&self, online: bool) {
        lock(&self.state).online = online;
    }

    /// Sessions connected and not yet disconnected
    pub fn open_sessions(&self) -> usize {
        lock(&self.state).open_sessions
    }

    /// Calls observed so far
    pub fn ops(&self) -> Vec<SimUaOp> {
        lock(&self.state).ops.clone()
    }

    /// Number of calls of one kind observed so far
    pub fn count_ops(&self, matches: impl Fn(&SimUaOp) -> bool) -> usize {
        lock(&self.state).ops.iter().filter(|op| matches(op)).count()
    }
}

impl OpcUaConnector for SimOpcUaServer {
    fn connect(&mut self, endpoint: &str) -> Result<Box<dyn OpcUaSession>, UaStatusCode> {
        let mut state = lock(&self.state);
        state.ops.push(SimUaOp::Connect(endpoint.to_string()));
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(UaStatusCode::BAD_COMMUNICATION_ERROR);
        }
        if !state.online {
            return Err(UaStatusCode::BAD_TIMEOUT);
        }
        state.open_sessions += 1;
        Ok(Box::new(SimUaSession {
            state: self.state.clone(),
            open: true,
        }))
    }
}

struct SimUaSession {
    state: Arc<Mutex<SimUaState>>,
    open: bool,
}

impl OpcUaSession for SimUaSession {
    fn state(&self) -> UaStatusCode {
        if !self.open {
            UaStatusCode::BAD_NOT_CONNECTED
        } else if !lock(&self.state).online {
            UaStatusCode::BAD_CONNECTION_CLOSED
        } else {
            UaStatusCode::GOOD
        }
    }

    fn read_value(&mut self, node: &NodeId) -> Result<UaVariant, UaStatusCode> {
        let mut state = lock(&self.state);
        state.ops.push(SimUaOp::Read(node.clone()));
        if !state.online {
            return Err(UaStatusCode::BAD_SERVER_NOT_CONNECTED);
        }
        state
            .nodes
            .get(node)
            .cloned()
            .ok_or(UaStatusCode::BAD_NODE_ID_UNKNOWN)
    }

    fn write_value(&mut self, node: &NodeId, value: &UaVariant) -> Result<(), UaStatusCode> {
        let mut state = lock(&self.state);
        state.ops.push(SimUaOp::Write(node.clone()));
        if !state.online {
            return Err(UaStatusCode::BAD_SERVER_NOT_CONNECTED);
        }
        let current = state
            .nodes
            .get_mut(node)
            .ok_or(UaStatusCode::BAD_NODE_ID_UNKNOWN)?;
        if !current.is_empty() && !current.same_type(value) {
            return Err(UaStatusCode::BAD_TYPE_MISMATCH);
        }
        *current = value.clone();
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.open {
            self.open = false;
            let mut state = lock(&self.state);
            state.open_sessions = state.open_sessions.saturating_sub(1);
            state.ops.push(SimUaOp::Disconnect);
        }
    }
}

impl Drop for SimUaSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[derive(Default)]
struct ClockState {
    ready: bool,
    handler: Option<TickHandler>,
    attach_attempts: usize,
}

/// Simulated host frame clock
///
/// Refuses attachment until [`set_ready`](Self::set_ready) is called, then
/// accepts exactly one handler. [`fire`](Self::fire) plays one frame.
#[derive(Clone, Default)]
pub struct SimFrameClock {
    state: Arc<Mutex<ClockState>>,
}

impl std::fmt::Debug for SimFrameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SimFrameClock")
            .field("ready", &state.ready)
            .field("attached", &state.handler.is_some())
            .field("attach_attempts", &state.attach_attempts)
            .finish()
    }
}

impl SimFrameClock {
    /// Create a clock that is not ready yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow (or refuse) attachment
    pub fn set_ready(&self, ready: bool) {
        lock(&self.state).ready = ready;
    }

    /// Whether a handler has been attached
    pub fn is_attached(&self) -> bool {
        lock(&self.state).handler.is_some()
    }

    /// Number of attach attempts seen, successful or not
    pub fn attach_attempts(&self) -> usize {
        lock(&self.state).attach_attempts
    }

    /// Deliver one frame; false when nothing is attached
    pub fn fire(&self, now: Instant) -> bool {
        // Clone out so the handler runs without the clock lock held
        let handler = lock(&self.state).handler.clone();
        match handler {
            Some(handler) => {
                handler(now);
                true
            }
            None => false,
        }
    }
}

impl HostTickSource for SimFrameClock {
    fn try_attach(&self, handler: TickHandler) -> bool {
        let mut state = lock(&self.state);
        state.attach_attempts += 1;
        if !state.ready || state.handler.is_some() {
            return false;
        }
        state.handler = Some(handler);
        true
    }
}
