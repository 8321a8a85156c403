//! Tag group communication engine
//!
//! [`CommsEngine`] is the public face of the crate. It owns the worker thread
//! and exposes the caller-side entry points:
//!
//! - registration of tag groups and tags
//! - typed reads served from the cached values (never blocking on I/O)
//! - typed writes, queued for the worker and applied before its next pass
//! - the three runtime gates (comms, simulation, logging)
//! - the per-frame tick that drives the poll scheduler
//!
//! # Architecture
//!
//! ```text
//! host tick -> PollScheduler -> ticket queue -> Worker -> protocol libraries
//!                                   ^               |
//! write_*() -> WriteQueue ----------+               v
//! read_*()  <------------------------------- TagGroupRegistry cells
//! ```
//!
//! Errors never cross this boundary. Protocol failures are logged, latched
//! (see [`CommsEngine::comm_error`]) and announced once per simulation run as
//! a [`Notification::CommError`]. Unknown groups or tags are logged and
//! answered with a default value or `false`.
//!
//! # Example
//!
//! ```ignore
//! use tagcomms_rs::backend::sim::{SimOpcUaServer, SimPlcLibrary};
//! use tagcomms_rs::backend::ProtocolLibraries;
//! use tagcomms_rs::{CommsEngine, EngineConfig};
//!
//! let libraries = ProtocolLibraries::new(
//!     Box::new(SimPlcLibrary::new()),
//!     Box::new(SimOpcUaServer::new()),
//! );
//! let (engine, events) = CommsEngine::new(EngineConfig::default(), libraries)?;
//!
//! engine.register_group("Line1", 100, "ab_eip", "10.0.0.5", "1,0", "ControlLogix");
//! engine.register_tag("Line1", "Motor_Speed", 1);
//! engine.set_comms_enabled(true);
//! engine.set_simulation_running(true);
//!
//! // once per frame
//! engine.tick(std::time::Instant::now());
//! let speed = engine.read_float32("Line1", "Motor_Speed");
//! ```

pub mod events;
pub mod registry;
pub mod scheduler;
pub mod watchdog;
pub mod worker;
pub mod write_queue;

pub use events::{ErrorLatch, EventReceiver, LatchedError, Notification};
pub use registry::{CachedValue, GroupEntry, TagCell, TagGroupRegistry};
pub use scheduler::{PollScheduler, SchedulePass};
pub use watchdog::{HostTickSource, TickHandler, Watchdog};
pub use worker::{Ticket, Worker};
pub use write_queue::{RequestValue, WriteQueue, WriteRequest};

use crate::backend::ProtocolLibraries;
use crate::comms_log;
use crate::config::EngineConfig;
use crate::error::{CommsError, Result};
use crate::logging::LogGate;
use crate::queue::BlockingQueue;
use crate::types::{DynamicValue, GroupSpec, Protocol, Scalar, ScalarKind};
use chrono::Utc;
use events::EventSender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The runtime switches
#[derive(Debug)]
pub struct Gates {
    comms: AtomicBool,
    simulation: AtomicBool,
    pub log: LogGate,
}

impl Gates {
    fn new(config: &EngineConfig) -> Self {
        Self {
            comms: AtomicBool::new(config.comms_enabled),
            simulation: AtomicBool::new(config.simulation_running),
            log: LogGate::new(config.logging_enabled),
        }
    }

    pub fn comms_enabled(&self) -> bool {
        self.comms.load(Ordering::Acquire)
    }

    pub fn simulation_running(&self) -> bool {
        self.simulation.load(Ordering::Acquire)
    }

    /// Both gates the scheduler depends on are open
    pub fn active(&self) -> bool {
        self.comms_enabled() && self.simulation_running()
    }

    /// Returns the previous value
    pub(crate) fn set_comms_enabled(&self, enabled: bool) -> bool {
        self.comms.swap(enabled, Ordering::AcqRel)
    }

    /// Returns the previous value
    pub(crate) fn set_simulation_running(&self, running: bool) -> bool {
        self.simulation.swap(running, Ordering::AcqRel)
    }
}

/// State shared by the caller side, the tick handler and the worker
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: TagGroupRegistry,
    pub(crate) tickets: BlockingQueue<Ticket>,
    pub(crate) writes: WriteQueue,
    pub(crate) gates: Gates,
    pub(crate) events: EventSender,
    pub(crate) latch: ErrorLatch,
    scheduler: Mutex<PollScheduler>,
}

impl EngineShared {
    pub(crate) fn new(config: EngineConfig, events: EventSender) -> Self {
        Self {
            registry: TagGroupRegistry::new(),
            tickets: BlockingQueue::new(),
            writes: WriteQueue::new(),
            gates: Gates::new(&config),
            events,
            latch: ErrorLatch::new(),
            scheduler: Mutex::new(PollScheduler::new(config.startup_grace_ms)),
            config,
        }
    }

    fn scheduler(&self) -> MutexGuard<'_, PollScheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log an error, latch it, and announce the first one of the run
    pub(crate) fn report(&self, err: &CommsError) {
        comms_log!(self.gates.log, warn, "{}", err);
        let message = err.to_string();
        if self.latch.record(&message) {
            self.events.send(Notification::CommError {
                message,
                occurred_at: Utc::now(),
            });
        }
    }

    fn tick(&self, now: Instant) -> SchedulePass {
        let mut scheduler = self.scheduler();
        if !self.gates.active() {
            scheduler.reset();
            return SchedulePass::default();
        }
        let delta_ms = scheduler.delta_ms(now);
        scheduler.run(delta_ms, &self.registry, &self.tickets, &self.events)
    }

    fn advance(&self, delta_ms: f64) -> SchedulePass {
        let mut scheduler = self.scheduler();
        if !self.gates.active() {
            scheduler.reset();
            return SchedulePass::default();
        }
        scheduler.run(delta_ms, &self.registry, &self.tickets, &self.events)
    }
}

/// Handle to a running communication engine
///
/// All methods take `&self`; the engine can be shared across threads behind
/// an `Arc`. Dropping it shuts the worker down.
pub struct CommsEngine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<Watchdog>>,
}

impl std::fmt::Debug for CommsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommsEngine")
            .field("groups", &self.shared.registry.len())
            .field("gates", &self.shared.gates)
            .finish_non_exhaustive()
    }
}

macro_rules! typed_accessors {
    ($($read:ident, $write:ident, $ty:ty);+ $(;)?) => {
        $(
            #[doc = concat!("Read a tag as `", stringify!($ty), "`")]
            pub fn $read(&self, group: &str, tag: &str) -> $ty {
                self.read::<$ty>(group, tag)
            }

            #[doc = concat!("Queue a `", stringify!($ty), "` write")]
            pub fn $write(&self, group: &str, tag: &str, value: $ty) {
                self.write::<$ty>(group, tag, value)
            }
        )+
    };
}

impl CommsEngine {
    /// Create the engine and start its worker thread
    pub fn new(config: EngineConfig, libraries: ProtocolLibraries) -> Result<(Self, EventReceiver)> {
        config.validate()?;
        let (tx, rx) = events::channel(config.event_capacity);
        let shared = Arc::new(EngineShared::new(config, tx));

        let worker = Worker::new(shared.clone(), libraries);
        let handle = std::thread::Builder::new()
            .name("tagcomms-worker".to_string())
            .spawn(move || worker.run())?;

        tracing::info!("Communication engine started");
        Ok((
            Self {
                shared,
                worker: Mutex::new(Some(handle)),
                watchdog: Mutex::new(None),
            },
            rx,
        ))
    }

    // ==================== Registration ====================

    /// Register a tag group, replacing any group of the same name
    ///
    /// `protocol` is `opc_ua` for OPC UA groups, otherwise the PLC family
    /// handed to the tag-handle library. For OPC UA, `gateway` is the endpoint
    /// URL and `path` the namespace index.
    pub fn register_group(
        &self,
        name: &str,
        polling_interval_ms: u64,
        protocol: &str,
        gateway: &str,
        path: &str,
        cpu: &str,
    ) {
        let spec = GroupSpec::new(Protocol::parse(protocol), gateway, path, cpu, polling_interval_ms);
        self.register_group_spec(name, spec);
    }

    /// Register a tag group from a prepared spec
    pub fn register_group_spec(&self, name: &str, spec: GroupSpec) {
        if self.shared.registry.register_group(name, spec).is_some() {
            comms_log!(
                self.shared.gates.log,
                info,
                "Tag group [{}] already exists, overwriting",
                name
            );
            self.shared.tickets.push(Ticket::Teardown);
        }
    }

    /// Register a tag; false if the group is unknown or the tag exists
    pub fn register_tag(&self, group: &str, tag: &str, elem_count: usize) -> bool {
        match self.shared.registry.register_tag(group, tag, elem_count) {
            Ok(_) => true,
            Err(e) => {
                comms_log!(self.shared.gates.log, warn, "{}", e);
                false
            }
        }
    }

    /// Announce that the host finished registering groups
    pub fn notify_all_groups_registered(&self) {
        self.shared.events.send(Notification::AllGroupsRegistered);
    }

    /// Names of all registered groups
    pub fn group_names(&self) -> Vec<String> {
        self.shared.registry.names()
    }

    // ==================== Reads ====================

    fn cell(&self, group: &str, tag: &str) -> Option<Arc<TagCell>> {
        match self.shared.registry.tag(group, tag) {
            Ok(cell) => Some(cell),
            Err(e) => {
                comms_log!(self.shared.gates.log, warn, "{}", e);
                None
            }
        }
    }

    /// Read a tag's cached value as `T`
    ///
    /// Returns `T::default()` unless comms are enabled and the simulation is
    /// running, for unknown tags, and for tags not read successfully yet.
    pub fn read<T: Scalar>(&self, group: &str, tag: &str) -> T {
        if !self.shared.gates.active() {
            return T::default();
        }
        self.cell(group, tag)
            .and_then(|cell| cell.load(T::KIND))
            .and_then(T::from_value)
            .unwrap_or_default()
    }

    /// Whether the tag was written since its last successful read (advisory)
    pub fn is_dirty(&self, group: &str, tag: &str) -> bool {
        self.cell(group, tag).is_some_and(|cell| cell.is_dirty())
    }

    /// Whether the tag has been read successfully since the last teardown
    pub fn is_tag_initialized(&self, group: &str, tag: &str) -> bool {
        self.cell(group, tag).is_some_and(|cell| cell.is_initialized())
    }

    /// Whether the group has reported itself fully initialized
    pub fn is_group_initialized(&self, group: &str) -> bool {
        self.shared
            .registry
            .group(group)
            .is_some_and(|entry| entry.is_fully_initialized())
    }

    // ==================== Writes ====================

    fn enqueue_write(&self, group: &str, tag: &str, value: RequestValue) {
        if !self.shared.gates.active() {
            return;
        }
        if self.cell(group, tag).is_none() {
            return;
        }
        self.shared
            .writes
            .push(WriteRequest::new(group, tag, value));
        self.shared.tickets.push(Ticket::Flush);
    }

    /// Queue a typed write
    ///
    /// No-op unless comms are enabled and the simulation is running, and for
    /// unknown tags. The worker applies it before its next pass, and drops it
    /// if the simulation has stopped by then.
    pub fn write<T: Scalar>(&self, group: &str, tag: &str, value: T) {
        self.enqueue_write(group, tag, RequestValue::Scalar(value.into_value()));
    }

    /// Queue a loosely-typed write, checked against `kind` by the worker
    pub fn write_dynamic(&self, group: &str, tag: &str, kind: ScalarKind, value: DynamicValue) {
        self.enqueue_write(group, tag, RequestValue::Dynamic { kind, value });
    }

    typed_accessors! {
        read_bit, write_bit, bool;
        read_uint64, write_uint64, u64;
        read_int64, write_int64, i64;
        read_uint32, write_uint32, u32;
        read_int32, write_int32, i32;
        read_uint16, write_uint16, u16;
        read_int16, write_int16, i16;
        read_uint8, write_uint8, u8;
        read_int8, write_int8, i8;
        read_float64, write_float64, f64;
        read_float32, write_float32, f32;
    }

    // ==================== Gates ====================

    /// Open or close the comms gate
    pub fn set_comms_enabled(&self, enabled: bool) {
        let previous = self.shared.gates.set_comms_enabled(enabled);
        if previous != enabled {
            comms_log!(self.shared.gates.log, info, "Comms {}", if enabled { "enabled" } else { "disabled" });
        }
        if !enabled {
            self.shared.scheduler().reset();
        }
    }

    pub fn comms_enabled(&self) -> bool {
        self.shared.gates.comms_enabled()
    }

    /// Start or stop the simulation
    ///
    /// Starting clears the communication error latch. Stopping releases
    /// every native handle and session.
    pub fn set_simulation_running(&self, running: bool) {
        let previous = self.shared.gates.set_simulation_running(running);
        if running && !previous {
            self.shared.latch.clear();
            comms_log!(self.shared.gates.log, info, "Simulation started");
        } else if !running {
            self.shared.scheduler().reset();
            if previous {
                comms_log!(self.shared.gates.log, info, "Simulation stopped");
                self.shared.tickets.push(Ticket::Teardown);
            }
        }
    }

    pub fn simulation_running(&self) -> bool {
        self.shared.gates.simulation_running()
    }

    /// Open or close the log gate
    pub fn set_logging_enabled(&self, enabled: bool) {
        self.shared.gates.log.set(enabled);
    }

    pub fn logging_enabled(&self) -> bool {
        self.shared.gates.log.is_enabled()
    }

    // ==================== Scheduling ====================

    /// Host frame callback
    ///
    /// The first tick after the gates open only sets the time baseline.
    pub fn tick(&self, now: Instant) -> SchedulePass {
        self.shared.tick(now)
    }

    /// Advance the scheduler by an explicit delta
    pub fn advance(&self, delta_ms: f64) -> SchedulePass {
        self.shared.advance(delta_ms)
    }

    /// A tick callback for the host that does not keep the engine alive
    pub fn tick_handler(&self) -> TickHandler {
        let shared = Arc::downgrade(&self.shared);
        Arc::new(move |now| {
            if let Some(shared) = shared.upgrade() {
                shared.tick(now);
            }
        })
    }

    /// Start the watchdog that attaches [`tick_handler`](Self::tick_handler)
    /// to `source` once it becomes ready
    ///
    /// Returns false if a source was already attached (or is being waited
    /// for) or the watchdog thread could not be started.
    pub fn attach_tick_source(&self, source: Arc<dyn HostTickSource>) -> bool {
        let mut slot = self.watchdog.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            comms_log!(self.shared.gates.log, warn, "A tick source is already attached");
            return false;
        }
        match Watchdog::spawn(source, self.tick_handler(), self.shared.config.watchdog_interval()) {
            Ok(watchdog) => {
                *slot = Some(watchdog);
                true
            }
            Err(e) => {
                tracing::error!("Failed to start watchdog: {}", e);
                false
            }
        }
    }

    /// Whether the watchdog has attached the tick handler
    pub fn is_tick_source_attached(&self) -> bool {
        self.watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Watchdog::is_attached)
    }

    // ==================== Status ====================

    /// Wait until the worker has handled every ticket queued so far
    pub fn sync(&self, timeout: Duration) -> bool {
        if self.shared.tickets.is_shutdown() {
            return false;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.shared.tickets.push(Ticket::Barrier(tx));
        rx.recv_timeout(timeout).is_ok()
    }

    /// The latched communication error, if any since the simulation started
    pub fn comm_error(&self) -> Option<LatchedError> {
        self.shared.latch.snapshot()
    }

    /// Notifications lost because the host did not drain the channel
    pub fn dropped_notifications(&self) -> u64 {
        self.shared.events.dropped()
    }

    /// Tickets waiting for the worker
    pub fn pending_tickets(&self) -> usize {
        self.shared.tickets.len()
    }

    /// Writes waiting for the worker
    pub fn pending_writes(&self) -> usize {
        self.shared.writes.len()
    }

    /// Stop the watchdog and the worker; releases every native resource
    pub fn shutdown(&self) {
        if let Some(mut watchdog) = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watchdog.stop();
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.shared.tickets.shutdown();
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
            tracing::info!("Communication engine stopped");
        }
    }
}

impl Drop for CommsEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
