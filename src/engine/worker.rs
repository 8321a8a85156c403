//! Worker thread implementation
//!
//! The worker is the only thread that touches the protocol libraries. It
//! sleeps on the ticket queue and, for every ticket it pops:
//!
//! 1. drains the write queue, applying each request if the simulation is
//!    running and silently discarding it otherwise;
//! 2. handles the ticket itself: a group read pass, a full teardown, an
//!    idle flush, or a barrier acknowledgement.
//!
//! Writes therefore always reach the remote side before the read pass that
//! follows them.
//!
//! # Group runtimes
//!
//! Native state (handles, sessions) is kept per group in a runtime tagged with
//! the registration generation it was built for. When a group name has been
//! re-registered the generations differ, and the stale runtime is torn down
//! before a fresh one is built.

use super::write_queue::WriteRequest;
use super::EngineShared;
use crate::backend::{GroupBackend, PassContext, ProtocolLibraries, WriteOutcome};
use crate::comms_log;
use crate::engine::registry::GroupEntry;
use crate::error::{CommsError, Result};
use crossbeam_channel::Sender;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Unit of work for the worker thread
#[derive(Debug, Clone)]
pub enum Ticket {
    /// Run one read pass over the named group
    Poll(String),
    /// Only drain pending writes
    Flush,
    /// Release every native handle and session
    Teardown,
    /// Acknowledge once every earlier ticket has been handled
    Barrier(Sender<()>),
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Ticket::Poll(a), Ticket::Poll(b)) => a == b,
            (Ticket::Flush, Ticket::Flush) | (Ticket::Teardown, Ticket::Teardown) => true,
            (Ticket::Barrier(a), Ticket::Barrier(b)) => a.same_channel(b),
            _ => false,
        }
    }
}

struct GroupRuntime {
    generation: u64,
    entry: Arc<GroupEntry>,
    backend: GroupBackend,
}

impl GroupRuntime {
    fn new(entry: Arc<GroupEntry>) -> Self {
        Self {
            generation: entry.generation(),
            backend: GroupBackend::for_entry(&entry),
            entry,
        }
    }
}

/// Owner of every native protocol resource
pub struct Worker {
    shared: Arc<EngineShared>,
    libraries: ProtocolLibraries,
    runtimes: BTreeMap<String, GroupRuntime>,
    timeout: Duration,
}

impl Worker {
    pub(crate) fn new(shared: Arc<EngineShared>, libraries: ProtocolLibraries) -> Self {
        let timeout = shared.config.timeout();
        Self {
            shared,
            libraries,
            runtimes: BTreeMap::new(),
            timeout,
        }
    }

    /// Process tickets until the queue is shut down
    pub fn run(mut self) {
        tracing::debug!("Worker thread started");

        while let Some(ticket) = self.shared.tickets.pop() {
            self.flush_writes();
            self.handle(ticket);
        }

        // Writes queued after the last ticket are dropped with the engine
        let pending = self.shared.writes.drain().len();
        if pending > 0 {
            tracing::debug!("Dropping {} pending write(s) on shutdown", pending);
        }
        self.teardown_all();
        tracing::debug!("Worker thread stopped");
    }

    fn handle(&mut self, ticket: Ticket) {
        match ticket {
            Ticket::Poll(group) => {
                if self.shared.gates.simulation_running() {
                    self.poll_group(&group);
                }
            }
            Ticket::Flush => {}
            Ticket::Teardown => self.teardown_all(),
            Ticket::Barrier(ack) => {
                // The waiter may have timed out already
                ack.send(()).ok();
            }
        }
    }

    /// Apply (or discard) every pending write
    fn flush_writes(&mut self) {
        let requests = self.shared.writes.drain();
        if requests.is_empty() {
            return;
        }

        if !self.shared.gates.simulation_running() {
            comms_log!(
                self.shared.gates.log,
                debug,
                "Simulation stopped, discarding {} write(s)",
                requests.len()
            );
            return;
        }

        for request in requests {
            match self.apply_write(&request) {
                Ok(WriteOutcome::Applied) => {}
                Ok(WriteOutcome::Skipped) => comms_log!(
                    self.shared.gates.log,
                    debug,
                    "Write to {}.{} skipped, tag has no handle yet",
                    request.group,
                    request.tag
                ),
                Err(e) => self.shared.report(&e),
            }
        }
    }

    fn apply_write(&mut self, request: &WriteRequest) -> Result<WriteOutcome> {
        let entry = self
            .shared
            .registry
            .group(&request.group)
            .ok_or_else(|| CommsError::UnknownGroup(request.group.clone()))?;

        // Rejected before the backend is involved at all
        let value = request.value.resolve(&request.tag)?;

        let timeout = self.timeout;
        let runtime = Self::runtime_for(&mut self.runtimes, &mut self.libraries, &entry);
        runtime.backend.sync_tags(&entry);
        let ctx = PassContext {
            entry: &entry,
            timeout,
        };
        runtime
            .backend
            .write_one(&mut self.libraries, &ctx, &request.tag, value)
    }

    fn poll_group(&mut self, name: &str) {
        let Some(entry) = self.shared.registry.group(name) else {
            comms_log!(self.shared.gates.log, warn, "Tag group [{}] does not exist", name);
            return;
        };

        let timeout = self.timeout;
        let runtime = Self::runtime_for(&mut self.runtimes, &mut self.libraries, &entry);
        runtime.backend.sync_tags(&entry);
        let ctx = PassContext {
            entry: &entry,
            timeout,
        };

        match runtime.backend.read_all(&mut self.libraries, &ctx) {
            Ok(pass) => {
                for failure in &pass.failures {
                    self.shared.report(failure);
                }
            }
            Err(e) => self.shared.report(&e),
        }
    }

    /// The runtime matching the entry's generation, rebuilding a stale one
    fn runtime_for<'a>(
        runtimes: &'a mut BTreeMap<String, GroupRuntime>,
        libraries: &mut ProtocolLibraries,
        entry: &Arc<GroupEntry>,
    ) -> &'a mut GroupRuntime {
        let stale = runtimes
            .get(entry.name())
            .is_some_and(|rt| rt.generation != entry.generation());
        if stale {
            if let Some(mut old) = runtimes.remove(entry.name()) {
                tracing::debug!("Tag group {} was re-registered, releasing old state", entry.name());
                old.backend.teardown(libraries, &old.entry);
            }
        }

        runtimes
            .entry(entry.name().to_string())
            .or_insert_with(|| GroupRuntime::new(entry.clone()))
    }

    fn teardown_all(&mut self) {
        if self.runtimes.is_empty() {
            return;
        }
        for (name, mut runtime) in std::mem::take(&mut self.runtimes) {
            runtime.backend.teardown(&mut self.libraries, &runtime.entry);
            tracing::debug!("Released native state of tag group {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::{SimOpcUaServer, SimPlcLibrary, SimPlcOp, SimUaOp};
    use crate::backend::{PlcStatus, UaVariant};
    use crate::config::EngineConfig;
    use crate::engine::events::{self, EventReceiver, Notification};
    use crate::engine::write_queue::RequestValue;
    use crate::types::{DynamicValue, GroupSpec, Protocol, ScalarKind, ScalarValue};

    struct Harness {
        shared: Arc<EngineShared>,
        worker: Worker,
        plc: SimPlcLibrary,
        ua: SimOpcUaServer,
        events: EventReceiver,
    }

    fn harness() -> Harness {
        let config = EngineConfig {
            timeout_ms: 50,
            simulation_running: true,
            comms_enabled: true,
            ..Default::default()
        };
        let (tx, rx) = events::channel(64);
        let shared = Arc::new(EngineShared::new(config, tx));
        let plc = SimPlcLibrary::new();
        let ua = SimOpcUaServer::new();
        let libraries = ProtocolLibraries::new(Box::new(plc.clone()), Box::new(ua.clone()));
        Harness {
            worker: Worker::new(shared.clone(), libraries),
            shared,
            plc,
            ua,
            events: rx,
        }
    }

    fn plc_spec() -> GroupSpec {
        GroupSpec::new(Protocol::Plc("ab_eip".into()), "10.0.0.5", "1,0", "LGX", 100)
    }

    fn ua_spec() -> GroupSpec {
        GroupSpec::new(Protocol::OpcUa, "opc.tcp://sim:4840", "2", "", 100)
    }

    /// Feed one ticket the way `run` does
    fn step(h: &mut Harness, ticket: Ticket) {
        h.worker.flush_writes();
        h.worker.handle(ticket);
    }

    fn comm_errors(rx: &EventReceiver) -> Vec<String> {
        rx.drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::CommError { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_poll_reads_plc_values() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "Speed", 1).unwrap();
        h.plc.set_remote("Speed", ScalarValue::I32(-250));

        step(&mut h, Ticket::Poll("G1".into()));

        let cell = h.shared.registry.tag("G1", "Speed").unwrap();
        assert_eq!(cell.load(ScalarKind::I32), Some(ScalarValue::I32(-250)));
        assert_eq!(h.plc.live_handles(), 1);
    }

    #[test]
    fn test_write_flushed_before_read_pass() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        step(&mut h, Ticket::Poll("G1".into()));

        h.shared.writes.push(WriteRequest::new(
            "G1",
            "T1",
            RequestValue::Scalar(ScalarValue::F64(3.25)),
        ));
        step(&mut h, Ticket::Poll("G1".into()));

        let ops = h.plc.ops();
        let write_at = ops
            .iter()
            .position(|op| *op == SimPlcOp::Write("T1".into()))
            .unwrap();
        let last_read = ops
            .iter()
            .rposition(|op| *op == SimPlcOp::Read("T1".into()))
            .unwrap();
        assert!(write_at < last_read);

        let cell = h.shared.registry.tag("G1", "T1").unwrap();
        assert_eq!(cell.load(ScalarKind::F64), Some(ScalarValue::F64(3.25)));
        assert!(!cell.is_dirty());
    }

    #[test]
    fn test_writes_discarded_when_simulation_stopped() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        step(&mut h, Ticket::Poll("G1".into()));

        h.shared.gates.set_simulation_running(false);
        h.shared.writes.push(WriteRequest::new(
            "G1",
            "T1",
            RequestValue::Scalar(ScalarValue::U8(9)),
        ));
        step(&mut h, Ticket::Flush);

        assert!(h.shared.writes.is_empty());
        assert_eq!(h.plc.count_ops(|op| matches!(op, SimPlcOp::Write(_))), 0);
        assert!(comm_errors(&h.events).is_empty());
    }

    #[test]
    fn test_poll_skipped_when_simulation_stopped() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        h.shared.gates.set_simulation_running(false);

        step(&mut h, Ticket::Poll("G1".into()));
        assert!(h.plc.ops().is_empty());
    }

    #[test]
    fn test_dynamic_type_mismatch_reported_once() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "Run", 1).unwrap();
        h.plc.set_remote("Run", ScalarValue::Bit(true));
        step(&mut h, Ticket::Poll("G1".into()));
        let ops_before = h.plc.ops().len();

        h.shared.writes.push(WriteRequest::new(
            "G1",
            "Run",
            RequestValue::Dynamic {
                kind: ScalarKind::Bit,
                value: DynamicValue::Str("on".into()),
            },
        ));
        step(&mut h, Ticket::Flush);

        assert_eq!(h.plc.ops().len(), ops_before);
        let errors = comm_errors(&h.events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Supplied data type incorrect"));
        let cell = h.shared.registry.tag("G1", "Run").unwrap();
        assert_eq!(cell.load(ScalarKind::Bit), Some(ScalarValue::Bit(true)));
    }

    #[test]
    fn test_read_failure_latches_first_error_only() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        h.plc.fail_creates(Some(PlcStatus::ERR_TIMEOUT));

        step(&mut h, Ticket::Poll("G1".into()));
        step(&mut h, Ticket::Poll("G1".into()));

        assert_eq!(comm_errors(&h.events).len(), 1);
        let latched = h.shared.latch.snapshot().unwrap();
        assert_eq!(latched.count, 2);
        assert!(latched.first_message.contains("PLCTAG_ERR_TIMEOUT"));
    }

    #[test]
    fn test_teardown_releases_handles_and_sessions() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        h.shared.registry.register_group("G2", ua_spec());
        h.shared.registry.register_tag("G2", "Temp", 1).unwrap();
        h.ua.set_node(2, "Temp", UaVariant::Float(20.0));

        step(&mut h, Ticket::Poll("G1".into()));
        step(&mut h, Ticket::Poll("G2".into()));
        assert_eq!(h.plc.live_handles(), 1);
        assert_eq!(h.ua.open_sessions(), 1);

        step(&mut h, Ticket::Teardown);
        assert_eq!(h.plc.live_handles(), 0);
        assert_eq!(h.ua.open_sessions(), 0);
        assert!(!h.shared.registry.tag("G2", "Temp").unwrap().is_initialized());
    }

    #[test]
    fn test_reregistered_group_gets_fresh_state() {
        let mut h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        step(&mut h, Ticket::Poll("G1".into()));

        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T2", 1).unwrap();
        step(&mut h, Ticket::Poll("G1".into()));

        assert_eq!(
            h.plc.count_ops(|op| *op == SimPlcOp::Destroy("T1".into())),
            1
        );
        assert_eq!(h.plc.live_handles(), 1);
        assert!(h.shared.registry.tag("G1", "T2").unwrap().is_initialized());
    }

    #[test]
    fn test_opcua_reconnects_after_server_drop() {
        let mut h = harness();
        h.shared.registry.register_group("G2", ua_spec());
        h.shared.registry.register_tag("G2", "Temp", 1).unwrap();
        h.ua.set_node(2, "Temp", UaVariant::Double(1.0));

        step(&mut h, Ticket::Poll("G2".into()));
        h.ua.set_online(false);
        step(&mut h, Ticket::Poll("G2".into()));
        assert_eq!(h.ua.open_sessions(), 0);

        h.ua.set_online(true);
        h.ua.set_node(2, "Temp", UaVariant::Double(2.0));
        step(&mut h, Ticket::Poll("G2".into()));

        assert_eq!(h.ua.count_ops(|op| matches!(op, SimUaOp::Connect(_))), 2);
        let cell = h.shared.registry.tag("G2", "Temp").unwrap();
        assert_eq!(cell.load(ScalarKind::F64), Some(ScalarValue::F64(2.0)));
    }

    #[test]
    fn test_barrier_acknowledges() {
        let mut h = harness();
        let (tx, rx) = crossbeam_channel::bounded(1);
        step(&mut h, Ticket::Barrier(tx));
        assert!(rx.try_recv().is_ok());

        // A waiter that gave up is not an error
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        step(&mut h, Ticket::Barrier(tx));
        assert!(h.shared.latch.snapshot().is_none());
    }

    #[test]
    fn test_run_exits_on_shutdown_and_releases_everything() {
        let h = harness();
        h.shared.registry.register_group("G1", plc_spec());
        h.shared.registry.register_tag("G1", "T1", 1).unwrap();
        h.shared.tickets.push(Ticket::Poll("G1".into()));
        h.shared.tickets.shutdown();

        let plc = h.plc.clone();
        h.worker.run();

        assert!(plc.count_ops(|op| matches!(op, SimPlcOp::Create(_))) == 1);
        assert_eq!(plc.live_handles(), 0);
    }
}
