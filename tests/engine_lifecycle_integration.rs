//! Integration tests for the engine lifecycle
//!
//! These tests validate:
//! - Group and tag registration, including duplicate handling
//! - The comms and simulation gates
//! - Native resources being released on stop, re-registration and shutdown
//! - The communication error latch across simulation runs

#![cfg(feature = "sim-backend")]

mod common;

use common::builders::{EngineBuilder, TestEngine};
use common::mock_helpers::{comm_errors, initialized_groups};
use tagcomms_rs::backend::sim::SimPlcOp;
use tagcomms_rs::backend::PlcStatus;
use tagcomms_rs::{Notification, ScalarValue};

fn line_engine() -> TestEngine {
    let test = EngineBuilder::new()
        .active()
        .plc_group("Line1", 100, &["Speed", "Running"])
        .build();
    test.plc.set_remote("Speed", ScalarValue::F32(2.5));
    test.plc.set_remote("Running", ScalarValue::Bit(true));
    test
}

#[test]
fn test_register_tag_is_idempotent() {
    let test = EngineBuilder::new().plc_group("Line1", 100, &["Speed"]).build();

    assert!(!test.engine.register_tag("Line1", "Speed", 1));
    assert!(!test.engine.register_tag("Missing", "Speed", 1));
    assert!(test.engine.register_tag("Line1", "Count", 1));
    assert_eq!(test.engine.group_names(), vec!["Line1".to_string()]);
}

#[test]
fn test_all_groups_registered_is_forwarded() {
    let test = EngineBuilder::new().plc_group("Line1", 100, &["Speed"]).build();

    test.engine.notify_all_groups_registered();

    assert_eq!(test.events.drain(), vec![Notification::AllGroupsRegistered]);
}

#[test]
fn test_reads_follow_the_comms_gate() {
    let test = line_engine();
    test.advance(0.0);

    assert_eq!(test.engine.read_float32("Line1", "Speed"), 2.5);
    assert!(test.engine.read_bit("Line1", "Running"));

    test.engine.set_comms_enabled(false);
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 0.0);
    assert!(!test.engine.read_bit("Line1", "Running"));

    // Nothing is queued while the gate is closed
    test.engine.write_float32("Line1", "Speed", 9.0);
    assert_eq!(test.engine.pending_writes(), 0);

    test.engine.set_comms_enabled(true);
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 2.5);
}

#[test]
fn test_reads_and_writes_follow_the_simulation_gate() {
    let test = line_engine();
    test.advance(0.0);
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 2.5);

    // Comms stay enabled; stopping the simulation alone closes the gate
    test.engine.set_simulation_running(false);
    assert!(test.engine.comms_enabled());
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 0.0);
    assert!(!test.engine.read_bit("Line1", "Running"));

    test.engine.write_float32("Line1", "Speed", 9.0);
    assert_eq!(test.engine.pending_writes(), 0);

    test.engine.set_simulation_running(true);
    test.advance(100.0);
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 2.5);
    assert!(test.engine.read_bit("Line1", "Running"));
}

#[test]
fn test_scheduler_idle_while_gates_closed() {
    let test = EngineBuilder::new().plc_group("Line1", 100, &["Speed"]).build();

    let pass = test.engine.advance(500.0);
    assert!(pass.polled.is_empty());

    test.engine.set_comms_enabled(true);
    assert!(test.engine.advance(500.0).polled.is_empty());

    test.engine.set_simulation_running(true);
    assert_eq!(test.engine.advance(500.0).polled, vec!["Line1".to_string()]);
}

#[test]
fn test_unknown_tags_read_default() {
    let test = line_engine();
    test.advance(0.0);

    assert_eq!(test.engine.read_int32("Line1", "Nope"), 0);
    assert_eq!(test.engine.read_float64("Nope", "Speed"), 0.0);
    assert!(!test.engine.is_tag_initialized("Nope", "Speed"));
    assert!(!test.engine.is_group_initialized("Nope"));
}

#[test]
fn test_stopping_simulation_releases_handles() {
    let test = line_engine();
    test.advance(0.0);
    assert_eq!(test.plc.live_handles(), 2);
    assert!(test.engine.is_tag_initialized("Line1", "Speed"));

    test.engine.set_simulation_running(false);
    test.sync();

    assert_eq!(test.plc.live_handles(), 0);
    assert!(!test.engine.is_tag_initialized("Line1", "Speed"));
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 0.0);
}

#[test]
fn test_group_initializes_again_after_restart() {
    let test = line_engine();
    test.advance(0.0);
    test.advance(0.0);
    assert!(test.engine.is_group_initialized("Line1"));
    assert_eq!(initialized_groups(&test.events.drain()), vec!["Line1".to_string()]);

    test.engine.set_simulation_running(false);
    test.sync();
    assert!(!test.engine.is_group_initialized("Line1"));

    test.engine.set_simulation_running(true);
    test.advance(100.0);
    test.advance(0.0);

    assert!(test.engine.is_group_initialized("Line1"));
    assert_eq!(initialized_groups(&test.events.drain()), vec!["Line1".to_string()]);
    assert_eq!(test.plc.live_handles(), 2);
}

#[test]
fn test_reregistering_group_starts_fresh() {
    let test = line_engine();
    test.advance(0.0);
    assert_eq!(test.plc.live_handles(), 2);

    test.engine
        .register_group("Line1", 100, "ab_eip", "192.168.1.11", "1,0", "ControlLogix");
    assert!(!test.engine.is_tag_initialized("Line1", "Speed"));
    assert!(test.engine.register_tag("Line1", "Speed", 1));
    test.sync();
    assert_eq!(test.plc.live_handles(), 0);

    test.advance(0.0);

    assert_eq!(test.plc.live_handles(), 1);
    assert_eq!(test.engine.read_float32("Line1", "Speed"), 2.5);
    let creates: Vec<_> = test
        .plc
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            SimPlcOp::Create(attributes) => Some(attributes),
            _ => None,
        })
        .collect();
    assert_eq!(creates.len(), 3);
    assert!(creates[2].contains("gateway=192.168.1.11"));
}

#[test]
fn test_error_latch_spans_one_run() {
    let test = line_engine();
    test.plc.fail_reads(Some(PlcStatus::ERR_TIMEOUT));

    test.advance(0.0);
    test.advance(100.0);
    test.advance(100.0);

    let errors = comm_errors(&test.events.drain());
    assert_eq!(errors.len(), 1);
    let latched = test.engine.comm_error().expect("error latched");
    assert_eq!(latched.count, 3);
    assert_eq!(latched.first_message, errors[0]);

    test.engine.set_simulation_running(false);
    assert!(test.engine.comm_error().is_some());

    test.plc.fail_reads(None);
    test.engine.set_simulation_running(true);
    assert!(test.engine.comm_error().is_none());

    test.advance(100.0);
    assert!(test.engine.is_tag_initialized("Line1", "Speed"));
    assert!(test.engine.comm_error().is_none());
    assert!(comm_errors(&test.events.drain()).is_empty());
}

#[test]
fn test_logging_gate_toggles() {
    let test = line_engine();
    assert!(test.engine.logging_enabled());

    test.engine.set_logging_enabled(false);
    assert!(!test.engine.logging_enabled());

    // Failures are still latched with logging off
    test.plc.fail_reads(Some(PlcStatus::ERR_TIMEOUT));
    test.advance(0.0);
    assert!(test.engine.comm_error().is_some());
}

#[test]
fn test_shutdown_releases_everything() {
    let test = EngineBuilder::new()
        .active()
        .plc_group("Line1", 100, &["Speed"])
        .opcua_group("Oven", 100, 2, &["Temperature"])
        .build();
    test.opcua
        .set_node(2, "Temperature", tagcomms_rs::backend::UaVariant::Double(180.0));
    test.advance(0.0);
    assert_eq!(test.plc.live_handles(), 1);
    assert_eq!(test.opcua.open_sessions(), 1);

    test.engine.shutdown();
    test.engine.shutdown();

    assert_eq!(test.plc.live_handles(), 0);
    assert_eq!(test.opcua.open_sessions(), 0);
    assert!(!test.engine.sync(common::test_timeout()));
}

#[test]
fn test_dropping_engine_joins_worker() {
    let test = line_engine();
    test.advance(0.0);
    let plc = test.plc.clone();

    drop(test);

    assert_eq!(plc.live_handles(), 0);
    assert!(plc.ops().iter().any(|op| matches!(op, SimPlcOp::Destroy(_))));
}
