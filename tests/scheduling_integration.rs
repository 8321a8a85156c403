//! Integration tests for poll scheduling
//!
//! These tests validate:
//! - Per-group cadence driven by scheduler deltas
//! - The startup grace period before groups report initialization
//! - Attaching to a host frame clock that becomes ready late
//! - Notification back-pressure

#![cfg(feature = "sim-backend")]

mod common;

use common::builders::EngineBuilder;
use common::mock_helpers::{initialized_groups, plc_reads, polled_groups};
use common::wait_until;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagcomms_rs::backend::sim::SimFrameClock;
use tagcomms_rs::{Notification, ScalarValue};

#[test]
fn test_single_group_polled_once_per_interval() {
    let test = EngineBuilder::new()
        .active()
        .plc_group("G1", 100, &["T1"])
        .build();

    let pass = test.engine.advance(150.0);
    assert_eq!(pass.polled, vec!["G1".to_string()]);
    test.sync();

    assert_eq!(polled_groups(&test.events.drain()), vec!["G1".to_string()]);
    assert_eq!(plc_reads(&test.plc, "T1"), 1);

    // The accumulator restarted at zero
    assert!(test.engine.advance(99.0).polled.is_empty());
    assert_eq!(test.engine.advance(1.0).polled, vec!["G1".to_string()]);
}

#[test]
fn test_groups_keep_their_own_cadence() {
    let test = EngineBuilder::new()
        .active()
        .plc_group("Fast", 50, &["A"])
        .plc_group("Slow", 200, &["B"])
        .build();

    // First pass polls both, then 400 ms in 25 ms frames
    test.advance(0.0);
    for _ in 0..16 {
        test.advance(25.0);
    }

    let polled = polled_groups(&test.events.drain());
    assert_eq!(polled.iter().filter(|g| *g == "Fast").count(), 9);
    assert_eq!(polled.iter().filter(|g| *g == "Slow").count(), 3);
    assert_eq!(plc_reads(&test.plc, "A"), 9);
    assert_eq!(plc_reads(&test.plc, "B"), 3);
}

#[test]
fn test_initialization_waits_for_grace_period() {
    let test = EngineBuilder::new()
        .active()
        .grace_ms(1000)
        .plc_group("G1", 100, &["T1", "T2"])
        .build();
    test.plc.set_remote("T1", ScalarValue::I16(1));

    test.advance(0.0);
    assert!(test.engine.is_tag_initialized("G1", "T2"));

    for _ in 0..9 {
        test.advance(100.0);
    }
    assert!(!test.engine.is_group_initialized("G1"));

    let pass = test.engine.advance(100.0);
    assert_eq!(pass.initialized, vec!["G1".to_string()]);
    assert!(test.engine.is_group_initialized("G1"));

    // Reported once
    test.advance(100.0);
    let initialized = initialized_groups(&test.events.drain());
    assert_eq!(initialized, vec!["G1".to_string()]);
}

#[test]
fn test_empty_group_initializes_after_grace() {
    let test = EngineBuilder::new()
        .active()
        .plc_group("Empty", 100, &[])
        .build();

    let pass = test.engine.advance(0.0);

    assert_eq!(pass.initialized, vec!["Empty".to_string()]);
}

#[test]
fn test_first_tick_only_sets_baseline() {
    let test = EngineBuilder::new()
        .active()
        .plc_group("G1", 100, &["T1"])
        .build();
    let start = Instant::now();

    // The first tick still polls because timers start due
    assert_eq!(test.engine.tick(start).polled, vec!["G1".to_string()]);
    assert!(test.engine.tick(start + Duration::from_millis(60)).polled.is_empty());
    assert_eq!(
        test.engine.tick(start + Duration::from_millis(110)).polled,
        vec!["G1".to_string()]
    );

    // Closing a gate drops the baseline; a long pause is not one big delta
    test.engine.set_comms_enabled(false);
    test.engine.set_comms_enabled(true);
    assert!(test.engine.tick(start + Duration::from_secs(60)).polled.is_empty());
}

#[test]
fn test_frame_clock_attached_once_ready() {
    let test = EngineBuilder::new()
        .active()
        .plc_group("G1", 100, &["T1"])
        .build();
    let clock = SimFrameClock::new();

    assert!(test.engine.attach_tick_source(Arc::new(clock.clone())));
    assert!(!test.engine.attach_tick_source(Arc::new(SimFrameClock::new())));

    assert!(wait_until(|| clock.attach_attempts() >= 2));
    assert!(!clock.is_attached());
    assert!(!test.engine.is_tick_source_attached());

    clock.set_ready(true);
    assert!(wait_until(|| test.engine.is_tick_source_attached()));
    assert!(clock.is_attached());

    let attempts = clock.attach_attempts();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(clock.attach_attempts(), attempts);

    assert!(clock.fire(Instant::now()));
    test.sync();
    assert_eq!(polled_groups(&test.events.drain()), vec!["G1".to_string()]);
    assert_eq!(plc_reads(&test.plc, "T1"), 1);
}

#[test]
fn test_frame_clock_outliving_engine_is_harmless() {
    let clock = SimFrameClock::new();
    clock.set_ready(true);
    {
        let test = EngineBuilder::new()
            .active()
            .plc_group("G1", 100, &["T1"])
            .build();
        test.engine.attach_tick_source(Arc::new(clock.clone()));
        assert!(wait_until(|| clock.is_attached()));
    }

    // Handler holds no strong reference to the engine
    assert!(clock.fire(Instant::now()));
}

#[test]
fn test_full_notification_channel_drops_instead_of_blocking() {
    let test = EngineBuilder::new()
        .active()
        .event_capacity(2)
        .plc_group("G1", 10, &["T1"])
        .build();

    for _ in 0..5 {
        test.engine.advance(10.0);
    }
    test.sync();

    let events = test.events.drain();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|n| matches!(n, Notification::GroupPolled(_) | Notification::GroupInitialized(_))));
    assert!(test.engine.dropped_notifications() >= 3);
    assert_eq!(plc_reads(&test.plc, "T1"), 5);
}
