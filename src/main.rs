//! tagcomms demo - Main Entry Point
//!
//! Runs the engine against the in-memory PLC and OPC UA simulators, driven by
//! a simulated frame clock, and prints the values and notifications it sees.
//!
//! Usage: `tagcomms [CONFIG] [SECONDS]`

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagcomms_rs::backend::sim::{SimFrameClock, SimOpcUaServer, SimPlcLibrary};
use tagcomms_rs::backend::{ProtocolLibraries, UaVariant};
use tagcomms_rs::{config, logging, CommsEngine, EngineConfig, Notification, ScalarValue};

const FRAME: Duration = Duration::from_millis(16);

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from).or_else(config::default_config_path);
    let seconds: u64 = match args.next() {
        Some(raw) => raw.parse().context("SECONDS must be a whole number")?,
        None => 3,
    };

    let mut config = match &config_path {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };
    // The demo drives the gates itself
    config.comms_enabled = false;
    config.simulation_running = false;

    let _log_guard = logging::init_tracing(&config).context("Failed to initialize logging")?;
    tracing::info!("Starting tagcomms demo");

    // Simulated field devices
    let plc = SimPlcLibrary::new();
    plc.set_remote("Conveyor_Speed", ScalarValue::F32(1.25));
    plc.set_remote("Conveyor_Run", ScalarValue::Bit(true));
    plc.set_remote("Parts_Count", ScalarValue::U32(1200));

    let server = SimOpcUaServer::new();
    server.set_node(2, "Oven.Temperature", UaVariant::Double(182.5));
    server.set_node(2, "Oven.Setpoint", UaVariant::Double(180.0));
    server.fail_next_connects(1);

    let libraries = ProtocolLibraries::new(Box::new(plc.clone()), Box::new(server.clone()));
    let (engine, events) = CommsEngine::new(config, libraries).context("Failed to start engine")?;

    engine.register_group("Line1", 100, "ab_eip", "192.168.1.10", "1,0", "ControlLogix");
    for tag in ["Conveyor_Speed", "Conveyor_Run", "Parts_Count"] {
        engine.register_tag("Line1", tag, 1);
    }
    engine.register_group("Oven", 250, "opc_ua", "opc.tcp://oven.local:4840", "2", "");
    for tag in ["Oven.Temperature", "Oven.Setpoint"] {
        engine.register_tag("Oven", tag, 1);
    }
    engine.notify_all_groups_registered();

    let clock = SimFrameClock::new();
    engine.attach_tick_source(Arc::new(clock.clone()));
    clock.set_ready(true);

    engine.set_comms_enabled(true);
    engine.set_simulation_running(true);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut wrote_setpoint = false;
    while Instant::now() < deadline {
        clock.fire(Instant::now());

        for event in events.drain() {
            match event {
                Notification::GroupPolled(_) => {}
                Notification::CommError { message, occurred_at } => {
                    tracing::warn!("Communication error at {}: {}", occurred_at, message)
                }
                other => tracing::info!("{:?}", other),
            }
        }

        if !wrote_setpoint && engine.is_group_initialized("Oven") {
            engine.write_float64("Oven", "Oven.Setpoint", 185.0);
            wrote_setpoint = true;
        }

        std::thread::sleep(FRAME);
    }

    engine.sync(Duration::from_secs(1));
    tracing::info!(
        "Line1: speed={} run={} count={}",
        engine.read_float32("Line1", "Conveyor_Speed"),
        engine.read_bit("Line1", "Conveyor_Run"),
        engine.read_uint32("Line1", "Parts_Count")
    );
    tracing::info!(
        "Oven: temperature={} setpoint={}",
        engine.read_float64("Oven", "Oven.Temperature"),
        engine.read_float64("Oven", "Oven.Setpoint")
    );
    if let Some(error) = engine.comm_error() {
        tracing::info!("{} communication error(s), first: {}", error.count, error.first_message);
    }

    tracing::info!("Shutting down...");
    engine.shutdown();
    Ok(())
}
