//! Test data builders for creating engines wired to the simulators

use tagcomms_rs::backend::sim::{SimOpcUaServer, SimPlcLibrary};
use tagcomms_rs::backend::ProtocolLibraries;
use tagcomms_rs::{CommsEngine, EngineConfig, EventReceiver};

pub const PLC_GATEWAY: &str = "192.168.1.10";
pub const UA_ENDPOINT: &str = "opc.tcp://localhost:4840";

/// Engine plus handles to the simulated devices behind it
pub struct TestEngine {
    pub engine: CommsEngine,
    pub events: EventReceiver,
    pub plc: SimPlcLibrary,
    pub opcua: SimOpcUaServer,
}

impl TestEngine {
    /// Wait for the worker to handle every ticket queued so far
    pub fn sync(&self) {
        assert!(
            self.engine.sync(super::test_timeout()),
            "worker did not catch up in time"
        );
    }

    /// Advance the scheduler, then wait for the passes it queued
    pub fn advance(&self, delta_ms: f64) {
        self.engine.advance(delta_ms);
        self.sync();
    }
}

struct GroupDef {
    name: String,
    interval_ms: u64,
    protocol: &'static str,
    gateway: &'static str,
    path: String,
    tags: Vec<String>,
}

/// Builder for creating test engines
pub struct EngineBuilder {
    config: EngineConfig,
    groups: Vec<GroupDef>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                timeout_ms: 100,
                startup_grace_ms: 0,
                watchdog_interval_ms: 10,
                ..Default::default()
            },
            groups: Vec::new(),
        }
    }

    /// Open the comms and simulation gates from the start
    pub fn active(mut self) -> Self {
        self.config.comms_enabled = true;
        self.config.simulation_running = true;
        self
    }

    pub fn grace_ms(mut self, grace_ms: u64) -> Self {
        self.config.startup_grace_ms = grace_ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn plc_group(mut self, name: &str, interval_ms: u64, tags: &[&str]) -> Self {
        self.groups.push(GroupDef {
            name: name.to_string(),
            interval_ms,
            protocol: "ab_eip",
            gateway: PLC_GATEWAY,
            path: "1,0".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn opcua_group(mut self, name: &str, interval_ms: u64, namespace: u16, tags: &[&str]) -> Self {
        self.groups.push(GroupDef {
            name: name.to_string(),
            interval_ms,
            protocol: "opc_ua",
            gateway: UA_ENDPOINT,
            path: namespace.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> TestEngine {
        let plc = SimPlcLibrary::new();
        let opcua = SimOpcUaServer::new();
        let libraries = ProtocolLibraries::new(Box::new(plc.clone()), Box::new(opcua.clone()));
        let (engine, events) = CommsEngine::new(self.config, libraries).expect("engine starts");

        for group in &self.groups {
            engine.register_group(
                &group.name,
                group.interval_ms,
                group.protocol,
                group.gateway,
                &group.path,
                "ControlLogix",
            );
            for tag in &group.tags {
                assert!(engine.register_tag(&group.name, tag, 1));
            }
        }

        TestEngine {
            engine,
            events,
            plc,
            opcua,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_builder() {
        let test = EngineBuilder::new()
            .plc_group("G1", 100, &["A", "B"])
            .opcua_group("G2", 200, 2, &["C"])
            .build();

        assert_eq!(test.engine.group_names(), vec!["G1".to_string(), "G2".to_string()]);
        assert!(!test.engine.comms_enabled());
        assert!(!test.engine.simulation_running());
    }
}
