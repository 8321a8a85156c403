//! # tagcomms-rs: Tag Group Communication Engine
//!
//! Keeps named scalar "tags" in sync between a host application and live
//! industrial endpoints: PLCs reached through a request/response tag-handle
//! library, and OPC UA servers reached through a session-based client.
//!
//! ## Architecture
//!
//! - **Engine**: [`CommsEngine`] owns a worker thread and exposes typed reads
//!   and writes, registration, and the runtime gates
//! - **Scheduler**: driven by the host's frame tick, it enqueues per-group
//!   poll tickets at each group's own cadence
//! - **Worker**: the only thread touching native handles and sessions; it
//!   flushes pending writes before every read pass
//! - **Backends**: one per protocol, behind the [`backend::PlcLibrary`] and
//!   [`backend::OpcUaConnector`] traits
//! - **Communication**: a blocking ticket queue towards the worker and a
//!   crossbeam channel of [`Notification`]s towards the host
//!
//! ## Configuration
//!
//! [`EngineConfig`] is loaded from TOML or JSON; the per-user location is
//! given by [`config::default_config_path`].
//!
//! ## Example
//!
//! ```ignore
//! use tagcomms_rs::backend::sim::{SimFrameClock, SimOpcUaServer, SimPlcLibrary};
//! use tagcomms_rs::backend::ProtocolLibraries;
//! use tagcomms_rs::{CommsEngine, EngineConfig};
//! use std::sync::Arc;
//!
//! let libraries = ProtocolLibraries::new(
//!     Box::new(SimPlcLibrary::new()),
//!     Box::new(SimOpcUaServer::new()),
//! );
//! let (engine, events) = CommsEngine::new(EngineConfig::default(), libraries)?;
//!
//! engine.register_group("Press", 250, "opc_ua", "opc.tcp://press:4840", "2", "");
//! engine.register_tag("Press", "Pressure", 1);
//! engine.notify_all_groups_registered();
//!
//! let clock = SimFrameClock::new();
//! engine.attach_tick_source(Arc::new(clock.clone()));
//! engine.set_comms_enabled(true);
//! engine.set_simulation_running(true);
//!
//! for event in events.drain() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod queue;
pub mod types;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{CommsEngine, EventReceiver, LatchedError, Notification};
pub use error::{CommsError, Result};
pub use types::{DynamicValue, GroupSpec, Protocol, Scalar, ScalarKind, ScalarValue};
