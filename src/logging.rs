//! Logging setup and the runtime log gate
//!
//! All diagnostics go through `tracing`. Engine chatter (unknown groups,
//! protocol failures, discarded writes) additionally passes through a
//! [`LogGate`] that the host can flip at runtime with
//! `CommsEngine::set_logging_enabled`, independently of the subscriber's
//! filter. Use [`comms_log!`](crate::comms_log) for gated output.

use crate::config::EngineConfig;
use crate::error::{CommsError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,tagcomms_rs=debug";

/// Runtime switch for engine log output
#[derive(Debug)]
pub struct LogGate(AtomicBool);

impl LogGate {
    pub fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

impl Default for LogGate {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Emit a `tracing` event only while the given [`LogGate`] is open
///
/// ```ignore
/// comms_log!(gate, warn, "Tag group [{}] does not exist", name);
/// ```
#[macro_export]
macro_rules! comms_log {
    ($gate:expr, $level:ident, $($arg:tt)+) => {
        if $gate.is_enabled() {
            ::tracing::$level!($($arg)+);
        }
    };
}

/// Install the global subscriber
///
/// Logs go to stdout; when `config.log_dir` is set they are also written to a
/// daily rolling file there. The returned guard must be kept alive for the
/// file writer to flush.
pub fn init_tracing(config: &EngineConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tagcomms.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| CommsError::Config(format!("Failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}
