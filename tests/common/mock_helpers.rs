//! Helpers for inspecting the simulators and the notification channel

use tagcomms_rs::backend::sim::{SimOpcUaServer, SimPlcLibrary, SimPlcOp, SimUaOp};
use tagcomms_rs::Notification;

/// Messages of every `CommError` in `notifications`
pub fn comm_errors(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::CommError { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Group names of every `GroupPolled` in `notifications`
pub fn polled_groups(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::GroupPolled(group) => Some(group.clone()),
            _ => None,
        })
        .collect()
}

/// Group names of every `GroupInitialized` in `notifications`
pub fn initialized_groups(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::GroupInitialized(group) => Some(group.clone()),
            _ => None,
        })
        .collect()
}

/// Remote writes the simulated PLC saw for `tag`
pub fn plc_writes(plc: &SimPlcLibrary, tag: &str) -> usize {
    plc.count_ops(|op| matches!(op, SimPlcOp::Write(t) if t == tag))
}

/// Remote reads the simulated PLC saw for `tag`
pub fn plc_reads(plc: &SimPlcLibrary, tag: &str) -> usize {
    plc.count_ops(|op| matches!(op, SimPlcOp::Read(t) if t == tag))
}

/// Connection attempts the simulated OPC UA server saw
pub fn ua_connects(server: &SimOpcUaServer) -> usize {
    server.count_ops(|op| matches!(op, SimUaOp::Connect(_)))
}

/// Remote writes the simulated OPC UA server saw
pub fn ua_writes(server: &SimOpcUaServer) -> usize {
    server.count_ops(|op| matches!(op, SimUaOp::Write(_)))
}
