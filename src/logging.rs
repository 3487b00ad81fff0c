/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! The replication engine logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ListConflict](crate::events::ListConflictEvent) is printed:
//!
//! ```text
//! ListConflict, 1701329264, AAAAAAA, kq3Gf0Q, 2, 3
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the id of the list. Every
//!   id and version is printed this way.
//! - The fourth value is the first seven characters of the Base64 encoding of the `to` version of the
//!   remote command.
//! - The fifth value is the number of repaired remote commands that were applied.
//! - The sixth value is the number of repaired local commands that were resent.

use std::time::SystemTime;

use log;

use crate::{events::*, types::PeerId};

// Names of each event in PascalCase for printing:
pub const MODEL_READY: &str = "ModelReady";
pub const APPLY_BATCH: &str = "ApplyBatch";

pub const SEND_COMMANDS: &str = "SendCommands";
pub const SNAPSHOT: &str = "Snapshot";

pub const LIST_CONFLICT: &str = "ListConflict";
pub const FILTER_COMMAND: &str = "FilterCommand";

pub const DESYNC: &str = "Desync";
pub const CONSTRUCTION_FAILURE: &str = "ConstructionFailure";

pub const PEER_CONNECTED: &str = "PeerConnected";
pub const PEER_DISCONNECTED: &str = "PeerDisconnected";

pub const FATAL: &str = "Fatal";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ModelReadyEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |model_ready_event: &ModelReadyEvent| {
            log::info!(
                "{}, {}, {}, {}",
                MODEL_READY,
                secs_since_unix_epoch(model_ready_event.timestamp),
                model_ready_event.root_id,
                model_ready_event.root.type_tag()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_batch_event: &ApplyBatchEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                APPLY_BATCH,
                secs_since_unix_epoch(apply_batch_event.timestamp),
                peer_info(apply_batch_event.origin),
                apply_batch_event.commands,
                apply_batch_event.accepted,
                apply_batch_event.errors
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendCommandsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_commands_event: &SendCommandsEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_COMMANDS,
                secs_since_unix_epoch(send_commands_event.timestamp),
                peer_info(send_commands_event.peer),
                send_commands_event.commands
            )
        };
        Box::new(logger)
    }
}

impl Logger for SnapshotEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |snapshot_event: &SnapshotEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SNAPSHOT,
                secs_since_unix_epoch(snapshot_event.timestamp),
                peer_info(snapshot_event.peer),
                snapshot_event.commands
            )
        };
        Box::new(logger)
    }
}

impl Logger for ListConflictEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |list_conflict_event: &ListConflictEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                LIST_CONFLICT,
                secs_since_unix_epoch(list_conflict_event.timestamp),
                list_conflict_event.list_id,
                list_conflict_event.remote_version.to,
                list_conflict_event.applied,
                list_conflict_event.resent
            )
        };
        Box::new(logger)
    }
}

impl Logger for FilterCommandEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |filter_command_event: &FilterCommandEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                FILTER_COMMAND,
                secs_since_unix_epoch(filter_command_event.timestamp),
                filter_command_event.list_id,
                filter_command_event.version.from,
                match filter_command_event.referenced {
                    Some(referenced) => referenced.to_string(),
                    None => String::from("-"),
                }
            )
        };
        Box::new(logger)
    }
}

impl Logger for DesyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |desync_event: &DesyncEvent| {
            log::warn!(
                "{}, {}, {}",
                DESYNC,
                secs_since_unix_epoch(desync_event.timestamp),
                desync_event.error
            )
        };
        Box::new(logger)
    }
}

impl Logger for ConstructionFailureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |construction_failure_event: &ConstructionFailureEvent| {
            log::warn!(
                "{}, {}, {}",
                CONSTRUCTION_FAILURE,
                secs_since_unix_epoch(construction_failure_event.timestamp),
                construction_failure_event.error
            )
        };
        Box::new(logger)
    }
}

impl Logger for PeerConnectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |peer_connected_event: &PeerConnectedEvent| {
            log::info!(
                "{}, {}, {}",
                PEER_CONNECTED,
                secs_since_unix_epoch(peer_connected_event.timestamp),
                peer_connected_event.peer
            )
        };
        Box::new(logger)
    }
}

impl Logger for PeerDisconnectedEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |peer_disconnected_event: &PeerDisconnectedEvent| {
            log::info!(
                "{}, {}, {}",
                PEER_DISCONNECTED,
                secs_since_unix_epoch(peer_disconnected_event.timestamp),
                peer_disconnected_event.peer
            )
        };
        Box::new(logger)
    }
}

impl Logger for FatalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fatal_event: &FatalEvent| {
            log::error!(
                "{}, {}, {}",
                FATAL,
                secs_since_unix_epoch(fatal_event.timestamp),
                fatal_event.error
            )
        };
        Box::new(logger)
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |since_epoch| since_epoch.as_secs())
}

fn peer_info(peer: Option<PeerId>) -> String {
    match peer {
        Some(peer) => peer.to_string(),
        None => String::from("all"),
    }
}
