/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a replica emits, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    error::{CommandError, ErrorKind, FatalError},
    model::ObjectRef,
    types::{ListVersion, ObjectId, PeerId},
};

pub enum Event {
    // Events that change the local graph.
    ModelReady(ModelReadyEvent),
    ApplyBatch(ApplyBatchEvent),
    // Events that involve producing or sending commands.
    SendCommands(SendCommandsEvent),
    Snapshot(SnapshotEvent),
    // List protocol events.
    ListConflict(ListConflictEvent),
    FilterCommand(FilterCommandEvent),
    // Non-fatal errors.
    Desync(DesyncEvent),
    ConstructionFailure(ConstructionFailureEvent),
    // Connection events.
    PeerConnected(PeerConnectedEvent),
    PeerDisconnected(PeerDisconnectedEvent),
    // The engine stopped.
    Fatal(FatalEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away while the replica is shutting down.
            let _ = event_publisher.send(event);
        }
    }

    /// Wrap a per-command error in the event of its kind.
    pub(crate) fn from_command_error(error: CommandError) -> Event {
        let timestamp = SystemTime::now();
        match error.kind() {
            ErrorKind::Desync => Event::Desync(DesyncEvent { timestamp, error }),
            ErrorKind::Construction => {
                Event::ConstructionFailure(ConstructionFailureEvent { timestamp, error })
            }
        }
    }
}

/// The first complete snapshot was applied, and `root` is now the root of the local graph.
pub struct ModelReadyEvent {
    pub timestamp: SystemTime,
    pub root_id: ObjectId,
    pub root: ObjectRef,
}

pub struct ApplyBatchEvent {
    pub timestamp: SystemTime,
    pub origin: Option<PeerId>,
    pub commands: usize,
    pub accepted: usize,
    pub errors: usize,
}

/// `peer` is `None` when the commands went to every synchronized peer.
pub struct SendCommandsEvent {
    pub timestamp: SystemTime,
    pub peer: Option<PeerId>,
    pub commands: usize,
}

pub struct SnapshotEvent {
    pub timestamp: SystemTime,
    pub peer: Option<PeerId>,
    pub commands: usize,
}

/// A remote list command conflicted with pending local edits, and both were repaired.
pub struct ListConflictEvent {
    pub timestamp: SystemTime,
    pub list_id: ObjectId,
    pub remote_version: ListVersion,
    pub applied: usize,
    pub resent: usize,
}

/// A stale list command was dropped.
pub struct FilterCommandEvent {
    pub timestamp: SystemTime,
    pub list_id: ObjectId,
    pub version: ListVersion,
    pub referenced: Option<ObjectId>,
}

pub struct DesyncEvent {
    pub timestamp: SystemTime,
    pub error: CommandError,
}

pub struct ConstructionFailureEvent {
    pub timestamp: SystemTime,
    pub error: CommandError,
}

pub struct PeerConnectedEvent {
    pub timestamp: SystemTime,
    pub peer: PeerId,
}

pub struct PeerDisconnectedEvent {
    pub timestamp: SystemTime,
    pub peer: PeerId,
}

pub struct FatalEvent {
    pub timestamp: SystemTime,
    pub error: FatalError,
}
