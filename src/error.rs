/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Error types of the replication engine.
//!
//! | Error | Fatal | Raised when |
//! |-------|-------|-------------|
//! | [`CommandError`] | No | A single incoming command cannot be applied. The command is dropped, the error is reported, and the rest of the batch still executes. |
//! | [`FatalError`] | Yes | An internal invariant of the engine is violated. Processing of the current batch stops, and the engine halts. |
//! | [`SlotError`] | No | The host application called a slot method with invalid arguments. |
//! | [`CodecError`] | No | A command batch could not be encoded, or a byte sequence could not be decoded into commands. |
//!
//! Per-command errors are grouped into two [`ErrorKind`]s when they are reported to the host
//! application: protocol desynchronization between peers, and failure to construct an object locally.

use thiserror::Error;

use crate::types::{ObjectId, VersionId};

/// Coarse category of a non-fatal error, as reported through
/// [`on_error`](crate::replica::ReplicaSpec).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peers disagree about the state of the graph: an unknown id, an unknown slot name, or a list
    /// version that neither the pending log nor the stale filter can explain.
    Desync,
    /// An object of the requested type could not be instantiated locally.
    Construction,
}

/// Why a single incoming command was dropped.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown object id {id}")]
    UnknownObject { id: ObjectId },

    #[error("unknown slot id {id}")]
    UnknownSlot { id: ObjectId },

    #[error("slot {id} is a {actual} slot, but {command} expects a {expected} slot")]
    SlotKindMismatch {
        id: ObjectId,
        command: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// The sending peer declared a slot that the local definition of the type does not have. This
    /// usually means the two peers run different versions of the type.
    #[error("type {type_tag} has no slot named {slot_name}")]
    UnknownSlotName { type_tag: String, slot_name: String },

    #[error("no constructor is registered for type {type_tag}")]
    UnknownType { type_tag: String },

    #[error("list {list_id} is at version {current:?}, but the command expects {expected}")]
    StaleVersion {
        list_id: ObjectId,
        expected: VersionId,
        current: Option<VersionId>,
    },

    #[error("{command} on slot {id} is out of bounds: {detail}")]
    IndexOutOfBounds {
        id: ObjectId,
        command: &'static str,
        detail: String,
    },

    #[error("SetRoot references unknown object {id}")]
    MissingRoot { id: ObjectId },
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::UnknownType { .. } => ErrorKind::Construction,
            _ => ErrorKind::Desync,
        }
    }
}

/// A programming error inside the engine. Not recoverable: the engine stops processing commands once
/// one has been raised.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FatalError {
    #[error("list repair invariant violated: {0}")]
    RepairInvariant(String),

    #[error("the engine was halted by an earlier fatal error")]
    EngineHalted,
}

/// Errors returned by the host-facing slot methods.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SlotError {
    #[error("index {index} is out of bounds for a list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("range {start}..{end} is out of bounds for a list of length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    /// The observer of the slot started the mutation but did not let it finish.
    #[error("the slot's observer interrupted the mutation")]
    Interrupted,
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("could not encode command batch: {0}")]
    Encode(std::io::Error),

    #[error("could not decode command batch: {0}")]
    Decode(std::io::Error),
}
