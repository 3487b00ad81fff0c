/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Optimistic concurrency for replicated lists.
//!
//! Any peer may edit a shared list at any time without waiting for the server. The server decides the
//! order in which concurrent edits take effect; a client whose edits lost the race rebases them onto
//! the server's order and resends them.
//!
//! ## Versions
//!
//! Each list carries an *approved version*: the last state of the list the server confirmed. Every list
//! command is stamped with a [`ListVersion`] `(from, to)`, and may only be applied to a list whose
//! approved version is `from`.
//!
//! ## Local edits
//!
//! A local edit is stamped by [`ListConflictRepairer::stamp_local`] with `from` set to the list's
//! optimistic head: the `to` of the last pending command, or the approved version if nothing is
//! pending.
//! - On the server, the edit is authoritative immediately, and the approved version moves to its `to`.
//! - On a client, the edit is appended to the list's [`PendingCommandLog`] until the server echoes it
//!   back.
//!
//! ## Incoming commands
//!
//! [`ListConflictRepairer::receive`] processes an incoming list command in the following order:
//! 1. **Filter**: if the command's `from` is not the approved version, but is a version the list has
//!    moved past, the command is stale. It is dropped, and its `to` is remembered as superseded too.
//!    Any other version mismatch means the peers have desynchronized.
//! 2. **Apply**: if nothing is pending, the command is applied, and the approved version moves to its
//!    `to`. A list with no approved version accepts any command.
//! 3. **Echo**: if the command equals the head of the pending log, it is the server confirming this
//!    peer's own edit. It is popped off the log without being applied again.
//! 4. **Repair**: otherwise the server accepted another peer's edit ahead of this peer's pending edits.
//!    1. The remote command and the pending log are [index-repaired](index) against each other.
//!    2. The pending log is [version-repaired](version) into a fresh chain anchored at the remote
//!       command's `to`.
//!    3. The repaired remote commands are applied, all at once. If none remain, a zero-effect remove
//!       carries the version forward instead.
//!    4. Only once they are applied do the repaired log and the remote command's `to` replace the
//!       list's state. The whole repaired log is returned to be resent.
//!
//! If applying fails, the list's state is left exactly as it was before the command arrived.
//!
//! All of the above happens while holding the list's lease, which is also held while a local edit is
//! applied and stamped. Different lists are processed concurrently.

pub mod filter;

pub mod index;

pub mod pending;

pub mod version;

use std::{collections::HashMap, sync::Arc};

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::{
    commands::{Command, ListCommand},
    error::{CommandError, FatalError},
    types::{ListVersion, ObjectId, Role, VersionId},
};

pub use self::pending::{ListState, PendingCommandLog};
use self::version::{chain_between, chain_ending_at, rechain};

/// Exclusive access to the protocol state of one list.
pub type ListLease = ArcMutexGuard<RawMutex, ListState>;

/// What [`ListConflictRepairer::receive`] did with a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    /// The command was applied as the next authoritative edit of the list.
    Applied,
    /// The command confirmed the head of the pending log.
    Echo,
    /// The command was stale and was dropped.
    Filtered { referenced: Option<ObjectId> },
    /// The command conflicted with pending local edits. `applied` are the repaired remote commands that
    /// were applied; `resend` is the repaired pending log.
    Repaired {
        applied: Vec<ListCommand>,
        resend: Vec<ListCommand>,
    },
}

pub struct ListConflictRepairer {
    role: Role,
    superseded_capacity: usize,
    lists: Mutex<HashMap<ObjectId, Arc<Mutex<ListState>>>>,
}

impl ListConflictRepairer {
    pub fn new(role: Role, superseded_capacity: usize) -> Self {
        Self {
            role,
            superseded_capacity,
            lists: Mutex::new(HashMap::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Block until no one else holds the lease of `list_id`, then take it.
    pub fn lease(&self, list_id: ObjectId) -> ListLease {
        let state = self
            .lists
            .lock()
            .entry(list_id)
            .or_insert_with(|| Arc::new(Mutex::new(ListState::new(self.superseded_capacity))))
            .clone();
        state.lock_arc()
    }

    /// Stamp a locally generated `command` with the next version of the list, and record it.
    pub fn stamp_local(&self, state: &mut ListState, command: &mut ListCommand) {
        let from = match state.optimistic_head() {
            Some(head) => head,
            None => *state.approved.insert(VersionId::random()),
        };
        let version = ListVersion::successor_of(from);
        command.set_version(version);
        match self.role {
            Role::Server => state.advance(version.to),
            Role::Client => state.pending.push(command.clone()),
        }
    }

    /// `count` chained versions that bring a list with no version to the current version of the list
    /// in `state`. At least one version is returned.
    pub fn snapshot_versions(&self, state: &mut ListState, count: usize) -> Vec<ListVersion> {
        let end = match state.optimistic_head() {
            Some(head) => head,
            None => *state.approved.insert(VersionId::random()),
        };
        chain_ending_at(end, count.max(1))
    }

    /// Process an incoming list command, calling `apply` once with the commands that must be applied to
    /// the local list. `apply` must apply either all of them or none.
    ///
    /// Returns an error in the outer `Result` only if `command` is not a list command at all.
    pub fn receive(
        &self,
        command: Command,
        apply: impl FnOnce(&[ListCommand]) -> Result<(), CommandError>,
    ) -> Result<Result<Received, CommandError>, FatalError> {
        let command = ListCommand::try_from_command(command).map_err(|other| {
            FatalError::RepairInvariant(format!("{} reached list repair", other.name()))
        })?;
        let mut state = self.lease(command.list_id());
        Ok(self.receive_leased(&mut state, command, apply))
    }

    /// Like [`receive`](Self::receive), for a caller that already holds the list's lease.
    pub fn receive_leased(
        &self,
        state: &mut ListState,
        command: ListCommand,
        apply: impl FnOnce(&[ListCommand]) -> Result<(), CommandError>,
    ) -> Result<Received, CommandError> {
        let version = command.version();

        if let Some(approved) = state.approved {
            if version.from != approved {
                if state.superseded.contains(&version.from) {
                    state.superseded.insert(version.to);
                    return Ok(Received::Filtered {
                        referenced: command.referenced_object(),
                    });
                }
                return Err(CommandError::StaleVersion {
                    list_id: command.list_id(),
                    expected: version.from,
                    current: Some(approved),
                });
            }
        }

        if state.pending.is_empty() {
            apply(std::slice::from_ref(&command))?;
            state.advance(version.to);
            return Ok(Received::Applied);
        }

        if state.pending.head() == Some(&command) {
            state.pending.pop_head();
            state.advance(version.to);
            return Ok(Received::Echo);
        }

        let pending = state.pending.to_vec();
        let (mut remote, mut local) =
            index::transform(std::slice::from_ref(&command), &pending);

        rechain(local.iter_mut(), version.to);

        if remote.is_empty() {
            remote.push(ListCommand::version_carrier(command.list_id(), version));
        }
        let versions = chain_between(version.from, version.to, remote.len());
        for (piece, piece_version) in remote.iter_mut().zip(versions) {
            piece.set_version(piece_version);
        }

        apply(&remote)?;
        state.pending.replace(local.clone());
        state.advance(version.to);

        Ok(Received::Repaired {
            applied: remote,
            resend: local,
        })
    }

    /// The approved version of `list_id`, if it has one.
    pub fn approved(&self, list_id: ObjectId) -> Option<VersionId> {
        self.lease(list_id).approved
    }

    /// A copy of the pending log of `list_id`.
    pub fn pending(&self, list_id: ObjectId) -> Vec<ListCommand> {
        self.lease(list_id).pending.to_vec()
    }

    /// Whether any list has pending local edits.
    pub fn has_pending(&self) -> bool {
        let lists: Vec<Arc<Mutex<ListState>>> = self.lists.lock().values().cloned().collect();
        lists.iter().any(|state| !state.lock().pending.is_empty())
    }

    /// Forget the state of every list for which `keep` returns `false`.
    pub fn retain(&self, keep: impl Fn(&ObjectId) -> bool) {
        self.lists.lock().retain(|list_id, _| keep(list_id));
    }
}
