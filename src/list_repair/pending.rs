/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-list protocol state: the approved version and the pending command log.

use std::collections::VecDeque;

use crate::{commands::ListCommand, types::VersionId};

use super::filter::SupersededVersions;

/// Locally generated list commands that have been sent, but not yet confirmed by the server, in the
/// order they were generated.
///
/// Invariant: the commands form one version chain, i.e., each command's `from` is the previous
/// command's `to`.
#[derive(Clone, Debug, Default)]
pub struct PendingCommandLog(VecDeque<ListCommand>);

impl PendingCommandLog {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn head(&self) -> Option<&ListCommand> {
        self.0.front()
    }

    pub fn tail(&self) -> Option<&ListCommand> {
        self.0.back()
    }

    pub fn push(&mut self, command: ListCommand) {
        self.0.push_back(command)
    }

    pub fn pop_head(&mut self) -> Option<ListCommand> {
        self.0.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListCommand> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ListCommand> {
        self.0.iter_mut()
    }

    /// Replace the whole content of the log.
    pub fn replace(&mut self, commands: Vec<ListCommand>) {
        self.0 = commands.into();
    }

    pub fn to_vec(&self) -> Vec<ListCommand> {
        self.0.iter().cloned().collect()
    }
}

/// Everything the repairer knows about one list.
///
/// Invariant: if the pending log is not empty, its head's `from` is `approved`.
#[derive(Clone, Debug)]
pub struct ListState {
    /// The last version of the list confirmed by the server, or `None` if the list has not seen a
    /// versioned command yet.
    pub approved: Option<VersionId>,
    pub pending: PendingCommandLog,
    pub superseded: SupersededVersions,
}

impl ListState {
    pub fn new(superseded_capacity: usize) -> Self {
        Self {
            approved: None,
            pending: PendingCommandLog::default(),
            superseded: SupersededVersions::new(superseded_capacity),
        }
    }

    /// The version a new local command must start from: the end of the pending log, or the approved
    /// version if nothing is pending.
    pub fn optimistic_head(&self) -> Option<VersionId> {
        self.pending
            .tail()
            .map(|command| command.version().to)
            .or(self.approved)
    }

    /// Move the approved version to `to`, remembering the version it moves past.
    pub fn advance(&mut self, to: VersionId) {
        if let Some(previous) = self.approved.replace(to) {
            self.superseded.insert(previous);
        }
    }
}
