/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The filter stage in front of the repairer.
//!
//! A list command whose `from` version is a version the list has already moved past was generated by
//! a peer that had not yet seen a command the server accepted since. That peer will receive the
//! accepted command, repair its pending log, and resend it, so the stale command is simply dropped.
//!
//! Once a stale command is dropped, every command the same peer chained onto it is stale too. So the
//! `to` version of a dropped command is itself remembered as superseded.

use std::collections::{HashSet, VecDeque};

use crate::types::VersionId;

/// Bounded set of versions a list has moved past. When full, the oldest version is forgotten first.
#[derive(Clone, Debug)]
pub struct SupersededVersions {
    order: VecDeque<VersionId>,
    members: HashSet<VersionId>,
    capacity: usize,
}

impl SupersededVersions {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, version: VersionId) {
        if self.capacity == 0 || !self.members.insert(version) {
            return;
        }
        self.order.push_back(version);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, version: &VersionId) -> bool {
        self.members.contains(version)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
