/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Change listeners: the observers the engine installs on every slot of every reachable object.
//!
//! A listener turns each local mutation into delta commands and hands them to the engine's outbox. For
//! every mutation it, in order:
//! 1. Acquires a [`LocalChange`](OperationClass::LocalChange) permit from the walk synchronizer, so
//!    that the mutation happens either entirely before or entirely after any concurrent snapshot.
//! 2. Takes the slot's lease, so that the mutation and its commands are ordered consistently with
//!    commands for the same slot arriving from peers.
//! 3. Performs the mutation, generates the delta, and stamps its list commands.
//! 4. Installs listeners on every object the mutation made reachable.
//! 5. Enqueues the commands.
//!
//! ## Suppression
//!
//! While the executor applies a remote command to an object, listeners of that object are
//! [suppressed](Suppression) on the executor's thread: the mutation happens, but produces no commands.
//! Suppression is scoped to an (object, thread) pair, so the application can keep editing other
//! objects, or the same object from another thread, while a batch is being applied.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::{
    commands::ListCommand,
    engine::{EngineCore, Outgoing},
    generator::CommandGenerator,
    model::{Element, ObjectKey, ObjectRef, SlotChange, SlotHandle, SlotObserver},
    synchronizer::OperationClass,
    walker::{Descend, GraphWalker, Visitor},
};

/// The set of (object, thread) pairs whose listeners are currently silenced.
#[derive(Default)]
pub struct Suppression {
    suppressed: Mutex<HashMap<(ObjectKey, ThreadId), usize>>,
}

/// Keeps an object's listeners silenced on the current thread until dropped.
pub struct SuppressionGuard<'a> {
    suppression: &'a Suppression,
    object: ObjectKey,
}

impl Suppression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silence the listeners of `object` on the current thread. Calls nest.
    pub fn disable_for(&self, object: ObjectKey) {
        *self
            .suppressed
            .lock()
            .entry((object, thread::current().id()))
            .or_insert(0) += 1;
    }

    /// Undo one call to [`disable_for`](Self::disable_for).
    pub fn enable_for(&self, object: ObjectKey) {
        let mut suppressed = self.suppressed.lock();
        let key = (object, thread::current().id());
        if let Some(depth) = suppressed.get_mut(&key) {
            *depth -= 1;
            if *depth == 0 {
                suppressed.remove(&key);
            }
        }
    }

    /// Silence `object` until the returned guard is dropped.
    pub fn suppress(&self, object: ObjectKey) -> SuppressionGuard<'_> {
        self.disable_for(object);
        SuppressionGuard {
            suppression: self,
            object,
        }
    }

    pub fn is_suppressed(&self, object: ObjectKey) -> bool {
        self.suppressed
            .lock()
            .contains_key(&(object, thread::current().id()))
    }
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.suppression.enable_for(self.object);
    }
}

/// The observer installed on every slot of one object.
pub(crate) struct SlotListener {
    core: Weak<EngineCore>,
    owner: ObjectKey,
}

impl SlotObserver for SlotListener {
    fn observe(&self, slot: &SlotHandle, mutation: &mut dyn FnMut() -> Option<SlotChange>) {
        let Some(core) = self.core.upgrade() else {
            mutation();
            return;
        };
        if core.suppression.is_suppressed(self.owner) || core.is_halted() {
            mutation();
            return;
        }

        let _permit = core.synchronizer.acquire(OperationClass::LocalChange);
        let slot_id = match core.registry.id_of_slot(slot) {
            Some(slot_id) => slot_id,
            None => core.registry.assign_slot(slot, self.owner),
        };
        let mut lease = core.repairer.lease(slot_id);

        let Some(change) = mutation() else {
            return;
        };

        let generator = CommandGenerator::new(&core.registry, &core.catalog, &core.repairer);
        let mut commands = generator.delta(slot, slot_id, &change);
        for command in commands.iter_mut().filter(|command| command.is_list_command()) {
            let Ok(mut list_command) = ListCommand::try_from_command(command.clone()) else {
                continue;
            };
            if list_command.list_id() == slot_id {
                core.repairer.stamp_local(&mut lease, &mut list_command);
            } else {
                // A list of an object this change created.
                let mut other = core.repairer.lease(list_command.list_id());
                core.repairer.stamp_local(&mut other, &mut list_command);
            }
            *command = list_command.into_command();
        }

        let reachable: Vec<ObjectRef> = change_elements(&change)
            .filter_map(|element| element.as_object().cloned())
            .collect();
        install(&core, &reachable);

        core.enqueue(Outgoing::Local(commands));
        drop(lease);
        core.purge_if_due();
    }
}

/// Install listeners on every slot reachable from `roots` that does not have one yet.
pub(crate) fn install(core: &Arc<EngineCore>, roots: &[ObjectRef]) {
    let mut walker = GraphWalker::new(&core.catalog);
    let mut visitor = InstallVisitor {
        core: Arc::downgrade(core),
    };
    for root in roots {
        walker.walk(root, &mut visitor);
    }
}

/// Install listeners on the slots of `object` only.
pub(crate) fn install_on(core: &Arc<EngineCore>, object: &ObjectRef) {
    let observer: Arc<dyn SlotObserver> = Arc::new(SlotListener {
        core: Arc::downgrade(core),
        owner: ObjectKey::of(object),
    });
    for (_, slot) in object.slots() {
        slot.install_observer(observer.clone());
    }
}

struct InstallVisitor {
    core: Weak<EngineCore>,
}

impl Visitor for InstallVisitor {
    fn object_start(&mut self, _object: &ObjectRef, is_leaf: bool) -> bool {
        !is_leaf
    }

    /// Descend only into slots that were not observed yet: the objects held by an observed slot were
    /// given listeners when they became reachable.
    fn visit_slot(&mut self, owner: &ObjectRef, _name: &'static str, slot: &SlotHandle) -> Descend {
        let observer: Arc<dyn SlotObserver> = Arc::new(SlotListener {
            core: self.core.clone(),
            owner: ObjectKey::of(owner),
        });
        if slot.install_observer(observer) {
            Descend::Yes
        } else {
            Descend::No
        }
    }
}

fn change_elements(change: &SlotChange) -> impl Iterator<Item = &Element> {
    let elements: Vec<&Element> = match change {
        SlotChange::ValueSet { new } => new.iter().collect(),
        SlotChange::ListAdded { elements, .. } => elements.iter().collect(),
        SlotChange::ListReplaced { element, .. } | SlotChange::SetAdded(element) => vec![element],
        SlotChange::MapPut { key, value } => vec![key, value],
        SlotChange::ListRemoved { .. } | SlotChange::SetRemoved(_) | SlotChange::MapRemoved { .. } => {
            Vec::new()
        }
    };
    elements.into_iter()
}
