/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Turns a whole graph, or a single local slot change, into commands.
//!
//! ## Snapshots
//!
//! [`CommandGenerator::snapshot`] walks the graph from its root and emits, for every reachable object,
//! a `CreateObject` followed (once the objects it holds have been created) by the commands that fill
//! each of its slots. The sequence ends with `SetRoot` and `ClearReferences`.
//!
//! Every list is replayed as a chain of `AddToList` commands whose last version is the list's current
//! version, so that the receiving list ends up in the same protocol state as the sending one. An empty
//! list is replayed as a single zero-effect remove that carries the version.
//!
//! ## Deltas
//!
//! [`CommandGenerator::delta`] turns one [`SlotChange`] into the command that replays it, preceded by
//! the creation of every object the change makes reachable that has never been replicated. An object
//! that already has an id is only ever referenced by that id. A delta that creates objects ends with
//! `ClearReferences`.
//!
//! List commands in a delta are left [unstamped](ListVersion::UNSTAMPED); the caller stamps them under
//! the respective list leases.

use crate::{
    commands::{
        AddToList, AddToSet, Command, CreateObject, ListCommand, PutToMap, RemoveFromList,
        RemoveFromMap, RemoveFromSet, ReplaceInList, SetRoot, SetValue,
    },
    list_repair::ListConflictRepairer,
    model::{Element, ObjectKey, ObjectRef, SlotChange, SlotHandle},
    registry::ObjectRegistry,
    types::{ListVersion, ObjectId, Value},
    walker::{Descend, GraphWalker, TypeCatalog, Visitor},
};

pub(crate) struct CommandGenerator<'a> {
    registry: &'a ObjectRegistry,
    catalog: &'a TypeCatalog,
    repairer: &'a ListConflictRepairer,
}

impl<'a> CommandGenerator<'a> {
    pub(crate) fn new(
        registry: &'a ObjectRegistry,
        catalog: &'a TypeCatalog,
        repairer: &'a ListConflictRepairer,
    ) -> Self {
        Self {
            registry,
            catalog,
            repairer,
        }
    }

    /// The full replay sequence for the graph rooted at `root`.
    pub(crate) fn snapshot(&self, root: &ObjectRef) -> Vec<Command> {
        let mut visitor = CreationVisitor::new(self.registry, self.repairer, Mode::Snapshot);
        GraphWalker::new(self.catalog).walk(root, &mut visitor);

        let mut commands = visitor.commands;
        let (root_id, _) = self.registry.assign(root);
        commands.push(Command::SetRoot(SetRoot { id: root_id }));
        commands.push(Command::ClearReferences);
        commands
    }

    /// The commands that replay `change`, which was just made to `slot`.
    pub(crate) fn delta(
        &self,
        slot: &SlotHandle,
        slot_id: ObjectId,
        change: &SlotChange,
    ) -> Vec<Command> {
        let new_elements: Vec<&Element> = match change {
            SlotChange::ValueSet { new } => new.iter().collect(),
            SlotChange::ListAdded { elements, .. } => elements.iter().collect(),
            SlotChange::ListReplaced { element, .. } | SlotChange::SetAdded(element) => {
                vec![element]
            }
            SlotChange::MapPut { key, value } => vec![key, value],
            SlotChange::ListRemoved { .. }
            | SlotChange::SetRemoved(_)
            | SlotChange::MapRemoved { .. } => Vec::new(),
        };

        let mut visitor = CreationVisitor::new(self.registry, self.repairer, Mode::Delta);
        let mut walker = GraphWalker::new(self.catalog);
        for object in new_elements.iter().filter_map(|element| element.as_object()) {
            walker.walk(object, &mut visitor);
        }
        let mut commands = visitor.commands;
        let created_objects = commands
            .iter()
            .any(|command| matches!(command, Command::CreateObject(_)));

        match (slot, change) {
            (SlotHandle::Value(_), SlotChange::ValueSet { new }) => {
                commands.push(Command::SetValue(SetValue {
                    slot_id,
                    value: new.as_ref().map(|element| self.value_of(element)),
                }));
            }
            (SlotHandle::List(_), SlotChange::ListAdded { index, elements }) => {
                commands.extend(elements.iter().enumerate().map(|(offset, element)| {
                    Command::AddToList(AddToList {
                        list_id: slot_id,
                        version: ListVersion::UNSTAMPED,
                        value: self.value_of(element),
                        position: (index + offset) as u32,
                    })
                }));
            }
            (SlotHandle::List(_), SlotChange::ListRemoved { start, count }) => {
                commands.push(Command::RemoveFromList(RemoveFromList {
                    list_id: slot_id,
                    version: ListVersion::UNSTAMPED,
                    start_position: *start as u32,
                    count: *count as u32,
                }));
            }
            (SlotHandle::List(_), SlotChange::ListReplaced { index, element }) => {
                commands.push(Command::ReplaceInList(ReplaceInList {
                    list_id: slot_id,
                    version: ListVersion::UNSTAMPED,
                    value: self.value_of(element),
                    position: *index as u32,
                }));
            }
            (SlotHandle::Set(_), SlotChange::SetAdded(element)) => {
                commands.push(Command::AddToSet(AddToSet {
                    set_id: slot_id,
                    value: self.value_of(element),
                }));
            }
            (SlotHandle::Set(_), SlotChange::SetRemoved(element)) => {
                commands.push(Command::RemoveFromSet(RemoveFromSet {
                    set_id: slot_id,
                    value: self.value_of(element),
                }));
            }
            (SlotHandle::Map(_), SlotChange::MapPut { key, value }) => {
                commands.push(Command::PutToMap(PutToMap {
                    map_id: slot_id,
                    key: self.value_of(key),
                    value: self.value_of(value),
                }));
            }
            (SlotHandle::Map(_), SlotChange::MapRemoved { key }) => {
                commands.push(Command::RemoveFromMap(RemoveFromMap {
                    map_id: slot_id,
                    key: self.value_of(key),
                }));
            }
            (slot, change) => {
                log::warn!(
                    "ignoring a {:?} reported by a {} slot",
                    change,
                    slot.kind().name()
                );
            }
        }

        if created_objects {
            commands.push(Command::ClearReferences);
        }

        // Keep every referenced object alive until the receiving peers have had a chance to use it.
        for command in &commands {
            for id in command.referenced_objects() {
                self.registry.pin_for_grace_period(&id);
            }
        }
        commands
    }

    fn value_of(&self, element: &Element) -> Value {
        value_of(self.registry, element)
    }
}

fn value_of(registry: &ObjectRegistry, element: &Element) -> Value {
    match element {
        Element::Simple(simple) => Value::Simple(simple.clone()),
        Element::Object(object) => Value::Reference(registry.assign(object).0),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Create every reachable object.
    Snapshot,
    /// Create only the reachable objects that have never been replicated.
    Delta,
}

struct CreationVisitor<'a> {
    registry: &'a ObjectRegistry,
    repairer: &'a ListConflictRepairer,
    mode: Mode,
    commands: Vec<Command>,
}

impl<'a> CreationVisitor<'a> {
    fn new(registry: &'a ObjectRegistry, repairer: &'a ListConflictRepairer, mode: Mode) -> Self {
        Self {
            registry,
            repairer,
            mode,
            commands: Vec::new(),
        }
    }

    fn list_content(&mut self, list_id: ObjectId, elements: &[Element]) {
        let versions = match self.mode {
            Mode::Snapshot => {
                let mut lease = self.repairer.lease(list_id);
                self.repairer.snapshot_versions(&mut lease, elements.len())
            }
            Mode::Delta if elements.is_empty() => return,
            Mode::Delta => vec![ListVersion::UNSTAMPED; elements.len()],
        };

        if elements.is_empty() {
            self.commands.extend(
                versions
                    .into_iter()
                    .map(|version| ListCommand::version_carrier(list_id, version).into_command()),
            );
            return;
        }

        for (position, (element, version)) in elements.iter().zip(versions).enumerate() {
            self.commands.push(Command::AddToList(AddToList {
                list_id,
                version,
                value: value_of(self.registry, element),
                position: position as u32,
            }));
        }
    }
}

impl Visitor for CreationVisitor<'_> {
    fn object_start(&mut self, object: &ObjectRef, is_leaf: bool) -> bool {
        let (id, fresh) = self.registry.assign(object);
        if self.mode == Mode::Delta && !fresh {
            return false;
        }

        let owner = ObjectKey::of(object);
        let slot_ids = if is_leaf {
            Vec::new()
        } else {
            object
                .slots()
                .iter()
                .map(|(name, slot)| (name.to_string(), self.registry.assign_slot(slot, owner)))
                .collect()
        };
        self.commands.push(Command::CreateObject(CreateObject {
            id,
            type_tag: object.type_tag().to_string(),
            slot_ids,
        }));
        true
    }

    fn visit_slot(&mut self, _owner: &ObjectRef, _name: &'static str, _slot: &SlotHandle) -> Descend {
        Descend::Yes
    }

    fn slot_done(
        &mut self,
        owner: &ObjectRef,
        _name: &'static str,
        slot: &SlotHandle,
        elements: &[Element],
    ) {
        let slot_id = self.registry.assign_slot(slot, ObjectKey::of(owner));
        match slot {
            SlotHandle::Value(_) => {
                if let Some(element) = elements.first() {
                    self.commands.push(Command::SetValue(SetValue {
                        slot_id,
                        value: Some(value_of(self.registry, element)),
                    }));
                }
            }
            SlotHandle::List(_) => self.list_content(slot_id, elements),
            SlotHandle::Set(_) => {
                for element in elements {
                    self.commands.push(Command::AddToSet(AddToSet {
                        set_id: slot_id,
                        value: value_of(self.registry, element),
                    }));
                }
            }
            SlotHandle::Map(_) => {
                for entry in elements.chunks_exact(2) {
                    self.commands.push(Command::PutToMap(PutToMap {
                        map_id: slot_id,
                        key: value_of(self.registry, &entry[0]),
                        value: value_of(self.registry, &entry[1]),
                    }));
                }
            }
        }
    }
}
