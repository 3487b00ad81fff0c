/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Applies incoming commands to the local graph.
//!
//! Every mutation the executor makes happens with the listeners of the mutated object
//! [suppressed](crate::listeners::Suppression) on the executor's thread, so applying a remote command
//! never produces a local command describing the same change.
//!
//! On a server, every accepted command is also queued for the other peers while the target slot's
//! lease is still held: as a relay to every synchronized peer except the origin, and, unless it is a
//! `CreateObject`, as an echo to the origin.

use std::{sync::Arc, time::SystemTime};

use crate::{
    commands::{
        AddToSet, Command, CreateObject, ListCommand, PutToMap, RemoveFromMap, RemoveFromSet,
        SetRoot, SetValue,
    },
    engine::{EngineCore, Outgoing},
    error::{CommandError, FatalError, SlotError},
    events::{Event, FilterCommandEvent, ListConflictEvent},
    list_repair::{ListLease, Received},
    listeners,
    model::{Element, ListSlot, ObjectKey, ObjectRef, SlotHandle, SlotKind},
    types::{ObjectId, PeerId, Role, Value},
    walker::{Descend, GraphWalker, Visitor},
};

/// What happened to one command.
pub(crate) enum Executed {
    /// The command changed the local graph (or confirmed a pending edit) and counts as accepted.
    Accepted,
    /// The command was recognized as redundant and dropped.
    Skipped,
    /// The command was applied, except for the parts that failed with these errors.
    Partial(Vec<CommandError>),
}

pub(crate) struct CommandExecutor<'a> {
    core: &'a Arc<EngineCore>,
    origin: Option<PeerId>,
}

impl<'a> CommandExecutor<'a> {
    pub(crate) fn new(core: &'a Arc<EngineCore>, origin: Option<PeerId>) -> Self {
        Self { core, origin }
    }

    pub(crate) fn execute(
        &self,
        command: Command,
    ) -> Result<Result<Executed, CommandError>, FatalError> {
        Ok(match command {
            Command::CreateObject(create) => self.create_object(create),
            Command::SetValue(set) => self.set_value(set),
            Command::AddToSet(add) => self.add_to_set(add),
            Command::RemoveFromSet(remove) => self.remove_from_set(remove),
            Command::PutToMap(put) => self.put_to_map(put),
            Command::RemoveFromMap(remove) => self.remove_from_map(remove),
            Command::SetRoot(set_root) => self.set_root(set_root),
            Command::ClearReferences => self.clear_references(),
            Command::AddToList(_) | Command::RemoveFromList(_) | Command::ReplaceInList(_) => {
                return self.execute_list(command)
            }
        })
    }

    fn create_object(&self, create: CreateObject) -> Result<Executed, CommandError> {
        let core = self.core;
        if core.registry.object(&create.id).is_some() {
            return Ok(Executed::Skipped);
        }

        let object = core
            .factory
            .create(&create.type_tag)
            .ok_or_else(|| CommandError::UnknownType {
                type_tag: create.type_tag.clone(),
            })?;

        // A slot name this build of the type does not declare leaves only that slot unaddressable.
        let mut errors = Vec::new();
        let mut slots = Vec::with_capacity(create.slot_ids.len());
        for (slot_name, slot_id) in &create.slot_ids {
            match object.slot(slot_name) {
                Some(slot) => slots.push((*slot_id, slot)),
                None => errors.push(CommandError::UnknownSlotName {
                    type_tag: create.type_tag.clone(),
                    slot_name: slot_name.clone(),
                }),
            }
        }

        // Senders only describe non-empty slots, so whatever the constructor put in them must go.
        for (_, slot) in object.slots() {
            slot.reset();
        }

        let owner = ObjectKey::of(&object);
        core.registry.register(create.id, &object);
        for (slot_id, slot) in &slots {
            core.registry.register_slot(*slot_id, slot, owner);
        }
        core.registry.pin_for_batch(&create.id);
        listeners::install_on(core, &object);

        self.forward(Command::CreateObject(create), false);
        if errors.is_empty() {
            Ok(Executed::Accepted)
        } else {
            Ok(Executed::Partial(errors))
        }
    }

    fn set_value(&self, set: SetValue) -> Result<Executed, CommandError> {
        let (slot, _lease) = self.slot(set.slot_id, SlotKind::Value, "SetValue")?;
        let element = set.value.clone().map(|value| self.element(value)).transpose()?;
        self.suppressed(set.slot_id, || {
            if let SlotHandle::Value(slot) = &slot {
                slot.set(element);
            }
        });
        self.forward(Command::SetValue(set), true);
        Ok(Executed::Accepted)
    }

    fn add_to_set(&self, add: AddToSet) -> Result<Executed, CommandError> {
        let (slot, _lease) = self.slot(add.set_id, SlotKind::Set, "AddToSet")?;
        let element = self.element(add.value.clone())?;
        self.suppressed(add.set_id, || {
            if let SlotHandle::Set(slot) = &slot {
                slot.insert(element);
            }
        });
        self.forward(Command::AddToSet(add), true);
        Ok(Executed::Accepted)
    }

    fn remove_from_set(&self, remove: RemoveFromSet) -> Result<Executed, CommandError> {
        let (slot, _lease) = self.slot(remove.set_id, SlotKind::Set, "RemoveFromSet")?;
        let element = self.element(remove.value.clone())?;
        self.suppressed(remove.set_id, || {
            if let SlotHandle::Set(slot) = &slot {
                slot.remove(&element);
            }
        });
        self.forward(Command::RemoveFromSet(remove), true);
        Ok(Executed::Accepted)
    }

    fn put_to_map(&self, put: PutToMap) -> Result<Executed, CommandError> {
        let (slot, _lease) = self.slot(put.map_id, SlotKind::Map, "PutToMap")?;
        let key = self.element(put.key.clone())?;
        let value = self.element(put.value.clone())?;
        self.suppressed(put.map_id, || {
            if let SlotHandle::Map(slot) = &slot {
                slot.insert(key, value);
            }
        });
        self.forward(Command::PutToMap(put), true);
        Ok(Executed::Accepted)
    }

    fn remove_from_map(&self, remove: RemoveFromMap) -> Result<Executed, CommandError> {
        let (slot, _lease) = self.slot(remove.map_id, SlotKind::Map, "RemoveFromMap")?;
        let key = self.element(remove.key.clone())?;
        self.suppressed(remove.map_id, || {
            if let SlotHandle::Map(slot) = &slot {
                slot.remove(&key);
            }
        });
        self.forward(Command::RemoveFromMap(remove), true);
        Ok(Executed::Accepted)
    }

    fn set_root(&self, set_root: SetRoot) -> Result<Executed, CommandError> {
        let root = self
            .core
            .registry
            .object(&set_root.id)
            .ok_or(CommandError::MissingRoot { id: set_root.id })?;
        self.core.set_root(set_root.id, root);
        self.forward(Command::SetRoot(set_root), false);
        Ok(Executed::Accepted)
    }

    fn clear_references(&self) -> Result<Executed, CommandError> {
        let core = self.core;
        if core.registry.has_batch_pins() {
            let mut walker = GraphWalker::new(&core.catalog);
            if let Some(root) = core.root() {
                walker.walk(&root, &mut Reachability);
            }
            core.registry.clear_batch_pins(|object| walker.has_visited(object));
        }
        self.core.announce_model_ready();
        self.forward(Command::ClearReferences, false);
        Ok(Executed::Accepted)
    }

    fn execute_list(
        &self,
        command: Command,
    ) -> Result<Result<Executed, CommandError>, FatalError> {
        let list_command = ListCommand::try_from_command(command).map_err(|other| {
            FatalError::RepairInvariant(format!("{} reached list repair", other.name()))
        })?;
        let list_id = list_command.list_id();
        let remote_version = list_command.version();

        let slot = match self.core.registry.slot(&list_id) {
            Some(SlotHandle::List(slot)) => slot,
            Some(other) => {
                return Ok(Err(CommandError::SlotKindMismatch {
                    id: list_id,
                    command: list_command.clone().into_command().name(),
                    expected: SlotKind::List.name(),
                    actual: other.kind().name(),
                }))
            }
            None => return Ok(Err(CommandError::UnknownSlot { id: list_id })),
        };

        let mut lease = self.core.repairer.lease(list_id);
        let received = self.core.repairer.receive_leased(
            &mut lease,
            list_command.clone(),
            |commands| self.suppressed(list_id, || self.apply_list(list_id, &slot, commands)),
        );

        let executed = match received {
            Ok(Received::Applied) => {
                self.forward(list_command.into_command(), true);
                Executed::Accepted
            }
            Ok(Received::Echo) => Executed::Accepted,
            Ok(Received::Filtered { referenced }) => {
                if let Some(referenced) = referenced {
                    self.core.registry.pin_for_grace_period(&referenced);
                }
                self.core.publish(Event::FilterCommand(FilterCommandEvent {
                    timestamp: SystemTime::now(),
                    list_id,
                    version: remote_version,
                    referenced,
                }));
                Executed::Skipped
            }
            Ok(Received::Repaired { applied, resend }) => {
                self.core.publish(Event::ListConflict(ListConflictEvent {
                    timestamp: SystemTime::now(),
                    list_id,
                    remote_version,
                    applied: applied.len(),
                    resent: resend.len(),
                }));
                if !resend.is_empty() {
                    self.core.enqueue(Outgoing::Local(
                        resend.into_iter().map(ListCommand::into_command).collect(),
                    ));
                }
                Executed::Accepted
            }
            Err(error) => return Ok(Err(error)),
        };
        drop(lease);
        Ok(Ok(executed))
    }

    /// Apply `commands` to `slot` in order. Every command is resolved and bounds checked against the
    /// list as the earlier commands leave it before the first one is applied, so on error the list is
    /// unchanged.
    fn apply_list(
        &self,
        list_id: ObjectId,
        slot: &ListSlot,
        commands: &[ListCommand],
    ) -> Result<(), CommandError> {
        let out_of_bounds = |command: &'static str, detail: String| CommandError::IndexOutOfBounds {
            id: list_id,
            command,
            detail,
        };

        let mut len = slot.len();
        let mut elements = Vec::with_capacity(commands.len());
        for command in commands {
            match command {
                ListCommand::Add(add) => {
                    let index = add.position as usize;
                    if index > len {
                        let error = SlotError::IndexOutOfBounds { index, len };
                        return Err(out_of_bounds("AddToList", error.to_string()));
                    }
                    elements.push(Some(self.element(add.value.clone())?));
                    len += 1;
                }
                ListCommand::Remove(remove) => {
                    let (start, count) = (remove.start_position as usize, remove.count as usize);
                    if count > 0 && start + count > len {
                        let error = SlotError::RangeOutOfBounds {
                            start,
                            end: start + count,
                            len,
                        };
                        return Err(out_of_bounds("RemoveFromList", error.to_string()));
                    }
                    elements.push(None);
                    len -= count;
                }
                ListCommand::Replace(replace) => {
                    let index = replace.position as usize;
                    if index >= len {
                        let error = SlotError::IndexOutOfBounds { index, len };
                        return Err(out_of_bounds("ReplaceInList", error.to_string()));
                    }
                    elements.push(Some(self.element(replace.value.clone())?));
                }
            }
        }

        for (command, element) in commands.iter().zip(elements) {
            let result = match (command, element) {
                (ListCommand::Add(add), Some(element)) => slot
                    .insert(add.position as usize, element)
                    .map_err(|error| out_of_bounds("AddToList", error.to_string())),
                (ListCommand::Remove(remove), _) if remove.count == 0 => Ok(()),
                (ListCommand::Remove(remove), _) => slot
                    .remove_range(remove.start_position as usize, remove.count as usize)
                    .map(|_| ())
                    .map_err(|error| out_of_bounds("RemoveFromList", error.to_string())),
                (ListCommand::Replace(replace), Some(element)) => slot
                    .replace(replace.position as usize, element)
                    .map(|_| ())
                    .map_err(|error| out_of_bounds("ReplaceInList", error.to_string())),
                (_, None) => Ok(()),
            };
            result?;
        }
        Ok(())
    }

    /// Look up the slot `id`, check that it is of kind `expected`, and take its lease.
    fn slot(
        &self,
        id: ObjectId,
        expected: SlotKind,
        command: &'static str,
    ) -> Result<(SlotHandle, ListLease), CommandError> {
        let slot = self
            .core
            .registry
            .slot(&id)
            .ok_or(CommandError::UnknownSlot { id })?;
        if slot.kind() != expected {
            return Err(CommandError::SlotKindMismatch {
                id,
                command,
                expected: expected.name(),
                actual: slot.kind().name(),
            });
        }
        let lease = self.core.repairer.lease(id);
        Ok((slot, lease))
    }

    fn element(&self, value: Value) -> Result<Element, CommandError> {
        match value {
            Value::Simple(simple) => Ok(Element::Simple(simple)),
            Value::Reference(id) => self
                .core
                .registry
                .object(&id)
                .map(Element::Object)
                .ok_or(CommandError::UnknownObject { id }),
        }
    }

    /// Run `mutation` with the listeners of the owner of `slot_id` suppressed on this thread.
    fn suppressed<R>(&self, slot_id: ObjectId, mutation: impl FnOnce() -> R) -> R {
        match self.core.registry.owner_of_slot(&slot_id) {
            Some(owner) => {
                let _guard = self.core.suppression.suppress(owner);
                mutation()
            }
            None => mutation(),
        }
    }

    /// Queue an accepted command for the other peers. Only servers forward.
    fn forward(&self, command: Command, echo: bool) {
        if self.core.role != Role::Server {
            return;
        }
        let origin = self.origin;
        if echo {
            if let Some(origin) = origin {
                self.core.enqueue(Outgoing::Echo {
                    origin,
                    commands: vec![command.clone()],
                });
            }
        }
        self.core.enqueue(Outgoing::Relay {
            origin,
            commands: vec![command],
        });
    }
}

/// Visits everything reachable, and does nothing else.
struct Reachability;

impl Visitor for Reachability {
    fn object_start(&mut self, _object: &ObjectRef, is_leaf: bool) -> bool {
        !is_leaf
    }

    fn visit_slot(
        &mut self,
        _owner: &ObjectRef,
        _name: &'static str,
        _slot: &SlotHandle,
    ) -> Descend {
        Descend::Yes
    }
}
