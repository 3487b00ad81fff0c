/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The closed set of replayable graph mutations exchanged between peers.
//!
//! Every [`Command`] is complete on its own: it names its targets by [`ObjectId`] and carries its
//! payload by [`Value`], so a peer can replay a sequence of commands in order to reproduce the graph
//! changes another peer made.
//!
//! The three list variants ([`AddToList`], [`RemoveFromList`], [`ReplaceInList`]) additionally carry a
//! [`ListVersion`] and take part in the list conflict-repair protocol. [`ListCommand`] is the view over
//! them used by the [list repairer](crate::list_repair).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{ListVersion, ObjectId, Value};

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Command {
    CreateObject(CreateObject),
    SetValue(SetValue),
    AddToList(AddToList),
    RemoveFromList(RemoveFromList),
    ReplaceInList(ReplaceInList),
    AddToSet(AddToSet),
    RemoveFromSet(RemoveFromSet),
    PutToMap(PutToMap),
    RemoveFromMap(RemoveFromMap),
    SetRoot(SetRoot),
    ClearReferences,
}

/// Instantiate a default value of `type_tag` and register it, and each of its declared slots, under
/// the given ids.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct CreateObject {
    pub id: ObjectId,
    pub type_tag: String,
    pub slot_ids: Vec<(String, ObjectId)>,
}

/// Assign `value` (or clear it, when `None`) to the value slot `slot_id`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SetValue {
    pub slot_id: ObjectId,
    pub value: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct AddToList {
    pub list_id: ObjectId,
    pub version: ListVersion,
    pub value: Value,
    pub position: u32,
}

/// Remove `count` consecutive elements starting at `start_position`. A `count` of zero leaves the
/// list untouched and only moves its version forward.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct RemoveFromList {
    pub list_id: ObjectId,
    pub version: ListVersion,
    pub start_position: u32,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ReplaceInList {
    pub list_id: ObjectId,
    pub version: ListVersion,
    pub value: Value,
    pub position: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct AddToSet {
    pub set_id: ObjectId,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct RemoveFromSet {
    pub set_id: ObjectId,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PutToMap {
    pub map_id: ObjectId,
    pub key: Value,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct RemoveFromMap {
    pub map_id: ObjectId,
    pub key: Value,
}

/// Declare the object with `id` to be the root of the replicated graph.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SetRoot {
    pub id: ObjectId,
}

impl Command {
    /// Short PascalCase name of the variant, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateObject(_) => "CreateObject",
            Command::SetValue(_) => "SetValue",
            Command::AddToList(_) => "AddToList",
            Command::RemoveFromList(_) => "RemoveFromList",
            Command::ReplaceInList(_) => "ReplaceInList",
            Command::AddToSet(_) => "AddToSet",
            Command::RemoveFromSet(_) => "RemoveFromSet",
            Command::PutToMap(_) => "PutToMap",
            Command::RemoveFromMap(_) => "RemoveFromMap",
            Command::SetRoot(_) => "SetRoot",
            Command::ClearReferences => "ClearReferences",
        }
    }

    pub fn is_list_command(&self) -> bool {
        matches!(
            self,
            Command::AddToList(_) | Command::RemoveFromList(_) | Command::ReplaceInList(_)
        )
    }

    /// Ids of the objects this command references through its payload. Does not include the id of
    /// the slot the command targets.
    pub fn referenced_objects(&self) -> Vec<ObjectId> {
        match self {
            Command::CreateObject(create) => vec![create.id],
            Command::SetValue(SetValue { value, .. }) => {
                value.iter().filter_map(Value::reference).collect()
            }
            Command::AddToList(AddToList { value, .. })
            | Command::ReplaceInList(ReplaceInList { value, .. })
            | Command::AddToSet(AddToSet { value, .. })
            | Command::RemoveFromSet(RemoveFromSet { value, .. }) => {
                value.reference().into_iter().collect()
            }
            Command::PutToMap(PutToMap { key, value, .. }) => key
                .reference()
                .into_iter()
                .chain(value.reference())
                .collect(),
            Command::RemoveFromMap(RemoveFromMap { key, .. }) => key.reference().into_iter().collect(),
            Command::SetRoot(SetRoot { id }) => vec![*id],
            Command::RemoveFromList(_) | Command::ClearReferences => Vec::new(),
        }
    }
}

/// One of the three version-stamped list commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListCommand {
    Add(AddToList),
    Remove(RemoveFromList),
    Replace(ReplaceInList),
}

impl ListCommand {
    /// Split a [`Command`] into its list form, handing the command back unchanged if it is not a
    /// list command.
    pub fn try_from_command(command: Command) -> Result<ListCommand, Command> {
        match command {
            Command::AddToList(add) => Ok(ListCommand::Add(add)),
            Command::RemoveFromList(remove) => Ok(ListCommand::Remove(remove)),
            Command::ReplaceInList(replace) => Ok(ListCommand::Replace(replace)),
            other => Err(other),
        }
    }

    pub fn into_command(self) -> Command {
        match self {
            ListCommand::Add(add) => Command::AddToList(add),
            ListCommand::Remove(remove) => Command::RemoveFromList(remove),
            ListCommand::Replace(replace) => Command::ReplaceInList(replace),
        }
    }

    pub fn list_id(&self) -> ObjectId {
        match self {
            ListCommand::Add(add) => add.list_id,
            ListCommand::Remove(remove) => remove.list_id,
            ListCommand::Replace(replace) => replace.list_id,
        }
    }

    pub fn version(&self) -> ListVersion {
        match self {
            ListCommand::Add(add) => add.version,
            ListCommand::Remove(remove) => remove.version,
            ListCommand::Replace(replace) => replace.version,
        }
    }

    pub fn set_version(&mut self, version: ListVersion) {
        match self {
            ListCommand::Add(add) => add.version = version,
            ListCommand::Remove(remove) => remove.version = version,
            ListCommand::Replace(replace) => replace.version = version,
        }
    }

    /// The object referenced by this command's value, if any.
    pub fn referenced_object(&self) -> Option<ObjectId> {
        match self {
            ListCommand::Add(AddToList { value, .. })
            | ListCommand::Replace(ReplaceInList { value, .. }) => value.reference(),
            ListCommand::Remove(_) => None,
        }
    }

    /// A remove of zero elements: leaves the list untouched and exists only to move its version from
    /// `version.from` to `version.to`.
    pub fn version_carrier(list_id: ObjectId, version: ListVersion) -> ListCommand {
        ListCommand::Remove(RemoveFromList {
            list_id,
            version,
            start_position: 0,
            count: 0,
        })
    }
}
