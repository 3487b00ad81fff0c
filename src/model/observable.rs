/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The capability an application type implements to take part in the replicated graph.

use std::{
    fmt::{self, Debug, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::types::SimpleValue;

use super::slots::SlotHandle;

/// A graph node whose named slots are individually observable and replicable.
///
/// Implementors are plain application structs that own their slots, for example:
///
/// ```
/// use graph_replica::model::{ListSlot, Observable, SlotHandle, ValueSlot};
///
/// #[derive(Default)]
/// struct Team {
///     name: ValueSlot,
///     members: ListSlot,
/// }
///
/// impl Observable for Team {
///     fn type_tag(&self) -> &'static str {
///         "Team"
///     }
///
///     fn slots(&self) -> Vec<(&'static str, SlotHandle)> {
///         vec![("name", self.name.handle()), ("members", self.members.handle())]
///     }
/// }
/// ```
///
/// ## Requirements
///
/// 1. `type_tag` must be the same on every peer for the same concrete type, and must be unique among
///    the types registered in the [`TypeFactory`](super::TypeFactory).
/// 2. `slots` must return the same slot names, in the same order, every time it is called on any
///    instance of the type. The order is the order in which the graph walker visits the slots.
/// 3. A type with no slots is a leaf: it is replicated by identity, but has nothing to observe.
pub trait Observable: Send + Sync + 'static {
    fn type_tag(&self) -> &'static str;

    fn slots(&self) -> Vec<(&'static str, SlotHandle)>;

    /// Look up a single slot by name.
    fn slot(&self, name: &str) -> Option<SlotHandle> {
        self.slots()
            .into_iter()
            .find(|(slot_name, _)| *slot_name == name)
            .map(|(_, slot)| slot)
    }
}

/// Shared handle to an observable object. Graph edges are `ObjectRef`s, so an object lives as long as
/// something in the graph (or a pending command) refers to it.
pub type ObjectRef = Arc<dyn Observable>;

/// Identity of an object (or slot) in this process: the address of its shared allocation.
///
/// Two `ObjectKey`s are equal exactly when they were taken from the same allocation. A key can be
/// reused by a new allocation once the original one has been freed, so long-lived maps keyed by
/// `ObjectKey` must also keep a weak handle to confirm identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    pub fn of(object: &ObjectRef) -> ObjectKey {
        ObjectKey(Arc::as_ptr(object) as *const () as usize)
    }

    pub(crate) fn of_ptr<T: ?Sized>(ptr: *const T) -> ObjectKey {
        ObjectKey(ptr as *const () as usize)
    }
}

/// The content of a slot: either a simple value, copied between peers by value, or a reference to
/// another observable object.
///
/// Equality and hashing compare simple values by value and objects by identity, never through the
/// objects' own notion of equality.
#[derive(Clone)]
pub enum Element {
    Simple(SimpleValue),
    Object(ObjectRef),
}

impl Element {
    pub fn as_simple(&self) -> Option<&SimpleValue> {
        match self {
            Element::Simple(simple) => Some(simple),
            Element::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Element::Object(object) => Some(object),
            Element::Simple(_) => None,
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Element::Simple(a), Element::Simple(b)) => a == b,
            (Element::Object(a), Element::Object(b)) => ObjectKey::of(a) == ObjectKey::of(b),
            _ => false,
        }
    }
}

impl Eq for Element {}

impl Hash for Element {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Element::Simple(simple) => {
                0u8.hash(state);
                simple.hash(state);
            }
            Element::Object(object) => {
                1u8.hash(state);
                ObjectKey::of(object).hash(state);
            }
        }
    }
}

impl Debug for Element {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Element::Simple(simple) => Debug::fmt(simple, f),
            Element::Object(object) => {
                write!(f, "{}@{:x}", object.type_tag(), ObjectKey::of(object).0)
            }
        }
    }
}

impl From<SimpleValue> for Element {
    fn from(value: SimpleValue) -> Self {
        Element::Simple(value)
    }
}

impl From<ObjectRef> for Element {
    fn from(object: ObjectRef) -> Self {
        Element::Object(object)
    }
}

impl<T: Observable> From<Arc<T>> for Element {
    fn from(object: Arc<T>) -> Self {
        Element::Object(object)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::Simple(value.into())
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Element::Simple(value.into())
    }
}

impl From<i64> for Element {
    fn from(value: i64) -> Self {
        Element::Simple(value.into())
    }
}

impl From<i32> for Element {
    fn from(value: i32) -> Self {
        Element::Simple(value.into())
    }
}

impl From<bool> for Element {
    fn from(value: bool) -> Self {
        Element::Simple(value.into())
    }
}
