/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Observable slots: the named fields of an [`Observable`](super::Observable) object.
//!
//! There are four kinds of slot, each a cheap, clonable handle to shared state:
//! - [`ValueSlot`]: a single, possibly empty, [`Element`].
//! - [`ListSlot`]: an ordered sequence of elements.
//! - [`SetSlot`]: an unordered collection of unique elements.
//! - [`MapSlot`]: a mapping from elements to elements.
//!
//! ## Observation
//!
//! Every mutating method routes the mutation through the slot's [`SlotObserver`], if one is
//! installed. The observer wraps the mutation: it decides what has to happen before it (for example,
//! waiting for a full-graph walk to finish) and what to do with the resulting [`SlotChange`]
//! afterwards (for example, turning it into commands). A mutation that turns out to change nothing,
//! like inserting an element a set already contains, reports no change.
//!
//! Lists deliberately offer no sort, permutation, or bulk-update operation. Every list edit is an
//! insertion, a removal of a range, or a replacement of one element, which are exactly the edits the
//! list conflict repairer knows how to rebase.

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Formatter},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::error::SlotError;

use super::observable::{Element, ObjectKey};

/// Receives every mutation of the slot it is installed on.
pub trait SlotObserver: Send + Sync {
    /// Run `mutation` exactly once. `mutation` performs the change on `slot` and returns a description
    /// of what changed, or `None` if the slot was left untouched.
    fn observe(&self, slot: &SlotHandle, mutation: &mut dyn FnMut() -> Option<SlotChange>);
}

/// Describes one completed mutation of a slot.
#[derive(Clone, Debug)]
pub enum SlotChange {
    ValueSet {
        new: Option<Element>,
    },
    ListAdded {
        index: usize,
        elements: Vec<Element>,
    },
    ListRemoved {
        start: usize,
        count: usize,
    },
    ListReplaced {
        index: usize,
        element: Element,
    },
    SetAdded(Element),
    SetRemoved(Element),
    MapPut {
        key: Element,
        value: Element,
    },
    MapRemoved {
        key: Element,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Value,
    List,
    Set,
    Map,
}

impl SlotKind {
    pub fn name(&self) -> &'static str {
        match self {
            SlotKind::Value => "value",
            SlotKind::List => "list",
            SlotKind::Set => "set",
            SlotKind::Map => "map",
        }
    }
}

/// Shared state behind every slot handle.
pub(crate) struct SlotCell<T> {
    data: Mutex<T>,
    observer: Mutex<Option<Arc<dyn SlotObserver>>>,
}

impl<T: Default> Default for SlotCell<T> {
    fn default() -> Self {
        Self {
            data: Mutex::new(T::default()),
            observer: Mutex::new(None),
        }
    }
}

impl<T> SlotCell<T> {
    fn new(data: T) -> Self {
        Self {
            data: Mutex::new(data),
            observer: Mutex::new(None),
        }
    }

    /// Perform `op` on the slot data, through the installed observer if there is one.
    fn mutate<R, F>(&self, handle: SlotHandle, op: F) -> Result<R, SlotError>
    where
        F: FnOnce(&mut T) -> Result<(R, Option<SlotChange>), SlotError>,
    {
        let observer = self.observer.lock().clone();
        let mut op = Some(op);
        let mut outcome: Option<Result<R, SlotError>> = None;
        {
            let mut run = || {
                let op = op.take()?;
                let result = {
                    let mut data = self.data.lock();
                    op(&mut data)
                };
                match result {
                    Ok((ret, change)) => {
                        outcome = Some(Ok(ret));
                        change
                    }
                    Err(err) => {
                        outcome = Some(Err(err));
                        None
                    }
                }
            };
            match observer {
                Some(observer) => observer.observe(&handle, &mut run),
                None => {
                    run();
                }
            }
        }
        // An observer that never ran the mutation is a bug in the observer, not in the caller. Run it
        // here so the host's edit is never lost.
        match outcome {
            Some(outcome) => outcome,
            None => match op.take() {
                Some(op) => {
                    let mut data = self.data.lock();
                    op(&mut data).map(|(ret, _)| ret)
                }
                None => Err(SlotError::Interrupted),
            },
        }
    }

    fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.data.lock())
    }

    fn install_observer(&self, observer: Arc<dyn SlotObserver>) -> bool {
        let mut slot_observer = self.observer.lock();
        if slot_observer.is_some() {
            return false;
        }
        *slot_observer = Some(observer);
        true
    }

    fn has_observer(&self) -> bool {
        self.observer.lock().is_some()
    }
}

/// A slot holding a single, possibly empty, element.
#[derive(Clone, Default)]
pub struct ValueSlot(Arc<SlotCell<Option<Element>>>);

impl ValueSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a value slot that initially holds `value`.
    pub fn with(value: impl Into<Element>) -> Self {
        Self(Arc::new(SlotCell::new(Some(value.into()))))
    }

    pub fn handle(&self) -> SlotHandle {
        SlotHandle::Value(self.clone())
    }

    pub fn get(&self) -> Option<Element> {
        self.0.read(|value| value.clone())
    }

    /// Replace the slot's content with `value`. Setting the element the slot already holds is not a
    /// change and is not replicated.
    pub fn set(&self, value: Option<Element>) {
        let _ = self.0.mutate(self.handle(), |current| {
            if *current == value {
                return Ok(((), None));
            }
            *current = value.clone();
            Ok(((), Some(SlotChange::ValueSet { new: value })))
        });
    }

    /// Shorthand for `set(Some(value.into()))`.
    pub fn put(&self, value: impl Into<Element>) {
        self.set(Some(value.into()))
    }

    pub fn clear(&self) {
        self.set(None)
    }
}

/// A slot holding an ordered sequence of elements.
#[derive(Clone, Default)]
pub struct ListSlot(Arc<SlotCell<Vec<Element>>>);

impl ListSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SlotHandle {
        SlotHandle::List(self.clone())
    }

    pub fn len(&self) -> usize {
        self.0.read(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Element> {
        self.0.read(|list| list.get(index).cloned())
    }

    /// A copy of the current content of the list.
    pub fn to_vec(&self) -> Vec<Element> {
        self.0.read(Vec::clone)
    }

    pub fn push(&self, element: impl Into<Element>) {
        let element = element.into();
        let _ = self.0.mutate(self.handle(), |list| {
            let index = list.len();
            list.push(element.clone());
            Ok((
                (),
                Some(SlotChange::ListAdded {
                    index,
                    elements: vec![element],
                }),
            ))
        });
    }

    /// Insert `element` so that it ends up at `index`, shifting later elements up by one.
    pub fn insert(&self, index: usize, element: impl Into<Element>) -> Result<(), SlotError> {
        self.insert_all(index, vec![element.into()])
    }

    /// Insert `elements`, in order, so that the first one ends up at `index`.
    pub fn insert_all(&self, index: usize, elements: Vec<Element>) -> Result<(), SlotError> {
        self.0.mutate(self.handle(), |list| {
            if index > list.len() {
                return Err(SlotError::IndexOutOfBounds {
                    index,
                    len: list.len(),
                });
            }
            if elements.is_empty() {
                return Ok(((), None));
            }
            list.splice(index..index, elements.iter().cloned());
            Ok(((), Some(SlotChange::ListAdded { index, elements })))
        })
    }

    /// Remove and return the element at `index`.
    pub fn remove(&self, index: usize) -> Result<Element, SlotError> {
        self.0.mutate(self.handle(), |list| {
            if index >= list.len() {
                return Err(SlotError::IndexOutOfBounds {
                    index,
                    len: list.len(),
                });
            }
            let removed = list.remove(index);
            Ok((
                removed,
                Some(SlotChange::ListRemoved {
                    start: index,
                    count: 1,
                }),
            ))
        })
    }

    /// Remove `count` consecutive elements starting at `start`.
    pub fn remove_range(&self, start: usize, count: usize) -> Result<Vec<Element>, SlotError> {
        self.0.mutate(self.handle(), |list| {
            let end = start.saturating_add(count);
            if end > list.len() {
                return Err(SlotError::RangeOutOfBounds {
                    start,
                    end,
                    len: list.len(),
                });
            }
            if count == 0 {
                return Ok((Vec::new(), None));
            }
            let removed: Vec<Element> = list.drain(start..end).collect();
            Ok((removed, Some(SlotChange::ListRemoved { start, count })))
        })
    }

    /// Replace the element at `index` with `element`, returning the previous one.
    pub fn replace(&self, index: usize, element: impl Into<Element>) -> Result<Element, SlotError> {
        let element = element.into();
        self.0.mutate(self.handle(), |list| {
            let len = list.len();
            let slot = list
                .get_mut(index)
                .ok_or(SlotError::IndexOutOfBounds { index, len })?;
            let previous = std::mem::replace(slot, element.clone());
            Ok((previous, Some(SlotChange::ListReplaced { index, element })))
        })
    }

    pub fn clear(&self) {
        let len = self.len();
        let _ = self.remove_range(0, len);
    }
}

/// A slot holding an unordered collection of unique elements.
#[derive(Clone, Default)]
pub struct SetSlot(Arc<SlotCell<HashSet<Element>>>);

impl SetSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SlotHandle {
        SlotHandle::Set(self.clone())
    }

    pub fn len(&self) -> usize {
        self.0.read(HashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, element: &Element) -> bool {
        self.0.read(|set| set.contains(element))
    }

    pub fn to_vec(&self) -> Vec<Element> {
        self.0.read(|set| set.iter().cloned().collect())
    }

    /// Add `element`. Returns whether the set did not already contain it.
    pub fn insert(&self, element: impl Into<Element>) -> bool {
        let element = element.into();
        self.0
            .mutate(self.handle(), |set| {
                if set.insert(element.clone()) {
                    Ok((true, Some(SlotChange::SetAdded(element))))
                } else {
                    Ok((false, None))
                }
            })
            .unwrap_or(false)
    }

    /// Remove `element`. Returns whether the set contained it.
    pub fn remove(&self, element: &Element) -> bool {
        self.0
            .mutate(self.handle(), |set| {
                if set.remove(element) {
                    Ok((true, Some(SlotChange::SetRemoved(element.clone()))))
                } else {
                    Ok((false, None))
                }
            })
            .unwrap_or(false)
    }
}

/// A slot holding a mapping from elements to elements.
#[derive(Clone, Default)]
pub struct MapSlot(Arc<SlotCell<HashMap<Element, Element>>>);

impl MapSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SlotHandle {
        SlotHandle::Map(self.clone())
    }

    pub fn len(&self) -> usize {
        self.0.read(HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Element) -> Option<Element> {
        self.0.read(|map| map.get(key).cloned())
    }

    pub fn entries(&self) -> Vec<(Element, Element)> {
        self.0.read(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
    }

    /// Map `key` to `value`, returning the previous value. Putting the value the key already maps to
    /// is not a change.
    pub fn insert(&self, key: impl Into<Element>, value: impl Into<Element>) -> Option<Element> {
        let key = key.into();
        let value = value.into();
        self.0
            .mutate(self.handle(), |map| {
                let previous = map.insert(key.clone(), value.clone());
                if previous.as_ref() == Some(&value) {
                    return Ok((previous, None));
                }
                Ok((previous, Some(SlotChange::MapPut { key, value })))
            })
            .unwrap_or(None)
    }

    pub fn remove(&self, key: &Element) -> Option<Element> {
        self.0
            .mutate(self.handle(), |map| match map.remove(key) {
                Some(previous) => Ok((
                    Some(previous),
                    Some(SlotChange::MapRemoved { key: key.clone() }),
                )),
                None => Ok((None, None)),
            })
            .unwrap_or(None)
    }
}

/// A type-erased handle to a slot of any kind.
#[derive(Clone)]
pub enum SlotHandle {
    Value(ValueSlot),
    List(ListSlot),
    Set(SetSlot),
    Map(MapSlot),
}

impl SlotHandle {
    pub fn kind(&self) -> SlotKind {
        match self {
            SlotHandle::Value(_) => SlotKind::Value,
            SlotHandle::List(_) => SlotKind::List,
            SlotHandle::Set(_) => SlotKind::Set,
            SlotHandle::Map(_) => SlotKind::Map,
        }
    }

    /// Identity of the slot in this process.
    pub fn key(&self) -> ObjectKey {
        match self {
            SlotHandle::Value(slot) => ObjectKey::of_ptr(Arc::as_ptr(&slot.0)),
            SlotHandle::List(slot) => ObjectKey::of_ptr(Arc::as_ptr(&slot.0)),
            SlotHandle::Set(slot) => ObjectKey::of_ptr(Arc::as_ptr(&slot.0)),
            SlotHandle::Map(slot) => ObjectKey::of_ptr(Arc::as_ptr(&slot.0)),
        }
    }

    /// Every element currently held by the slot. Map entries contribute their key, then their value.
    pub fn elements(&self) -> Vec<Element> {
        match self {
            SlotHandle::Value(slot) => slot.get().into_iter().collect(),
            SlotHandle::List(slot) => slot.to_vec(),
            SlotHandle::Set(slot) => slot.to_vec(),
            SlotHandle::Map(slot) => slot
                .entries()
                .into_iter()
                .flat_map(|(key, value)| [key, value])
                .collect(),
        }
    }

    /// Install `observer` on this slot. Returns `false`, leaving the slot unchanged, if the slot is
    /// already observed.
    pub fn install_observer(&self, observer: Arc<dyn SlotObserver>) -> bool {
        match self {
            SlotHandle::Value(slot) => slot.0.install_observer(observer),
            SlotHandle::List(slot) => slot.0.install_observer(observer),
            SlotHandle::Set(slot) => slot.0.install_observer(observer),
            SlotHandle::Map(slot) => slot.0.install_observer(observer),
        }
    }

    pub fn is_observed(&self) -> bool {
        match self {
            SlotHandle::Value(slot) => slot.0.has_observer(),
            SlotHandle::List(slot) => slot.0.has_observer(),
            SlotHandle::Set(slot) => slot.0.has_observer(),
            SlotHandle::Map(slot) => slot.0.has_observer(),
        }
    }

    /// Empty the slot without going through its observer.
    pub(crate) fn reset(&self) {
        match self {
            SlotHandle::Value(slot) => *slot.0.data.lock() = None,
            SlotHandle::List(slot) => slot.0.data.lock().clear(),
            SlotHandle::Set(slot) => slot.0.data.lock().clear(),
            SlotHandle::Map(slot) => slot.0.data.lock().clear(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSlot {
        match self {
            SlotHandle::Value(slot) => WeakSlot::Value(Arc::downgrade(&slot.0)),
            SlotHandle::List(slot) => WeakSlot::List(Arc::downgrade(&slot.0)),
            SlotHandle::Set(slot) => WeakSlot::Set(Arc::downgrade(&slot.0)),
            SlotHandle::Map(slot) => WeakSlot::Map(Arc::downgrade(&slot.0)),
        }
    }
}

impl Debug for SlotHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}Slot{:?}", self.kind().name(), self.elements())
    }
}

/// Weak counterpart of [`SlotHandle`], held by the registry.
#[derive(Clone)]
pub(crate) enum WeakSlot {
    Value(Weak<SlotCell<Option<Element>>>),
    List(Weak<SlotCell<Vec<Element>>>),
    Set(Weak<SlotCell<HashSet<Element>>>),
    Map(Weak<SlotCell<HashMap<Element, Element>>>),
}

impl WeakSlot {
    pub(crate) fn upgrade(&self) -> Option<SlotHandle> {
        match self {
            WeakSlot::Value(weak) => weak.upgrade().map(|cell| SlotHandle::Value(ValueSlot(cell))),
            WeakSlot::List(weak) => weak.upgrade().map(|cell| SlotHandle::List(ListSlot(cell))),
            WeakSlot::Set(weak) => weak.upgrade().map(|cell| SlotHandle::Set(SetSlot(cell))),
            WeakSlot::Map(weak) => weak.upgrade().map(|cell| SlotHandle::Map(MapSlot(cell))),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            WeakSlot::Value(weak) => weak.strong_count() > 0,
            WeakSlot::List(weak) => weak.strong_count() > 0,
            WeakSlot::Set(weak) => weak.strong_count() > 0,
            WeakSlot::Map(weak) => weak.strong_count() > 0,
        }
    }
}
