/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Generic depth-first traversal of an object graph through its observable slots.
//!
//! The same walker drives both snapshot generation (where every reachable object is turned into
//! commands) and listener installation (where every reachable object gets an observer on each of its
//! slots). The two differ only in their [`Visitor`].
//!
//! ## Visiting order
//!
//! For every reachable object, exactly once:
//! 1. [`Visitor::object_start`]. The visitor may decline the object, in which case none of its slots
//!    are visited.
//! 2. For each slot, in declaration order:
//!    1. [`Visitor::visit_slot`], which decides whether to [`Descend`] into the slot's object elements.
//!    2. If so, the full traversal of each of those elements, in slot order.
//!    3. [`Visitor::slot_done`], with the elements the slot held when it was visited.
//! 3. [`Visitor::object_done`].
//!
//! So an object always starts before any object reachable from it, and a slot is always done after
//! every object it holds has started.
//!
//! Objects are recognized by identity ([`ObjectKey`]), never by equality, so cycles terminate. The
//! traversal uses an explicit stack, so arbitrarily deep graphs (for example long linked lists) do not
//! exhaust the thread's stack.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::model::{Element, ObjectKey, ObjectRef, SlotHandle};

/// Whether the walker should traverse the objects held by a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descend {
    Yes,
    No,
}

/// Callbacks invoked by [`GraphWalker::walk`].
pub trait Visitor {
    /// Called the first time the walker reaches `object`. `is_leaf` is `true` if the object's type has
    /// no slots. Return `false` to skip the object's slots.
    fn object_start(&mut self, object: &ObjectRef, is_leaf: bool) -> bool;

    fn visit_slot(&mut self, owner: &ObjectRef, name: &'static str, slot: &SlotHandle) -> Descend;

    fn slot_done(
        &mut self,
        _owner: &ObjectRef,
        _name: &'static str,
        _slot: &SlotHandle,
        _elements: &[Element],
    ) {
    }

    fn object_done(&mut self, _object: &ObjectRef) {}
}

/// Remembers, per type tag, whether a type is a leaf (has no slots).
///
/// Whether a type has slots is a property of the type, not of an instance, so it is only discovered
/// once per type for the lifetime of the catalog. Each engine owns its own catalog.
#[derive(Default)]
pub struct TypeCatalog {
    leaves: Mutex<HashMap<&'static str, bool>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leaf(&self, object: &ObjectRef) -> bool {
        let tag = object.type_tag();
        if let Some(is_leaf) = self.leaves.lock().get(tag) {
            return *is_leaf;
        }
        let is_leaf = object.slots().is_empty();
        self.leaves.lock().insert(tag, is_leaf);
        is_leaf
    }

    /// Number of types classified so far.
    pub fn len(&self) -> usize {
        self.leaves.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Frame {
    Enter(ObjectRef),
    Object {
        object: ObjectRef,
        slots: Vec<(&'static str, SlotHandle)>,
        next: usize,
    },
    SlotDone {
        owner: ObjectRef,
        name: &'static str,
        slot: SlotHandle,
        elements: Vec<Element>,
    },
}

pub struct GraphWalker<'a> {
    catalog: &'a TypeCatalog,
    visited: HashSet<ObjectKey>,
}

impl<'a> GraphWalker<'a> {
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self {
            catalog,
            visited: HashSet::new(),
        }
    }

    /// Whether `object` has been reached by any walk of this walker.
    pub fn has_visited(&self, object: &ObjectRef) -> bool {
        self.visited.contains(&ObjectKey::of(object))
    }

    /// Walk the graph reachable from `root`. Objects already visited by an earlier call on the same
    /// walker are not visited again.
    pub fn walk(&mut self, root: &ObjectRef, visitor: &mut impl Visitor) {
        let mut stack = vec![Frame::Enter(root.clone())];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(object) => {
                    if !self.visited.insert(ObjectKey::of(&object)) {
                        continue;
                    }
                    let is_leaf = self.catalog.is_leaf(&object);
                    if !visitor.object_start(&object, is_leaf) {
                        continue;
                    }
                    let slots = if is_leaf { Vec::new() } else { object.slots() };
                    stack.push(Frame::Object {
                        object,
                        slots,
                        next: 0,
                    });
                }

                Frame::Object {
                    object,
                    slots,
                    next,
                } => {
                    let Some((name, slot)) = slots.get(next).cloned() else {
                        visitor.object_done(&object);
                        continue;
                    };
                    let descend = visitor.visit_slot(&object, name, &slot);
                    let elements = slot.elements();
                    let children: Vec<ObjectRef> = match descend {
                        Descend::Yes => elements
                            .iter()
                            .filter_map(Element::as_object)
                            .cloned()
                            .collect(),
                        Descend::No => Vec::new(),
                    };

                    stack.push(Frame::Object {
                        object: object.clone(),
                        slots,
                        next: next + 1,
                    });
                    stack.push(Frame::SlotDone {
                        owner: object,
                        name,
                        slot,
                        elements,
                    });
                    // Reversed, so that children are entered in slot order.
                    stack.extend(children.into_iter().rev().map(Frame::Enter));
                }

                Frame::SlotDone {
                    owner,
                    name,
                    slot,
                    elements,
                } => visitor.slot_done(&owner, name, &slot, &elements),
            }
        }
    }
}
