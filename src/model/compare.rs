/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structural comparison of two object graphs, up to object identity.
//!
//! Two graphs are structurally equal when there is a one-to-one pairing of their objects such that
//! paired objects have the same type tag and the same slots, and every pair of corresponding slots
//! holds equal simple values and paired objects. The pairing is built while the graphs are traversed.
//! Where the pairing of objects inside a set or map is ambiguous, every candidate is tried in turn.
//!
//! The objects' own notion of equality is never consulted.

use std::collections::HashMap;

use super::{
    observable::{Element, ObjectKey, ObjectRef},
    slots::SlotHandle,
};

/// Check whether the graphs rooted at `a` and `b` are structurally equal.
pub fn structurally_equal(a: &ObjectRef, b: &ObjectRef) -> bool {
    let mut pairing = Pairing::default();
    pairing.objects(a, b)
}

#[derive(Clone, Default)]
struct Pairing {
    a_to_b: HashMap<ObjectKey, ObjectKey>,
    b_to_a: HashMap<ObjectKey, ObjectKey>,
}

impl Pairing {
    fn objects(&mut self, a: &ObjectRef, b: &ObjectRef) -> bool {
        let (key_a, key_b) = (ObjectKey::of(a), ObjectKey::of(b));
        if let Some(paired) = self.a_to_b.get(&key_a) {
            return *paired == key_b;
        }
        if self.b_to_a.contains_key(&key_b) {
            return false;
        }
        if a.type_tag() != b.type_tag() {
            return false;
        }

        let (slots_a, slots_b) = (a.slots(), b.slots());
        if slots_a.len() != slots_b.len() {
            return false;
        }

        // Pair before descending so that cycles terminate.
        self.a_to_b.insert(key_a, key_b);
        self.b_to_a.insert(key_b, key_a);

        slots_a
            .iter()
            .zip(slots_b.iter())
            .all(|((name_a, slot_a), (name_b, slot_b))| {
                name_a == name_b && self.slots(slot_a, slot_b)
            })
    }

    fn slots(&mut self, a: &SlotHandle, b: &SlotHandle) -> bool {
        match (a, b) {
            (SlotHandle::Value(a), SlotHandle::Value(b)) => match (a.get(), b.get()) {
                (None, None) => true,
                (Some(a), Some(b)) => self.elements(&a, &b),
                _ => false,
            },
            (SlotHandle::List(a), SlotHandle::List(b)) => {
                let (a, b) = (a.to_vec(), b.to_vec());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| self.elements(a, b))
            }
            (SlotHandle::Set(a), SlotHandle::Set(b)) => {
                let (a, b) = (a.to_vec(), b.to_vec());
                if a.len() != b.len() {
                    return false;
                }
                let (simple_a, objects_a) = partition(a);
                let (simple_b, objects_b) = partition(b);
                simple_a.len() == simple_b.len()
                    && simple_a.iter().all(|simple| simple_b.contains(simple))
                    && self.match_all(&objects_a, objects_b, |pairing, a, b| {
                        pairing.elements(a, b)
                    })
            }
            (SlotHandle::Map(a), SlotHandle::Map(b)) => {
                let (a, b) = (a.entries(), b.entries());
                if a.len() != b.len() {
                    return false;
                }
                let (simple_a, objects_a): (Vec<_>, Vec<_>) =
                    a.into_iter().partition(|(key, _)| key.as_simple().is_some());
                let (simple_b, objects_b): (Vec<_>, Vec<_>) =
                    b.into_iter().partition(|(key, _)| key.as_simple().is_some());
                if simple_a.len() != simple_b.len() {
                    return false;
                }
                let simple_b: HashMap<Element, Element> = simple_b.into_iter().collect();
                for (key, value_a) in &simple_a {
                    match simple_b.get(key) {
                        Some(value_b) if self.elements(value_a, value_b) => {}
                        _ => return false,
                    }
                }
                self.match_all(&objects_a, objects_b, |pairing, a, b| {
                    pairing.elements(&a.0, &b.0) && pairing.elements(&a.1, &b.1)
                })
            }
            _ => false,
        }
    }

    fn elements(&mut self, a: &Element, b: &Element) -> bool {
        match (a, b) {
            (Element::Simple(a), Element::Simple(b)) => a == b,
            (Element::Object(a), Element::Object(b)) => self.objects(a, b),
            _ => false,
        }
    }

    /// Find a one-to-one assignment of `a` onto `candidates` under which `matches` holds for every
    /// pair, backtracking over the pairing whenever a tentative choice fails.
    fn match_all<T, F>(&mut self, a: &[T], candidates: Vec<T>, matches: F) -> bool
    where
        F: Fn(&mut Pairing, &T, &T) -> bool + Copy,
    {
        let mut candidates: Vec<&T> = candidates.iter().collect();
        self.match_all_refs(a, &mut candidates, matches)
    }

    fn match_all_refs<T, F>(&mut self, a: &[T], candidates: &mut Vec<&T>, matches: F) -> bool
    where
        F: Fn(&mut Pairing, &T, &T) -> bool + Copy,
    {
        let Some((first, rest)) = a.split_first() else {
            return candidates.is_empty();
        };
        for index in 0..candidates.len() {
            let saved = self.clone();
            let candidate = candidates[index];
            if matches(self, first, candidate) {
                candidates.remove(index);
                if self.match_all_refs(rest, candidates, matches) {
                    return true;
                }
                candidates.insert(index, candidate);
            }
            *self = saved;
        }
        false
    }
}

fn partition(elements: Vec<Element>) -> (Vec<Element>, Vec<Element>) {
    elements
        .into_iter()
        .partition(|element| element.as_simple().is_some())
}
