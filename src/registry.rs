/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bidirectional map between network-stable [`ObjectId`]s and the local objects and slots they name.
//!
//! ## Retention
//!
//! The registry never owns the graph. Every entry holds a weak handle to its target, so an object the
//! application drops disappears from the registry on the next [purge](ObjectRegistry::purge).
//!
//! The exception is an object referenced by a command that is still in flight: such an object may not
//! yet be attached to the graph (it was just created by a `CreateObject`), or may have just been
//! detached from it by a concurrent edit on another peer. To keep it alive until the command that
//! needs it arrives, the registry *pins* the entry. While an entry carries at least one live pin, it
//! also holds a strong handle to its target.
//!
//! There are two kinds of pin:
//! 1. [Batch](PinKind::Batch) pins end when the batch that created them completes, i.e., when a
//!    `ClearReferences` command is applied. The pin of an object the batch attached to the graph is
//!    released then. An object the batch left unattached (say, because the command that would have
//!    attached it was filtered) keeps its pin as a timed pin, since a later command may still refer to
//!    it. A batch that never completes loses its pins at their deadline.
//! 2. [Timed](PinKind::Timed) pins are released only when their deadline passes.
//!
//! Both deadlines are `now + reference_grace_period` at the time of pinning.
//!
//! An entry is evicted when its target is no longer alive and it carries no live pins.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    model::{slots::WeakSlot, ObjectKey, ObjectRef, Observable, SlotHandle},
    types::ObjectId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinKind {
    Batch,
    Timed,
}

#[derive(Clone, Copy, Debug)]
struct Pin {
    kind: PinKind,
    deadline: Instant,
}

enum Target {
    Object(Weak<dyn Observable>),
    Slot { slot: WeakSlot, owner: ObjectKey },
}

/// Held only to keep a pinned target alive.
#[allow(dead_code)]
enum Strong {
    Object(ObjectRef),
    Slot(SlotHandle),
}

struct Entry {
    key: ObjectKey,
    target: Target,
    strong: Option<Strong>,
    pins: Vec<Pin>,
}

impl Entry {
    fn object(&self) -> Option<ObjectRef> {
        match &self.target {
            Target::Object(weak) => weak.upgrade(),
            Target::Slot { .. } => None,
        }
    }

    fn slot(&self) -> Option<SlotHandle> {
        match &self.target {
            Target::Slot { slot, .. } => slot.upgrade(),
            Target::Object(_) => None,
        }
    }

    fn is_alive(&self) -> bool {
        match &self.target {
            Target::Object(weak) => weak.strong_count() > 0,
            Target::Slot { slot, .. } => slot.is_alive(),
        }
    }

    fn pin(&mut self, kind: PinKind, deadline: Instant) {
        if self.strong.is_none() {
            self.strong = match &self.target {
                Target::Object(weak) => weak.upgrade().map(Strong::Object),
                Target::Slot { slot, .. } => slot.upgrade().map(Strong::Slot),
            };
        }
        if self.strong.is_some() {
            self.pins.push(Pin { kind, deadline });
        }
    }

    fn release_where(&mut self, release: impl Fn(&Pin) -> bool) {
        self.pins.retain(|pin| !release(pin));
        if self.pins.is_empty() {
            self.strong = None;
        }
    }
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<ObjectId, Entry>,
    by_key: HashMap<ObjectKey, ObjectId>,
}

impl RegistryState {
    /// Look up the id of the live target at `key`.
    fn id_at(&self, key: ObjectKey) -> Option<ObjectId> {
        let id = self.by_key.get(&key)?;
        let entry = self.by_id.get(id)?;
        // Dead entries are only awaiting eviction.
        if entry.is_alive() {
            Some(*id)
        } else {
            None
        }
    }

    fn insert(&mut self, id: ObjectId, key: ObjectKey, target: Target) {
        if let Some(previous) = self.by_key.insert(key, id) {
            if previous != id {
                self.by_id.remove(&previous);
            }
        }
        if let Some(replaced) = self.by_id.insert(
            id,
            Entry {
                key,
                target,
                strong: None,
                pins: Vec::new(),
            },
        ) {
            if replaced.key != key {
                self.by_key.remove(&replaced.key);
            }
        }
    }
}

/// Maps [`ObjectId`]s to objects and slots, and back. Owned by a single
/// [`ReplicationEngine`](crate::engine::ReplicationEngine).
pub struct ObjectRegistry {
    state: Mutex<RegistryState>,
    grace_period: Duration,
}

impl ObjectRegistry {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Get the id of `object`, if it has one.
    pub fn id_of(&self, object: &ObjectRef) -> Option<ObjectId> {
        self.state.lock().id_at(ObjectKey::of(object))
    }

    /// Get the id of `slot`, if it has one.
    pub fn id_of_slot(&self, slot: &SlotHandle) -> Option<ObjectId> {
        self.state.lock().id_at(slot.key())
    }

    /// Get the id of `object`, assigning it a fresh random id if it has none. The returned flag is
    /// `true` if the id was assigned by this call.
    pub fn assign(&self, object: &ObjectRef) -> (ObjectId, bool) {
        let mut state = self.state.lock();
        let key = ObjectKey::of(object);
        if let Some(id) = state.id_at(key) {
            return (id, false);
        }
        let id = ObjectId::random();
        state.insert(id, key, Target::Object(Arc::downgrade(object)));
        (id, true)
    }

    /// Get the id of `slot`, assigning it a fresh random id if it has none. `owner` is the object that
    /// declares the slot.
    pub fn assign_slot(&self, slot: &SlotHandle, owner: ObjectKey) -> ObjectId {
        let mut state = self.state.lock();
        let key = slot.key();
        if let Some(id) = state.id_at(key) {
            return id;
        }
        let id = ObjectId::random();
        state.insert(
            id,
            key,
            Target::Slot {
                slot: slot.downgrade(),
                owner,
            },
        );
        id
    }

    /// Register `object` under an id chosen by a remote peer.
    pub fn register(&self, id: ObjectId, object: &ObjectRef) {
        self.state
            .lock()
            .insert(id, ObjectKey::of(object), Target::Object(Arc::downgrade(object)));
    }

    /// Register `slot`, declared by `owner`, under an id chosen by a remote peer.
    pub fn register_slot(&self, id: ObjectId, slot: &SlotHandle, owner: ObjectKey) {
        self.state.lock().insert(
            id,
            slot.key(),
            Target::Slot {
                slot: slot.downgrade(),
                owner,
            },
        );
    }

    pub fn object(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.state.lock().by_id.get(id).and_then(Entry::object)
    }

    pub fn slot(&self, id: &ObjectId) -> Option<SlotHandle> {
        self.state.lock().by_id.get(id).and_then(Entry::slot)
    }

    /// The object that declares the slot registered under `id`.
    pub fn owner_of_slot(&self, id: &ObjectId) -> Option<ObjectKey> {
        match &self.state.lock().by_id.get(id)?.target {
            Target::Slot { owner, .. } => Some(*owner),
            Target::Object(_) => None,
        }
    }

    /// Whether `id` names a live object or slot.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.state
            .lock()
            .by_id
            .get(id)
            .is_some_and(Entry::is_alive)
    }

    /// Pin `id` until the current batch attaches it and completes (see
    /// [`clear_batch_pins`](Self::clear_batch_pins)), or until the grace period elapses, whichever comes
    /// first.
    pub fn pin_for_batch(&self, id: &ObjectId) {
        self.pin(id, PinKind::Batch)
    }

    /// Pin `id` for the grace period.
    pub fn pin_for_grace_period(&self, id: &ObjectId) {
        self.pin(id, PinKind::Timed)
    }

    fn pin(&self, id: &ObjectId, kind: PinKind) {
        let deadline = Instant::now() + self.grace_period;
        if let Some(entry) = self.state.lock().by_id.get_mut(id) {
            entry.pin(kind, deadline);
        }
    }

    /// End the current batch. Called when a `ClearReferences` command is applied.
    ///
    /// Batch pins on objects for which `attached` returns `true` are released. Batch pins on any other
    /// object become timed pins with the same deadline.
    pub fn clear_batch_pins(&self, attached: impl Fn(&ObjectRef) -> bool) {
        let mut state = self.state.lock();
        for entry in state.by_id.values_mut() {
            if !entry.pins.iter().any(|pin| pin.kind == PinKind::Batch) {
                continue;
            }
            let keep = entry.object().is_some_and(|object| !attached(&object));
            if keep {
                entry
                    .pins
                    .iter_mut()
                    .filter(|pin| pin.kind == PinKind::Batch)
                    .for_each(|pin| pin.kind = PinKind::Timed);
            } else {
                entry.release_where(|pin| pin.kind == PinKind::Batch);
            }
        }
    }

    /// Whether any entry carries a batch pin.
    pub fn has_batch_pins(&self) -> bool {
        self.state
            .lock()
            .by_id
            .values()
            .any(|entry| entry.pins.iter().any(|pin| pin.kind == PinKind::Batch))
    }

    /// Number of live pins on `id`.
    pub fn pin_count(&self, id: &ObjectId) -> usize {
        self.state
            .lock()
            .by_id
            .get(id)
            .map_or(0, |entry| entry.pins.len())
    }

    /// Release every pin whose deadline has passed, then evict every entry whose target is dead. Returns
    /// the number of evicted entries.
    pub fn purge(&self) -> usize {
        self.purge_at(Instant::now())
    }

    /// Like [`purge`](Self::purge), with an explicit notion of the current time.
    pub fn purge_at(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        state
            .by_id
            .values_mut()
            .for_each(|entry| entry.release_where(|pin| pin.deadline <= now));

        let dead: Vec<(ObjectId, ObjectKey)> = state
            .by_id
            .iter()
            .filter(|(_, entry)| entry.pins.is_empty() && !entry.is_alive())
            .map(|(id, entry)| (*id, entry.key))
            .collect();
        for (id, key) in &dead {
            state.by_id.remove(id);
            if state.by_key.get(key) == Some(id) {
                state.by_key.remove(key);
            }
        }
        if !dead.is_empty() {
            log::debug!("evicted {} registry entries", dead.len());
        }
        dead.len()
    }

    /// Number of entries, live or awaiting eviction.
    pub fn len(&self) -> usize {
        self.state.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
