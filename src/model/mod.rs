/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The host-facing object model: what an application implements and owns in order to have its object
//! graph replicated.
//!
//! An application type takes part in replication by implementing [`Observable`] and keeping its state
//! in slots ([`ValueSlot`], [`ListSlot`], [`SetSlot`], [`MapSlot`]). Every type that may be created by
//! a remote peer must also be registered in a [`TypeFactory`].

pub mod compare;

pub mod factory;

pub mod observable;

pub mod slots;

pub use compare::structurally_equal;
pub use factory::TypeFactory;
pub use observable::{Element, ObjectKey, ObjectRef, Observable};
pub use slots::{
    ListSlot, MapSlot, SetSlot, SlotChange, SlotHandle, SlotKind, SlotObserver, ValueSlot,
};
