/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A library for replicating a graph of observable objects between one server and any number of
//! clients.
//!
//! Applications model their state as plain structs that own [slots](model::slots) and implement
//! [`Observable`](model::Observable). Once a graph is handed to a [replica](replica), every change to
//! any slot reachable from its root is turned into [commands](commands) and sent to the other peers,
//! where it is replayed onto their copy of the graph. Concurrent edits to the same list are repaired
//! so that every peer converges to the server's order.
//!
//! ## Getting started
//!
//! 1. Implement [`Observable`](model::Observable) for every type in the graph and register each of
//!    them in a [`TypeFactory`](model::TypeFactory).
//! 2. Implement [`Network`](networking::Network) for the transport between peers.
//! 3. Build and [start](replica::ReplicaSpec::start) a [`ReplicaSpec`](replica::ReplicaSpec).
//!
//! Tests and single-process embeddings can drive a [`ReplicationEngine`](engine::ReplicationEngine)
//! directly instead, routing its [outbox](engine::Outgoing) by hand.

pub mod codec;

pub mod commands;

pub(crate) mod driver;

pub mod engine;

pub mod error;

pub(crate) mod event_bus;

pub mod events;

pub(crate) mod executor;

pub(crate) mod generator;

pub mod list_repair;

pub mod listeners;

pub(crate) mod logging;

pub mod model;

pub mod networking;

pub mod registry;

pub mod replica;

pub mod synchronizer;

pub mod types;

pub mod walker;
