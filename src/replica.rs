/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one peer of a replicated object graph: a [`ReplicationEngine`] connected to the
//! network by a set of background threads. Exactly one replica, the server, is authoritative. Every
//! other replica is a client that receives a snapshot of the server's graph when it connects, and then
//! keeps its copy in sync by exchanging commands with the server.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Starting a replica
//!
//! Here is an example that demonstrates how to build and start running a server using the builder
//! pattern:
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .factory(factory)
//!     .network(network)
//!     .configuration(configuration)
//!     .root(root)
//!     .on_model_ready(model_ready_handler)
//!     .on_error(error_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the implementations required to run a replica:
//! - `.factory(...)`
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! `.root(...)` sets the root of the graph a server replicates. A client receives its root from the
//! server.
//!
//! The other optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_model_ready(...)`
//! - `.on_apply_batch(...)`
//! - `.on_send_commands(...)`
//! - `.on_snapshot(...)`
//! - `.on_list_conflict(...)`
//! - `.on_filter_command(...)`
//! - `.on_peer_connected(...)`
//! - `.on_peer_disconnected(...)`
//! - `.on_fatal(...)`
//! - `.on_error(...)`
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern, for
//! example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .role(Role::Client)
//!     .reference_grace_period(Duration::from_secs(10))
//!     .log_events(true)
//!     .build()
//! ```

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::driver::start_driver;
use crate::engine::ReplicationEngine;
use crate::error::{CommandError, ErrorKind};
use crate::event_bus::*;
use crate::events::*;
use crate::model::{ObjectRef, TypeFactory};
use crate::networking::{receiving::start_polling, Network};
use crate::types::Role;

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [role](Role).
/// 2. The reference grace period: how long an object referenced only by commands in flight is kept
///    alive.
/// 3. The superseded version capacity: how many list versions the stale command filter remembers per
///    list.
/// 4. The purge interval: how often the registry evicts entries of objects that no longer exist.
/// 5. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Reference grace period
///
/// An object that was only just made reachable by a local change, and is detached again before the
/// change reaches the other peers, is still referenced by the commands in flight. The registry keeps
/// such objects alive for the grace period, which must therefore comfortably exceed the time it
/// takes a batch to reach every peer.
///
/// ## Log Events
///
/// The replica logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.role(...)`
    - `.log_events(...)`

    Optional:
    - `.reference_grace_period(...)`
    - `.superseded_version_capacity(...)`
    - `.purge_interval(...)`
"
))]
pub struct Configuration {
    #[builder(setter(doc = "Set whether the replica is the server or a client. Required."))]
    pub role: Role,
    #[builder(default = Duration::from_secs(30), setter(doc = "Set how long objects referenced by commands in flight are kept alive. Defaults to 30 seconds."))]
    pub reference_grace_period: Duration,
    #[builder(default = 1024, setter(doc = "Set how many superseded versions the stale command filter remembers per list. Defaults to 1024."))]
    pub superseded_version_capacity: usize,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how often the registry is purged of entries of objects that no longer exist. Defaults to 1 second."))]
    pub purge_interval: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.factory(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.root(...)`
    - `.on_model_ready(...)`
    - `.on_apply_batch(...)`
    - `.on_send_commands(...)`
    - `.on_snapshot(...)`
    - `.on_list_conflict(...)`
    - `.on_filter_command(...)`
    - `.on_peer_connected(...)`
    - `.on_peer_disconnected(...)`
    - `.on_fatal(...)`
    - `.on_error(...)`
"
))]
pub struct ReplicaSpec<N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the [factory](crate::model::TypeFactory) that instantiates the types received from other peers. Required."))]
    factory: TypeFactory,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(strip_option, doc = "Set the root of the graph this replica serves. Optional, and only meaningful on a server."))]
    root: Option<ObjectRef>,
    #[builder(default, setter(transform = |handler: impl Fn(&ModelReadyEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ModelReadyEvent>),
    doc = "Register a handler closure to be invoked once the graph has a root, i.e., on a client, once the first snapshot has been applied. Optional."))]
    on_model_ready: Option<HandlerPtr<ModelReadyEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyBatchEvent>),
    doc = "Register a handler closure to be invoked after the replica applies a batch of commands received from a peer. Optional."))]
    on_apply_batch: Option<HandlerPtr<ApplyBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendCommandsEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendCommandsEvent>),
    doc = "Register a handler closure to be invoked after the replica sends commands. Optional."))]
    on_send_commands: Option<HandlerPtr<SendCommandsEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SnapshotEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SnapshotEvent>),
    doc = "Register a handler closure to be invoked after the replica takes a snapshot for a new peer. Optional."))]
    on_snapshot: Option<HandlerPtr<SnapshotEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ListConflictEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ListConflictEvent>),
    doc = "Register a handler closure to be invoked after the replica repairs a list conflict. Optional."))]
    on_list_conflict: Option<HandlerPtr<ListConflictEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FilterCommandEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FilterCommandEvent>),
    doc = "Register a handler closure to be invoked after the replica drops a stale list command. Optional."))]
    on_filter_command: Option<HandlerPtr<FilterCommandEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PeerConnectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PeerConnectedEvent>),
    doc = "Register a handler closure to be invoked after a peer connects. Optional."))]
    on_peer_connected: Option<HandlerPtr<PeerConnectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PeerDisconnectedEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PeerDisconnectedEvent>),
    doc = "Register a handler closure to be invoked after a peer disconnects. Optional."))]
    on_peer_disconnected: Option<HandlerPtr<PeerDisconnectedEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FatalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FatalEvent>),
    doc = "Register a handler closure to be invoked if the engine halts because of a fatal error. Optional."))]
    on_fatal: Option<HandlerPtr<FatalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(ErrorKind, &CommandError) + Send + 'static| Some(Box::new(handler) as ErrorHandlerPtr),
    doc = "Register a handler closure to be invoked when a command received from a peer is dropped because of an error. Optional."))]
    on_error: Option<ErrorHandlerPtr>,
}

impl<N: Network + 'static> ReplicaSpec<N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    pub fn start(self) -> Replica {
        let log_events = self.configuration.log_events;
        let purge_interval = self.configuration.purge_interval;

        let event_handlers = EventHandlers::new(
            log_events,
            self.on_model_ready,
            self.on_apply_batch,
            self.on_send_commands,
            self.on_snapshot,
            self.on_list_conflict,
            self.on_filter_command,
            self.on_peer_connected,
            self.on_peer_disconnected,
            self.on_fatal,
            self.on_error,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let engine = ReplicationEngine::with_event_publisher(
            self.factory,
            &self.configuration,
            event_publisher.clone(),
        );
        if let Some(root) = self.root {
            engine.set_root(root);
        }

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, messages) = start_polling(self.network.clone(), poller_shutdown_receiver);

        let (driver_shutdown, driver_shutdown_receiver) = mpsc::channel();
        let driver = start_driver(
            engine.clone(),
            self.network,
            messages,
            driver_shutdown_receiver,
            event_publisher,
            purge_interval,
        );

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(
                        event_handlers,
                        event_subscriber,
                        event_bus_shutdown_receiver,
                    )),
                    Some(event_bus_shutdown),
                )
            }
            None => (None, None),
        };

        Replica {
            engine,
            poller: Some(poller),
            poller_shutdown,
            driver: Some(driver),
            driver_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Replica {
    engine: ReplicationEngine,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    driver: Option<JoinHandle<()>>,
    driver_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Returns the replica's [engine](ReplicationEngine), which gives access to the root of the
    /// replicated graph.
    pub fn engine(&self) -> &ReplicationEngine {
        &self.engine
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // The driver receives messages from the poller, so the poller has to outlive it.

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| {
                let _ = shutdown.send(());
            });
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.driver_shutdown.send(());
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
