/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replication engine: the single owner of every piece of replication state of one peer.
//!
//! A [`ReplicationEngine`] owns the peer's [registry](ObjectRegistry), [walk synchronizer](WalkSynchronizer),
//! [list conflict repairer](ListConflictRepairer) and listener [suppression](Suppression) state. Two
//! engines never share any of these, so any number of engines can run side by side in one process.
//!
//! The engine exposes the peer-facing operations:
//! - [`snapshot`](ReplicationEngine::snapshot): the full replay sequence of the current graph.
//! - [`apply`](ReplicationEngine::apply): apply a batch of commands received from a peer.
//!
//! Local changes have no entry point: the listeners the engine installs on every reachable slot turn
//! them into commands on their own.
//!
//! ## Outbox
//!
//! Every command this peer has to send is queued in the engine's outbox as an [`Outgoing`] entry, in
//! exactly the order the corresponding changes took effect on the local graph. The
//! [driver](crate::replica) (or a test) drains the outbox and routes each entry to the right peers.
//!
//! A server queues a [`Snapshot`](Outgoing::Snapshot) entry for a new peer under the walk gate. Every
//! change queued before the entry is contained in the snapshot, and every change queued after it is
//! not, so a driver that starts forwarding changes to a peer exactly when it dequeues that peer's
//! snapshot delivers every change to the peer exactly once.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use parking_lot::Mutex;

use crate::{
    commands::Command,
    error::{CommandError, FatalError},
    events::{ApplyBatchEvent, Event, FatalEvent, ModelReadyEvent, SnapshotEvent},
    executor::{CommandExecutor, Executed},
    generator::CommandGenerator,
    list_repair::ListConflictRepairer,
    listeners::{self, Suppression},
    model::{ObjectRef, TypeFactory},
    registry::ObjectRegistry,
    replica::Configuration,
    synchronizer::{OperationClass, WalkSynchronizer},
    types::{ObjectId, PeerId, Role},
    walker::TypeCatalog,
};

/// A group of commands this peer has to send, together with who has to receive them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// Commands describing local changes. A client sends them to the server; a server sends them to
    /// every synchronized peer.
    Local(Vec<Command>),
    /// Commands a server accepted from `origin`, for every synchronized peer except `origin`.
    Relay {
        origin: Option<PeerId>,
        commands: Vec<Command>,
    },
    /// Commands a server accepted from `origin`, returned to `origin`.
    Echo {
        origin: PeerId,
        commands: Vec<Command>,
    },
    /// The full replay sequence of the graph, for `peer`. `peer` becomes synchronized once this entry
    /// is sent.
    Snapshot {
        peer: PeerId,
        commands: Vec<Command>,
    },
}

impl Outgoing {
    pub fn commands(&self) -> &[Command] {
        match self {
            Outgoing::Local(commands)
            | Outgoing::Relay { commands, .. }
            | Outgoing::Echo { commands, .. }
            | Outgoing::Snapshot { commands, .. } => commands,
        }
    }

    /// Append the commands of `next` to `self` if both go to the same peers. Otherwise hand `next`
    /// back.
    fn absorb(&mut self, next: Outgoing) -> Result<(), Outgoing> {
        match (self, next) {
            (Outgoing::Local(commands), Outgoing::Local(more)) => {
                commands.extend(more);
                Ok(())
            }
            (
                Outgoing::Relay { origin, commands },
                Outgoing::Relay {
                    origin: next_origin,
                    commands: more,
                },
            ) if *origin == next_origin => {
                commands.extend(more);
                Ok(())
            }
            (
                Outgoing::Echo { origin, commands },
                Outgoing::Echo {
                    origin: next_origin,
                    commands: more,
                },
            ) if *origin == next_origin => {
                commands.extend(more);
                Ok(())
            }
            (_, next) => Err(next),
        }
    }
}

/// What [`ReplicationEngine::apply`] did with a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Commands queued for every synchronized peer except the origin. Always empty on a client.
    pub relay: Vec<Command>,
    /// Commands queued for the origin. Always empty on a client.
    pub echo: Vec<Command>,
    /// Number of commands that were applied or confirmed a pending local edit.
    pub accepted: usize,
    /// Errors of the commands that were dropped or only partly applied, in batch order.
    pub errors: Vec<CommandError>,
}

/// State shared between the engine handle, the listeners and the executor.
pub(crate) struct EngineCore {
    pub(crate) role: Role,
    pub(crate) registry: ObjectRegistry,
    pub(crate) factory: TypeFactory,
    pub(crate) catalog: TypeCatalog,
    pub(crate) synchronizer: WalkSynchronizer,
    pub(crate) repairer: ListConflictRepairer,
    pub(crate) suppression: Suppression,
    root: Mutex<Option<(ObjectId, ObjectRef)>>,
    outbox: Mutex<VecDeque<Outgoing>>,
    event_publisher: Option<Sender<Event>>,
    halted: AtomicBool,
    model_ready: AtomicBool,
    last_purge: Mutex<Instant>,
    purge_interval: Duration,
}

impl EngineCore {
    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    /// Append `outgoing` to the outbox, merging it into the last entry if both go to the same peers.
    pub(crate) fn enqueue(&self, outgoing: Outgoing) {
        if outgoing.commands().is_empty() {
            return;
        }
        let mut outbox = self.outbox.lock();
        let outgoing = match outbox.back_mut() {
            Some(last) => match last.absorb(outgoing) {
                Ok(()) => return,
                Err(outgoing) => outgoing,
            },
            None => outgoing,
        };
        outbox.push_back(outgoing);
    }

    pub(crate) fn root(&self) -> Option<ObjectRef> {
        self.root.lock().as_ref().map(|(_, root)| root.clone())
    }

    pub(crate) fn set_root(&self, id: ObjectId, root: ObjectRef) {
        *self.root.lock() = Some((id, root));
    }

    /// Publish [`ModelReady`](Event::ModelReady) the first time this is called with a root set.
    pub(crate) fn announce_model_ready(&self) {
        let Some((root_id, root)) = self.root.lock().clone() else {
            return;
        };
        if !self.model_ready.swap(true, Ordering::SeqCst) {
            self.publish(Event::ModelReady(ModelReadyEvent {
                timestamp: SystemTime::now(),
                root_id,
                root,
            }));
        }
    }

    /// Purge the registry, and forget the protocol state of lists that no longer exist, if the purge
    /// interval has elapsed since the last purge.
    pub(crate) fn purge_if_due(&self) {
        {
            let mut last_purge = self.last_purge.lock();
            if last_purge.elapsed() < self.purge_interval {
                return;
            }
            *last_purge = Instant::now();
        }
        self.purge();
    }

    fn purge(&self) -> usize {
        let evicted = self.registry.purge();
        self.repairer.retain(|list_id| self.registry.contains(list_id));
        evicted
    }
}

/// Handle to the replication state of one peer. Cloning the handle does not clone the state.
#[derive(Clone)]
pub struct ReplicationEngine {
    core: Arc<EngineCore>,
}

impl ReplicationEngine {
    /// Create an engine for a peer that instantiates remote objects with `factory`.
    pub fn new(factory: TypeFactory, configuration: &Configuration) -> Self {
        Self::with_event_publisher(factory, configuration, None)
    }

    pub(crate) fn with_event_publisher(
        factory: TypeFactory,
        configuration: &Configuration,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let core = EngineCore {
            role: configuration.role,
            registry: ObjectRegistry::new(configuration.reference_grace_period),
            factory,
            catalog: TypeCatalog::new(),
            synchronizer: WalkSynchronizer::new(),
            repairer: ListConflictRepairer::new(
                configuration.role,
                configuration.superseded_version_capacity,
            ),
            suppression: Suppression::new(),
            root: Mutex::new(None),
            outbox: Mutex::new(VecDeque::new()),
            event_publisher,
            halted: AtomicBool::new(false),
            model_ready: AtomicBool::new(false),
            last_purge: Mutex::new(Instant::now()),
            purge_interval: configuration.purge_interval,
        };
        Self {
            core: Arc::new(core),
        }
    }

    pub fn role(&self) -> Role {
        self.core.role
    }

    /// Make `root` the root of the replicated graph, and start observing every object reachable from
    /// it. Returns the id of `root`.
    pub fn set_root(&self, root: ObjectRef) -> ObjectId {
        let _permit = self.core.synchronizer.acquire(OperationClass::LocalChange);
        let (root_id, _) = self.core.registry.assign(&root);
        listeners::install(&self.core, &[root.clone()]);
        self.core.set_root(root_id, root);
        self.core.announce_model_ready();
        root_id
    }

    pub fn root(&self) -> Option<ObjectRef> {
        self.core.root()
    }

    pub fn root_id(&self) -> Option<ObjectId> {
        self.core.root.lock().as_ref().map(|(root_id, _)| *root_id)
    }

    /// The full replay sequence of the current graph. Empty if no root has been set.
    ///
    /// Blocks until every local change and incoming batch already in progress has completed, and
    /// holds off new ones until the snapshot is complete.
    pub fn snapshot(&self) -> Vec<Command> {
        self.core.synchronizer.walk(|| self.snapshot_unsynchronized())
    }

    /// Like [`snapshot`](Self::snapshot), additionally queueing the snapshot for `peer` in the outbox.
    pub fn snapshot_for(&self, peer: PeerId) -> Vec<Command> {
        self.core.synchronizer.walk(|| {
            let commands = self.snapshot_unsynchronized();
            self.core.outbox.lock().push_back(Outgoing::Snapshot {
                peer,
                commands: commands.clone(),
            });
            self.core.publish(Event::Snapshot(SnapshotEvent {
                timestamp: SystemTime::now(),
                peer: Some(peer),
                commands: commands.len(),
            }));
            commands
        })
    }

    fn snapshot_unsynchronized(&self) -> Vec<Command> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        CommandGenerator::new(&self.core.registry, &self.core.catalog, &self.core.repairer)
            .snapshot(&root)
    }

    /// Apply a batch of commands received from `origin` (`None` for commands of unknown or local
    /// origin), in order.
    ///
    /// A command that cannot be applied is dropped and reported, and the rest of the batch is still
    /// applied. A [`FatalError`] stops the batch and halts the engine: every later call returns
    /// [`FatalError::EngineHalted`].
    pub fn apply(
        &self,
        batch: Vec<Command>,
        origin: Option<PeerId>,
    ) -> Result<ApplyOutcome, FatalError> {
        if self.core.is_halted() {
            return Err(FatalError::EngineHalted);
        }

        let permit = self.core.synchronizer.acquire(OperationClass::IncomingCommands);
        let executor = CommandExecutor::new(&self.core, origin);
        let commands = batch.len();
        let mut outcome = ApplyOutcome::default();

        for command in batch {
            let forwarded = forwarded_copies(self.core.role, origin, &command);
            match executor.execute(command) {
                Ok(Ok(Executed::Skipped)) => {}
                Ok(Ok(executed)) => {
                    outcome.accepted += 1;
                    if let Some((relay, echo)) = forwarded {
                        outcome.relay.push(relay);
                        outcome.echo.extend(echo);
                    }
                    if let Executed::Partial(errors) = executed {
                        for error in errors {
                            log::warn!("partially applied command from {:?}: {}", origin, error);
                            self.report(error, &mut outcome);
                        }
                    }
                }
                Ok(Err(error)) => {
                    log::warn!("dropping command from {:?}: {}", origin, error);
                    self.report(error, &mut outcome);
                }
                Err(error) => {
                    drop(permit);
                    self.halt(error.clone());
                    return Err(error);
                }
            }
        }
        drop(permit);

        self.core.publish(Event::ApplyBatch(ApplyBatchEvent {
            timestamp: SystemTime::now(),
            origin,
            commands,
            accepted: outcome.accepted,
            errors: outcome.errors.len(),
        }));
        self.core.purge_if_due();
        Ok(outcome)
    }

    fn report(&self, error: CommandError, outcome: &mut ApplyOutcome) {
        self.core.publish(Event::from_command_error(error.clone()));
        outcome.errors.push(error);
    }

    fn halt(&self, error: FatalError) {
        log::error!("halting replication engine: {}", error);
        self.core.halted.store(true, Ordering::SeqCst);
        self.core.publish(Event::Fatal(FatalEvent {
            timestamp: SystemTime::now(),
            error,
        }));
    }

    /// Remove and return every queued [`Outgoing`] entry, oldest first.
    pub fn drain_outbox(&self) -> Vec<Outgoing> {
        self.core.outbox.lock().drain(..).collect()
    }

    /// Remove and return the oldest queued [`Outgoing`] entry.
    pub fn pop_outgoing(&self) -> Option<Outgoing> {
        self.core.outbox.lock().pop_front()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.core.outbox.lock().is_empty()
    }

    /// The object registered under `id`, if it is alive.
    pub fn object(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.core.registry.object(id)
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.core.registry
    }

    pub fn repairer(&self) -> &ListConflictRepairer {
        &self.core.repairer
    }

    pub fn synchronizer(&self) -> &WalkSynchronizer {
        &self.core.synchronizer
    }

    pub fn suppression(&self) -> &Suppression {
        &self.core.suppression
    }

    /// Evict dead registry entries now, regardless of the purge interval. Returns the number of
    /// evicted entries.
    pub fn purge(&self) -> usize {
        self.core.purge()
    }

    pub fn is_halted(&self) -> bool {
        self.core.is_halted()
    }

    /// Whether a root is set and, on a client, the snapshot that set it has been fully applied.
    pub fn is_model_ready(&self) -> bool {
        self.core.model_ready.load(Ordering::SeqCst)
    }
}

/// The copies of `command` a server forwards if it accepts it: one relay, and an echo unless the
/// command only matters to peers that have not seen it yet.
fn forwarded_copies(
    role: Role,
    origin: Option<PeerId>,
    command: &Command,
) -> Option<(Command, Option<Command>)> {
    if role != Role::Server {
        return None;
    }
    let echo = match command {
        Command::CreateObject(_) | Command::SetRoot(_) | Command::ClearReferences => None,
        _ if origin.is_some() => Some(command.clone()),
        _ => None,
    };
    Some((command.clone(), echo))
}
