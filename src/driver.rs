/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The driver thread: the loop that connects a [`ReplicationEngine`] to the network.
//!
//! Each iteration of the loop:
//! 1. Handles at most one message from the poller:
//!     * `Connected`: on a server, queues a snapshot for the new peer.
//!     * `Commands`: applies the batch.
//!     * `Disconnected`: stops sending anything to the peer.
//! 2. Sends every queued [`Outgoing`] entry, in order:
//!     * A server sends its local changes and relays to every synchronized peer (except the origin of
//!       a relay), echoes to their origin, and a snapshot to the peer it was taken for. A peer becomes
//!       synchronized exactly when its snapshot is sent.
//!     * A client sends its local changes to the server, until the server disconnects.
//! 3. Purges the registry if the purge interval has elapsed.

use std::{
    collections::BTreeSet,
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    engine::{Outgoing, ReplicationEngine},
    error::FatalError,
    events::{Event, PeerConnectedEvent, PeerDisconnectedEvent, SendCommandsEvent},
    networking::{messages::Message, network::Network, sending::SenderHandle},
    types::{PeerId, Role},
};

pub(crate) fn start_driver<N: Network + 'static>(
    engine: ReplicationEngine,
    network: N,
    messages: Receiver<(PeerId, Message)>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    purge_interval: Duration,
) -> JoinHandle<()> {
    let mut driver = Driver {
        engine,
        sender: SenderHandle::new(network),
        event_publisher,
        connected: BTreeSet::new(),
        synchronized: BTreeSet::new(),
        server_disconnected: false,
    };

    thread::spawn(move || {
        let mut last_purge = Instant::now();
        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match messages.recv_timeout(Duration::from_millis(1)) {
                Ok((origin, msg)) => driver.on_message(origin, msg),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }

            driver.flush();

            if last_purge.elapsed() >= purge_interval {
                driver.engine.purge();
                last_purge = Instant::now();
            }
        }
    })
}

struct Driver<N: Network> {
    engine: ReplicationEngine,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
    /// Peers that connected and have not disconnected since.
    connected: BTreeSet<PeerId>,
    /// Connected peers that have been sent a snapshot.
    synchronized: BTreeSet<PeerId>,
    server_disconnected: bool,
}

impl<N: Network> Driver<N> {
    fn on_message(&mut self, origin: PeerId, msg: Message) {
        match msg {
            Message::Connected => {
                Event::publish(
                    &self.event_publisher,
                    Event::PeerConnected(PeerConnectedEvent {
                        timestamp: SystemTime::now(),
                        peer: origin,
                    }),
                );
                if self.engine.role() == Role::Server {
                    self.connected.insert(origin);
                    self.engine.snapshot_for(origin);
                }
            }

            Message::Commands(commands) => {
                if self.engine.is_halted() {
                    return;
                }
                match self.engine.apply(commands, Some(origin)) {
                    Ok(_) => (),
                    Err(FatalError::EngineHalted) => (),
                    Err(error) => log::error!("batch from peer {} stopped the engine: {}", origin, error),
                }
            }

            Message::Disconnected => {
                Event::publish(
                    &self.event_publisher,
                    Event::PeerDisconnected(PeerDisconnectedEvent {
                        timestamp: SystemTime::now(),
                        peer: origin,
                    }),
                );
                match self.engine.role() {
                    Role::Server => {
                        self.connected.remove(&origin);
                        self.synchronized.remove(&origin);
                    }
                    Role::Client => self.server_disconnected = true,
                }
            }
        }
    }

    fn flush(&mut self) {
        while let Some(outgoing) = self.engine.pop_outgoing() {
            match self.engine.role() {
                Role::Server => self.route_from_server(outgoing),
                Role::Client => self.route_from_client(outgoing),
            }
        }
    }

    fn route_from_server(&mut self, outgoing: Outgoing) {
        match outgoing {
            Outgoing::Local(commands) => {
                let sent = self
                    .sender
                    .send_to_all_except(&self.synchronized, None, &commands);
                if sent > 0 {
                    self.publish_send(None, commands.len());
                }
            }
            Outgoing::Relay { origin, commands } => {
                let sent = self
                    .sender
                    .send_to_all_except(&self.synchronized, origin, &commands);
                if sent > 0 {
                    self.publish_send(None, commands.len());
                }
            }
            Outgoing::Echo { origin, commands } => {
                if self.synchronized.contains(&origin) {
                    let count = commands.len();
                    self.sender.send(origin, commands);
                    self.publish_send(Some(origin), count);
                }
            }
            Outgoing::Snapshot { peer, commands } => {
                if self.connected.contains(&peer) {
                    let count = commands.len();
                    self.sender.send(peer, commands);
                    self.synchronized.insert(peer);
                    self.publish_send(Some(peer), count);
                }
            }
        }
    }

    fn route_from_client(&mut self, outgoing: Outgoing) {
        match outgoing {
            Outgoing::Local(commands) => {
                if !self.server_disconnected {
                    let count = commands.len();
                    self.sender.broadcast(commands);
                    self.publish_send(None, count);
                }
            }
            other => log::warn!(
                "a client has nowhere to send {} queued commands",
                other.commands().len()
            ),
        }
    }

    fn publish_send(&self, peer: Option<PeerId>, commands: usize) {
        Event::publish(
            &self.event_publisher,
            Event::SendCommands(SendCommandsEvent {
                timestamp: SystemTime::now(),
                peer,
                commands,
            }),
        );
    }
}
