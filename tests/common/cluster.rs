//! An in-process cluster of one server engine and any number of client engines, with an explicit
//! transport: every batch of commands in flight to a peer waits in that peer's inbox until a test
//! delivers it. The outboxes of the engines are routed the same way the replica's driver routes them.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    time::Duration,
};

use graph_replica::{
    commands::Command,
    engine::{ApplyOutcome, Outgoing, ReplicationEngine},
    model::ObjectRef,
    replica::Configuration,
    types::{PeerId, Role},
};

use super::model::factory;

pub(crate) const SERVER: PeerId = PeerId::new(0);

pub(crate) fn configuration(role: Role) -> Configuration {
    Configuration::builder()
        .role(role)
        .reference_grace_period(Duration::from_secs(60))
        .purge_interval(Duration::from_secs(3600))
        .log_events(false)
        .build()
}

pub(crate) struct Cluster {
    pub(crate) server: ReplicationEngine,
    clients: Vec<(PeerId, ReplicationEngine)>,
    synchronized: BTreeSet<PeerId>,
    /// Batches on their way to the server, with their origin.
    server_inbox: VecDeque<(PeerId, Vec<Command>)>,
    /// Batches on their way to each client.
    client_inboxes: HashMap<PeerId, VecDeque<Vec<Command>>>,
    /// Every per-command error reported by any engine.
    pub(crate) errors: Vec<String>,
}

impl Cluster {
    pub(crate) fn new(root: ObjectRef) -> Cluster {
        let server = ReplicationEngine::new(factory(), &configuration(Role::Server));
        server.set_root(root);
        Cluster {
            server,
            clients: Vec::new(),
            synchronized: BTreeSet::new(),
            server_inbox: VecDeque::new(),
            client_inboxes: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Connect a new client. The client receives its snapshot once it is delivered.
    pub(crate) fn connect(&mut self) -> PeerId {
        let peer = PeerId::new(self.clients.len() as u64 + 1);
        let client = ReplicationEngine::new(factory(), &configuration(Role::Client));
        self.clients.push((peer, client));
        self.client_inboxes.insert(peer, VecDeque::new());
        self.server.snapshot_for(peer);
        self.collect();
        peer
    }

    pub(crate) fn client(&self, peer: PeerId) -> &ReplicationEngine {
        &self
            .clients
            .iter()
            .find(|(id, _)| *id == peer)
            .expect("unknown client")
            .1
    }

    pub(crate) fn peers(&self) -> Vec<PeerId> {
        self.clients.iter().map(|(peer, _)| *peer).collect()
    }

    /// Move everything the engines queued into the inboxes of their receivers.
    pub(crate) fn collect(&mut self) {
        for outgoing in self.server.drain_outbox() {
            match outgoing {
                Outgoing::Local(commands) => self.send_to_all_except(None, commands),
                Outgoing::Relay { origin, commands } => self.send_to_all_except(origin, commands),
                Outgoing::Echo { origin, commands } => {
                    if self.synchronized.contains(&origin) {
                        self.send_to_client(origin, commands);
                    }
                }
                Outgoing::Snapshot { peer, commands } => {
                    self.send_to_client(peer, commands);
                    self.synchronized.insert(peer);
                }
            }
        }

        for (peer, client) in &self.clients {
            for outgoing in client.drain_outbox() {
                match outgoing {
                    Outgoing::Local(commands) => self.server_inbox.push_back((*peer, commands)),
                    other => panic!("a client queued {:?}", other),
                }
            }
        }
    }

    fn send_to_all_except(&mut self, except: Option<PeerId>, commands: Vec<Command>) {
        let peers: Vec<PeerId> = self
            .synchronized
            .iter()
            .filter(|peer| Some(**peer) != except)
            .copied()
            .collect();
        for peer in peers {
            self.send_to_client(peer, commands.clone());
        }
    }

    fn send_to_client(&mut self, peer: PeerId, commands: Vec<Command>) {
        if let Some(inbox) = self.client_inboxes.get_mut(&peer) {
            inbox.push_back(commands);
        }
    }

    /// Deliver the oldest batch waiting for the server. Returns `false` if there was none.
    pub(crate) fn deliver_to_server(&mut self) -> bool {
        let Some((origin, commands)) = self.server_inbox.pop_front() else {
            return false;
        };
        let outcome = self
            .server
            .apply(commands, Some(origin))
            .expect("server halted");
        self.record(outcome);
        self.collect();
        true
    }

    /// Deliver the oldest batch waiting for `peer`. Returns `false` if there was none.
    pub(crate) fn deliver_to_client(&mut self, peer: PeerId) -> bool {
        let Some(commands) = self
            .client_inboxes
            .get_mut(&peer)
            .and_then(VecDeque::pop_front)
        else {
            return false;
        };
        let outcome = self
            .client(peer)
            .apply(commands, Some(SERVER))
            .expect("client halted");
        self.record(outcome);
        self.collect();
        true
    }

    fn record(&mut self, outcome: ApplyOutcome) {
        self.errors
            .extend(outcome.errors.iter().map(|error| error.to_string()));
    }

    /// Deliver everything in flight, until no engine has anything left to send.
    pub(crate) fn settle(&mut self) {
        self.collect();
        loop {
            let mut delivered = false;
            while self.deliver_to_server() {
                delivered = true;
            }
            for peer in self.peers() {
                while self.deliver_to_client(peer) {
                    delivered = true;
                }
            }
            if !delivered {
                return;
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.server_inbox.len()
            + self
                .client_inboxes
                .values()
                .map(VecDeque::len)
                .sum::<usize>()
    }
}
