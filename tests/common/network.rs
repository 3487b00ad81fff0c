use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use graph_replica::{
    codec::{BorshCodec, CommandCodec},
    networking::{Message, Network},
    types::PeerId,
};

/// What actually travels between stubs: command batches are encoded to bytes, as a real transport
/// would have to.
enum Frame {
    Connected,
    Commands(Vec<u8>),
    Disconnected,
}

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_peer_id: PeerId,
    /// Peers this stub can reach. A client only reaches the server.
    reachable: HashMap<PeerId, Sender<(PeerId, Frame)>>,
    inbox: Arc<Mutex<Receiver<(PeerId, Frame)>>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Message) {
        for peer in self.reachable.keys().copied().collect::<Vec<_>>() {
            self.send(peer, message.clone());
        }
    }

    fn send(&mut self, peer: PeerId, message: Message) {
        let frame = match message {
            Message::Connected => Frame::Connected,
            Message::Commands(commands) => {
                Frame::Commands(BorshCodec.serialize(&commands).unwrap())
            }
            Message::Disconnected => Frame::Disconnected,
        };
        if let Some(peer) = self.reachable.get(&peer) {
            let _ = peer.send((self.my_peer_id, frame));
        }
    }

    fn recv(&mut self) -> Option<(PeerId, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok((origin, frame)) => {
                let message = match frame {
                    Frame::Connected => Message::Connected,
                    Frame::Commands(bytes) => {
                        Message::Commands(BorshCodec.deserialize(&bytes).unwrap())
                    }
                    Frame::Disconnected => Message::Disconnected,
                };
                Some((origin, message))
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Create stubs for a server and `clients` clients, in that order. Every client announces itself to
/// the server as soon as it is created.
pub(crate) fn mock_network(clients: u64) -> Vec<NetworkStub> {
    let server = PeerId::new(0);
    let (server_sender, server_inbox) = mpsc::channel();

    let mut to_clients = HashMap::new();
    let mut client_stubs = Vec::new();
    for i in 1..=clients {
        let peer = PeerId::new(i);
        let (sender, inbox) = mpsc::channel();
        to_clients.insert(peer, sender);
        client_stubs.push(NetworkStub {
            my_peer_id: peer,
            reachable: HashMap::from([(server, server_sender.clone())]),
            inbox: Arc::new(Mutex::new(inbox)),
        });
        let _ = server_sender.send((peer, Frame::Connected));
    }

    let mut stubs = vec![NetworkStub {
        my_peer_id: server,
        reachable: to_clients,
        inbox: Arc::new(Mutex::new(server_inbox)),
    }];
    stubs.extend(client_stubs);
    stubs
}
