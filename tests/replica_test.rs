//! End to end: a server replica and two client replicas, each with their own background threads,
//! connected by a mock network.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use graph_replica::{
    model::{structurally_equal, ObjectRef},
    replica::{Configuration, Replica, ReplicaSpec},
    types::{ObjectId, Role},
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    model::{card, card_texts, factory, list_slot, Board},
    network::{mock_network, NetworkStub},
};

fn configuration(role: Role) -> Configuration {
    Configuration::builder()
        .role(role)
        .purge_interval(Duration::from_millis(100))
        .log_events(true)
        .build()
}

fn start_client(network: NetworkStub, model_ready: mpsc::Sender<ObjectId>) -> Replica {
    ReplicaSpec::builder()
        .factory(factory())
        .network(network)
        .configuration(configuration(Role::Client))
        .on_model_ready(move |event| {
            let _ = model_ready.send(event.root_id);
        })
        .build()
        .start()
}

/// Poll `condition` until it holds, failing the test after a generous timeout.
fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting until {}", description);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn root_of(replica: &Replica) -> ObjectRef {
    replica.engine().root().expect("replica has no root")
}

fn all_converged(server: &ObjectRef, clients: &[Replica]) -> bool {
    clients.iter().all(|client| {
        client
            .engine()
            .root()
            .is_some_and(|root| structurally_equal(server, &root))
    })
}

#[test]
fn replicas_converge_test() {
    setup_logger(LevelFilter::Info);

    // 1. Start a server that serves a board, and two clients.
    let board = Arc::new(Board::default());
    board.title.put("team board");
    board.cards.push(card("first"));
    let server_root: ObjectRef = board.clone();

    let mut networks = mock_network(2).into_iter();
    let server_network = networks.next().expect("no server network");
    let server = ReplicaSpec::builder()
        .factory(factory())
        .network(server_network)
        .configuration(configuration(Role::Server))
        .root(server_root.clone())
        .build()
        .start();
    let server_root_id = server.engine().root_id().expect("server has no root");

    let (model_ready_sender, model_ready) = mpsc::channel();
    let clients: Vec<Replica> = networks
        .map(|network| start_client(network, model_ready_sender.clone()))
        .collect();

    // 2. Each client announces its model once its snapshot has arrived.
    for _ in 0..clients.len() {
        let root_id = model_ready
            .recv_timeout(Duration::from_secs(10))
            .expect("a client never became ready");
        assert_eq!(root_id, server_root_id);
    }
    wait_until("the clients hold the server's graph", || {
        all_converged(&server_root, &clients)
    });

    // 3. An edit on one client reaches the server and the other client.
    list_slot(&root_of(&clients[0]), "cards").push(card("from client 1"));
    wait_until("the edit reaches everyone", || {
        board.cards.len() == 2 && all_converged(&server_root, &clients)
    });
    assert_eq!(card_texts(&board.cards), vec!["first", "from client 1"]);

    // 4. Concurrent edits on every replica converge.
    list_slot(&root_of(&clients[0]), "cards")
        .insert(0, card("a"))
        .expect("insert failed");
    list_slot(&root_of(&clients[1]), "cards")
        .insert(0, card("b"))
        .expect("insert failed");
    board.cards.push(card("c"));
    wait_until("the concurrent edits converge", || {
        board.cards.len() == 5 && all_converged(&server_root, &clients)
    });
    let mut texts = card_texts(&board.cards);
    texts.sort();
    assert_eq!(texts, vec!["a", "b", "c", "first", "from client 1"]);

    for client in &clients {
        assert!(!client.engine().is_halted());
    }
    assert!(!server.engine().is_halted());
}
