//! Replaying the snapshot of a graph on a fresh engine reproduces the graph.

use std::sync::Arc;

use graph_replica::{
    commands::{Command, CreateObject, SetValue},
    engine::{Outgoing, ReplicationEngine},
    error::{CommandError, ErrorKind},
    model::{structurally_equal, Element, ObjectRef, SlotHandle, TypeFactory},
    types::{ObjectId, Role, SimpleValue, Value},
};
use log::LevelFilter;
use proptest::prelude::*;

mod common;

use crate::common::{
    cluster::{configuration, SERVER},
    logging::setup_logger,
    model::{card, card_texts, factory, list_slot, texts, value_slot, Board, Card, Marker, Note},
};

fn server_with(root: ObjectRef) -> ReplicationEngine {
    let server = ReplicationEngine::new(factory(), &configuration(Role::Server));
    server.set_root(root);
    server
}

fn replay(snapshot: Vec<Command>) -> ReplicationEngine {
    let client = ReplicationEngine::new(factory(), &configuration(Role::Client));
    let outcome = client.apply(snapshot, Some(SERVER)).expect("client halted");
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    client
}

#[test]
fn snapshot_round_trip_test() {
    setup_logger(LevelFilter::Info);

    // 1. Build a graph with shared references, a cycle, leaves, and objects as set members and map keys.
    let board = Arc::new(Board::default());
    board.title.put("sprint");

    let first = card("first");
    let second = card("second");
    first.next.put(second.clone());
    second.next.put(first.clone());
    second.children.push(card("nested"));
    second.children.push(Arc::new(Marker));

    board.cards.push(first.clone());
    board.cards.push(second.clone());
    // The same card held twice.
    board.cards.push(first.clone());

    board.tags.insert("urgent");
    board.tags.insert(second.clone());
    board.labels.insert("owner", "alice");
    board.labels.insert(first.clone(), 3);

    let root: ObjectRef = board.clone();
    let server = server_with(root.clone());

    // 2. Replay the snapshot on a fresh client.
    let client = replay(server.snapshot());

    // 3. The client's graph is a copy of the server's, not the same objects.
    let client_root = client.root().expect("client has no root");
    assert!(!Arc::ptr_eq(&client_root, &root));
    assert!(structurally_equal(&root, &client_root));
    assert!(client.is_model_ready());
    assert_eq!(
        card_texts(&list_slot(&client_root, "cards")),
        vec!["first", "second", "first"]
    );

    // 4. Shared references stay shared.
    let client_cards = list_slot(&client_root, "cards").to_vec();
    assert_eq!(client_cards[0], client_cards[2]);
    assert_ne!(client_cards[0], client_cards[1]);
}

#[test]
fn snapshot_ends_with_set_root_and_clear_references_test() {
    let board = Arc::new(Board::default());
    let server = server_with(board);

    let snapshot = server.snapshot();
    let root_id = server.root_id().expect("server has no root");

    assert!(matches!(snapshot.first(), Some(Command::CreateObject(create)) if create.id == root_id));
    assert_eq!(snapshot[snapshot.len() - 1], Command::ClearReferences);
    assert!(matches!(&snapshot[snapshot.len() - 2], Command::SetRoot(set_root) if set_root.id == root_id));
}

#[test]
fn structural_equality_ignores_identity_but_not_content_test() {
    let a: ObjectRef = card("same");
    let b: ObjectRef = card("same");
    let c: ObjectRef = card("different");
    assert!(structurally_equal(&a, &b));
    assert!(!structurally_equal(&a, &c));

    // A card whose successor is itself is not equal to a card whose successor is another card.
    let looped = card("x");
    looped.next.put(looped.clone());
    let chained = card("x");
    chained.next.put(card("x"));
    let (looped, chained): (ObjectRef, ObjectRef) = (looped, chained);
    assert!(!structurally_equal(&looped, &chained));
}

#[test]
fn unknown_type_is_reported_and_does_not_halt_the_engine_test() {
    let board = Arc::new(Board::default());
    board.cards.push(card("orphan"));
    board.title.put("kept");
    let server = server_with(board);

    // This client does not know about cards.
    let client = ReplicationEngine::new(
        TypeFactory::new().register::<Board>(),
        &configuration(Role::Client),
    );
    let outcome = client
        .apply(server.snapshot(), Some(SERVER))
        .expect("client halted");

    assert!(!outcome.errors.is_empty());
    assert_eq!(outcome.errors[0].kind(), ErrorKind::Construction);
    assert!(outcome.errors[1..]
        .iter()
        .all(|error| error.kind() == ErrorKind::Desync));
    assert!(!client.is_halted());

    // Everything that did not depend on the card still arrived.
    let client_root = client.root().expect("client has no root");
    let title = match client_root.slot("title") {
        Some(SlotHandle::Value(title)) => title.get(),
        _ => None,
    };
    assert_eq!(title, Some(Element::Simple(SimpleValue::text("kept"))));
}

#[test]
fn emptied_constructor_defaults_stay_empty_on_replay_test() {
    // 1. One note has had its defaults cleared, the other keeps them and adds to them.
    let emptied = Arc::new(Note::default());
    emptied.title.clear();
    emptied.items.clear();
    let extended = Arc::new(Note::default());
    extended.items.push("second");

    let board = Arc::new(Board::default());
    board.cards.push(emptied);
    board.cards.push(extended);
    let root: ObjectRef = board.clone();
    let server = server_with(root.clone());

    // 2. The snapshot reproduces both, defaults and all.
    let client = replay(server.snapshot());
    let client_root = client.root().expect("client has no root");
    assert!(structurally_equal(&root, &client_root));
    let notes = list_slot(&client_root, "cards").to_vec();
    let client_emptied = notes[0].as_object().expect("expected a note").clone();
    assert_eq!(value_slot(&client_emptied, "title").get(), None);
    assert!(list_slot(&client_emptied, "items").is_empty());
    let client_extended = notes[1].as_object().expect("expected a note").clone();
    assert_eq!(
        texts(&list_slot(&client_extended, "items")),
        vec!["placeholder", "second"]
    );

    // 3. So does a delta that creates a note.
    let late = Arc::new(Note::default());
    late.items.clear();
    board.cards.push(late);
    let delta: Vec<Command> = server
        .drain_outbox()
        .into_iter()
        .flat_map(|outgoing| match outgoing {
            Outgoing::Local(commands) => commands,
            other => panic!("expected local commands, found {:?}", other),
        })
        .collect();
    let outcome = client.apply(delta, Some(SERVER)).expect("client halted");
    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    assert!(structurally_equal(&root, &client_root));
    let client_late = list_slot(&client_root, "cards")
        .get(2)
        .and_then(|element| element.as_object().cloned())
        .expect("expected a note");
    assert!(list_slot(&client_late, "items").is_empty());
    assert_eq!(
        value_slot(&client_late, "title").get(),
        Some(Element::Simple(SimpleValue::text("untitled")))
    );
}

#[test]
fn undeclared_slot_name_leaves_the_rest_of_the_object_usable_test() {
    let client = ReplicationEngine::new(factory(), &configuration(Role::Client));
    let (id, text_id) = (ObjectId::random(), ObjectId::random());

    // 1. A card described with a slot this build of Card does not have.
    let create = Command::CreateObject(CreateObject {
        id,
        type_tag: "Card".to_string(),
        slot_ids: vec![
            ("text".to_string(), text_id),
            ("renamed".to_string(), ObjectId::random()),
            ("children".to_string(), ObjectId::random()),
        ],
    });
    let set_text = Command::SetValue(SetValue {
        slot_id: text_id,
        value: Some(Value::Simple(SimpleValue::text("still here"))),
    });
    let outcome = client
        .apply(vec![create, set_text], Some(SERVER))
        .expect("client halted");

    // 2. Only the unknown slot is reported.
    assert_eq!(
        outcome.errors,
        vec![CommandError::UnknownSlotName {
            type_tag: "Card".to_string(),
            slot_name: "renamed".to_string(),
        }]
    );
    assert_eq!(outcome.errors[0].kind(), ErrorKind::Desync);
    assert_eq!(outcome.accepted, 2);

    // 3. The card and its known slots are registered and usable.
    let card = client.object(&id).expect("the card was not registered");
    assert_eq!(
        value_slot(&card, "text").get(),
        Some(Element::Simple(SimpleValue::text("still here")))
    );
    assert!(client.registry().contains(&text_id));
    assert!(!client.is_halted());
}

/// Shape of a randomly generated card tree: each card has a text and children.
#[derive(Clone, Debug)]
struct Tree {
    text: String,
    children: Vec<Tree>,
}

fn tree() -> impl Strategy<Value = Tree> {
    let text = || (0u32..1000).prop_map(|n| format!("card {}", n));
    let leaf = text().prop_map(|text| Tree {
        text,
        children: Vec::new(),
    });
    leaf.prop_recursive(3, 24, 4, move |inner| {
        (text(), prop::collection::vec(inner, 0..4))
            .prop_map(|(text, children)| Tree { text, children })
    })
}

fn build(tree: &Tree) -> Arc<Card> {
    let card = card(&tree.text);
    for child in &tree.children {
        card.children.push(build(child));
    }
    card
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_trees_round_trip(trees in prop::collection::vec(tree(), 0..5)) {
        let board = Arc::new(Board::default());
        for tree in &trees {
            board.cards.push(build(tree));
        }
        let root: ObjectRef = board;
        let server = server_with(root.clone());

        let client = replay(server.snapshot());

        let client_root = client.root().expect("client has no root");
        prop_assert!(structurally_equal(&root, &client_root));
    }
}
