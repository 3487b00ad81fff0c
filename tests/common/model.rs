//! A small domain model used by the integration tests: boards that hold cards, notes whose constructor
//! fills their slots, and zero-slot markers.

use std::sync::Arc;

use graph_replica::{
    model::{
        Element, ListSlot, MapSlot, ObjectRef, Observable, SetSlot, SlotHandle, TypeFactory,
        ValueSlot,
    },
    types::SimpleValue,
};

#[derive(Default)]
pub(crate) struct Board {
    pub(crate) title: ValueSlot,
    pub(crate) cards: ListSlot,
    pub(crate) tags: SetSlot,
    pub(crate) labels: MapSlot,
}

impl Observable for Board {
    fn type_tag(&self) -> &'static str {
        "Board"
    }

    fn slots(&self) -> Vec<(&'static str, SlotHandle)> {
        vec![
            ("title", self.title.handle()),
            ("cards", self.cards.handle()),
            ("tags", self.tags.handle()),
            ("labels", self.labels.handle()),
        ]
    }
}

#[derive(Default)]
pub(crate) struct Card {
    pub(crate) text: ValueSlot,
    pub(crate) next: ValueSlot,
    pub(crate) children: ListSlot,
}

impl Observable for Card {
    fn type_tag(&self) -> &'static str {
        "Card"
    }

    fn slots(&self) -> Vec<(&'static str, SlotHandle)> {
        vec![
            ("text", self.text.handle()),
            ("next", self.next.handle()),
            ("children", self.children.handle()),
        ]
    }
}

/// A type whose constructor does not leave its slots empty.
pub(crate) struct Note {
    pub(crate) title: ValueSlot,
    pub(crate) items: ListSlot,
}

impl Default for Note {
    fn default() -> Self {
        let note = Note {
            title: ValueSlot::with("untitled"),
            items: ListSlot::default(),
        };
        note.items.push("placeholder");
        note
    }
}

impl Observable for Note {
    fn type_tag(&self) -> &'static str {
        "Note"
    }

    fn slots(&self) -> Vec<(&'static str, SlotHandle)> {
        vec![("title", self.title.handle()), ("items", self.items.handle())]
    }
}

/// An object with no slots: replicated by identity only.
#[derive(Default)]
pub(crate) struct Marker;

impl Observable for Marker {
    fn type_tag(&self) -> &'static str {
        "Marker"
    }

    fn slots(&self) -> Vec<(&'static str, SlotHandle)> {
        Vec::new()
    }
}

pub(crate) fn factory() -> TypeFactory {
    TypeFactory::new()
        .register::<Board>()
        .register::<Card>()
        .register::<Note>()
        .register::<Marker>()
}

pub(crate) fn card(text: &str) -> Arc<Card> {
    let card = Card::default();
    card.text.put(text);
    Arc::new(card)
}

pub(crate) fn value_slot(object: &ObjectRef, name: &str) -> ValueSlot {
    match object.slot(name) {
        Some(SlotHandle::Value(slot)) => slot,
        other => panic!("{} is not a value slot: {:?}", name, other),
    }
}

pub(crate) fn list_slot(object: &ObjectRef, name: &str) -> ListSlot {
    match object.slot(name) {
        Some(SlotHandle::List(slot)) => slot,
        other => panic!("{} is not a list slot: {:?}", name, other),
    }
}

pub(crate) fn set_slot(object: &ObjectRef, name: &str) -> SetSlot {
    match object.slot(name) {
        Some(SlotHandle::Set(slot)) => slot,
        other => panic!("{} is not a set slot: {:?}", name, other),
    }
}

pub(crate) fn map_slot(object: &ObjectRef, name: &str) -> MapSlot {
    match object.slot(name) {
        Some(SlotHandle::Map(slot)) => slot,
        other => panic!("{} is not a map slot: {:?}", name, other),
    }
}

/// The texts of a list that holds only simple text elements.
pub(crate) fn texts(list: &ListSlot) -> Vec<String> {
    list.to_vec()
        .into_iter()
        .map(|element| match element {
            Element::Simple(SimpleValue::Text(text)) => text,
            other => panic!("expected a text element, found {:?}", other),
        })
        .collect()
}

/// The texts of the cards held by a list of cards.
pub(crate) fn card_texts(list: &ListSlot) -> Vec<String> {
    list.to_vec()
        .into_iter()
        .map(|element| {
            let card = element.as_object().expect("expected a card").clone();
            match value_slot(&card, "text").get() {
                Some(Element::Simple(SimpleValue::Text(text))) => text,
                other => panic!("card without text: {:?}", other),
            }
        })
        .collect()
}
