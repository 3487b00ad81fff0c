//! Command batches survive the trip through bytes, including values that nest other values.

use graph_replica::{
    codec::{BorshCodec, CommandCodec},
    commands::{AddToList, Command, CreateObject, PutToMap, SetValue},
    types::{ListVersion, ObjectId, SimpleValue, Value, VersionId},
};

fn nested_tuple() -> SimpleValue {
    SimpleValue::Tuple(vec![
        SimpleValue::Int(-3),
        SimpleValue::text("pair"),
        SimpleValue::Tuple(vec![
            SimpleValue::float(0.5),
            SimpleValue::Bytes(vec![0, 255]),
            SimpleValue::Tuple(Vec::new()),
        ]),
        SimpleValue::Bool(true),
    ])
}

#[test]
fn batch_with_nested_values_decodes_to_itself_test() {
    let list_id = ObjectId::random();
    let batch = vec![
        Command::CreateObject(CreateObject {
            id: ObjectId::random(),
            type_tag: "Card".to_string(),
            slot_ids: vec![("text".to_string(), ObjectId::random())],
        }),
        Command::SetValue(SetValue {
            slot_id: ObjectId::random(),
            value: Some(Value::Simple(nested_tuple())),
        }),
        Command::SetValue(SetValue {
            slot_id: ObjectId::random(),
            value: None,
        }),
        Command::AddToList(AddToList {
            list_id,
            version: ListVersion::new(VersionId::new(1), VersionId::new(2)),
            value: Value::Simple(nested_tuple()),
            position: 4,
        }),
        Command::PutToMap(PutToMap {
            map_id: ObjectId::random(),
            key: Value::Simple(nested_tuple()),
            value: Value::Reference(list_id),
        }),
        Command::ClearReferences,
    ];

    let codec = BorshCodec;
    let bytes = codec.serialize(&batch).expect("encode failed");
    let decoded = codec.deserialize(&bytes).expect("decode failed");
    assert_eq!(decoded, batch);
}

#[test]
fn unknown_value_tag_is_rejected_test() {
    let batch = vec![Command::SetValue(SetValue {
        slot_id: ObjectId::new(7),
        value: Some(Value::Simple(SimpleValue::Int(1))),
    })];
    let codec = BorshCodec;
    let mut bytes = codec.serialize(&batch).expect("encode failed");

    // The SimpleValue tag sits right before the trailing eight byte integer.
    let tag = bytes.len() - 9;
    assert_eq!(bytes[tag], 1);
    bytes[tag] = 42;
    assert!(codec.deserialize(&bytes).is_err());

    // A truncated batch does not decode either.
    let bytes = codec.serialize(&batch).expect("encode failed");
    assert!(codec.deserialize(&bytes[..bytes.len() - 1]).is_err());
}
