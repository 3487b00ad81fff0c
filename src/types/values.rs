/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Values that travel inside commands.
//!
//! Slots of an observable object hold either a [`SimpleValue`], which is copied by value between
//! peers, or a reference to another observable object. On the wire, the latter is replaced by the
//! referenced object's [`ObjectId`], giving the [`Value`] type.

use std::{
    fmt::{self, Debug, Formatter},
    io::{self, Read, Write},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::ObjectId;

/// An opaque, by-value payload: strings, numbers, and value objects that have no observable slots.
///
/// Floats are stored as their IEEE-754 bit pattern so that `SimpleValue` can be used as a set element
/// or a map key. Two floats are therefore equal exactly when their bits are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum SimpleValue {
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Bytes(Vec<u8>),
    Tuple(Vec<SimpleValue>),
}

impl SimpleValue {
    pub fn float(value: f64) -> Self {
        SimpleValue::Float(value.to_bits())
    }

    pub fn text(value: impl Into<String>) -> Self {
        SimpleValue::Text(value.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SimpleValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SimpleValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SimpleValue::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SimpleValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

// Written out by hand because `Tuple` nests `SimpleValue` inside itself. The layout is what the derive
// would produce: a one byte variant tag, then the fields.
impl BorshSerialize for SimpleValue {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            SimpleValue::Bool(b) => {
                0u8.serialize(writer)?;
                b.serialize(writer)
            }
            SimpleValue::Int(i) => {
                1u8.serialize(writer)?;
                i.serialize(writer)
            }
            SimpleValue::Float(bits) => {
                2u8.serialize(writer)?;
                bits.serialize(writer)
            }
            SimpleValue::Text(s) => {
                3u8.serialize(writer)?;
                s.serialize(writer)
            }
            SimpleValue::Bytes(bytes) => {
                4u8.serialize(writer)?;
                bytes.serialize(writer)
            }
            SimpleValue::Tuple(items) => {
                5u8.serialize(writer)?;
                let len = u32::try_from(items.len())
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "tuple too long"))?;
                len.serialize(writer)?;
                for item in items {
                    item.serialize(writer)?;
                }
                Ok(())
            }
        }
    }
}

impl BorshDeserialize for SimpleValue {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let tag = u8::deserialize_reader(reader)?;
        match tag {
            0 => Ok(SimpleValue::Bool(bool::deserialize_reader(reader)?)),
            1 => Ok(SimpleValue::Int(i64::deserialize_reader(reader)?)),
            2 => Ok(SimpleValue::Float(u64::deserialize_reader(reader)?)),
            3 => Ok(SimpleValue::Text(String::deserialize_reader(reader)?)),
            4 => Ok(SimpleValue::Bytes(Vec::<u8>::deserialize_reader(reader)?)),
            5 => {
                let len = u32::deserialize_reader(reader)?;
                // The length comes off the wire, so it does not size the allocation up front.
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(SimpleValue::deserialize_reader(reader)?);
                }
                Ok(SimpleValue::Tuple(items))
            }
            tag => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown SimpleValue variant {}", tag),
            )),
        }
    }
}

impl Debug for SimpleValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SimpleValue::Bool(b) => write!(f, "{}", b),
            SimpleValue::Int(i) => write!(f, "{}", i),
            SimpleValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            SimpleValue::Text(s) => write!(f, "{:?}", s),
            SimpleValue::Bytes(bytes) => write!(f, "bytes[{}]", bytes.len()),
            SimpleValue::Tuple(items) => f.debug_tuple("").field(items).finish(),
        }
    }
}

impl From<bool> for SimpleValue {
    fn from(value: bool) -> Self {
        SimpleValue::Bool(value)
    }
}

impl From<i64> for SimpleValue {
    fn from(value: i64) -> Self {
        SimpleValue::Int(value)
    }
}

impl From<i32> for SimpleValue {
    fn from(value: i32) -> Self {
        SimpleValue::Int(value as i64)
    }
}

impl From<f64> for SimpleValue {
    fn from(value: f64) -> Self {
        SimpleValue::float(value)
    }
}

impl From<&str> for SimpleValue {
    fn from(value: &str) -> Self {
        SimpleValue::Text(value.to_string())
    }
}

impl From<String> for SimpleValue {
    fn from(value: String) -> Self {
        SimpleValue::Text(value)
    }
}

/// The wire form of a slot element: either a reference to an observable object by id, or a simple
/// value carried by value.
#[derive(Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum Value {
    Reference(ObjectId),
    Simple(SimpleValue),
}

impl Value {
    /// The referenced object id, if this value is a reference.
    pub fn reference(&self) -> Option<ObjectId> {
        match self {
            Value::Reference(id) => Some(*id),
            Value::Simple(_) => None,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reference(id) => write!(f, "@{}", id),
            Value::Simple(simple) => Debug::fmt(simple, f),
        }
    }
}

impl From<SimpleValue> for Value {
    fn from(value: SimpleValue) -> Self {
        Value::Simple(value)
    }
}
