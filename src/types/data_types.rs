/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identifiers that exist only to name things across peers, and do not have any "active" behavior.

use std::fmt::{self, Debug, Display, Formatter};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};

/// Globally unique, randomly generated 128-bit identifier of an observable object or of one of its
/// slots.
///
/// An `ObjectId` is assigned the first time an object (or slot) is referenced by a generated command,
/// and stays stable for the lifetime of that object on every peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct ObjectId(u128);

impl ObjectId {
    /// Create a new `ObjectId` wrapping `int`.
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Draw a fresh random `ObjectId`.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Get the inner `u128` value of this `ObjectId`.
    pub const fn int(&self) -> u128 {
        self.0
    }

    pub fn bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&first_seven_base64_chars(&self.bytes()))
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

/// Random identifier of one state of a replicated list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct VersionId(u128);

impl VersionId {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Draw a fresh random `VersionId`.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&first_seven_base64_chars(&self.0.to_le_bytes()))
    }
}

impl Debug for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self)
    }
}

/// The `(from, to)` stamp carried by every list-mutating command.
///
/// A list command may only be applied to a list whose current approved version equals `from`. Once
/// applied, the list's state is identified by `to`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ListVersion {
    pub from: VersionId,
    pub to: VersionId,
}

impl ListVersion {
    /// Placeholder carried by a list command that has not been stamped yet.
    pub const UNSTAMPED: ListVersion = ListVersion::new(VersionId::new(0), VersionId::new(0));

    pub const fn new(from: VersionId, to: VersionId) -> Self {
        Self { from, to }
    }

    /// A version stamp that moves the list from `from` to a fresh random version.
    pub fn successor_of(from: VersionId) -> Self {
        Self {
            from,
            to: VersionId::random(),
        }
    }
}

impl Debug for ListVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Identifies a peer on the transport. Assigned by the [`Network`](crate::networking::Network)
/// implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct PeerId(u64);

impl PeerId {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The part a replication engine plays in the topology.
///
/// Exactly one peer, the server, is authoritative: it decides the order in which concurrent edits take
/// effect, and relays every edit it accepts to every other peer. Every other peer is a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    Client,
}

/// Get a more readable representation of a byte sequence by base64-encoding it and taking the first 7
/// characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}
