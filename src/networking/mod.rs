/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The replica talks to its peers through a user-provided implementation of [`Network`]. The network
//! is expected to deliver the messages of one sender to one receiver in the order they were sent, and
//! to report connections and disconnections of peers as [`Message::Connected`] and
//! [`Message::Disconnected`].
//!
//! A network that moves bytes rather than values can frame its messages with a
//! [`CommandCodec`](crate::codec::CommandCodec).

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;

pub use messages::Message;
pub use network::Network;
