/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between replicas.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::commands::Command;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// The peer that sent this message just connected. Delivered by the network itself.
    Connected,
    /// A batch of commands, to be applied in order.
    Commands(Vec<Command>),
    /// The peer that sent this message is gone. Delivered by the network itself. Nothing further is sent
    /// to the peer.
    Disconnected,
}

impl From<Vec<Command>> for Message {
    fn from(commands: Vec<Command>) -> Self {
        Message::Commands(commands)
    }
}
