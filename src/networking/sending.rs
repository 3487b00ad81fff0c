/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use crate::{commands::Command, types::PeerId};

use super::{messages::Message, network::Network};

/// Handle for sending and broadcasting messages to the [`Network`].
///
/// It can be used to send or broadcast instances of any type that implement the [`Into<Message>`]
/// trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: PeerId, msg: S) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) {
        self.network.broadcast(msg.into())
    }

    /// Send `commands` to each of `peers` except `except`. Returns the number of peers sent to.
    pub(crate) fn send_to_all_except<'a>(
        &mut self,
        peers: impl IntoIterator<Item = &'a PeerId>,
        except: Option<PeerId>,
        commands: &[Command],
    ) -> usize {
        let mut sent = 0;
        for peer in peers {
            if Some(*peer) != except {
                self.send(*peer, commands.to_vec());
                sent += 1;
            }
        }
        sent
    }
}
