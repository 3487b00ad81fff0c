/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Conversion of command batches to and from bytes, for transports that move bytes.
//!
//! The engine itself only ever handles [`Command`]s. A [`Network`](crate::networking::Network)
//! implementation that talks to other processes picks a [`CommandCodec`] to frame its messages with.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{commands::Command, error::CodecError};

pub trait CommandCodec: Send + Sync {
    fn serialize(&self, commands: &[Command]) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<Command>, CodecError>;
}

/// Encodes a batch as a Borsh `Vec<Command>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BorshCodec;

impl CommandCodec for BorshCodec {
    fn serialize(&self, commands: &[Command]) -> Result<Vec<u8>, CodecError> {
        commands.to_vec().try_to_vec().map_err(CodecError::Encode)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<Command>, CodecError> {
        Vec::<Command>::try_from_slice(bytes).map_err(CodecError::Decode)
    }
}
