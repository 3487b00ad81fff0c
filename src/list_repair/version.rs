/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Version repair: re-stamping commands so that they form one contiguous version chain.

use crate::{
    commands::ListCommand,
    types::{ListVersion, VersionId},
};

/// Give every command in `commands` a fresh `(from, to)` pair, chained so that the first command moves
/// the list from `anchor`, and each following command moves it from the previous command's `to`.
/// Returns the `to` of the last command, or `anchor` if there are no commands.
pub fn rechain<'a>(
    commands: impl IntoIterator<Item = &'a mut ListCommand>,
    anchor: VersionId,
) -> VersionId {
    commands.into_iter().fold(anchor, |from, command| {
        let version = ListVersion::successor_of(from);
        command.set_version(version);
        version.to
    })
}

/// `count` chained versions, the first of which moves the list from `from` and the last of which
/// moves it to `to`. Intermediate versions are fresh. `count` must be at least one.
pub fn chain_between(from: VersionId, to: VersionId, count: usize) -> Vec<ListVersion> {
    let mut tos: Vec<VersionId> = (1..count).map(|_| VersionId::random()).collect();
    tos.push(to);
    let mut from = from;
    tos.into_iter()
        .map(|to| {
            let version = ListVersion::new(from, to);
            from = to;
            version
        })
        .collect()
}

/// `count` chained versions, starting from a fresh version and ending at `end`.
///
/// Used to replay the content of a list into a fresh peer: the receiving list has no version yet, so
/// it accepts the first command of the chain, and ends up at exactly the version the sending list is
/// at.
pub fn chain_ending_at(end: VersionId, count: usize) -> Vec<ListVersion> {
    if count == 0 {
        return Vec::new();
    }
    chain_between(VersionId::random(), end, count)
}
