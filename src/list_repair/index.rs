/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Index repair: rewriting the positions of a list command so that it keeps its intended effect after
//! another list command has been applied ahead of it.
//!
//! ## Pairwise rules
//!
//! In the table, `x` is the command being repaired and `y` is the command applied ahead of it.
//!
//! | `x` | `y` | Repaired `x` |
//! |-----|-----|--------------|
//! | Add at `p` | Add at `q` | Add at `p + 1` if `q < p`, or if `q == p` and `y` wins ties. Otherwise unchanged. |
//! | Add at `p` | Remove `[s, s + c)` | Unchanged if `p <= s`, otherwise Add at `p - min(p - s, c)`. |
//! | Add at `p` | Replace | Unchanged. |
//! | Remove `[s, s + c)` | Add at `q` | `[s + 1, s + c + 1)` if `q <= s`. Unchanged if `q >= s + c`. Otherwise two removes that skip the inserted element. |
//! | Remove `[s, s + c)` | Remove | The elements `y` already removed are dropped from the range, and the range shifts down by the elements `y` removed before it. |
//! | Remove `[s, s + c)` | Replace at `q` | Unchanged if `q` lies outside the range. Otherwise two removes that skip `q`. |
//! | Replace at `p` | Add at `q` | Replace at `p + 1` if `q <= p`, otherwise unchanged. |
//! | Replace at `p` | Remove `[s, s + c)` | Unchanged if `p < s`, Replace at `p - c` if `p >= s + c`. Otherwise the replaced element no longer exists, and `x` becomes an Add at `s`. |
//! | Replace at `p` | Replace at `q` | Dropped if `q == p` and `y` wins ties. Otherwise unchanged. |
//!
//! Ties are won by the command the server has already accepted, i.e. the remote one.
//!
//! When a Remove is split in two, the piece covering the higher indices comes first, so that the
//! pieces can be applied one after the other without further repair.
//!
//! Together, these rules guarantee that applying `y` then the repaired `x` leaves a list in the same
//! state as applying `x` then the repaired `y`.

use crate::commands::{AddToList, ListCommand, RemoveFromList, ReplaceInList};

/// Which of the two commands passed to [`repair_against`] the server accepted first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precedence {
    /// The command applied ahead (`applied`) is remote and wins ties.
    AppliedIsRemote,
    /// The command being repaired is remote and wins ties.
    CommandIsRemote,
}

/// Repair `command` against `applied`, a command that was applied to the list ahead of it.
///
/// Returns the commands that have the effect `command` intended: usually one command, two if a remove
/// range had to be split, and none if the command became redundant. The returned commands keep the
/// list id and version of `command`.
pub fn repair_against(
    command: &ListCommand,
    applied: &ListCommand,
    precedence: Precedence,
) -> Vec<ListCommand> {
    let applied_wins_ties = precedence == Precedence::AppliedIsRemote;
    match (command, applied) {
        (ListCommand::Add(x), ListCommand::Add(y)) => {
            let shifts = y.position < x.position || (y.position == x.position && applied_wins_ties);
            vec![ListCommand::Add(AddToList {
                position: if shifts { x.position + 1 } else { x.position },
                ..x.clone()
            })]
        }

        (ListCommand::Add(x), ListCommand::Remove(y)) => {
            // Only the removed elements that sat before the insertion point move it, so an add at 3
            // against a remove of [2, 4) lands at 2, right where the removed run used to start.
            let position = shift_down(x.position, y.start_position, y.count);
            vec![ListCommand::Add(AddToList {
                position,
                ..x.clone()
            })]
        }

        (ListCommand::Add(_), ListCommand::Replace(_)) => vec![command.clone()],

        (ListCommand::Remove(x), ListCommand::Add(y)) => {
            let (start, end) = (x.start_position, x.start_position + x.count);
            if y.position <= start {
                vec![remove_piece(x, start + 1, x.count)]
            } else if y.position >= end {
                vec![command.clone()]
            } else {
                // The inserted element sits at `y.position`; everything at or after it moved up by one.
                let head = y.position - start;
                split(x, (y.position + 1, x.count - head), (start, head))
            }
        }

        (ListCommand::Remove(x), ListCommand::Remove(y)) => {
            let (x_start, x_end) = (x.start_position, x.start_position + x.count);
            let (y_start, y_end) = (y.start_position, y.start_position + y.count);
            let overlap = x_end.min(y_end).saturating_sub(x_start.max(y_start));
            let removed_before = x_start.min(y_end).saturating_sub(y_start);
            vec![remove_piece(
                x,
                x_start - removed_before,
                x.count - overlap,
            )]
        }

        (ListCommand::Remove(x), ListCommand::Replace(y)) => {
            let (start, end) = (x.start_position, x.start_position + x.count);
            if y.position < start || y.position >= end {
                vec![command.clone()]
            } else {
                // The replaced element now holds `y`'s value, which must survive.
                let head = y.position - start;
                split(x, (y.position + 1, x.count - head - 1), (start, head))
            }
        }

        (ListCommand::Replace(x), ListCommand::Add(y)) => {
            let position = if y.position <= x.position {
                x.position + 1
            } else {
                x.position
            };
            vec![ListCommand::Replace(ReplaceInList {
                position,
                ..x.clone()
            })]
        }

        (ListCommand::Replace(x), ListCommand::Remove(y)) => {
            let (start, end) = (y.start_position, y.start_position + y.count);
            if x.position < start {
                vec![command.clone()]
            } else if x.position >= end {
                vec![ListCommand::Replace(ReplaceInList {
                    position: x.position - y.count,
                    ..x.clone()
                })]
            } else {
                vec![ListCommand::Add(AddToList {
                    list_id: x.list_id,
                    version: x.version,
                    value: x.value.clone(),
                    position: start,
                })]
            }
        }

        (ListCommand::Replace(x), ListCommand::Replace(y)) => {
            if x.position == y.position && applied_wins_ties {
                Vec::new()
            } else {
                vec![command.clone()]
            }
        }
    }
}

/// Transform two concurrent sequences of commands against each other.
///
/// `remote` was applied by the server; `local` was applied by this peer. Both start from the same list
/// state. Returns `(remote', local')` such that applying `local` then `remote'` leaves the list in the
/// same state as applying `remote` then `local'`.
pub fn transform(
    remote: &[ListCommand],
    local: &[ListCommand],
) -> (Vec<ListCommand>, Vec<ListCommand>) {
    match (remote, local) {
        ([], _) | (_, []) => (remote.to_vec(), local.to_vec()),

        ([r], [l]) => (
            repair_against(r, l, Precedence::CommandIsRemote),
            repair_against(l, r, Precedence::AppliedIsRemote),
        ),

        ([r, rest @ ..], _) if !rest.is_empty() => {
            let (r, local) = transform(std::slice::from_ref(r), local);
            let (mut rest, local) = transform(rest, &local);
            let mut remote = r;
            remote.append(&mut rest);
            (remote, local)
        }

        (_, [l, rest @ ..]) => {
            let (remote, l) = transform(remote, std::slice::from_ref(l));
            let (remote, mut rest) = transform(&remote, rest);
            let mut local = l;
            local.append(&mut rest);
            (remote, local)
        }
    }
}

/// Position of an element originally at `position` after `[start, start + count)` was removed.
fn shift_down(position: u32, start: u32, count: u32) -> u32 {
    if position <= start {
        position
    } else {
        position - (position - start).min(count)
    }
}

fn remove_piece(x: &RemoveFromList, start_position: u32, count: u32) -> ListCommand {
    ListCommand::Remove(RemoveFromList {
        start_position,
        count,
        ..x.clone()
    })
}

/// Split `x` into a tail and a head piece, dropping empty pieces unless both are empty.
fn split(x: &RemoveFromList, tail: (u32, u32), head: (u32, u32)) -> Vec<ListCommand> {
    let pieces: Vec<ListCommand> = [tail, head]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(start, count)| remove_piece(x, start, count))
        .collect();
    if pieces.is_empty() {
        vec![remove_piece(x, head.0, 0)]
    } else {
        pieces
    }
}
