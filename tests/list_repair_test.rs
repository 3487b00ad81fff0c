//! Tests of the list conflict repairer on its own: index repair, version repair, echo detection and
//! the stale command filter.

use graph_replica::{
    commands::{AddToList, Command, ListCommand, RemoveFromList, ReplaceInList},
    error::{CommandError, FatalError},
    list_repair::{
        index::{repair_against, transform, Precedence},
        ListConflictRepairer, Received,
    },
    types::{ListVersion, ObjectId, Role, SimpleValue, Value, VersionId},
};
use proptest::prelude::*;

const LIST: ObjectId = ObjectId::new(7);

fn add(position: u32, value: i64) -> ListCommand {
    ListCommand::Add(AddToList {
        list_id: LIST,
        version: ListVersion::UNSTAMPED,
        value: Value::Simple(SimpleValue::Int(value)),
        position,
    })
}

fn remove(start_position: u32, count: u32) -> ListCommand {
    ListCommand::Remove(RemoveFromList {
        list_id: LIST,
        version: ListVersion::UNSTAMPED,
        start_position,
        count,
    })
}

fn replace(position: u32, value: i64) -> ListCommand {
    ListCommand::Replace(ReplaceInList {
        list_id: LIST,
        version: ListVersion::UNSTAMPED,
        value: Value::Simple(SimpleValue::Int(value)),
        position,
    })
}

fn versioned(mut command: ListCommand, from: VersionId, to: VersionId) -> ListCommand {
    command.set_version(ListVersion::new(from, to));
    command
}

/// Positions and counts of a command, ignoring its version and value.
fn shape(command: &ListCommand) -> (&'static str, u32, u32) {
    match command {
        ListCommand::Add(add) => ("add", add.position, 1),
        ListCommand::Remove(remove) => ("remove", remove.start_position, remove.count),
        ListCommand::Replace(replace) => ("replace", replace.position, 1),
    }
}

fn shapes(commands: &[ListCommand]) -> Vec<(&'static str, u32, u32)> {
    commands.iter().map(shape).collect()
}

/// A client repairer whose list is at `approved`, with `local` stamped as its pending log.
fn client_with_pending(approved: VersionId, local: Vec<ListCommand>) -> ListConflictRepairer {
    let repairer = ListConflictRepairer::new(Role::Client, 16);
    let mut lease = repairer.lease(LIST);
    lease.approved = Some(approved);
    for mut command in local {
        repairer.stamp_local(&mut lease, &mut command);
    }
    drop(lease);
    repairer
}

fn receive_remote(
    repairer: &ListConflictRepairer,
    remote: ListCommand,
) -> (Received, Vec<ListCommand>) {
    let mut applied = Vec::new();
    let received = repairer
        .receive(remote.into_command(), |pieces| {
            applied.extend_from_slice(pieces);
            Ok(())
        })
        .expect("not a list command")
        .expect("command rejected");
    (received, applied)
}

#[test]
fn pending_add_is_shifted_down_by_a_remote_remove_before_it() {
    let v0 = VersionId::random();
    let v1 = VersionId::random();
    let repairer = client_with_pending(v0, vec![add(3, 100)]);

    let (received, applied) = receive_remote(&repairer, versioned(remove(2, 2), v0, v1));

    // Locally the list was [a, b, c, X, d, e]. The remote remove of c and d is split around X.
    assert_eq!(shapes(&applied), vec![("remove", 4, 1), ("remove", 2, 1)]);
    let resend = match received {
        Received::Repaired { resend, .. } => resend,
        other => panic!("expected a repair, got {:?}", other),
    };
    // On the server the list is [a, b, e]: X belongs between b and e.
    assert_eq!(shapes(&resend), vec![("add", 2, 1)]);
    assert_eq!(resend[0].version().from, v1);
    assert_eq!(repairer.approved(LIST), Some(v1));
    assert_eq!(repairer.pending(LIST), resend);
}

#[test]
fn failed_apply_leaves_the_list_state_untouched() {
    let v0 = VersionId::random();
    let v1 = VersionId::random();
    let repairer = client_with_pending(v0, vec![add(3, 100)]);
    let pending = repairer.pending(LIST);

    // 1. The repaired remote remove comes in two pieces, and the local list rejects them.
    let remote = versioned(remove(2, 2), v0, v1);
    let mut offered = Vec::new();
    let result = repairer
        .receive(remote.clone().into_command(), |pieces| {
            offered.extend_from_slice(pieces);
            Err(CommandError::IndexOutOfBounds {
                id: LIST,
                command: "RemoveFromList",
                detail: "rejected".to_string(),
            })
        })
        .expect("not a list command");
    assert!(matches!(result, Err(CommandError::IndexOutOfBounds { .. })));
    assert_eq!(shapes(&offered), vec![("remove", 4, 1), ("remove", 2, 1)]);

    // 2. Neither the approved version nor the pending log moved.
    assert_eq!(repairer.approved(LIST), Some(v0));
    assert_eq!(repairer.pending(LIST), pending);

    // 3. So the same command can still be repaired later.
    let (received, applied) = receive_remote(&repairer, remote);
    assert!(matches!(received, Received::Repaired { .. }));
    assert_eq!(shapes(&applied), vec![("remove", 4, 1), ("remove", 2, 1)]);
    assert_eq!(repairer.approved(LIST), Some(v1));
}

#[test]
fn pending_remove_is_split_around_a_remote_add_inside_it() {
    let v0 = VersionId::random();
    let v1 = VersionId::random();
    let repairer = client_with_pending(v0, vec![remove(8, 10)]);

    let (received, applied) = receive_remote(&repairer, versioned(add(12, 100), v0, v1));

    assert_eq!(shapes(&applied), vec![("add", 8, 1)]);
    let resend = match received {
        Received::Repaired { resend, .. } => resend,
        other => panic!("expected a repair, got {:?}", other),
    };
    assert_eq!(shapes(&resend), vec![("remove", 13, 6), ("remove", 8, 4)]);
    // The repaired log forms one chain anchored at the remote command's version.
    assert_eq!(resend[0].version().from, v1);
    assert_eq!(resend[1].version().from, resend[0].version().to);
}

#[test]
fn pending_replace_of_a_removed_element_becomes_an_add() {
    let v0 = VersionId::random();
    let v1 = VersionId::random();
    let repairer = client_with_pending(v0, vec![replace(65, 100)]);

    let (received, applied) = receive_remote(&repairer, versioned(remove(64, 3), v0, v1));

    // The replaced element survives locally; the remote remove skips it.
    assert_eq!(shapes(&applied), vec![("remove", 66, 1), ("remove", 64, 1)]);
    let resend = match received {
        Received::Repaired { resend, .. } => resend,
        other => panic!("expected a repair, got {:?}", other),
    };
    assert_eq!(shapes(&resend), vec![("add", 64, 1)]);
}

#[test]
fn pending_replace_loses_to_a_remote_replace_of_the_same_element() {
    let v0 = VersionId::random();
    let v1 = VersionId::random();
    let repairer = client_with_pending(v0, vec![replace(4, 100)]);

    let (received, applied) = receive_remote(&repairer, versioned(replace(4, 200), v0, v1));

    assert_eq!(shapes(&applied), vec![("replace", 4, 1)]);
    assert_eq!(
        received,
        Received::Repaired {
            applied,
            resend: Vec::new()
        }
    );
    assert!(repairer.pending(LIST).is_empty());
}

#[test]
fn echo_of_the_pending_head_is_confirmed_without_reapplying_it() {
    let v0 = VersionId::random();
    let repairer = client_with_pending(v0, vec![add(0, 1), add(1, 2)]);
    let pending = repairer.pending(LIST);

    let (received, applied) = receive_remote(&repairer, pending[0].clone());

    assert_eq!(received, Received::Echo);
    assert!(applied.is_empty());
    assert_eq!(repairer.pending(LIST), pending[1..].to_vec());
    assert_eq!(repairer.approved(LIST), Some(pending[0].version().to));

    let (received, applied) = receive_remote(&repairer, pending[1].clone());
    assert_eq!(received, Received::Echo);
    assert!(applied.is_empty());
    assert!(!repairer.has_pending());
}

#[test]
fn command_with_no_pending_edits_is_applied_directly() {
    let v0 = VersionId::random();
    let v1 = VersionId::random();
    let repairer = client_with_pending(v0, Vec::new());

    let remote = versioned(add(0, 5), v0, v1);
    let (received, applied) = receive_remote(&repairer, remote.clone());

    assert_eq!(received, Received::Applied);
    assert_eq!(applied, vec![remote]);
    assert_eq!(repairer.approved(LIST), Some(v1));
}

#[test]
fn stale_commands_are_filtered_along_with_their_successors() {
    let repairer = ListConflictRepairer::new(Role::Server, 16);
    let v0 = VersionId::random();
    repairer.lease(LIST).approved = Some(v0);

    // Peer A's edit is accepted first.
    let (received, _) = receive_remote(&repairer, versioned(add(0, 1), v0, VersionId::random()));
    assert_eq!(received, Received::Applied);

    // Peer B generated two edits from the same state. Both are stale.
    let referenced = ObjectId::random();
    let b1_to = VersionId::random();
    let b1 = ListCommand::Add(AddToList {
        list_id: LIST,
        version: ListVersion::new(v0, b1_to),
        value: Value::Reference(referenced),
        position: 0,
    });
    let (received, applied) = receive_remote(&repairer, b1);
    assert_eq!(
        received,
        Received::Filtered {
            referenced: Some(referenced)
        }
    );
    assert!(applied.is_empty());

    let (received, _) = receive_remote(&repairer, versioned(remove(0, 1), b1_to, VersionId::random()));
    assert_eq!(received, Received::Filtered { referenced: None });
}

#[test]
fn unknown_version_is_reported_as_desync() {
    let repairer = ListConflictRepairer::new(Role::Server, 16);
    let v0 = VersionId::random();
    repairer.lease(LIST).approved = Some(v0);

    let unknown = VersionId::random();
    let result = repairer
        .receive(
            versioned(add(0, 1), unknown, VersionId::random()).into_command(),
            |_| Ok(()),
        )
        .expect("not a list command");

    assert_eq!(
        result,
        Err(CommandError::StaleVersion {
            list_id: LIST,
            expected: unknown,
            current: Some(v0),
        })
    );
}

#[test]
fn non_list_command_violates_the_repair_invariant() {
    let repairer = ListConflictRepairer::new(Role::Client, 16);
    let result = repairer.receive(Command::ClearReferences, |_| Ok(()));
    assert!(matches!(result, Err(FatalError::RepairInvariant(_))));
}

#[test]
fn server_edits_advance_the_approved_version_without_pending_them() {
    let repairer = ListConflictRepairer::new(Role::Server, 16);
    let mut lease = repairer.lease(LIST);
    let mut first = add(0, 1);
    repairer.stamp_local(&mut lease, &mut first);
    let mut second = add(1, 2);
    repairer.stamp_local(&mut lease, &mut second);

    assert_eq!(second.version().from, first.version().to);
    assert_eq!(lease.approved, Some(second.version().to));
    assert!(lease.pending.is_empty());
}

#[test]
fn remote_wins_ties_between_adds() {
    let remote = add(2, 200);
    let local = add(2, 100);
    let repaired_local = repair_against(&local, &remote, Precedence::AppliedIsRemote);
    let repaired_remote = repair_against(&remote, &local, Precedence::CommandIsRemote);
    assert_eq!(shapes(&repaired_local), vec![("add", 3, 1)]);
    assert_eq!(shapes(&repaired_remote), vec![("add", 2, 1)]);
}

/// Apply a list command to a plain vector, the way the executor applies it to a list slot.
fn apply(list: &mut Vec<Value>, command: &ListCommand) {
    match command {
        ListCommand::Add(add) => list.insert(add.position as usize, add.value.clone()),
        ListCommand::Remove(remove) => {
            let start = remove.start_position as usize;
            list.drain(start..start + remove.count as usize);
        }
        ListCommand::Replace(replace) => list[replace.position as usize] = replace.value.clone(),
    }
}

/// A command that is valid on a list of length `len`, built from arbitrary numbers.
fn op(len: usize, kind: u8, a: usize, b: usize, value: i64) -> ListCommand {
    match (kind % 3, len) {
        (_, 0) | (0, _) => add((a % (len + 1)) as u32, value),
        (1, _) => {
            let start = a % len;
            remove(start as u32, (b % (len - start + 1)) as u32)
        }
        _ => replace((a % len) as u32, value),
    }
}

fn len_after(len: usize, command: &ListCommand) -> usize {
    match command {
        ListCommand::Add(_) => len + 1,
        ListCommand::Remove(remove) => len - remove.count as usize,
        ListCommand::Replace(_) => len,
    }
}

type RawOp = (u8, usize, usize);

fn raw_op() -> impl Strategy<Value = RawOp> {
    (any::<u8>(), 0usize..64, 0usize..64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Applying the local edits then the repaired remote edit gives the same list as applying the
    /// remote edit then the repaired local edits.
    #[test]
    fn repair_converges(
        len in 0usize..12,
        remote in raw_op(),
        local in prop::collection::vec(raw_op(), 1..4),
    ) {
        let base: Vec<Value> = (0..len as i64).map(|i| Value::Simple(SimpleValue::Int(i))).collect();

        let remote = op(len, remote.0, remote.1, remote.2, 1000);
        let mut local_commands = Vec::new();
        let mut local_len = len;
        for (i, (kind, a, b)) in local.into_iter().enumerate() {
            let command = op(local_len, kind, a, b, 2000 + i as i64);
            local_len = len_after(local_len, &command);
            local_commands.push(command);
        }

        let (remote_repaired, local_repaired) =
            transform(std::slice::from_ref(&remote), &local_commands);

        let mut on_client = base.clone();
        local_commands.iter().for_each(|command| apply(&mut on_client, command));
        remote_repaired.iter().for_each(|command| apply(&mut on_client, command));

        let mut on_server = base;
        apply(&mut on_server, &remote);
        local_repaired.iter().for_each(|command| apply(&mut on_server, command));

        prop_assert_eq!(on_client, on_server);
    }
}
