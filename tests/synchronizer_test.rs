//! Ordering guarantees of the walk synchronizer.

use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use graph_replica::synchronizer::{OperationClass, WalkSynchronizer};

fn wait_for_waiting(synchronizer: &WalkSynchronizer, waiting: usize) {
    while synchronizer.waiting() < waiting {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn queued_operations_run_in_class_priority_order_test() {
    let synchronizer = Arc::new(WalkSynchronizer::new());
    let (order_sender, order) = mpsc::channel();

    // 1. Hold a walk, so that everything that arrives now is queued.
    let walk = synchronizer.acquire(OperationClass::Walk);
    assert!(!synchronizer.is_free());

    // 2. Queue one operation of each class, lowest priority first.
    let classes = [
        OperationClass::Diagnostic,
        OperationClass::Walk,
        OperationClass::IncomingCommands,
        OperationClass::LocalChange,
    ];
    let mut handles = Vec::new();
    for (queued, class) in classes.into_iter().enumerate() {
        let gate = synchronizer.clone();
        let order_sender = order_sender.clone();
        handles.push(thread::spawn(move || {
            gate.run(class, || order_sender.send(class).unwrap());
        }));
        wait_for_waiting(&synchronizer, queued + 1);
    }

    // 3. Release the walk.
    drop(walk);
    for handle in handles {
        handle.join().unwrap();
    }
    drop(order_sender);

    assert_eq!(
        order.iter().collect::<Vec<_>>(),
        vec![
            OperationClass::LocalChange,
            OperationClass::IncomingCommands,
            OperationClass::Walk,
            OperationClass::Diagnostic,
        ]
    );
    assert!(synchronizer.is_free());
    assert_eq!(synchronizer.waiting(), 0);
}

#[test]
fn permits_are_reentrant_test() {
    let synchronizer = WalkSynchronizer::new();
    let value = synchronizer.walk(|| {
        synchronizer.run(OperationClass::LocalChange, || {
            synchronizer.run(OperationClass::Walk, || 7)
        })
    });
    assert_eq!(value, 7);
    assert!(synchronizer.is_free());
}

#[test]
fn walk_waits_for_operations_in_progress_test() {
    let synchronizer = Arc::new(WalkSynchronizer::new());
    let (walked_sender, walked) = mpsc::channel();

    // 1. A local change is in progress.
    let change = synchronizer.acquire(OperationClass::LocalChange);

    // 2. A walk is requested, and waits.
    let walker = {
        let synchronizer = synchronizer.clone();
        thread::spawn(move || synchronizer.walk(|| walked_sender.send(()).unwrap()))
    };
    wait_for_waiting(&synchronizer, 1);
    assert!(walked.recv_timeout(Duration::from_millis(50)).is_err());

    // 3. Another local change, on another thread, is queued behind the gate rather than running
    //    alongside the change in progress.
    let (changed_sender, changed) = mpsc::channel();
    let second = {
        let synchronizer = synchronizer.clone();
        thread::spawn(move || {
            synchronizer.run(OperationClass::LocalChange, || changed_sender.send(()).unwrap())
        })
    };
    wait_for_waiting(&synchronizer, 2);

    // 4. Finishing the change lets both through.
    drop(change);
    changed.recv().unwrap();
    walked.recv().unwrap();
    walker.join().unwrap();
    second.join().unwrap();
    assert!(synchronizer.is_free());
}
