/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which fires the user-defined and logging handlers of every published
//! [event](crate::events).

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{CommandError, ErrorKind};
use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) type ErrorHandlerPtr = Box<dyn Fn(ErrorKind, &CommandError) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) model_ready_handlers: Vec<HandlerPtr<ModelReadyEvent>>,
    pub(crate) apply_batch_handlers: Vec<HandlerPtr<ApplyBatchEvent>>,
    pub(crate) send_commands_handlers: Vec<HandlerPtr<SendCommandsEvent>>,
    pub(crate) snapshot_handlers: Vec<HandlerPtr<SnapshotEvent>>,
    pub(crate) list_conflict_handlers: Vec<HandlerPtr<ListConflictEvent>>,
    pub(crate) filter_command_handlers: Vec<HandlerPtr<FilterCommandEvent>>,
    pub(crate) desync_handlers: Vec<HandlerPtr<DesyncEvent>>,
    pub(crate) construction_failure_handlers: Vec<HandlerPtr<ConstructionFailureEvent>>,
    pub(crate) peer_connected_handlers: Vec<HandlerPtr<PeerConnectedEvent>>,
    pub(crate) peer_disconnected_handlers: Vec<HandlerPtr<PeerDisconnectedEvent>>,
    pub(crate) fatal_handlers: Vec<HandlerPtr<FatalEvent>>,
    /// Fired for both [`Desync`](Event::Desync) and [`ConstructionFailure`](Event::ConstructionFailure).
    pub(crate) error_handlers: Vec<ErrorHandlerPtr>,
}

impl EventHandlers {
    /// Collect the user-defined handlers, adding the default logging handler of every event kind if
    /// `log_events` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        model_ready_handler: Option<HandlerPtr<ModelReadyEvent>>,
        apply_batch_handler: Option<HandlerPtr<ApplyBatchEvent>>,
        send_commands_handler: Option<HandlerPtr<SendCommandsEvent>>,
        snapshot_handler: Option<HandlerPtr<SnapshotEvent>>,
        list_conflict_handler: Option<HandlerPtr<ListConflictEvent>>,
        filter_command_handler: Option<HandlerPtr<FilterCommandEvent>>,
        peer_connected_handler: Option<HandlerPtr<PeerConnectedEvent>>,
        peer_disconnected_handler: Option<HandlerPtr<PeerDisconnectedEvent>>,
        fatal_handler: Option<HandlerPtr<FatalEvent>>,
        error_handler: Option<ErrorHandlerPtr>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, user: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(user);
            handlers
        }

        EventHandlers {
            model_ready_handlers: handlers(log_events, model_ready_handler),
            apply_batch_handlers: handlers(log_events, apply_batch_handler),
            send_commands_handlers: handlers(log_events, send_commands_handler),
            snapshot_handlers: handlers(log_events, snapshot_handler),
            list_conflict_handlers: handlers(log_events, list_conflict_handler),
            filter_command_handlers: handlers(log_events, filter_command_handler),
            desync_handlers: handlers(log_events, None),
            construction_failure_handlers: handlers(log_events, None),
            peer_connected_handlers: handlers(log_events, peer_connected_handler),
            peer_disconnected_handlers: handlers(log_events, peer_disconnected_handler),
            fatal_handlers: handlers(log_events, fatal_handler),
            error_handlers: error_handler.into_iter().collect(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.model_ready_handlers.is_empty()
            && self.apply_batch_handlers.is_empty()
            && self.send_commands_handlers.is_empty()
            && self.snapshot_handlers.is_empty()
            && self.list_conflict_handlers.is_empty()
            && self.filter_command_handlers.is_empty()
            && self.desync_handlers.is_empty()
            && self.construction_failure_handlers.is_empty()
            && self.peer_connected_handlers.is_empty()
            && self.peer_disconnected_handlers.is_empty()
            && self.fatal_handlers.is_empty()
            && self.error_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ModelReady(model_ready_event) =>
                self.model_ready_handlers.iter().for_each(|handler| handler(&model_ready_event)),

            Event::ApplyBatch(apply_batch_event) =>
                self.apply_batch_handlers.iter().for_each(|handler| handler(&apply_batch_event)),

            Event::SendCommands(send_commands_event) =>
                self.send_commands_handlers.iter().for_each(|handler| handler(&send_commands_event)),

            Event::Snapshot(snapshot_event) =>
                self.snapshot_handlers.iter().for_each(|handler| handler(&snapshot_event)),

            Event::ListConflict(list_conflict_event) =>
                self.list_conflict_handlers.iter().for_each(|handler| handler(&list_conflict_event)),

            Event::FilterCommand(filter_command_event) =>
                self.filter_command_handlers.iter().for_each(|handler| handler(&filter_command_event)),

            Event::Desync(desync_event) => {
                self.desync_handlers.iter().for_each(|handler| handler(&desync_event));
                self.error_handlers.iter().for_each(|handler| handler(ErrorKind::Desync, &desync_event.error));
            }

            Event::ConstructionFailure(construction_failure_event) => {
                self.construction_failure_handlers.iter().for_each(|handler| handler(&construction_failure_event));
                self.error_handlers.iter().for_each(|handler| handler(ErrorKind::Construction, &construction_failure_event.error));
            }

            Event::PeerConnected(peer_connected_event) =>
                self.peer_connected_handlers.iter().for_each(|handler| handler(&peer_connected_event)),

            Event::PeerDisconnected(peer_disconnected_event) =>
                self.peer_disconnected_handlers.iter().for_each(|handler| handler(&peer_disconnected_event)),

            Event::Fatal(fatal_event) =>
                self.fatal_handlers.iter().for_each(|handler| handler(&fatal_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone: nothing more will ever arrive.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
