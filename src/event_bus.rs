/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the protocol threads and fires the
//! handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the event bus waits for an event before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) start_epoch_handlers: Vec<HandlerPtr<StartEpochEvent>>,
    pub(crate) send_new_epoch_handlers: Vec<HandlerPtr<SendNewEpochEvent>>,
    pub(crate) receive_new_epoch_handlers: Vec<HandlerPtr<ReceiveNewEpochEvent>>,
    pub(crate) progress_timeout_handlers: Vec<HandlerPtr<ProgressTimeoutEvent>>,
    pub(crate) change_leader_handlers: Vec<HandlerPtr<ChangeLeaderEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) send_observation_handlers: Vec<HandlerPtr<SendObservationEvent>>,
    pub(crate) broadcast_report_req_handlers: Vec<HandlerPtr<BroadcastReportReqEvent>>,
    pub(crate) sign_report_handlers: Vec<HandlerPtr<SignReportEvent>>,
    pub(crate) skip_report_handlers: Vec<HandlerPtr<SkipReportEvent>>,
    pub(crate) broadcast_final_handlers: Vec<HandlerPtr<BroadcastFinalEvent>>,
    pub(crate) accept_report_handlers: Vec<HandlerPtr<AcceptReportEvent>>,
    pub(crate) schedule_transmission_handlers: Vec<HandlerPtr<ScheduleTransmissionEvent>>,
    pub(crate) transmit_handlers: Vec<HandlerPtr<TransmitEvent>>,
    pub(crate) discard_transmission_handlers: Vec<HandlerPtr<DiscardTransmissionEvent>>,
}

/// Push the default logger of `T` (if `log_events`) and then the user's handler (if any) onto `handlers`.
fn register<T: Logger>(
    handlers: &mut Vec<HandlerPtr<T>>,
    log_events: bool,
    user_handler: Option<HandlerPtr<T>>,
) {
    if log_events {
        handlers.push(T::get_logger())
    }
    if let Some(handler) = user_handler {
        handlers.push(handler)
    }
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_epoch_handler: Option<HandlerPtr<StartEpochEvent>>,
        send_new_epoch_handler: Option<HandlerPtr<SendNewEpochEvent>>,
        receive_new_epoch_handler: Option<HandlerPtr<ReceiveNewEpochEvent>>,
        progress_timeout_handler: Option<HandlerPtr<ProgressTimeoutEvent>>,
        change_leader_handler: Option<HandlerPtr<ChangeLeaderEvent>>,
        start_round_handler: Option<HandlerPtr<StartRoundEvent>>,
        send_observation_handler: Option<HandlerPtr<SendObservationEvent>>,
        broadcast_report_req_handler: Option<HandlerPtr<BroadcastReportReqEvent>>,
        sign_report_handler: Option<HandlerPtr<SignReportEvent>>,
        skip_report_handler: Option<HandlerPtr<SkipReportEvent>>,
        broadcast_final_handler: Option<HandlerPtr<BroadcastFinalEvent>>,
        accept_report_handler: Option<HandlerPtr<AcceptReportEvent>>,
        schedule_transmission_handler: Option<HandlerPtr<ScheduleTransmissionEvent>>,
        transmit_handler: Option<HandlerPtr<TransmitEvent>>,
        discard_transmission_handler: Option<HandlerPtr<DiscardTransmissionEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers::default();
        register(&mut handlers.start_epoch_handlers, log_events, start_epoch_handler);
        register(&mut handlers.send_new_epoch_handlers, log_events, send_new_epoch_handler);
        register(&mut handlers.receive_new_epoch_handlers, log_events, receive_new_epoch_handler);
        register(&mut handlers.progress_timeout_handlers, log_events, progress_timeout_handler);
        register(&mut handlers.change_leader_handlers, log_events, change_leader_handler);
        register(&mut handlers.start_round_handlers, log_events, start_round_handler);
        register(&mut handlers.send_observation_handlers, log_events, send_observation_handler);
        register(
            &mut handlers.broadcast_report_req_handlers,
            log_events,
            broadcast_report_req_handler,
        );
        register(&mut handlers.sign_report_handlers, log_events, sign_report_handler);
        register(&mut handlers.skip_report_handlers, log_events, skip_report_handler);
        register(&mut handlers.broadcast_final_handlers, log_events, broadcast_final_handler);
        register(&mut handlers.accept_report_handlers, log_events, accept_report_handler);
        register(
            &mut handlers.schedule_transmission_handlers,
            log_events,
            schedule_transmission_handler,
        );
        register(&mut handlers.transmit_handlers, log_events, transmit_handler);
        register(
            &mut handlers.discard_transmission_handlers,
            log_events,
            discard_transmission_handler,
        );
        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start_epoch_handlers.is_empty()
            && self.send_new_epoch_handlers.is_empty()
            && self.receive_new_epoch_handlers.is_empty()
            && self.progress_timeout_handlers.is_empty()
            && self.change_leader_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.send_observation_handlers.is_empty()
            && self.broadcast_report_req_handlers.is_empty()
            && self.sign_report_handlers.is_empty()
            && self.skip_report_handlers.is_empty()
            && self.broadcast_final_handlers.is_empty()
            && self.accept_report_handlers.is_empty()
            && self.schedule_transmission_handlers.is_empty()
            && self.transmit_handlers.is_empty()
            && self.discard_transmission_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartEpoch(start_epoch_event) => self
                .start_epoch_handlers
                .iter()
                .for_each(|handler| handler(&start_epoch_event)),

            Event::SendNewEpoch(send_new_epoch_event) => self
                .send_new_epoch_handlers
                .iter()
                .for_each(|handler| handler(&send_new_epoch_event)),

            Event::ReceiveNewEpoch(receive_new_epoch_event) => self
                .receive_new_epoch_handlers
                .iter()
                .for_each(|handler| handler(&receive_new_epoch_event)),

            Event::ProgressTimeout(progress_timeout_event) => self
                .progress_timeout_handlers
                .iter()
                .for_each(|handler| handler(&progress_timeout_event)),

            Event::ChangeLeader(change_leader_event) => self
                .change_leader_handlers
                .iter()
                .for_each(|handler| handler(&change_leader_event)),

            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::SendObservation(send_observation_event) => self
                .send_observation_handlers
                .iter()
                .for_each(|handler| handler(&send_observation_event)),

            Event::BroadcastReportReq(broadcast_report_req_event) => self
                .broadcast_report_req_handlers
                .iter()
                .for_each(|handler| handler(&broadcast_report_req_event)),

            Event::SignReport(sign_report_event) => self
                .sign_report_handlers
                .iter()
                .for_each(|handler| handler(&sign_report_event)),

            Event::SkipReport(skip_report_event) => self
                .skip_report_handlers
                .iter()
                .for_each(|handler| handler(&skip_report_event)),

            Event::BroadcastFinal(broadcast_final_event) => self
                .broadcast_final_handlers
                .iter()
                .for_each(|handler| handler(&broadcast_final_event)),

            Event::AcceptReport(accept_report_event) => self
                .accept_report_handlers
                .iter()
                .for_each(|handler| handler(&accept_report_event)),

            Event::ScheduleTransmission(schedule_transmission_event) => self
                .schedule_transmission_handlers
                .iter()
                .for_each(|handler| handler(&schedule_transmission_event)),

            Event::Transmit(transmit_event) => self
                .transmit_handlers
                .iter()
                .for_each(|handler| handler(&transmit_event)),

            Event::DiscardTransmission(discard_transmission_event) => self
                .discard_transmission_handlers
                .iter()
                .for_each(|handler| handler(&discard_transmission_event)),
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

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher has shut down.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
