/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of oracle events for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.
//!
//! Users register handlers for these events with the `on_*` setters of
//! [`OracleSpec`](crate::oracle::OracleSpec). Handlers run on a dedicated event bus thread, so a slow
//! handler delays other handlers but never the protocol.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::types::{
    data_types::{ConfigDigest, Epoch, OracleID, Round},
    observation::Observation,
};

pub enum Event {
    // Pacemaker events.
    StartEpoch(StartEpochEvent),
    SendNewEpoch(SendNewEpochEvent),
    ReceiveNewEpoch(ReceiveNewEpochEvent),
    ProgressTimeout(ProgressTimeoutEvent),
    ChangeLeader(ChangeLeaderEvent),
    // Report generation events.
    StartRound(StartRoundEvent),
    SendObservation(SendObservationEvent),
    BroadcastReportReq(BroadcastReportReqEvent),
    SignReport(SignReportEvent),
    SkipReport(SkipReportEvent),
    BroadcastFinal(BroadcastFinalEvent),
    AcceptReport(AcceptReportEvent),
    // Transmission events.
    ScheduleTransmission(ScheduleTransmissionEvent),
    Transmit(TransmitEvent),
    DiscardTransmission(DiscardTransmissionEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away during shutdown.
            let _ = event_publisher.send(self);
        }
    }
}

/// The oracle entered a new epoch and (re)started report generation in it.
pub struct StartEpochEvent {
    pub timestamp: SystemTime,
    pub config_digest: ConfigDigest,
    pub epoch: Epoch,
    pub leader: OracleID,
}

/// The oracle broadcasted a `NewEpoch` message.
pub struct SendNewEpochEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
}

/// The oracle accepted a `NewEpoch` message that raised the highest epoch it knows `origin` wants.
pub struct ReceiveNewEpochEvent {
    pub timestamp: SystemTime,
    pub origin: OracleID,
    pub epoch: Epoch,
}

/// No progress was made in `epoch` within `timeout`.
pub struct ProgressTimeoutEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub timeout: Duration,
}

/// Report generation gave up on the leader of `epoch`.
pub struct ChangeLeaderEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub leader: OracleID,
}

pub struct SendObservationEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub observation: Observation,
}

pub struct BroadcastReportReqEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub observations: usize,
}

pub struct SignReportEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub median: Observation,
}

/// The oracle decided that the report of a round is not worth transmitting.
pub struct SkipReportEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
}

pub struct BroadcastFinalEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub signatures: usize,
}

/// Enough oracles echoed a final report for it to be handed to transmission.
pub struct AcceptReportEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub median: Observation,
}

pub struct ScheduleTransmissionEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub delay: Duration,
}

pub struct TransmitEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
}

pub struct DiscardTransmissionEvent {
    pub timestamp: SystemTime,
    pub epoch: Epoch,
    pub round: Round,
    pub reason: &'static str,
}
