/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the oracle's
//! [local config](crate::oracle::LocalConfig).
//!
//! The oracle logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [StartEpoch](crate::events::StartEpochEvent) is printed:
//!
//! ```text
//! StartEpoch, 1701329264, fNGCJyk, 5, 2
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the config digest.
//! - The fourth value is the new epoch.
//! - The fifth value is the oracle ID of the epoch's leader.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_EPOCH: &str = "StartEpoch";
pub const SEND_NEW_EPOCH: &str = "SendNewEpoch";
pub const RECEIVE_NEW_EPOCH: &str = "ReceiveNewEpoch";
pub const PROGRESS_TIMEOUT: &str = "ProgressTimeout";
pub const CHANGE_LEADER: &str = "ChangeLeader";

pub const START_ROUND: &str = "StartRound";
pub const SEND_OBSERVATION: &str = "SendObservation";
pub const BROADCAST_REPORT_REQ: &str = "BroadcastReportReq";
pub const SIGN_REPORT: &str = "SignReport";
pub const SKIP_REPORT: &str = "SkipReport";
pub const BROADCAST_FINAL: &str = "BroadcastFinal";
pub const ACCEPT_REPORT: &str = "AcceptReport";

pub const SCHEDULE_TRANSMISSION: &str = "ScheduleTransmission";
pub const TRANSMIT: &str = "Transmit";
pub const DISCARD_TRANSMISSION: &str = "DiscardTransmission";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_epoch_event: &StartEpochEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_EPOCH,
                secs_since_unix_epoch(start_epoch_event.timestamp),
                first_seven_base64_chars(&start_epoch_event.config_digest.bytes()),
                start_epoch_event.epoch,
                start_epoch_event.leader
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendNewEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_new_epoch_event: &SendNewEpochEvent| {
            log::info!(
                "{}, {}, {}",
                SEND_NEW_EPOCH,
                secs_since_unix_epoch(send_new_epoch_event.timestamp),
                send_new_epoch_event.epoch
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveNewEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_new_epoch_event: &ReceiveNewEpochEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_NEW_EPOCH,
                secs_since_unix_epoch(receive_new_epoch_event.timestamp),
                receive_new_epoch_event.origin,
                receive_new_epoch_event.epoch
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProgressTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |progress_timeout_event: &ProgressTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PROGRESS_TIMEOUT,
                secs_since_unix_epoch(progress_timeout_event.timestamp),
                progress_timeout_event.epoch,
                progress_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ChangeLeaderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |change_leader_event: &ChangeLeaderEvent| {
            log::info!(
                "{}, {}, {}",
                CHANGE_LEADER,
                secs_since_unix_epoch(change_leader_event.timestamp),
                change_leader_event.epoch
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.epoch,
                start_round_event.round,
                start_round_event.leader
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendObservationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_observation_event: &SendObservationEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_OBSERVATION,
                secs_since_unix_epoch(send_observation_event.timestamp),
                send_observation_event.epoch,
                send_observation_event.round,
                send_observation_event.observation
            )
        };
        Box::new(logger)
    }
}

impl Logger for BroadcastReportReqEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |broadcast_report_req_event: &BroadcastReportReqEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                BROADCAST_REPORT_REQ,
                secs_since_unix_epoch(broadcast_report_req_event.timestamp),
                broadcast_report_req_event.epoch,
                broadcast_report_req_event.round,
                broadcast_report_req_event.observations
            )
        };
        Box::new(logger)
    }
}

impl Logger for SignReportEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |sign_report_event: &SignReportEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SIGN_REPORT,
                secs_since_unix_epoch(sign_report_event.timestamp),
                sign_report_event.epoch,
                sign_report_event.round,
                sign_report_event.median
            )
        };
        Box::new(logger)
    }
}

impl Logger for SkipReportEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |skip_report_event: &SkipReportEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SKIP_REPORT,
                secs_since_unix_epoch(skip_report_event.timestamp),
                skip_report_event.epoch,
                skip_report_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for BroadcastFinalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |broadcast_final_event: &BroadcastFinalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                BROADCAST_FINAL,
                secs_since_unix_epoch(broadcast_final_event.timestamp),
                broadcast_final_event.epoch,
                broadcast_final_event.round,
                broadcast_final_event.signatures
            )
        };
        Box::new(logger)
    }
}

impl Logger for AcceptReportEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |accept_report_event: &AcceptReportEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                ACCEPT_REPORT,
                secs_since_unix_epoch(accept_report_event.timestamp),
                accept_report_event.epoch,
                accept_report_event.round,
                accept_report_event.median
            )
        };
        Box::new(logger)
    }
}

impl Logger for ScheduleTransmissionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |schedule_transmission_event: &ScheduleTransmissionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SCHEDULE_TRANSMISSION,
                secs_since_unix_epoch(schedule_transmission_event.timestamp),
                schedule_transmission_event.epoch,
                schedule_transmission_event.round,
                schedule_transmission_event.delay.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for TransmitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |transmit_event: &TransmitEvent| {
            log::info!(
                "{}, {}, {}, {}",
                TRANSMIT,
                secs_since_unix_epoch(transmit_event.timestamp),
                transmit_event.epoch,
                transmit_event.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for DiscardTransmissionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |discard_transmission_event: &DiscardTransmissionEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                DISCARD_TRANSMISSION,
                secs_since_unix_epoch(discard_transmission_event.timestamp),
                discard_transmission_event.epoch,
                discard_transmission_event.round,
                discard_transmission_event.reason
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
