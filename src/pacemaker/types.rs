/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of types specific to the Pacemaker protocol.

use crate::{
    networking::messages::Message,
    pluggables::PersistentState,
    types::data_types::{Epoch, OracleID},
};

/// Signals that report generation sends up to the pacemaker. Each carries the epoch of the report
/// generation instance that sent it, so that signals from a replaced instance can be ignored.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum EventToPacemaker {
    /// A round completed.
    Progress { epoch: Epoch },

    /// The leader of `epoch` is presumed faulty.
    ChangeLeader { epoch: Epoch },
}

/// Everything the pacemaker thread consumes from its single inbox.
#[derive(Debug)]
pub(crate) enum PacemakerInput {
    Message(OracleID, Message),
    Event(EventToPacemaker),
}

impl From<(OracleID, Message)> for PacemakerInput {
    fn from((origin, message): (OracleID, Message)) -> Self {
        PacemakerInput::Message(origin, message)
    }
}

impl From<EventToPacemaker> for PacemakerInput {
    fn from(event: EventToPacemaker) -> Self {
        PacemakerInput::Event(event)
    }
}

/// The pacemaker's view of the epochs the roster wants to be in.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct PacemakerState {
    /// The current epoch.
    pub(crate) epoch: Epoch,

    /// The current leader, derived from `epoch`.
    pub(crate) leader: OracleID,

    /// The highest epoch this oracle has broadcasted in a `NewEpoch` message.
    pub(crate) highest_sent_epoch: Epoch,

    /// For each oracle, the highest epoch it has been seen broadcasting.
    pub(crate) highest_received_epoch: Vec<Epoch>,
}

impl PacemakerState {
    pub(crate) fn to_persistent(&self) -> PersistentState {
        PersistentState {
            epoch: self.epoch,
            highest_sent_epoch: self.highest_sent_epoch,
            highest_received_epoch: self.highest_received_epoch.clone(),
        }
    }
}
