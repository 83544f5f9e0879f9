/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between oracles as part of the
//! [`Pacemaker`](crate::pacemaker::implementation::Pacemaker) protocol.
//!
//! ## Messages
//!
//! The Pacemaker protocol involves a single type of message, [`NewEpoch`], which an oracle broadcasts
//! to announce the highest epoch it wants to move to. `NewEpoch` messages are not signed: the network
//! endpoint authenticates senders, and a faulty oracle can only ever influence its own entry in the
//! receiving oracle's `newepoch` table.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::Epoch;

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum PacemakerMessage {
    NewEpoch(NewEpoch),
}

impl PacemakerMessage {
    pub fn new_epoch(epoch: Epoch) -> PacemakerMessage {
        PacemakerMessage::NewEpoch(NewEpoch { epoch })
    }

    pub fn epoch(&self) -> Epoch {
        match self {
            PacemakerMessage::NewEpoch(NewEpoch { epoch }) => *epoch,
        }
    }
}

/// Announcement that the sender wants to move to `epoch`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct NewEpoch {
    pub epoch: Epoch,
}
