/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of types specific to the transmission protocol.

use std::{cmp::Ordering, time::SystemTime};

use crate::{
    pluggables::{PendingTransmission, PendingTransmissionKey},
    types::{
        data_types::{Epoch, Round},
        report::AttestedReportMany,
    },
};

/// Sent by report generation once a report has been echoed by more than `f` oracles.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct EventToTransmission {
    pub(crate) epoch: Epoch,
    pub(crate) round: Round,
    pub(crate) report: AttestedReportMany,
}

/// An entry in the transmission queue. Ordered by scheduled time first, then by key.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct ScheduledTransmission {
    pub(crate) key: PendingTransmissionKey,
    pub(crate) transmission: PendingTransmission,
}

impl ScheduledTransmission {
    pub(crate) fn time(&self) -> SystemTime {
        self.transmission.time
    }
}

impl Ord for ScheduledTransmission {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time()
            .cmp(&other.time())
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for ScheduledTransmission {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
