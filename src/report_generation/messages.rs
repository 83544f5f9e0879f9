/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between oracles as part of the report generation
//! protocol.
//!
//! ## Messages
//!
//! One round of report generation exchanges six types of messages, in this order:
//! 1. [`ObserveReq`]: leader → all. Asks followers for a fresh observation.
//! 2. [`Observe`]: follower → leader. A [`SignedObservation`] for the requested round.
//! 3. [`ReportReq`]: leader → all. More than `2f` signed observations, sorted by value.
//! 4. [`Report`]: follower → leader. The follower's on-chain signature over the encoded report.
//! 5. [`Final`]: leader → all. The report with more than `f` on-chain signatures.
//! 6. [`FinalEcho`]: all → all. A re-broadcast of `Final`, for reliable delivery.
//!
//! Every message carries the `(epoch, round)` it belongs to. Receivers drop messages for any epoch other
//! than their own.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{Epoch, EpochRound, Round},
    report::{AttestedReportMany, AttestedReportOne, AttributedSignedObservation, SignedObservation},
};

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum ReportGenerationMessage {
    ObserveReq(ObserveReq),
    Observe(Observe),
    ReportReq(ReportReq),
    Report(Report),
    Final(Final),
    FinalEcho(FinalEcho),
}

impl ReportGenerationMessage {
    pub fn epoch(&self) -> Epoch {
        self.epoch_round().epoch
    }

    pub fn round(&self) -> Round {
        self.epoch_round().round
    }

    pub fn epoch_round(&self) -> EpochRound {
        match self {
            ReportGenerationMessage::ObserveReq(ObserveReq { epoch, round }) => {
                EpochRound::new(*epoch, *round)
            }
            ReportGenerationMessage::Observe(Observe { epoch, round, .. }) => {
                EpochRound::new(*epoch, *round)
            }
            ReportGenerationMessage::ReportReq(ReportReq { epoch, round, .. }) => {
                EpochRound::new(*epoch, *round)
            }
            ReportGenerationMessage::Report(Report { epoch, round, .. }) => {
                EpochRound::new(*epoch, *round)
            }
            ReportGenerationMessage::Final(Final { epoch, round, .. }) => {
                EpochRound::new(*epoch, *round)
            }
            ReportGenerationMessage::FinalEcho(FinalEcho { epoch, round, .. }) => {
                EpochRound::new(*epoch, *round)
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ObserveReq {
    pub epoch: Epoch,
    pub round: Round,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Observe {
    pub epoch: Epoch,
    pub round: Round,
    pub signed_observation: SignedObservation,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ReportReq {
    pub epoch: Epoch,
    pub round: Round,
    pub attributed_signed_observations: Vec<AttributedSignedObservation>,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Report {
    pub epoch: Epoch,
    pub round: Round,
    pub report: AttestedReportOne,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Final {
    pub epoch: Epoch,
    pub round: Round,
    pub report: AttestedReportMany,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct FinalEcho {
    pub epoch: Epoch,
    pub round: Round,
    pub report: AttestedReportMany,
}

impl From<ObserveReq> for ReportGenerationMessage {
    fn from(value: ObserveReq) -> Self {
        ReportGenerationMessage::ObserveReq(value)
    }
}

impl From<Observe> for ReportGenerationMessage {
    fn from(value: Observe) -> Self {
        ReportGenerationMessage::Observe(value)
    }
}

impl From<ReportReq> for ReportGenerationMessage {
    fn from(value: ReportReq) -> Self {
        ReportGenerationMessage::ReportReq(value)
    }
}

impl From<Report> for ReportGenerationMessage {
    fn from(value: Report) -> Self {
        ReportGenerationMessage::Report(value)
    }
}

impl From<Final> for ReportGenerationMessage {
    fn from(value: Final) -> Self {
        ReportGenerationMessage::Final(value)
    }
}

impl From<FinalEcho> for ReportGenerationMessage {
    fn from(value: FinalEcho) -> Self {
        ReportGenerationMessage::FinalEcho(value)
    }
}
