/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The follower's side of a report generation round.
//!
//! Every oracle, including the leader, acts as a follower. A follower:
//! 1. Answers the leader's `ObserveReq` with a signed observation.
//! 2. Checks the leader's `ReportReq`, and signs the report if it is worth sending on chain.
//! 3. Echoes the first valid `Final` or `FinalEcho` it sees to every other oracle.
//! 4. Accepts the report once strictly more than `f` oracles have echoed it, and hands it to
//!    transmission.

use std::time::SystemTime;

use crate::{
    events::{
        AcceptReportEvent, Event, SendObservationEvent, SignReportEvent, SkipReportEvent,
        StartRoundEvent,
    },
    networking::network::NetworkEndpoint,
    pluggables::{ContractTransmitter, DataSource},
    subprocess::block_for_at_most_with_grace,
    transmission::types::EventToTransmission,
    types::{
        data_types::{OracleID, Round},
        observation::Observation,
        report::{
            report_median, AttestedReportMany, AttestedReportOne, AttributedObservation,
            SignedObservation,
        },
    },
};

use super::{
    implementation::ReportGeneration,
    messages::{Final, FinalEcho, Observe, ObserveReq, Report, ReportReq},
    policy::{should_report, verify_report_req, InvalidReportReq},
};

pub(crate) struct FollowerState {
    /// The latest round the leader has started.
    pub(super) round: Round,
    pub(super) sent_report: bool,

    /// The report this follower has echoed this round, if any.
    pub(super) sent_echo: Option<AttestedReportMany>,

    /// Oracles whose `FinalEcho` has been received this round, indexed by sender.
    pub(super) received_echo: Vec<bool>,
    pub(super) completed: bool,
}

impl FollowerState {
    pub(super) fn new(n: usize) -> Self {
        Self {
            round: 0,
            sent_report: false,
            sent_echo: None,
            received_echo: vec![false; n],
            completed: false,
        }
    }

    fn reset(&mut self, round: Round) {
        self.round = round;
        self.sent_report = false;
        self.sent_echo = None;
        self.received_echo.iter_mut().for_each(|received| *received = false);
        self.completed = false;
    }
}

impl<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter> ReportGeneration<N, DS, CT> {
    pub(super) fn on_receive_observe_req(&mut self, origin: OracleID, observe_req: ObserveReq) {
        let round = observe_req.round;
        if origin != self.leader {
            log::warn!(
                "Dropping ObserveReq from {}: {} leads epoch {}",
                origin,
                self.leader,
                self.epoch
            );
            return;
        }
        if round <= self.follower_state.round {
            log::debug!(
                "Dropping ObserveReq for round {}: already in round {}",
                round,
                self.follower_state.round
            );
            return;
        }

        let r_max = self.deps.shared_config.r_max;
        if round as u16 > r_max as u16 + 1 {
            log::warn!(
                "Leader {} skipped ahead to round {} (r_max {}), requesting a leader change",
                origin,
                round,
                r_max
            );
            self.send_change_leader();
            return;
        }

        self.follower_state.round = round;
        if round > r_max {
            log::debug!("Leader {} ran out of rounds in epoch {}", origin, self.epoch);
            self.send_change_leader();
            return;
        }

        self.follower_state.reset(round);
        self.report_round_started(round);
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            epoch: self.epoch,
            round,
            leader: self.leader,
        })
        .publish(&self.deps.event_publisher);

        let Some(observation) = self.observe() else {
            return;
        };
        let signed_observation = SignedObservation::sign(
            &self.deps.offchain_keypair,
            &self.context(round),
            observation.clone(),
        );
        self.deps.sender.send_to(
            self.leader,
            Observe {
                epoch: self.epoch,
                round,
                signed_observation,
            },
        );

        Event::SendObservation(SendObservationEvent {
            timestamp: SystemTime::now(),
            epoch: self.epoch,
            round,
            observation,
        })
        .publish(&self.deps.event_publisher);
    }

    /// Ask the data source for a fresh value. Returns `None` if it fails, times out, or returns a value
    /// outside of the observation range.
    fn observe(&self) -> Option<Observation> {
        let mut data_source = self.deps.data_source.clone();
        let value = match block_for_at_most_with_grace(
            self.deps.timeouts.data_source_timeout,
            self.deps.timeouts.data_source_grace_period,
            move |ctx| data_source.observe(ctx),
        ) {
            Some(Ok(value)) => value,
            Some(Err(err)) => {
                log::error!("Data source failed to observe: {}", err);
                return None;
            }
            None => {
                log::error!("Data source timed out");
                return None;
            }
        };

        match Observation::new(value) {
            Ok(observation) => Some(observation),
            Err(err) => {
                log::error!("Data source returned an unusable value: {}", err);
                None
            }
        }
    }

    pub(super) fn on_receive_report_req(&mut self, origin: OracleID, report_req: ReportReq) {
        let ReportReq {
            round,
            attributed_signed_observations,
            ..
        } = report_req;
        if origin != self.leader {
            log::warn!(
                "Dropping ReportReq from {}: {} leads epoch {}",
                origin,
                self.leader,
                self.epoch
            );
            return;
        }
        let state = &self.follower_state;
        if round != state.round || state.sent_report || state.completed {
            log::debug!("Dropping ReportReq for round {} from {}", round, origin);
            return;
        }

        let context = self.context(round);
        if let Err(invalid) =
            verify_report_req(&context, &attributed_signed_observations, &self.deps.shared_config)
        {
            log::warn!("Invalid ReportReq from {} in round {}: {}", origin, round, invalid);
            if let InvalidReportReq::InvalidSignature { .. } = invalid {
                self.report_invalid_signature(origin, round);
            }
            return;
        }

        let attributed_observations: Vec<AttributedObservation> = attributed_signed_observations
            .iter()
            .map(|attributed| attributed.attributed_observation())
            .collect();
        let Some(median) = report_median(&attributed_observations) else {
            return;
        };

        if !should_report(
            &self.deps.contract_transmitter,
            &self.deps.timeouts,
            &self.deps.shared_config,
            &context,
            &median,
        ) {
            Event::SkipReport(SkipReportEvent {
                timestamp: SystemTime::now(),
                epoch: self.epoch,
                round,
            })
            .publish(&self.deps.event_publisher);
            self.complete_round();
            return;
        }

        let report = match AttestedReportOne::make(
            &context,
            attributed_observations,
            &self.deps.onchain_keypair,
        ) {
            Ok(report) => report,
            Err(err) => {
                log::error!("Failed to sign report for round {}: {:?}", round, err);
                return;
            }
        };
        self.deps.sender.send_to(
            self.leader,
            Report {
                epoch: self.epoch,
                round,
                report,
            },
        );
        self.follower_state.sent_report = true;

        Event::SignReport(SignReportEvent {
            timestamp: SystemTime::now(),
            epoch: self.epoch,
            round,
            median,
        })
        .publish(&self.deps.event_publisher);
    }

    pub(super) fn on_receive_final(&mut self, origin: OracleID, final_msg: Final) {
        let Final { round, report, .. } = final_msg;
        if origin != self.leader {
            log::warn!(
                "Dropping Final from {}: {} leads epoch {}",
                origin,
                self.leader,
                self.epoch
            );
            return;
        }
        if round != self.follower_state.round || self.follower_state.sent_echo.is_some() {
            log::debug!("Dropping Final for round {} from {}", round, origin);
            return;
        }
        if let Err(err) = report.verify(&self.context(round), self.f(), &self.signers) {
            log::warn!("Invalid Final from {} in round {}: {}", origin, round, err);
            return;
        }

        self.follower_state.sent_echo = Some(report.clone());
        self.deps.sender.broadcast(FinalEcho {
            epoch: self.epoch,
            round,
            report,
        });
    }

    pub(super) fn on_receive_final_echo(&mut self, origin: OracleID, final_echo: FinalEcho) {
        let FinalEcho { round, report, .. } = final_echo;
        let state = &self.follower_state;
        if round != state.round || state.completed {
            log::debug!("Dropping FinalEcho for round {} from {}", round, origin);
            return;
        }
        if state.received_echo[origin.index()] {
            log::debug!("Dropping duplicate FinalEcho from {}", origin);
            return;
        }
        if let Err(err) = report.verify(&self.context(round), self.f(), &self.signers) {
            log::warn!("Invalid FinalEcho from {} in round {}: {}", origin, round, err);
            return;
        }

        self.follower_state.received_echo[origin.index()] = true;
        if self.follower_state.sent_echo.is_none() {
            self.follower_state.sent_echo = Some(report.clone());
            self.deps.sender.broadcast(FinalEcho {
                epoch: self.epoch,
                round,
                report,
            });
        }

        let echoes = self
            .follower_state
            .received_echo
            .iter()
            .filter(|received| **received)
            .count();
        if echoes <= self.f() {
            return;
        }
        let Some(accepted) = self.follower_state.sent_echo.clone() else {
            return;
        };

        if let Some(median) = accepted.median() {
            Event::AcceptReport(AcceptReportEvent {
                timestamp: SystemTime::now(),
                epoch: self.epoch,
                round,
                median,
            })
            .publish(&self.deps.event_publisher);
        }
        let _ = self.deps.to_transmission.send(EventToTransmission {
            epoch: self.epoch,
            round,
            report: accepted,
        });
        self.complete_round();
    }

    fn complete_round(&mut self) {
        self.follower_state.completed = true;
        self.send_progress();
    }
}
