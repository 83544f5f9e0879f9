/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The leader's side of a report generation round.
//!
//! The leader moves through four phases per round:
//! 1. `Observe`: collect signed observations until strictly more than `2f` have arrived.
//! 2. `Grace`: keep collecting for `delta_grace`, then broadcast the observations, sorted by value, in a
//!    `ReportReq`.
//! 3. `Report`: collect followers' on-chain signatures over the resulting report until strictly more
//!    than `f` have arrived, then broadcast them in a `Final`.
//! 4. `Final`: nothing left to do until `delta_round` expires and the next round starts.

use std::time::{Instant, SystemTime};

use crate::{
    events::{BroadcastFinalEvent, BroadcastReportReqEvent, Event},
    networking::network::NetworkEndpoint,
    pluggables::{ContractTransmitter, DataSource},
    types::{
        data_types::{OnchainSignature, OracleID, Round},
        report::{
            AttestedReportMany, AttributedObservation, AttributedSignedObservation,
            SignedObservation,
        },
    },
};

use super::{
    implementation::ReportGeneration,
    messages::{Final, Observe, ObserveReq, Report, ReportReq},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Phase {
    Observe,
    Grace,
    Report,
    Final,
}

pub(crate) struct LeaderState {
    pub(super) round: Round,
    pub(super) phase: Phase,

    /// Signed observations received this round, indexed by observer.
    pub(super) observations: Vec<Option<SignedObservation>>,

    /// The observations sent in this round's `ReportReq`.
    pub(super) report_observations: Vec<AttributedObservation>,

    /// On-chain signatures received this round, indexed by signer.
    pub(super) reports: Vec<Option<OnchainSignature>>,

    pub(super) t_round: Option<Instant>,
    pub(super) t_grace: Option<Instant>,
}

impl LeaderState {
    pub(super) fn new(n: usize) -> Self {
        Self {
            round: 0,
            phase: Phase::Observe,
            observations: vec![None; n],
            report_observations: Vec::new(),
            reports: vec![None; n],
            t_round: None,
            t_grace: None,
        }
    }
}

impl<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter> ReportGeneration<N, DS, CT> {
    /// Start the next round, unless the epoch has run out of rounds.
    pub(super) fn start_round(&mut self) {
        self.leader_state.t_round = None;
        if self.leader_state.round > self.deps.shared_config.r_max {
            log::warn!(
                "Epoch {} has exhausted its {} rounds, not starting another",
                self.epoch,
                self.deps.shared_config.r_max
            );
            return;
        }

        let n = self.deps.shared_config.n();
        let state = &mut self.leader_state;
        state.round += 1;
        state.phase = Phase::Observe;
        state.observations = vec![None; n];
        state.report_observations.clear();
        state.reports = vec![None; n];
        state.t_grace = None;
        state.t_round = Some(Instant::now() + self.deps.shared_config.delta_round);

        let round = state.round;
        log::debug!("Leading round {}.{}", self.epoch, round);
        self.deps.sender.broadcast(ObserveReq {
            epoch: self.epoch,
            round,
        });
    }

    pub(super) fn on_receive_observe(&mut self, origin: OracleID, observe: Observe) {
        let Observe {
            round,
            signed_observation,
            ..
        } = observe;
        if !self.is_leader() {
            log::debug!("Dropping Observe from {}: not the leader", origin);
            return;
        }
        let state = &self.leader_state;
        if round != state.round {
            log::debug!(
                "Dropping Observe for round {} from {} in round {}",
                round,
                origin,
                state.round
            );
            return;
        }
        if !matches!(state.phase, Phase::Observe | Phase::Grace) {
            log::debug!("Dropping late Observe from {}", origin);
            return;
        }
        if state.observations[origin.index()].is_some() {
            log::debug!("Dropping duplicate Observe from {}", origin);
            return;
        }

        let public_key =
            &self.deps.shared_config.oracle_identities[origin.index()].offchain_public_key;
        if !signed_observation.verify(&self.context(round), public_key) {
            log::warn!("Invalid observation signature from {} in round {}", origin, round);
            self.report_invalid_signature(origin, round);
            return;
        }

        let threshold = 2 * self.f();
        let state = &mut self.leader_state;
        state.observations[origin.index()] = Some(signed_observation);
        let received = state.observations.iter().flatten().count();
        if state.phase == Phase::Observe && received > threshold {
            state.phase = Phase::Grace;
            state.t_grace = Some(Instant::now() + self.deps.shared_config.delta_grace);
        }
    }

    /// Close the grace period and request signatures over the observations collected so far.
    pub(super) fn on_grace_timeout(&mut self) {
        let state = &mut self.leader_state;
        state.t_grace = None;
        if state.phase != Phase::Grace {
            return;
        }

        let mut sorted: Vec<AttributedSignedObservation> = state
            .observations
            .iter()
            .enumerate()
            .filter_map(|(observer, signed_observation)| {
                signed_observation
                    .clone()
                    .map(|signed_observation| AttributedSignedObservation {
                        signed_observation,
                        observer: OracleID::new(observer as u8),
                    })
            })
            .collect();
        // Stable: equal values stay in observer order.
        sorted.sort_by(|a, b| {
            a.signed_observation
                .observation
                .cmp(&b.signed_observation.observation)
        });

        state.report_observations = sorted
            .iter()
            .map(AttributedSignedObservation::attributed_observation)
            .collect();
        state.phase = Phase::Report;

        let round = state.round;
        let observations = sorted.len();
        self.deps.sender.broadcast(ReportReq {
            epoch: self.epoch,
            round,
            attributed_signed_observations: sorted,
        });

        Event::BroadcastReportReq(BroadcastReportReqEvent {
            timestamp: SystemTime::now(),
            epoch: self.epoch,
            round,
            observations,
        })
        .publish(&self.deps.event_publisher);
    }

    pub(super) fn on_receive_report(&mut self, origin: OracleID, report: Report) {
        let Report { round, report, .. } = report;
        if !self.is_leader() {
            log::debug!("Dropping Report from {}: not the leader", origin);
            return;
        }
        let state = &self.leader_state;
        if round != state.round || state.phase != Phase::Report {
            log::debug!("Dropping Report for round {} from {}", round, origin);
            return;
        }
        if state.reports[origin.index()].is_some() {
            log::debug!("Dropping duplicate Report from {}", origin);
            return;
        }
        if report.attributed_observations != state.report_observations {
            log::warn!(
                "Report from {} in round {} does not match the requested observations",
                origin,
                round
            );
            return;
        }
        if !report.verify(&self.context(round), &self.signers[origin.index()]) {
            log::warn!("Invalid report signature from {} in round {}", origin, round);
            self.report_invalid_signature(origin, round);
            return;
        }

        let f = self.f();
        let state = &mut self.leader_state;
        state.reports[origin.index()] = Some(report.signature);
        let signatures: Vec<OnchainSignature> = state.reports.iter().flatten().copied().collect();
        if signatures.len() <= f {
            return;
        }

        state.phase = Phase::Final;
        let signature_count = signatures.len();
        let attested = AttestedReportMany {
            attributed_observations: state.report_observations.clone(),
            signatures,
        };
        self.deps.sender.broadcast(Final {
            epoch: self.epoch,
            round,
            report: attested,
        });

        Event::BroadcastFinal(BroadcastFinalEvent {
            timestamp: SystemTime::now(),
            epoch: self.epoch,
            round,
            signatures: signature_count,
        })
        .publish(&self.deps.event_publisher);
    }
}
