/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of one epoch of the report generation protocol.
//!
//! Main type: [`ReportGeneration`]. The leader role lives in [`leader`](super::leader), the follower
//! role in [`follower`](super::follower).

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    events::Event,
    networking::{
        network::NetworkEndpoint,
        receiving::{inbox, InboxSender, INBOX_CAPACITY},
        sending::SenderHandle,
    },
    oracle::LocalTimeouts,
    pacemaker::types::{EventToPacemaker, PacemakerInput},
    pluggables::{ContractTransmitter, DataSource},
    telemetry::{emit, AssertionViolation, TelemetryEvent, TelemetrySender},
    transmission::types::EventToTransmission,
    types::{
        config::SharedConfig,
        crypto_primitives::{OffchainKeypair, OnchainKeypair},
        data_types::{Epoch, OnchainAddress, OracleID, ReportingContext, Round},
    },
};

use super::{
    follower::FollowerState,
    leader::LeaderState,
    messages::ReportGenerationMessage,
};

/// Longest time the report generation thread waits before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything a report generation instance needs that outlives its epoch. The pacemaker keeps one copy
/// and clones it into every instance it spawns.
#[derive(Clone)]
pub(crate) struct ReportGenerationDeps<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter> {
    pub(crate) shared_config: Arc<SharedConfig>,
    pub(crate) timeouts: LocalTimeouts,
    pub(crate) id: OracleID,
    pub(crate) offchain_keypair: OffchainKeypair,
    pub(crate) onchain_keypair: OnchainKeypair,
    pub(crate) sender: SenderHandle<N>,
    pub(crate) data_source: DS,
    pub(crate) contract_transmitter: CT,
    pub(crate) to_pacemaker: InboxSender<PacemakerInput>,
    pub(crate) to_transmission: Sender<EventToTransmission>,
    pub(crate) event_publisher: Option<Sender<Event>>,
    pub(crate) telemetry: Option<TelemetrySender>,
}

/// One epoch of report generation, with a fixed leader.
pub(crate) struct ReportGeneration<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter> {
    pub(super) deps: ReportGenerationDeps<N, DS, CT>,
    pub(super) epoch: Epoch,
    pub(super) leader: OracleID,
    pub(super) signers: Vec<OnchainAddress>,
    pub(super) leader_state: LeaderState,
    pub(super) follower_state: FollowerState,
}

impl<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter> ReportGeneration<N, DS, CT> {
    pub(crate) fn new(
        deps: ReportGenerationDeps<N, DS, CT>,
        epoch: Epoch,
        leader: OracleID,
    ) -> Self {
        let n = deps.shared_config.n();
        let signers = deps
            .shared_config
            .oracle_identities
            .iter()
            .map(|identity| identity.onchain_signing_address)
            .collect();
        Self {
            deps,
            epoch,
            leader,
            signers,
            leader_state: LeaderState::new(n),
            follower_state: FollowerState::new(n),
        }
    }

    /// If this oracle leads the epoch, start its first round.
    pub(crate) fn initialize(&mut self) {
        if self.is_leader() {
            self.start_round();
        }
    }

    pub(crate) fn on_receive_msg(&mut self, origin: OracleID, msg: ReportGenerationMessage) {
        if !self.deps.shared_config.contains(origin) {
            log::warn!("Dropping {:?} from unknown oracle {}", msg, origin);
            return;
        }
        if msg.epoch() != self.epoch {
            log::debug!(
                "Dropping message for epoch {} from {} in epoch {}",
                msg.epoch(),
                origin,
                self.epoch
            );
            return;
        }

        match msg {
            ReportGenerationMessage::ObserveReq(observe_req) => {
                self.on_receive_observe_req(origin, observe_req)
            }
            ReportGenerationMessage::Observe(observe) => self.on_receive_observe(origin, observe),
            ReportGenerationMessage::ReportReq(report_req) => {
                self.on_receive_report_req(origin, report_req)
            }
            ReportGenerationMessage::Report(report) => self.on_receive_report(origin, report),
            ReportGenerationMessage::Final(final_msg) => self.on_receive_final(origin, final_msg),
            ReportGenerationMessage::FinalEcho(final_echo) => {
                self.on_receive_final_echo(origin, final_echo)
            }
        }
    }

    /// Fire every leader timer that has expired.
    pub(crate) fn tick(&mut self) {
        let now = Instant::now();
        if self.leader_state.t_grace.is_some_and(|deadline| deadline <= now) {
            self.on_grace_timeout();
        }
        if self.leader_state.t_round.is_some_and(|deadline| deadline <= now) {
            self.start_round();
        }
    }

    pub(crate) fn start(
        mut self,
        inbox: Receiver<(OracleID, ReportGenerationMessage)>,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            self.initialize();
            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => (),
                }

                let wait = self
                    .time_until_next_deadline()
                    .map_or(POLL_INTERVAL, |until| until.min(POLL_INTERVAL));
                match inbox.recv_timeout(wait) {
                    Ok((origin, msg)) => self.on_receive_msg(origin, msg),
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => return,
                }

                self.tick();
            }
        })
    }

    fn time_until_next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        [self.leader_state.t_round, self.leader_state.t_grace]
            .into_iter()
            .flatten()
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub(super) fn is_leader(&self) -> bool {
        self.deps.id == self.leader
    }

    pub(super) fn context(&self, round: Round) -> ReportingContext {
        ReportingContext::new(self.deps.shared_config.config_digest, self.epoch, round)
    }

    pub(super) fn f(&self) -> usize {
        self.deps.shared_config.f
    }

    pub(super) fn send_change_leader(&self) {
        let _ = self.deps.to_pacemaker.deliver(PacemakerInput::Event(
            EventToPacemaker::ChangeLeader { epoch: self.epoch },
        ));
    }

    pub(super) fn send_progress(&self) {
        let _ = self
            .deps
            .to_pacemaker
            .deliver(PacemakerInput::Event(EventToPacemaker::Progress {
                epoch: self.epoch,
            }));
    }

    pub(super) fn report_invalid_signature(&self, sender: OracleID, round: Round) {
        emit(
            &self.deps.telemetry,
            TelemetryEvent::AssertionViolation {
                config_digest: self.deps.shared_config.config_digest,
                violation: AssertionViolation::InvalidSignature {
                    sender,
                    epoch: self.epoch,
                    round,
                },
            },
        );
    }

    pub(super) fn report_round_started(&self, round: Round) {
        let unix_time_nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos() as u64);
        emit(
            &self.deps.telemetry,
            TelemetryEvent::RoundStarted {
                config_digest: self.deps.shared_config.config_digest,
                epoch: self.epoch,
                round,
                leader: self.leader,
                unix_time_nanos,
            },
        );
    }
}

/// The pacemaker's handle on the single live report generation instance.
pub(crate) struct ReportGenerationHandle {
    thread: JoinHandle<()>,
    shutdown: Sender<()>,
    inbox: InboxSender<(OracleID, ReportGenerationMessage)>,
}

impl ReportGenerationHandle {
    /// Spawn report generation for `epoch` led by `leader`.
    pub(crate) fn spawn<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter>(
        deps: ReportGenerationDeps<N, DS, CT>,
        epoch: Epoch,
        leader: OracleID,
    ) -> ReportGenerationHandle {
        let (inbox, receiver) = inbox("Report generation", INBOX_CAPACITY);
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let thread = ReportGeneration::new(deps, epoch, leader).start(receiver, shutdown_receiver);
        ReportGenerationHandle {
            thread,
            shutdown,
            inbox,
        }
    }

    /// Hand `msg` to the instance. Dropped if the instance is busy and its inbox is full.
    pub(crate) fn forward(&self, origin: OracleID, msg: ReportGenerationMessage) {
        let _ = self.inbox.deliver((origin, msg));
    }

    /// Stop the instance and wait for its thread to exit.
    pub(crate) fn stop(self) {
        let _ = self.shutdown.send(());
        drop(self.inbox);
        let _ = self.thread.join();
    }
}
