/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the Pacemaker subprotocol.
//!
//! Main type: [`Pacemaker`].

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    events::{
        ChangeLeaderEvent, Event, ProgressTimeoutEvent, ReceiveNewEpochEvent, SendNewEpochEvent,
        StartEpochEvent,
    },
    networking::{messages::Message, network::NetworkEndpoint},
    pacemaker::{
        messages::{NewEpoch, PacemakerMessage},
        persistence::PersistenceHandle,
        types::{EventToPacemaker, PacemakerInput, PacemakerState},
    },
    pluggables::{ContractTransmitter, DataSource, Database, PersistentState},
    report_generation::implementation::{ReportGenerationDeps, ReportGenerationHandle},
    subprocess::block_for_at_most,
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{Epoch, OracleID},
    },
};

/// Longest time the pacemaker thread waits before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A single participant in the Pacemaker subprotocol.
///
/// # Usage
///
/// After creating an instance of `Pacemaker` using [`new`](Self::new), the caller should interact with
/// it by calling four methods:
/// 1. [`initialize`](Self::initialize): once, to restore persisted state and start the first epoch.
/// 2. [`on_input`](Self::on_input): whenever a message or a report generation event arrives.
/// 3. [`tick`](Self::tick): *as often as is practical*, to fire the progress and resend timers.
/// 4. [`shutdown`](Self::shutdown): once, to stop report generation and flush persistence.
///
/// [`start`](Self::start) does all of this on a dedicated thread.
pub(crate) struct Pacemaker<
    N: NetworkEndpoint,
    DS: DataSource,
    CT: ContractTransmitter,
    DB: Database,
> {
    deps: ReportGenerationDeps<N, DS, CT>,
    database: DB,
    state: PacemakerState,
    t_progress: Option<Instant>,
    t_resend: Option<Instant>,
    report_generation: Option<ReportGenerationHandle>,
    persistence: Option<PersistenceHandle>,
}

impl<N: NetworkEndpoint, DS: DataSource, CT: ContractTransmitter, DB: Database>
    Pacemaker<N, DS, CT, DB>
{
    pub(crate) fn new(deps: ReportGenerationDeps<N, DS, CT>, database: DB) -> Self {
        let shared_config = &deps.shared_config;
        let state = PacemakerState {
            epoch: 0,
            leader: leader(0, shared_config.n(), &shared_config.leader_selection_key),
            highest_sent_epoch: 0,
            highest_received_epoch: vec![0; shared_config.n()],
        };
        Self {
            deps,
            database,
            state,
            t_progress: None,
            t_resend: None,
            report_generation: None,
            persistence: None,
        }
    }

    pub(crate) fn start(
        mut self,
        inbox: Receiver<PacemakerInput>,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            self.initialize();
            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => (),
                }

                let wait = self
                    .time_until_next_deadline()
                    .map_or(POLL_INTERVAL, |until| until.min(POLL_INTERVAL));
                match inbox.recv_timeout(wait) {
                    Ok(input) => self.on_input(input),
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                self.tick();
            }
            self.shutdown();
        })
    }

    /// Restore the persisted state, start report generation for the restored epoch, and announce the
    /// highest epoch this oracle wants to be in.
    pub(crate) fn initialize(&mut self) {
        let config_digest = self.deps.shared_config.config_digest;
        let n = self.deps.shared_config.n();

        if let Some(restored) = self.read_state() {
            if restored.highest_received_epoch.len() != n {
                log::error!(
                    "Ignoring persisted pacemaker state: it tracks {} oracles, the roster has {}",
                    restored.highest_received_epoch.len(),
                    n
                );
            } else if restored.highest_sent_epoch < restored.epoch {
                log::error!(
                    "Ignoring persisted pacemaker state: highest sent epoch {} is below epoch {}",
                    restored.highest_sent_epoch,
                    restored.epoch
                );
            } else {
                self.state.epoch = restored.epoch;
                self.state.highest_sent_epoch = restored.highest_sent_epoch;
                self.state.highest_received_epoch = restored.highest_received_epoch;
            }
        }

        // Never re-enter an epoch whose reports have already landed on chain.
        if let Some(onchain_epoch) = self.latest_transmitted_epoch() {
            match onchain_epoch.checked_add(1) {
                Some(next) => {
                    self.state.highest_sent_epoch = self.state.highest_sent_epoch.max(next)
                }
                None => log::error!("On-chain epoch {} cannot be advanced", onchain_epoch),
            }
        }

        self.state.leader = self.leader_of(self.state.epoch);
        self.persistence = Some(PersistenceHandle::start(
            self.database.clone(),
            config_digest,
            self.deps.timeouts.database_timeout,
        ));
        self.start_report_generation();

        self.t_progress = Some(Instant::now() + self.deps.shared_config.delta_progress);
        self.send_new_epoch(self.state.highest_sent_epoch);
    }

    pub(crate) fn on_input(&mut self, input: PacemakerInput) {
        match input {
            PacemakerInput::Message(origin, Message::PacemakerMessage(msg)) => {
                let PacemakerMessage::NewEpoch(NewEpoch { epoch }) = msg;
                self.on_receive_new_epoch(origin, epoch)
            }
            PacemakerInput::Message(origin, Message::ReportGenerationMessage(msg)) => {
                if let Some(report_generation) = &self.report_generation {
                    report_generation.forward(origin, msg)
                }
            }
            PacemakerInput::Event(EventToPacemaker::Progress { epoch }) => {
                if epoch == self.state.epoch {
                    self.t_progress = Some(Instant::now() + self.deps.shared_config.delta_progress);
                }
            }
            PacemakerInput::Event(EventToPacemaker::ChangeLeader { epoch }) => {
                if epoch == self.state.epoch {
                    Event::ChangeLeader(ChangeLeaderEvent {
                        timestamp: SystemTime::now(),
                        epoch,
                    })
                    .publish(&self.deps.event_publisher);
                    self.change_leader();
                }
            }
        }
    }

    /// Fire the progress and resend timers if they have expired.
    pub(crate) fn tick(&mut self) {
        let now = Instant::now();
        if self.t_progress.is_some_and(|deadline| deadline <= now) {
            Event::ProgressTimeout(ProgressTimeoutEvent {
                timestamp: SystemTime::now(),
                epoch: self.state.epoch,
                timeout: self.deps.shared_config.delta_progress,
            })
            .publish(&self.deps.event_publisher);
            self.change_leader();
        }
        if self.t_resend.is_some_and(|deadline| deadline <= now) {
            self.send_new_epoch(self.state.highest_sent_epoch);
        }
    }

    /// Stop report generation and wait for every pending state write to finish.
    pub(crate) fn shutdown(&mut self) {
        if let Some(report_generation) = self.report_generation.take() {
            report_generation.stop();
        }
        if let Some(persistence) = self.persistence.take() {
            persistence.stop();
        }
    }

    fn on_receive_new_epoch(&mut self, origin: OracleID, epoch: Epoch) {
        if !self.deps.shared_config.contains(origin) {
            log::warn!("Dropping NewEpoch from unknown oracle {}", origin);
            return;
        }
        if epoch <= self.state.highest_received_epoch[origin.index()] {
            return;
        }
        self.state.highest_received_epoch[origin.index()] = epoch;
        Event::ReceiveNewEpoch(ReceiveNewEpochEvent {
            timestamp: SystemTime::now(),
            origin,
            epoch,
        })
        .publish(&self.deps.event_publisher);
        self.persist();

        let f = self.deps.shared_config.f;

        // More than f oracles are ahead of the epoch this oracle announces: join the (f+1)-th highest.
        let ahead_of_sent = self.epochs_above(self.state.highest_sent_epoch);
        if ahead_of_sent.len() > f {
            self.send_new_epoch(ahead_of_sent[ahead_of_sent.len() - (f + 1)]);
        }

        // More than 2f oracles are ahead of the current epoch: move to the (2f+1)-th highest.
        let ahead_of_current = self.epochs_above(self.state.epoch);
        if ahead_of_current.len() > 2 * f {
            self.enter_epoch(ahead_of_current[ahead_of_current.len() - (2 * f + 1)]);
        }
    }

    /// The entries of the `newepoch` table strictly above `epoch`, in ascending order.
    fn epochs_above(&self, epoch: Epoch) -> Vec<Epoch> {
        let mut epochs: Vec<Epoch> = self
            .state
            .highest_received_epoch
            .iter()
            .copied()
            .filter(|received| *received > epoch)
            .collect();
        epochs.sort_unstable();
        epochs
    }

    fn enter_epoch(&mut self, epoch: Epoch) {
        self.state.epoch = epoch;
        self.state.leader = self.leader_of(epoch);
        self.state.highest_sent_epoch = self.state.highest_sent_epoch.max(epoch);
        self.persist();

        if let Some(report_generation) = self.report_generation.take() {
            report_generation.stop();
        }
        self.start_report_generation();

        self.t_progress = Some(Instant::now() + self.deps.shared_config.delta_progress);
    }

    fn send_new_epoch(&mut self, epoch: Epoch) {
        self.deps.sender.broadcast(PacemakerMessage::new_epoch(epoch));
        Event::SendNewEpoch(SendNewEpochEvent {
            timestamp: SystemTime::now(),
            epoch,
        })
        .publish(&self.deps.event_publisher);

        if self.state.highest_sent_epoch != epoch {
            self.state.highest_sent_epoch = epoch;
            self.persist();
        }
        self.t_resend = Some(Instant::now() + self.deps.shared_config.delta_resend);
    }

    fn change_leader(&mut self) {
        self.t_progress = None;
        match self.state.epoch.checked_add(1) {
            Some(next) if next > self.state.highest_sent_epoch => self.send_new_epoch(next),
            Some(_) => (),
            None => log::error!("Epoch {} cannot be advanced", self.state.epoch),
        }
    }

    fn start_report_generation(&mut self) {
        self.report_generation = Some(ReportGenerationHandle::spawn(
            self.deps.clone(),
            self.state.epoch,
            self.state.leader,
        ));
        Event::StartEpoch(StartEpochEvent {
            timestamp: SystemTime::now(),
            config_digest: self.deps.shared_config.config_digest,
            epoch: self.state.epoch,
            leader: self.state.leader,
        })
        .publish(&self.deps.event_publisher);
    }

    fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.persist(self.state.to_persistent())
        }
    }

    fn leader_of(&self, epoch: Epoch) -> OracleID {
        leader(
            epoch,
            self.deps.shared_config.n(),
            &self.deps.shared_config.leader_selection_key,
        )
    }

    fn read_state(&self) -> Option<PersistentState> {
        let config_digest = self.deps.shared_config.config_digest;
        let mut database = self.database.clone();
        match block_for_at_most(self.deps.timeouts.database_timeout, move |ctx| {
            database.read_state(ctx, config_digest)
        }) {
            Some(Ok(state)) => state,
            Some(Err(err)) => {
                log::error!("Failed to read pacemaker state: {}", err);
                None
            }
            None => {
                log::error!("Timed out reading pacemaker state");
                None
            }
        }
    }

    /// The epoch of the latest report the consumer accepted under this configuration, if any.
    fn latest_transmitted_epoch(&self) -> Option<Epoch> {
        let mut contract_transmitter = self.deps.contract_transmitter.clone();
        match block_for_at_most(self.deps.timeouts.blockchain_timeout, move |ctx| {
            contract_transmitter.latest_transmission_details(ctx)
        }) {
            Some(Ok(details)) if details.config_digest == self.deps.shared_config.config_digest => {
                Some(details.epoch)
            }
            Some(Ok(_)) => None,
            Some(Err(err)) => {
                log::error!("Failed to read latest transmission details: {}", err);
                None
            }
            None => {
                log::error!("Timed out reading latest transmission details");
                None
            }
        }
    }

    fn time_until_next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        [self.t_progress, self.t_resend]
            .into_iter()
            .flatten()
            .min()
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// Deterministically select the leader of `epoch` among `n` oracles.
///
/// The leader is the first 8 bytes of `SHA256(leader_selection_key ‖ epoch)`, read as a big-endian
/// integer, modulo `n`. Oracles outside of the roster do not know the key, and cannot predict the leader
/// sequence.
pub fn leader(epoch: Epoch, n: usize, leader_selection_key: &[u8; 16]) -> OracleID {
    let mut hasher = CryptoHasher::new();
    hasher.update(leader_selection_key);
    hasher.update(epoch.to_be_bytes());
    let hash = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    OracleID::new((u64::from_be_bytes(prefix) % n as u64) as u8)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::{
        pluggables::PersistentState,
        subprocess::CallContext,
        test_utils::{test_deps, MemDB, TestDeps, TestRoster},
    };

    fn pacemaker(
        roster: &TestRoster,
        database: &MemDB,
    ) -> (
        Pacemaker<
            crate::test_utils::RecordingNetwork,
            crate::test_utils::ConstantDataSource,
            crate::test_utils::MockTransmitter,
            MemDB,
        >,
        TestDeps,
    ) {
        let test_deps = test_deps(roster, 0, 7);
        (
            Pacemaker::new(test_deps.deps.clone(), database.clone()),
            test_deps,
        )
    }

    fn start_epochs(events: &mpsc::Receiver<Event>) -> Vec<Epoch> {
        events
            .try_iter()
            .filter_map(|event| match event {
                Event::StartEpoch(start_epoch) => Some(start_epoch.epoch),
                _ => None,
            })
            .collect()
    }

    fn sent_new_epochs(test_deps: &TestDeps) -> Vec<Epoch> {
        test_deps
            .network
            .take()
            .into_iter()
            .filter_map(|(_, msg)| match msg {
                Message::PacemakerMessage(msg) => Some(msg.epoch()),
                _ => None,
            })
            .collect()
    }

    fn store_state(roster: &TestRoster, database: &MemDB, state: PersistentState) {
        let mut database = database.clone();
        database
            .write_state(
                &CallContext::new(Duration::from_secs(1)),
                roster.contract_config.config_digest,
                state,
            )
            .unwrap();
    }

    #[test]
    fn quorum_of_new_epochs_moves_to_the_new_epoch_once() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        store_state(
            &roster,
            &database,
            PersistentState {
                epoch: 1,
                highest_sent_epoch: 1,
                highest_received_epoch: vec![1, 1, 1, 1],
            },
        );
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);

        pacemaker.initialize();
        assert_eq!(pacemaker.state.epoch, 1);
        assert_eq!(start_epochs(&test_deps.events), vec![1]);

        for origin in 1..=3 {
            pacemaker.on_input(PacemakerInput::Message(
                OracleID::new(origin),
                PacemakerMessage::new_epoch(5).into(),
            ));
        }

        assert_eq!(pacemaker.state.epoch, 5);
        assert_eq!(pacemaker.state.highest_sent_epoch, 5);
        assert_eq!(
            pacemaker.state.leader,
            leader(5, 4, &roster.shared_config().leader_selection_key)
        );
        assert_eq!(start_epochs(&test_deps.events), vec![5]);

        // Repeats change nothing.
        pacemaker.on_input(PacemakerInput::Message(
            OracleID::new(3),
            PacemakerMessage::new_epoch(5).into(),
        ));
        assert!(start_epochs(&test_deps.events).is_empty());

        pacemaker.shutdown();
    }

    #[test]
    fn f_plus_one_new_epochs_are_joined_without_moving() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);
        pacemaker.initialize();
        // Nothing is on chain yet, so epoch 0 is already spoken for.
        assert_eq!(sent_new_epochs(&test_deps), vec![1]);

        pacemaker.on_input(PacemakerInput::Message(
            OracleID::new(1),
            PacemakerMessage::new_epoch(3).into(),
        ));
        assert!(sent_new_epochs(&test_deps).is_empty());

        pacemaker.on_input(PacemakerInput::Message(
            OracleID::new(2),
            PacemakerMessage::new_epoch(4).into(),
        ));
        // The second-highest of {3, 4}.
        assert_eq!(sent_new_epochs(&test_deps), vec![3]);
        assert_eq!(pacemaker.state.epoch, 0);

        pacemaker.shutdown();
    }

    #[test]
    fn change_leader_only_applies_to_the_current_epoch() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        store_state(
            &roster,
            &database,
            PersistentState {
                epoch: 2,
                highest_sent_epoch: 2,
                highest_received_epoch: vec![2, 2, 2, 2],
            },
        );
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);
        pacemaker.initialize();
        test_deps.network.take();

        pacemaker.on_input(PacemakerInput::Event(EventToPacemaker::ChangeLeader {
            epoch: 1,
        }));
        assert!(sent_new_epochs(&test_deps).is_empty());

        pacemaker.on_input(PacemakerInput::Event(EventToPacemaker::ChangeLeader {
            epoch: 2,
        }));
        assert_eq!(sent_new_epochs(&test_deps), vec![3]);
        assert_eq!(pacemaker.t_progress, None);

        pacemaker.shutdown();
    }

    #[test]
    fn malformed_persisted_state_is_ignored() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        store_state(
            &roster,
            &database,
            PersistentState {
                epoch: 6,
                highest_sent_epoch: 2,
                highest_received_epoch: vec![0, 0, 0, 0],
            },
        );
        let (mut pacemaker, _test_deps) = pacemaker(&roster, &database);
        pacemaker.initialize();
        assert_eq!(pacemaker.state.epoch, 0);
        pacemaker.shutdown();
    }

    #[test]
    fn persisted_state_for_another_roster_size_is_ignored() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        store_state(
            &roster,
            &database,
            PersistentState {
                epoch: 3,
                highest_sent_epoch: 3,
                highest_received_epoch: vec![3, 3, 3],
            },
        );
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);
        pacemaker.initialize();
        assert_eq!(pacemaker.state.epoch, 0);
        assert_eq!(pacemaker.state.highest_received_epoch, vec![0; 4]);
        assert_eq!(sent_new_epochs(&test_deps), vec![1]);
        pacemaker.shutdown();
    }

    #[test]
    fn resend_timer_rebroadcasts_the_announced_epoch() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);
        pacemaker.initialize();
        assert_eq!(sent_new_epochs(&test_deps), vec![1]);

        pacemaker.t_progress = None;
        pacemaker.t_resend = Some(Instant::now());
        pacemaker.tick();
        assert_eq!(sent_new_epochs(&test_deps), vec![1]);
        assert!(pacemaker.t_resend.is_some_and(|deadline| deadline > Instant::now()));
        pacemaker.shutdown();
    }

    #[test]
    fn progress_timeout_announces_the_next_epoch_once() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        store_state(
            &roster,
            &database,
            PersistentState {
                epoch: 2,
                highest_sent_epoch: 2,
                highest_received_epoch: vec![2, 2, 2, 2],
            },
        );
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);
        pacemaker.initialize();
        test_deps.network.take();

        pacemaker.t_resend = None;
        pacemaker.t_progress = Some(Instant::now());
        pacemaker.tick();
        assert_eq!(sent_new_epochs(&test_deps), vec![3]);
        assert_eq!(pacemaker.t_progress, None);
        assert!(test_deps.events.try_iter().any(|event| matches!(
            event,
            Event::ProgressTimeout(ProgressTimeoutEvent { epoch: 2, .. })
        )));

        // Already announced a later epoch than the current one: a second timeout announces nothing new.
        pacemaker.t_resend = None;
        pacemaker.t_progress = Some(Instant::now());
        pacemaker.tick();
        assert!(sent_new_epochs(&test_deps).is_empty());
        assert_eq!(pacemaker.state.epoch, 2);
        pacemaker.shutdown();
    }

    #[test]
    fn on_chain_epoch_bounds_the_announced_epoch() {
        let roster = TestRoster::new(4, 1);
        let database = MemDB::new();
        let (mut pacemaker, test_deps) = pacemaker(&roster, &database);
        test_deps.deps.contract_transmitter.set_latest(8, 2, 10);

        pacemaker.initialize();
        assert_eq!(pacemaker.state.epoch, 0);
        assert_eq!(sent_new_epochs(&test_deps), vec![9]);
        pacemaker.shutdown();
    }

    #[test]
    fn leader_selection_is_deterministic_and_spread() {
        let key = [3u8; 16];
        let mut counts = [0usize; 4];
        for epoch in 0..4000 {
            let selected = leader(epoch, 4, &key);
            assert_eq!(selected, leader(epoch, 4, &key));
            counts[selected.index()] += 1;
        }
        assert!(counts.iter().all(|count| *count > 800));
        assert_ne!(
            (0..32).map(|epoch| leader(epoch, 4, &key)).collect::<Vec<_>>(),
            (0..32).map(|epoch| leader(epoch, 4, &[4u8; 16])).collect::<Vec<_>>()
        );
    }
}
