/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the transmission protocol.
//!
//! Main type: [`Transmission`].

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::{
        mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::{
    events::{DiscardTransmissionEvent, Event, ScheduleTransmissionEvent, TransmitEvent},
    oracle::LocalTimeouts,
    pluggables::{
        ContractTransmitter, Database, PendingTransmission, PendingTransmissionKey,
        TransmissionDetails,
    },
    subprocess::block_for_at_most,
    types::{
        config::SharedConfig,
        data_types::{EpochRound, OracleID, ReportingContext},
        observation::Observation,
    },
};

use super::{
    schedule::transmission_delay,
    types::{EventToTransmission, ScheduledTransmission},
};

/// Pending transmissions scheduled longer ago than this are deleted at startup instead of restored.
pub const PENDING_TRANSMISSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest time the transmission thread waits before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The transmission protocol of one oracle.
///
/// # Usage
///
/// [`start`](Self::start) spawns a thread that first restores pending transmissions from the
/// [`Database`], then alternates between:
/// 1. [`on_event`](Self::on_event): scheduling a transmission for every report that report generation
///    accepts, and
/// 2. [`tick`](Self::tick): transmitting every scheduled report whose time has come.
pub(crate) struct Transmission<CT: ContractTransmitter, DB: Database> {
    shared_config: Arc<SharedConfig>,
    id: OracleID,
    timeouts: LocalTimeouts,
    contract_transmitter: CT,
    database: DB,
    queue: BinaryHeap<Reverse<ScheduledTransmission>>,
    latest: Option<(EpochRound, Observation)>,
    event_publisher: Option<Sender<Event>>,
}

impl<CT: ContractTransmitter, DB: Database> Transmission<CT, DB> {
    pub(crate) fn new(
        shared_config: Arc<SharedConfig>,
        id: OracleID,
        timeouts: LocalTimeouts,
        contract_transmitter: CT,
        database: DB,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            shared_config,
            id,
            timeouts,
            contract_transmitter,
            database,
            queue: BinaryHeap::new(),
            latest: None,
            event_publisher,
        }
    }

    pub(crate) fn start(
        mut self,
        inbox: Receiver<EventToTransmission>,
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
                    .time_until_next_transmission()
                    .map_or(POLL_INTERVAL, |until| until.min(POLL_INTERVAL));
                match inbox.recv_timeout(wait) {
                    Ok(event) => self.on_event(event),
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => return,
                }

                self.tick();
            }
        })
    }

    /// Garbage-collect expired pending transmissions, then restore the ones for this configuration.
    pub(crate) fn initialize(&mut self) {
        let cutoff = SystemTime::now()
            .checked_sub(PENDING_TRANSMISSION_MAX_AGE)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut database = self.database.clone();
        match block_for_at_most(self.timeouts.database_timeout, move |ctx| {
            database.delete_pending_transmissions_older_than(ctx, cutoff)
        }) {
            Some(Ok(())) => (),
            Some(Err(err)) => log::error!("Failed to delete stale pending transmissions: {}", err),
            None => log::error!("Timed out deleting stale pending transmissions"),
        }

        let config_digest = self.shared_config.config_digest;
        let mut database = self.database.clone();
        match block_for_at_most(self.timeouts.database_timeout, move |ctx| {
            database.pending_transmissions_with_config_digest(ctx, config_digest)
        }) {
            Some(Ok(pending)) => {
                for (key, transmission) in pending {
                    self.queue
                        .push(Reverse(ScheduledTransmission { key, transmission }));
                }
                log::debug!("Restored {} pending transmissions", self.queue.len());
            }
            Some(Err(err)) => log::error!("Failed to restore pending transmissions: {}", err),
            None => log::error!("Timed out restoring pending transmissions"),
        }
    }

    /// Schedule the transmission of a report accepted by report generation.
    pub(crate) fn on_event(&mut self, event: EventToTransmission) {
        let EventToTransmission {
            epoch,
            round,
            report,
        } = event;
        let config_digest = self.shared_config.config_digest;
        let epoch_round = EpochRound::new(epoch, round);

        let Some(details) = self.latest_transmission_details() else {
            return;
        };
        if details.config_digest != config_digest {
            self.discard(epoch_round, "contract has a different config digest");
            return;
        }

        let Some(median) = report.median() else {
            self.discard(epoch_round, "report has no observations");
            return;
        };
        if !self.should_transmit(epoch_round, &median, details.epoch_round()) {
            self.discard(epoch_round, "report is stale");
            return;
        }

        let delay = transmission_delay(
            &self.shared_config.transmission_order_key,
            &config_digest,
            epoch,
            round,
            self.id,
            self.shared_config.n(),
            &self.shared_config.s,
            self.shared_config.delta_stage,
        );
        let context = ReportingContext::new(config_digest, epoch, round);
        let key = PendingTransmissionKey {
            config_digest,
            epoch,
            round,
        };
        let transmission = PendingTransmission {
            time: SystemTime::now() + delay,
            median: median.clone(),
            args: report.transmission_args(&context),
        };

        let mut database = self.database.clone();
        let stored = transmission.clone();
        match block_for_at_most(self.timeouts.database_timeout, move |ctx| {
            database.store_pending_transmission(ctx, key, stored)
        }) {
            Some(Ok(())) => (),
            Some(Err(err)) => {
                log::error!("Failed to persist transmission for {}: {}", epoch_round, err);
                return;
            }
            None => {
                log::error!("Timed out persisting transmission for {}", epoch_round);
                return;
            }
        }

        self.queue
            .push(Reverse(ScheduledTransmission { key, transmission }));
        self.latest = Some((epoch_round, median));

        Event::ScheduleTransmission(ScheduleTransmissionEvent {
            timestamp: SystemTime::now(),
            epoch,
            round,
            delay,
        })
        .publish(&self.event_publisher);
    }

    /// Whether a report for `epoch_round` with `median` is worth scheduling, given that the contract has
    /// accepted reports up to `contract_epoch_round`.
    fn should_transmit(
        &self,
        epoch_round: EpochRound,
        median: &Observation,
        contract_epoch_round: EpochRound,
    ) -> bool {
        if epoch_round <= contract_epoch_round {
            return false;
        }
        if let Some((latest_epoch_round, latest_median)) = &self.latest {
            if epoch_round <= *latest_epoch_round {
                return false;
            }
            // The previous transmission has not landed yet; only replace it with a report that moves
            // the answer.
            if contract_epoch_round < *latest_epoch_round {
                return median.deviates(latest_median, self.shared_config.alpha_ppb);
            }
        }
        true
    }

    /// Transmit every scheduled report whose time has come.
    pub(crate) fn tick(&mut self) {
        while self
            .queue
            .peek()
            .is_some_and(|Reverse(next)| next.time() <= SystemTime::now())
        {
            if let Some(Reverse(scheduled)) = self.queue.pop() {
                self.transmit(scheduled);
            }
        }
    }

    fn transmit(&mut self, scheduled: ScheduledTransmission) {
        let ScheduledTransmission { key, transmission } = scheduled;
        let epoch_round = key.epoch_round();

        // Delete first: a transmission is attempted at most once per restart.
        let mut database = self.database.clone();
        match block_for_at_most(self.timeouts.database_timeout, move |ctx| {
            database.delete_pending_transmission(ctx, key)
        }) {
            Some(Ok(())) => (),
            Some(Err(err)) => {
                log::error!("Failed to delete pending transmission {}: {}", epoch_round, err);
                return;
            }
            None => {
                log::error!("Timed out deleting pending transmission {}", epoch_round);
                return;
            }
        }

        let Some(details) = self.latest_transmission_details() else {
            return;
        };
        if details.config_digest != key.config_digest {
            self.discard(epoch_round, "contract has a different config digest");
            return;
        }
        if epoch_round <= details.epoch_round() {
            self.discard(epoch_round, "contract already has a newer report");
            return;
        }

        let mut contract_transmitter = self.contract_transmitter.clone();
        let args = transmission.args;
        match block_for_at_most(self.timeouts.transmit_timeout, move |ctx| {
            contract_transmitter.transmit(ctx, args)
        }) {
            Some(Ok(())) => Event::Transmit(TransmitEvent {
                timestamp: SystemTime::now(),
                epoch: key.epoch,
                round: key.round,
            })
            .publish(&self.event_publisher),
            Some(Err(err)) => log::error!("Failed to transmit report {}: {}", epoch_round, err),
            None => log::error!("Timed out transmitting report {}", epoch_round),
        }
    }

    fn latest_transmission_details(&self) -> Option<TransmissionDetails> {
        let mut contract_transmitter = self.contract_transmitter.clone();
        match block_for_at_most(self.timeouts.blockchain_timeout, move |ctx| {
            contract_transmitter.latest_transmission_details(ctx)
        }) {
            Some(Ok(details)) => Some(details),
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

    fn discard(&self, epoch_round: EpochRound, reason: &'static str) {
        log::debug!("Discarding transmission for {}: {}", epoch_round, reason);
        Event::DiscardTransmission(DiscardTransmissionEvent {
            timestamp: SystemTime::now(),
            epoch: epoch_round.epoch,
            round: epoch_round.round,
            reason,
        })
        .publish(&self.event_publisher);
    }

    fn time_until_next_transmission(&self) -> Option<Duration> {
        self.queue.peek().map(|Reverse(next)| {
            next.time()
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        attested_report, test_timeouts, MemDB, MockTransmitter, TestRoster,
    };

    fn transmission(
        roster: &TestRoster,
        transmitter: &MockTransmitter,
        database: &MemDB,
    ) -> Transmission<MockTransmitter, MemDB> {
        Transmission::new(
            Arc::new(roster.shared_config()),
            OracleID::new(0),
            test_timeouts(),
            transmitter.clone(),
            database.clone(),
            None,
        )
    }

    #[test]
    fn duplicate_reports_are_transmitted_once() {
        let roster = TestRoster::new(4, 1);
        let transmitter = MockTransmitter::new(roster.contract_config.config_digest);
        let database = MemDB::new();
        let mut transmission = transmission(&roster, &transmitter, &database);
        transmission.initialize();

        let report = attested_report(&roster, 1, 1, &[10, 20, 30], &[0, 1]);
        let event = EventToTransmission {
            epoch: 1,
            round: 1,
            report,
        };
        transmission.on_event(event.clone());
        transmission.on_event(event);
        assert_eq!(database.pending_count(), 1);

        // The test roster schedules every oracle in the first stage.
        transmission.tick();
        assert_eq!(transmitter.transmissions().len(), 1);
        assert_eq!(database.pending_count(), 0);

        transmission.tick();
        assert_eq!(transmitter.transmissions().len(), 1);
    }

    #[test]
    fn reports_the_contract_already_has_are_discarded() {
        let roster = TestRoster::new(4, 1);
        let transmitter = MockTransmitter::new(roster.contract_config.config_digest);
        transmitter.set_latest(2, 3, 10);
        let database = MemDB::new();
        let mut transmission = transmission(&roster, &transmitter, &database);

        transmission.on_event(EventToTransmission {
            epoch: 2,
            round: 3,
            report: attested_report(&roster, 2, 3, &[10, 20, 30], &[0, 1]),
        });
        transmission.on_event(EventToTransmission {
            epoch: 1,
            round: 9,
            report: attested_report(&roster, 1, 9, &[10, 20, 30], &[0, 1]),
        });
        assert_eq!(database.pending_count(), 0);
    }

    #[test]
    fn unlanded_report_is_replaced_only_on_deviation() {
        let roster = TestRoster::new(4, 1);
        let transmitter = MockTransmitter::new(roster.contract_config.config_digest);
        let database = MemDB::new();
        let mut transmission = transmission(&roster, &transmitter, &database);

        transmission.on_event(EventToTransmission {
            epoch: 1,
            round: 1,
            report: attested_report(&roster, 1, 1, &[100, 100, 100], &[0, 1]),
        });
        // Same median, contract still at (0, 0).
        transmission.on_event(EventToTransmission {
            epoch: 1,
            round: 2,
            report: attested_report(&roster, 1, 2, &[100, 100, 100], &[0, 1]),
        });
        assert_eq!(database.pending_count(), 1);

        // 50% move exceeds the test roster's deviation threshold.
        transmission.on_event(EventToTransmission {
            epoch: 1,
            round: 3,
            report: attested_report(&roster, 1, 3, &[150, 150, 150], &[0, 1]),
        });
        assert_eq!(database.pending_count(), 2);
    }

    #[test]
    fn pending_transmissions_survive_a_restart() {
        let roster = TestRoster::new(4, 1);
        let transmitter = MockTransmitter::new(roster.contract_config.config_digest);
        let database = MemDB::new();

        let mut first = transmission(&roster, &transmitter, &database);
        first.on_event(EventToTransmission {
            epoch: 1,
            round: 1,
            report: attested_report(&roster, 1, 1, &[1, 2, 3], &[0, 1]),
        });
        drop(first);

        let mut second = transmission(&roster, &transmitter, &database);
        second.initialize();
        second.tick();
        assert_eq!(transmitter.transmissions().len(), 1);
    }

    #[test]
    fn contract_is_checked_again_when_the_timer_fires() {
        let roster = TestRoster::new(4, 1);
        let transmitter = MockTransmitter::new(roster.contract_config.config_digest);
        let database = MemDB::new();
        let (event_publisher, events) = std::sync::mpsc::channel();
        let mut transmission = Transmission::new(
            Arc::new(roster.shared_config()),
            OracleID::new(0),
            test_timeouts(),
            transmitter.clone(),
            database.clone(),
            Some(event_publisher),
        );

        transmission.on_event(EventToTransmission {
            epoch: 1,
            round: 1,
            report: attested_report(&roster, 1, 1, &[10, 20, 30], &[0, 1]),
        });
        assert_eq!(database.pending_count(), 1);

        // Another oracle's later report lands before this one is due.
        transmitter.set_latest(1, 2, 20);
        transmission.tick();

        assert!(transmitter.transmissions().is_empty());
        assert_eq!(database.pending_count(), 0);
        assert!(events.try_iter().any(|event| matches!(
            event,
            Event::DiscardTransmission(DiscardTransmissionEvent { epoch: 1, round: 1, .. })
        )));
    }
}
