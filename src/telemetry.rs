/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Best-effort telemetry.
//!
//! Protocol threads report [`TelemetryEvent`]s through a [`TelemetrySender`]. A forwarding thread
//! serializes them and hands them to the user's [`TelemetrySink`]. The channel between the two is
//! bounded: when it is full, events are dropped rather than slowing down the protocol, and a warning is
//! logged at the 1st, 2nd, 4th, 8th, ... consecutive drop.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    serialization::serialize_telemetry,
    types::data_types::{ConfigDigest, Epoch, OracleID, Round},
};

/// How long the forwarding thread waits for an event before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receives serialized [`TelemetryEvent`]s.
pub trait TelemetrySink: Send + 'static {
    fn send(&mut self, event: Vec<u8>);
}

impl TelemetrySink for Box<dyn TelemetrySink> {
    fn send(&mut self, event: Vec<u8>) {
        (**self).send(event)
    }
}

/// Default capacity of the buffer between the protocol threads and the [`TelemetrySink`].
pub const DEFAULT_TELEMETRY_BUFFER_CAPACITY: usize = 1000;

/// Observability events emitted by the protocol.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum TelemetryEvent {
    MessageReceived {
        config_digest: ConfigDigest,
        sender: OracleID,
        message: Vec<u8>,
    },
    MessageBroadcast {
        config_digest: ConfigDigest,
        message: Vec<u8>,
    },
    MessageSent {
        config_digest: ConfigDigest,
        receiver: OracleID,
        message: Vec<u8>,
    },
    AssertionViolation {
        config_digest: ConfigDigest,
        violation: AssertionViolation,
    },
    RoundStarted {
        config_digest: ConfigDigest,
        epoch: Epoch,
        round: Round,
        leader: OracleID,
        unix_time_nanos: u64,
    },
}

/// Evidence that a peer broke the protocol.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum AssertionViolation {
    InvalidSignature {
        sender: OracleID,
        epoch: Epoch,
        round: Round,
    },
    InvalidSerialization {
        sender: OracleID,
        bytes: Vec<u8>,
    },
}

/// Logs a warning on every power-of-two count of consecutive failures.
#[derive(Clone, Default)]
pub(crate) struct Taper {
    consecutive_failures: Arc<AtomicU64>,
}

impl Taper {
    pub(crate) fn new() -> Taper {
        Taper::default()
    }

    /// Record the outcome of one attempt. `warn` is called with the number of consecutive failures when
    /// that number is a power of two.
    pub(crate) fn trigger(&self, ok: bool, warn: impl FnOnce(u64)) {
        if ok {
            self.reset();
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures.is_power_of_two() {
            warn(failures);
        }
    }

    /// Reset the count of consecutive failures, returning the count before the reset.
    pub(crate) fn reset(&self) -> u64 {
        self.consecutive_failures.swap(0, Ordering::AcqRel)
    }
}

/// Handle for submitting [`TelemetryEvent`]s without blocking.
#[derive(Clone)]
pub(crate) struct TelemetrySender {
    sender: SyncSender<TelemetryEvent>,
    taper: Taper,
}

impl TelemetrySender {
    pub(crate) fn send(&self, event: TelemetryEvent) {
        let ok = match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            // The forwarding thread has shut down; nothing left to warn about.
            Err(TrySendError::Disconnected(_)) => return,
        };
        self.taper.trigger(ok, |dropped| {
            log::warn!(
                "Telemetry buffer full, dropped {} consecutive telemetry events",
                dropped
            )
        });
    }
}

/// Publish `event` on `telemetry` if telemetry is enabled.
pub(crate) fn emit(telemetry: &Option<TelemetrySender>, event: TelemetryEvent) {
    if let Some(telemetry) = telemetry {
        telemetry.send(event)
    }
}

/// Spawn the telemetry forwarding thread, which drains a buffer of `capacity` events into `sink`. The
/// buffer always holds at least one event.
pub(crate) fn start_telemetry<S: TelemetrySink>(
    mut sink: S,
    capacity: usize,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, TelemetrySender) {
    let (sender, receiver) = mpsc::sync_channel(capacity.max(1));

    let forwarder = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) => sink.send(serialize_telemetry(&event)),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    });

    (
        forwarder,
        TelemetrySender {
            sender,
            taper: Taper::new(),
        },
    )
}
