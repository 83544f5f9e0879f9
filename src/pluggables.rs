/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable external collaborators of the oracle.
//!
//! The library user provides implementations of these traits when building an
//! [`OracleSpec`](crate::oracle::OracleSpec):
//! 1. [`DataSource`]: produces one numeric observation on request.
//! 2. [`ContractTransmitter`]: reads the on-chain consumer's state and submits transmissions to it.
//! 3. [`Database`]: durably stores the pacemaker's state, pending transmissions, and the contract
//!    configuration.
//!
//! Every method takes a [`CallContext`]. The oracle calls these methods under a timeout (see
//! [`subprocess`](crate::subprocess)), and implementations should return promptly once
//! [`CallContext::is_cancelled`] becomes true.
//!
//! Implementations are cloned into helper threads, so they must be `Clone + Send + 'static`. Clones must
//! share the same underlying storage or connection: in particular, the pacemaker's persistence thread and
//! the transmission thread write to clones of the same `Database` concurrently (on disjoint keys).

use std::{collections::BTreeMap, error::Error, time::Duration, time::SystemTime};

use borsh::{BorshDeserialize, BorshSerialize};
use num_bigint::BigInt;

use crate::{
    subprocess::CallContext,
    types::{
        config::ContractConfig,
        data_types::{ConfigDigest, Epoch, EpochRound, Round},
        observation::Observation,
        report::TransmissionArgs,
    },
};

/// Error type returned by pluggable components.
pub type PluggableError = Box<dyn Error + Send + Sync>;

/// The external feed that oracles observe.
pub trait DataSource: Clone + Send + 'static {
    /// Produce the current value of the feed.
    ///
    /// Values outside of the `int192` range are rejected by the caller, and count as no observation.
    fn observe(&mut self, ctx: &CallContext) -> Result<BigInt, PluggableError>;
}

/// The latest transmission accepted by the on-chain consumer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransmissionDetails {
    pub config_digest: ConfigDigest,
    pub epoch: Epoch,
    pub round: Round,
    pub latest_answer: Observation,
    pub latest_timestamp: SystemTime,
}

impl TransmissionDetails {
    pub fn epoch_round(&self) -> EpochRound {
        EpochRound::new(self.epoch, self.round)
    }
}

/// The latest explicit request for a new round made to the on-chain consumer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RoundRequested {
    pub config_digest: ConfigDigest,
    pub epoch: Epoch,
    pub round: Round,
}

impl RoundRequested {
    pub fn epoch_round(&self) -> EpochRound {
        EpochRound::new(self.epoch, self.round)
    }
}

/// The oracle's interface to the on-chain consumer.
pub trait ContractTransmitter: Clone + Send + 'static {
    fn latest_transmission_details(
        &mut self,
        ctx: &CallContext,
    ) -> Result<TransmissionDetails, PluggableError>;

    /// Get the latest round request made in the last `lookback`. If there was none, return a
    /// `RoundRequested` whose config digest is the zero digest.
    fn latest_round_requested(
        &mut self,
        ctx: &CallContext,
        lookback: Duration,
    ) -> Result<RoundRequested, PluggableError>;

    /// Submit a report and its signatures to the on-chain consumer.
    fn transmit(&mut self, ctx: &CallContext, args: TransmissionArgs) -> Result<(), PluggableError>;
}

/// The pacemaker's state, persisted so that a restarted oracle resumes in the epoch it left off in.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PersistentState {
    pub epoch: Epoch,
    pub highest_sent_epoch: Epoch,
    pub highest_received_epoch: Vec<Epoch>,
}

/// Identifies a [`PendingTransmission`].
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, BorshSerialize, BorshDeserialize,
)]
pub struct PendingTransmissionKey {
    pub config_digest: ConfigDigest,
    pub epoch: Epoch,
    pub round: Round,
}

impl PendingTransmissionKey {
    pub fn epoch_round(&self) -> EpochRound {
        EpochRound::new(self.epoch, self.round)
    }
}

/// A transmission scheduled for `time`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PendingTransmission {
    pub time: SystemTime,
    pub median: Observation,
    pub args: TransmissionArgs,
}

/// Durable storage for the oracle.
pub trait Database: Clone + Send + 'static {
    fn read_state(
        &mut self,
        ctx: &CallContext,
        config_digest: ConfigDigest,
    ) -> Result<Option<PersistentState>, PluggableError>;

    fn write_state(
        &mut self,
        ctx: &CallContext,
        config_digest: ConfigDigest,
        state: PersistentState,
    ) -> Result<(), PluggableError>;

    fn read_config(&mut self, ctx: &CallContext) -> Result<Option<ContractConfig>, PluggableError>;

    fn write_config(
        &mut self,
        ctx: &CallContext,
        config: ContractConfig,
    ) -> Result<(), PluggableError>;

    fn store_pending_transmission(
        &mut self,
        ctx: &CallContext,
        key: PendingTransmissionKey,
        transmission: PendingTransmission,
    ) -> Result<(), PluggableError>;

    fn pending_transmissions_with_config_digest(
        &mut self,
        ctx: &CallContext,
        config_digest: ConfigDigest,
    ) -> Result<BTreeMap<PendingTransmissionKey, PendingTransmission>, PluggableError>;

    fn delete_pending_transmission(
        &mut self,
        ctx: &CallContext,
        key: PendingTransmissionKey,
    ) -> Result<(), PluggableError>;

    /// Delete every pending transmission, of any config digest, scheduled before `time`.
    fn delete_pending_transmissions_older_than(
        &mut self,
        ctx: &CallContext,
        time: SystemTime,
    ) -> Result<(), PluggableError>;
}
