//! Stand-ins for the data source and the on-chain consumer.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use num_bigint::BigInt;
use offchain_reporting::{
    pluggables::{
        ContractTransmitter, DataSource, PluggableError, RoundRequested, TransmissionDetails,
    },
    subprocess::CallContext,
    types::{
        data_types::{ConfigDigest, EpochRound},
        observation::{Observation, OBSERVATION_BYTE_WIDTH},
        report::TransmissionArgs,
    },
};

const WORD: usize = 32;

/// A data source that always observes the same value.
#[derive(Clone)]
pub(crate) struct FixedDataSource(pub(crate) i64);

impl DataSource for FixedDataSource {
    fn observe(&mut self, _: &CallContext) -> Result<BigInt, PluggableError> {
        Ok(BigInt::from(self.0))
    }
}

/// A transmission attempt seen by the [`MockContract`].
#[derive(Clone, Debug)]
pub(crate) struct Attempt {
    pub(crate) epoch_round: EpochRound,
    pub(crate) report: Vec<u8>,
    pub(crate) signatures: usize,
    pub(crate) accepted: bool,
}

struct ContractState {
    details: TransmissionDetails,
    attempts: Vec<Attempt>,
}

/// An on-chain consumer shared by every oracle. Accepts a report iff it is for the configured digest and
/// newer than the latest accepted one.
#[derive(Clone)]
pub(crate) struct MockContract(Arc<Mutex<ContractState>>);

impl MockContract {
    pub(crate) fn new(config_digest: ConfigDigest) -> MockContract {
        MockContract(Arc::new(Mutex::new(ContractState {
            details: TransmissionDetails {
                config_digest,
                epoch: 0,
                round: 0,
                latest_answer: Observation::from_i64(0),
                latest_timestamp: SystemTime::UNIX_EPOCH,
            },
            attempts: Vec::new(),
        })))
    }

    pub(crate) fn latest(&self) -> TransmissionDetails {
        self.0.lock().unwrap().details.clone()
    }

    pub(crate) fn attempts(&self) -> Vec<Attempt> {
        self.0.lock().unwrap().attempts.clone()
    }
}

/// Read `(config digest, epoch, round, median)` back out of an encoded report.
fn decode_report(report: &[u8]) -> (ConfigDigest, EpochRound, Observation) {
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&report[11..27]);
    let mut epoch = [0u8; 4];
    epoch.copy_from_slice(&report[27..31]);
    let epoch_round = EpochRound::new(u32::from_be_bytes(epoch), report[31]);

    let mut len = [0u8; 8];
    len.copy_from_slice(&report[4 * WORD - 8..4 * WORD]);
    let len = u64::from_be_bytes(len) as usize;
    let median_word = &report[(4 + len / 2) * WORD..(5 + len / 2) * WORD];
    let median = Observation::unmarshal(&median_word[WORD - OBSERVATION_BYTE_WIDTH..]).unwrap();

    (ConfigDigest::new(digest), epoch_round, median)
}

impl ContractTransmitter for MockContract {
    fn latest_transmission_details(
        &mut self,
        _: &CallContext,
    ) -> Result<TransmissionDetails, PluggableError> {
        Ok(self.latest())
    }

    fn latest_round_requested(
        &mut self,
        _: &CallContext,
        _: Duration,
    ) -> Result<RoundRequested, PluggableError> {
        Ok(RoundRequested {
            config_digest: ConfigDigest::default(),
            epoch: 0,
            round: 0,
        })
    }

    fn transmit(&mut self, _: &CallContext, args: TransmissionArgs) -> Result<(), PluggableError> {
        let (config_digest, epoch_round, median) = decode_report(&args.report);
        let mut state = self.0.lock().unwrap();
        let accepted = config_digest == state.details.config_digest
            && epoch_round > state.details.epoch_round();
        state.attempts.push(Attempt {
            epoch_round,
            report: args.report,
            signatures: args.rs.len(),
            accepted,
        });
        if !accepted {
            return Err(format!("stale report {}", epoch_round).into());
        }
        state.details.epoch = epoch_round.epoch;
        state.details.round = epoch_round.round;
        state.details.latest_answer = median;
        state.details.latest_timestamp = SystemTime::now();
        Ok(())
    }
}
