/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shared fixtures for unit tests: a deterministic roster, and in-memory stand-ins for every pluggable
//! component.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    thread,
    time::{Duration, SystemTime},
};

use num_bigint::BigInt;

use crate::{
    events::Event,
    networking::{
        messages::Message,
        network::NetworkEndpoint,
        receiving::{inbox, INBOX_CAPACITY},
        sending::SenderHandle,
    },
    oracle::LocalTimeouts,
    pacemaker::types::PacemakerInput,
    pluggables::{
        ContractTransmitter, DataSource, PluggableError, RoundRequested, TransmissionDetails,
    },
    report_generation::implementation::ReportGenerationDeps,
    subprocess::CallContext,
    transmission::types::EventToTransmission,
    types::{
        config::{ContractConfig, PublicConfigParameters, SharedConfig, SharedSecret},
        crypto_primitives::{
            onchain_address, OffchainKeypair, OnchainKeypair, OnchainSigningKey, SigningKey,
        },
        data_types::{ConfigDigest, Epoch, OnchainAddress, OracleID, ReportingContext, Round},
        observation::Observation,
        report::{AttestedReportMany, AttestedReportOne, AttributedObservation, TransmissionArgs},
    },
};

#[path = "../tests/common/mem_db.rs"]
mod mem_db;

pub(crate) use mem_db::MemDB;

/// Keys and on-chain configuration of a roster of oracles, all derived deterministically from their
/// indices.
pub(crate) struct TestRoster {
    pub(crate) offchain_keys: Vec<SigningKey>,
    pub(crate) onchain_keys: Vec<OnchainSigningKey>,
    pub(crate) shared_secret: SharedSecret,
    pub(crate) contract_config: ContractConfig,
}

impl TestRoster {
    /// Create a roster of `n` oracles tolerating `f` faults. The configuration is not validated, so
    /// invalid combinations can be constructed.
    pub(crate) fn new(n: usize, f: u8) -> TestRoster {
        let offchain_keys: Vec<SigningKey> = (0..n)
            .map(|i| SigningKey::from_bytes(&[i as u8 + 1; 32]))
            .collect();
        let onchain_keys: Vec<OnchainSigningKey> = (0..n)
            .map(|i| OnchainSigningKey::from_slice(&[i as u8 + 1; 32]).unwrap())
            .collect();
        let params = public_params(&offchain_keys);
        let contract_config = contract_config(&onchain_keys, f, params);
        TestRoster {
            offchain_keys,
            onchain_keys,
            shared_secret: SharedSecret::new([42; 16]),
            contract_config,
        }
    }

    pub(crate) fn shared_config(&self) -> SharedConfig {
        SharedConfig::from_contract_config(&self.contract_config, &self.shared_secret).unwrap()
    }

    pub(crate) fn offchain_keypair(&self, i: usize) -> OffchainKeypair {
        OffchainKeypair::new(self.offchain_keys[i].clone())
    }

    pub(crate) fn onchain_keypair(&self, i: usize) -> OnchainKeypair {
        OnchainKeypair::new(self.onchain_keys[i].clone())
    }

    pub(crate) fn context(&self, epoch: Epoch, round: Round) -> ReportingContext {
        ReportingContext::new(self.contract_config.config_digest, epoch, round)
    }

    pub(crate) fn signers(&self) -> Vec<OnchainAddress> {
        self.contract_config.signers.clone()
    }
}

/// Parameters with short timers, a 10% deviation threshold, and every oracle in the first transmission
/// stage.
pub(crate) fn test_public_params(roster: &TestRoster) -> PublicConfigParameters {
    public_params(&roster.offchain_keys)
}

/// Build the contract configuration of `roster` with the given fault tolerance and parameters.
pub(crate) fn test_contract_config(
    roster: &TestRoster,
    f: u8,
    params: PublicConfigParameters,
) -> ContractConfig {
    contract_config(&roster.onchain_keys, f, params)
}

fn public_params(offchain_keys: &[SigningKey]) -> PublicConfigParameters {
    PublicConfigParameters {
        delta_progress_nanos: Duration::from_secs(2).as_nanos() as u64,
        delta_resend_nanos: Duration::from_millis(200).as_nanos() as u64,
        delta_round_nanos: Duration::from_millis(500).as_nanos() as u64,
        delta_grace_nanos: Duration::from_millis(100).as_nanos() as u64,
        delta_c_nanos: Duration::from_secs(60).as_nanos() as u64,
        delta_stage_nanos: Duration::from_secs(1).as_nanos() as u64,
        r_max: 5,
        alpha_ppb: 100_000_000,
        s: vec![offchain_keys.len() as u32],
        offchain_public_keys: offchain_keys
            .iter()
            .map(|key| key.verifying_key().to_bytes())
            .collect(),
    }
}

fn contract_config(
    onchain_keys: &[OnchainSigningKey],
    f: u8,
    params: PublicConfigParameters,
) -> ContractConfig {
    let signers = onchain_keys
        .iter()
        .map(|key| onchain_address(key.verifying_key()))
        .collect();
    let transmitters = (0..onchain_keys.len())
        .map(|i| OnchainAddress::new([0x80 + i as u8; 20]))
        .collect();
    ContractConfig::new(
        OnchainAddress::new([0xcc; 20]),
        1,
        signers,
        transmitters,
        f,
        1,
        params.encode(),
    )
}

pub(crate) fn test_timeouts() -> LocalTimeouts {
    LocalTimeouts {
        blockchain_timeout: Duration::from_secs(1),
        database_timeout: Duration::from_secs(1),
        data_source_timeout: Duration::from_secs(1),
        data_source_grace_period: Duration::from_millis(100),
        transmit_timeout: Duration::from_secs(1),
    }
}

/// A report of `values`, sorted and attributed to observers `0..values.len()`, signed on chain by the
/// oracles at `signers`.
pub(crate) fn attested_report(
    roster: &TestRoster,
    epoch: Epoch,
    round: Round,
    values: &[i64],
    signers: &[usize],
) -> AttestedReportMany {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let attributed_observations: Vec<AttributedObservation> = sorted
        .into_iter()
        .enumerate()
        .map(|(observer, value)| AttributedObservation {
            observation: Observation::from_i64(value),
            observer: OracleID::new(observer as u8),
        })
        .collect();

    let context = roster.context(epoch, round);
    let signatures = signers
        .iter()
        .map(|signer| {
            AttestedReportOne::make(
                &context,
                attributed_observations.clone(),
                &roster.onchain_keypair(*signer),
            )
            .unwrap()
            .signature
        })
        .collect();
    AttestedReportMany {
        attributed_observations,
        signatures,
    }
}

/// A [`NetworkEndpoint`] that records outgoing messages and never receives any. Broadcasts are recorded
/// with no recipient.
#[derive(Clone, Default)]
pub(crate) struct RecordingNetwork(Arc<Mutex<Vec<(Option<OracleID>, Message)>>>);

impl RecordingNetwork {
    pub(crate) fn new() -> RecordingNetwork {
        RecordingNetwork::default()
    }

    /// Remove and return every message sent so far.
    pub(crate) fn take(&self) -> Vec<(Option<OracleID>, Message)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl NetworkEndpoint for RecordingNetwork {
    fn start(&mut self) -> Result<(), PluggableError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluggableError> {
        Ok(())
    }

    fn send_to(&mut self, message: Message, to: OracleID) {
        self.0.lock().unwrap().push((Some(to), message))
    }

    fn broadcast(&mut self, message: Message) {
        self.0.lock().unwrap().push((None, message))
    }

    fn recv(&mut self) -> Option<(OracleID, Message)> {
        None
    }
}

/// A [`DataSource`] that always observes the same value, optionally after a delay. Holding the lock
/// returned by [`gate`](Self::gate) stalls every call until it is released.
#[derive(Clone)]
pub(crate) struct ConstantDataSource {
    value: i64,
    delay: Duration,
    gate: Arc<Mutex<()>>,
    calls: Arc<AtomicUsize>,
}

impl ConstantDataSource {
    pub(crate) fn new(value: i64) -> ConstantDataSource {
        ConstantDataSource {
            value,
            delay: Duration::ZERO,
            gate: Arc::new(Mutex::new(())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> ConstantDataSource {
        self.delay = delay;
        self
    }

    pub(crate) fn gate(&self) -> Arc<Mutex<()>> {
        self.gate.clone()
    }

    /// Number of calls to `observe` so far, including calls still in progress.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource for ConstantDataSource {
    fn observe(&mut self, _: &CallContext) -> Result<BigInt, PluggableError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _gate = self.gate.lock().unwrap();
        thread::sleep(self.delay);
        Ok(BigInt::from(self.value))
    }
}

struct MockContract {
    details: TransmissionDetails,
    round_requested: RoundRequested,
    failing: bool,
    transmissions: Vec<TransmissionArgs>,
}

/// A [`ContractTransmitter`] backed by shared in-memory contract state. Clones observe each other's
/// changes.
#[derive(Clone)]
pub(crate) struct MockTransmitter(Arc<Mutex<MockContract>>);

impl MockTransmitter {
    /// A contract configured with `config_digest` that has not accepted any report yet.
    pub(crate) fn new(config_digest: ConfigDigest) -> MockTransmitter {
        MockTransmitter(Arc::new(Mutex::new(MockContract {
            details: TransmissionDetails {
                config_digest,
                epoch: 0,
                round: 0,
                latest_answer: Observation::from_i64(0),
                latest_timestamp: SystemTime::now(),
            },
            round_requested: RoundRequested {
                config_digest: ConfigDigest::default(),
                epoch: 0,
                round: 0,
            },
            failing: false,
            transmissions: Vec::new(),
        })))
    }

    /// Pretend the contract just accepted a report for `(epoch, round)` with median `answer`.
    pub(crate) fn set_latest(&self, epoch: Epoch, round: Round, answer: i64) {
        let mut contract = self.0.lock().unwrap();
        contract.details.epoch = epoch;
        contract.details.round = round;
        contract.details.latest_answer = Observation::from_i64(answer);
        contract.details.latest_timestamp = SystemTime::now();
    }

    pub(crate) fn set_latest_timestamp(&self, timestamp: SystemTime) {
        self.0.lock().unwrap().details.latest_timestamp = timestamp;
    }

    pub(crate) fn set_round_requested(&self, config_digest: ConfigDigest, epoch: Epoch, round: Round) {
        self.0.lock().unwrap().round_requested = RoundRequested {
            config_digest,
            epoch,
            round,
        };
    }

    /// Make every call fail.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }

    pub(crate) fn transmissions(&self) -> Vec<TransmissionArgs> {
        self.0.lock().unwrap().transmissions.clone()
    }

    fn check(&self) -> Result<(), PluggableError> {
        if self.0.lock().unwrap().failing {
            Err("contract unreachable".into())
        } else {
            Ok(())
        }
    }
}

impl ContractTransmitter for MockTransmitter {
    fn latest_transmission_details(
        &mut self,
        _: &CallContext,
    ) -> Result<TransmissionDetails, PluggableError> {
        self.check()?;
        Ok(self.0.lock().unwrap().details.clone())
    }

    fn latest_round_requested(
        &mut self,
        _: &CallContext,
        _: Duration,
    ) -> Result<RoundRequested, PluggableError> {
        self.check()?;
        Ok(self.0.lock().unwrap().round_requested)
    }

    fn transmit(&mut self, _: &CallContext, args: TransmissionArgs) -> Result<(), PluggableError> {
        self.check()?;
        self.0.lock().unwrap().transmissions.push(args);
        Ok(())
    }
}

/// [`ReportGenerationDeps`] for oracle `id` of `roster`, observing `value`, along with the receiving
/// ends of every channel they write to.
pub(crate) struct TestDeps {
    pub(crate) deps: ReportGenerationDeps<RecordingNetwork, ConstantDataSource, MockTransmitter>,
    pub(crate) network: RecordingNetwork,
    pub(crate) pacemaker: Receiver<PacemakerInput>,
    pub(crate) transmission: Receiver<EventToTransmission>,
    pub(crate) events: Receiver<Event>,
}

pub(crate) fn test_deps(roster: &TestRoster, id: usize, value: i64) -> TestDeps {
    let network = RecordingNetwork::new();
    let (to_pacemaker, pacemaker) = inbox("Pacemaker", INBOX_CAPACITY);
    let (to_transmission, transmission) = mpsc::channel();
    let (event_publisher, events) = mpsc::channel();
    let deps = ReportGenerationDeps {
        shared_config: Arc::new(roster.shared_config()),
        timeouts: test_timeouts(),
        id: OracleID::new(id as u8),
        offchain_keypair: roster.offchain_keypair(id),
        onchain_keypair: roster.onchain_keypair(id),
        sender: SenderHandle::new(network.clone()),
        data_source: ConstantDataSource::new(value),
        contract_transmitter: MockTransmitter::new(roster.contract_config.config_digest),
        to_pacemaker,
        to_transmission,
        event_publisher: Some(event_publisher),
        telemetry: None,
    };
    TestDeps {
        deps,
        network,
        pacemaker,
        transmission,
        events,
    }
}
