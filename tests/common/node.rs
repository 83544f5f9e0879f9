use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use offchain_reporting::{
    events::{AcceptReportEvent, StartEpochEvent, TransmitEvent},
    oracle::{LocalConfig, Oracle, OracleSpec},
    types::{
        config::{ContractConfig, PublicConfigParameters, SharedSecret},
        crypto_primitives::{onchain_address, OnchainSigningKey, SigningKey},
        data_types::{Epoch, EpochRound, OnchainAddress, OracleID},
        observation::Observation,
    },
};
use rand_core::OsRng;

use crate::common::{
    logging::{first_seven_base64_chars, log_with_context},
    mem_db::MemDB,
    mocks::{FixedDataSource, MockContract},
    network::NetworkStub,
};

/// Keys of every oracle in a roster, and the contract configuration naming them.
pub(crate) struct Roster {
    pub(crate) offchain_keys: Vec<SigningKey>,
    pub(crate) onchain_keys: Vec<OnchainSigningKey>,
    pub(crate) shared_secret: SharedSecret,
    pub(crate) contract_config: ContractConfig,
}

impl Roster {
    /// Create a roster of `n` oracles tolerating `f` faults, with every oracle in the first
    /// transmission stage. A short `delta_c` keeps reports flowing even though observations never
    /// change.
    pub(crate) fn new(n: usize, f: u8) -> Roster {
        let mut csprg = OsRng {};
        let offchain_keys: Vec<SigningKey> =
            (0..n).map(|_| SigningKey::generate(&mut csprg)).collect();
        let onchain_keys: Vec<OnchainSigningKey> = (0..n)
            .map(|i| OnchainSigningKey::from_slice(&[i as u8 + 1; 32]).unwrap())
            .collect();

        let params = PublicConfigParameters {
            delta_progress_nanos: Duration::from_secs(2).as_nanos() as u64,
            delta_resend_nanos: Duration::from_millis(500).as_nanos() as u64,
            delta_round_nanos: Duration::from_millis(500).as_nanos() as u64,
            delta_grace_nanos: Duration::from_millis(100).as_nanos() as u64,
            delta_c_nanos: Duration::from_secs(1).as_nanos() as u64,
            delta_stage_nanos: Duration::from_secs(1).as_nanos() as u64,
            r_max: 20,
            alpha_ppb: 10_000_000,
            s: vec![n as u32],
            offchain_public_keys: offchain_keys
                .iter()
                .map(|key| key.verifying_key().to_bytes())
                .collect(),
        };
        let contract_config = ContractConfig::new(
            OnchainAddress::new([0xcc; 20]),
            1,
            onchain_keys
                .iter()
                .map(|key| onchain_address(key.verifying_key()))
                .collect(),
            (0..n).map(|i| OnchainAddress::new([0x80 + i as u8; 20])).collect(),
            f,
            1,
            params.encode(),
        );

        Roster {
            offchain_keys,
            onchain_keys,
            shared_secret: SharedSecret::new([9; 16]),
            contract_config,
        }
    }
}

/// Things the Nodes will have in common:
/// - Contract configuration.
/// - Shared secret.
/// - The on-chain consumer.
///
/// Things that they will differ in:
/// - Observed value.
/// - Network instance.
/// - Database.
/// - Keys.
pub(crate) struct Node {
    id: OracleID,
    start_epochs: Arc<Mutex<Vec<Epoch>>>,
    accepted: Arc<Mutex<Vec<(EpochRound, Observation)>>>,
    transmitted: Arc<Mutex<Vec<EpochRound>>>,
    _oracle: Oracle<NetworkStub>,
}

impl Node {
    pub(crate) fn new(
        roster: &Roster,
        index: usize,
        network: NetworkStub,
        value: i64,
        contract: MockContract,
    ) -> Node {
        let id = OracleID::new(index as u8);
        let start_epochs = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let transmitted = Arc::new(Mutex::new(Vec::new()));

        let local_config = LocalConfig::builder()
            .offchain_signing_key(roster.offchain_keys[index].clone())
            .onchain_signing_key(roster.onchain_keys[index].clone())
            .blockchain_timeout(Duration::from_secs(1))
            .database_timeout(Duration::from_secs(1))
            .data_source_timeout(Duration::from_secs(1))
            .data_source_grace_period(Duration::from_millis(100))
            .contract_transmitter_transmit_timeout(Duration::from_secs(1))
            .log_events(false)
            .build();

        let oracle = OracleSpec::builder()
            .network(network)
            .data_source(FixedDataSource(value))
            .contract_transmitter(contract)
            .database(MemDB::new())
            .shared_secret(roster.shared_secret)
            .local_config(local_config)
            .contract_config(Some(roster.contract_config.clone()))
            .on_start_epoch(start_epoch_handler(id, start_epochs.clone()))
            .on_accept_report(accept_report_handler(id, accepted.clone()))
            .on_transmit(transmit_handler(id, transmitted.clone()))
            .build()
            .start()
            .unwrap();
        assert_eq!(oracle.id(), id);
        assert_eq!(oracle.config_digest(), roster.contract_config.config_digest);

        Node {
            id,
            start_epochs,
            accepted,
            transmitted,
            _oracle: oracle,
        }
    }

    pub(crate) fn id(&self) -> OracleID {
        self.id
    }

    pub(crate) fn start_epochs(&self) -> Vec<Epoch> {
        self.start_epochs.lock().unwrap().clone()
    }

    pub(crate) fn accepted(&self) -> Vec<(EpochRound, Observation)> {
        self.accepted.lock().unwrap().clone()
    }

    pub(crate) fn transmitted(&self) -> Vec<EpochRound> {
        self.transmitted.lock().unwrap().clone()
    }
}

fn start_epoch_handler(
    id: OracleID,
    start_epochs: Arc<Mutex<Vec<Epoch>>>,
) -> impl Fn(&StartEpochEvent) + Send + 'static {
    move |start_epoch_event| {
        log_with_context(
            id,
            &format!(
                "Started epoch {} under config {}, leader: {}",
                start_epoch_event.epoch,
                first_seven_base64_chars(&start_epoch_event.config_digest.bytes()),
                start_epoch_event.leader
            ),
        );
        start_epochs.lock().unwrap().push(start_epoch_event.epoch);
    }
}

fn accept_report_handler(
    id: OracleID,
    accepted: Arc<Mutex<Vec<(EpochRound, Observation)>>>,
) -> impl Fn(&AcceptReportEvent) + Send + 'static {
    move |accept_report_event| {
        let epoch_round = EpochRound::new(accept_report_event.epoch, accept_report_event.round);
        log_with_context(
            id,
            &format!(
                "Accepted report {}, median: {}",
                epoch_round,
                accept_report_event.median.value()
            ),
        );
        accepted
            .lock()
            .unwrap()
            .push((epoch_round, accept_report_event.median.clone()));
    }
}

fn transmit_handler(
    id: OracleID,
    transmitted: Arc<Mutex<Vec<EpochRound>>>,
) -> impl Fn(&TransmitEvent) + Send + 'static {
    move |transmit_event| {
        let epoch_round = EpochRound::new(transmit_event.epoch, transmit_event.round);
        log_with_context(id, &format!("Transmitted report {}", epoch_round));
        transmitted.lock().unwrap().push(epoch_round);
    }
}
