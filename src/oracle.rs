/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run an oracle.
//!
//! An oracle is one member of a roster of `N` oracles that jointly produce reports of a numeric value for
//! an on-chain consumer. Each oracle is identified by its index in the roster of the active
//! [`ContractConfig`], and located in it by the public key of its off-chain signing key.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the oracle](OracleSpec) with:
//!   1. `OracleSpec::builder` to construct an `OracleSpecBuilder`,
//!   2. The setters of the `OracleSpecBuilder`, and
//!   3. The `OracleSpecBuilder::build` method to construct an [`OracleSpec`],
//! - The function to [start](OracleSpec::start) an [`Oracle`] given its specification,
//! - [The type](Oracle) which keeps the oracle alive.
//!
//! ## Starting an oracle
//!
//! ```ignore
//! let oracle =
//!     OracleSpec::builder()
//!     .network(network)
//!     .data_source(data_source)
//!     .contract_transmitter(contract_transmitter)
//!     .database(database)
//!     .shared_secret(shared_secret)
//!     .local_config(local_config)
//!     .contract_config(Some(contract_config))
//!     .on_accept_report(accept_report_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.data_source(...)`
//! - `.contract_transmitter(...)`
//! - `.database(...)`
//! - `.shared_secret(...)`
//! - `.local_config(...)`
//!
//! ### Optional setters
//!
//! - `.contract_config(...)`: the active on-chain configuration. If provided, it is written to the
//!   [`Database`] before starting. Otherwise, the configuration last written to the `Database` is used.
//! - `.telemetry_sink(...)`: receives serialized [telemetry events](crate::telemetry::TelemetryEvent).
//! - One `.on_*(...)` setter per [event](crate::events), for registering event handlers.
//!
//! The oracle's [local configuration](LocalConfig) can also be defined using the builder pattern:
//!
//! ```ignore
//! let local_config =
//!     LocalConfig::builder()
//!     .offchain_signing_key(offchain_signing_key)
//!     .onchain_signing_key(onchain_signing_key)
//!     .blockchain_timeout(Duration::from_secs(10))
//!     .database_timeout(Duration::from_secs(10))
//!     .data_source_timeout(Duration::from_secs(10))
//!     .data_source_grace_period(Duration::from_secs(1))
//!     .contract_transmitter_transmit_timeout(Duration::from_secs(10))
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    fmt::{self, Display, Formatter},
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    event_bus::*,
    events::*,
    networking::{
        network::{BinaryNetworkEndpoint, NetworkEndpoint},
        receiving::{inbox, start_polling, INBOX_CAPACITY},
        sending::SenderHandle,
        serializing::SerializingEndpoint,
    },
    pacemaker::implementation::Pacemaker,
    pluggables::{ContractTransmitter, DataSource, Database, PluggableError},
    report_generation::implementation::ReportGenerationDeps,
    subprocess::block_for_at_most,
    telemetry::{start_telemetry, TelemetrySink, DEFAULT_TELEMETRY_BUFFER_CAPACITY},
    transmission::implementation::Transmission,
    types::{
        config::{ConfigError, ContractConfig, SharedConfig, SharedSecret},
        crypto_primitives::{OffchainKeypair, OnchainKeypair, OnchainSigningKey, SigningKey},
        data_types::{ConfigDigest, OnchainAddress, OracleID},
    },
};

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [LocalConfig]. On the builder call the following methods to construct a valid [LocalConfig].

    Required:
    - `.offchain_signing_key(...)`
    - `.onchain_signing_key(...)`
    - `.blockchain_timeout(...)`
    - `.database_timeout(...)`
    - `.data_source_timeout(...)`
    - `.data_source_grace_period(...)`
    - `.contract_transmitter_transmit_timeout(...)`
    - `.log_events(...)`

    Optional:
    - `.telemetry_buffer_capacity(...)`
"))]
pub struct LocalConfig {
    #[builder(setter(doc = "Set the ed25519 key the oracle signs protocol messages with. Required."))]
    pub offchain_signing_key: SigningKey,
    #[builder(setter(doc = "Set the secp256k1 key the oracle signs reports with. Required."))]
    pub onchain_signing_key: OnchainSigningKey,
    #[builder(setter(doc = "Set the timeout for reads from the on-chain consumer. Required."))]
    pub blockchain_timeout: Duration,
    #[builder(setter(doc = "Set the timeout for every database operation. Required."))]
    pub database_timeout: Duration,
    #[builder(setter(doc = "Set the deadline given to the data source for each observation. Required."))]
    pub data_source_timeout: Duration,
    #[builder(setter(doc = "Set how long to keep waiting for an observation after the data source deadline has passed. Required."))]
    pub data_source_grace_period: Duration,
    #[builder(setter(doc = "Set the timeout for submitting a transmission to the on-chain consumer. Required."))]
    pub contract_transmitter_transmit_timeout: Duration,
    #[builder(default = DEFAULT_TELEMETRY_BUFFER_CAPACITY, setter(doc = "Set the number of telemetry events buffered before new ones are dropped. Optional."))]
    pub telemetry_buffer_capacity: usize,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

/// The timeouts of calls into pluggable components, shared by every protocol thread.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct LocalTimeouts {
    pub(crate) blockchain_timeout: Duration,
    pub(crate) database_timeout: Duration,
    pub(crate) data_source_timeout: Duration,
    pub(crate) data_source_grace_period: Duration,
    pub(crate) transmit_timeout: Duration,
}

impl From<&LocalConfig> for LocalTimeouts {
    fn from(local_config: &LocalConfig) -> Self {
        LocalTimeouts {
            blockchain_timeout: local_config.blockchain_timeout,
            database_timeout: local_config.database_timeout,
            data_source_timeout: local_config.data_source_timeout,
            data_source_grace_period: local_config.data_source_grace_period,
            transmit_timeout: local_config.contract_transmitter_transmit_timeout,
        }
    }
}

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [OracleSpec]. On the builder call the following methods to construct a valid [OracleSpec].

    Required:
    - `.network(...)`
    - `.data_source(...)`
    - `.contract_transmitter(...)`
    - `.database(...)`
    - `.shared_secret(...)`
    - `.local_config(...)`

    Optional:
    - `.contract_config(...)`
    - `.telemetry_sink(...)`
    - `.on_start_epoch(...)`
    - `.on_send_new_epoch(...)`
    - `.on_receive_new_epoch(...)`
    - `.on_progress_timeout(...)`
    - `.on_change_leader(...)`
    - `.on_start_round(...)`
    - `.on_send_observation(...)`
    - `.on_broadcast_report_req(...)`
    - `.on_sign_report(...)`
    - `.on_skip_report(...)`
    - `.on_broadcast_final(...)`
    - `.on_accept_report(...)`
    - `.on_schedule_transmission(...)`
    - `.on_transmit(...)`
    - `.on_discard_transmission(...)`
"))]
pub struct OracleSpec<B, DS, CT, DB>
where
    B: BinaryNetworkEndpoint,
    DS: DataSource,
    CT: ContractTransmitter,
    DB: Database,
{
    // Required parameters
    #[builder(setter(doc = "Set the transport that carries serialized messages between oracles. Required."))]
    network: B,
    #[builder(setter(doc = "Set the feed the oracle observes. Required."))]
    data_source: DS,
    #[builder(setter(doc = "Set the interface to the on-chain consumer. Required."))]
    contract_transmitter: CT,
    #[builder(setter(doc = "Set the oracle's durable storage. Required."))]
    database: DB,
    #[builder(setter(doc = "Set the secret shared by the roster. Required."))]
    shared_secret: SharedSecret,
    #[builder(setter(doc = "Set the [local configuration](LocalConfig). Required."))]
    local_config: LocalConfig,
    // Optional parameters
    #[builder(default, setter(doc = "Set the active on-chain configuration. Optional: defaults to the configuration stored in the database."))]
    contract_config: Option<ContractConfig>,
    #[builder(default, setter(transform = |sink: impl TelemetrySink| Some(Box::new(sink) as Box<dyn TelemetrySink>),
    doc = "Set the sink that receives serialized telemetry events. Optional."))]
    telemetry_sink: Option<Box<dyn TelemetrySink>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartEpochEvent>),
    doc = "Register a handler closure to be invoked after the oracle starts an epoch. Optional."))]
    on_start_epoch: Option<HandlerPtr<StartEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendNewEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendNewEpochEvent>),
    doc = "Register a handler closure to be invoked after the oracle broadcasts a NewEpoch message. Optional."))]
    on_send_new_epoch: Option<HandlerPtr<SendNewEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveNewEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveNewEpochEvent>),
    doc = "Register a handler closure to be invoked after the oracle receives a NewEpoch message announcing a higher epoch. Optional."))]
    on_receive_new_epoch: Option<HandlerPtr<ReceiveNewEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProgressTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProgressTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the current epoch makes no progress in time. Optional."))]
    on_progress_timeout: Option<HandlerPtr<ProgressTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ChangeLeaderEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ChangeLeaderEvent>),
    doc = "Register a handler closure to be invoked after report generation asks for a new leader. Optional."))]
    on_change_leader: Option<HandlerPtr<ChangeLeaderEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the oracle accepts a new round from the leader. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendObservationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendObservationEvent>),
    doc = "Register a handler closure to be invoked after the oracle sends an observation to the leader. Optional."))]
    on_send_observation: Option<HandlerPtr<SendObservationEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BroadcastReportReqEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BroadcastReportReqEvent>),
    doc = "Register a handler closure to be invoked after the oracle, as leader, broadcasts a ReportReq. Optional."))]
    on_broadcast_report_req: Option<HandlerPtr<BroadcastReportReqEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SignReportEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SignReportEvent>),
    doc = "Register a handler closure to be invoked after the oracle signs a report. Optional."))]
    on_sign_report: Option<HandlerPtr<SignReportEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SkipReportEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SkipReportEvent>),
    doc = "Register a handler closure to be invoked after the oracle decides a report is not worth signing. Optional."))]
    on_skip_report: Option<HandlerPtr<SkipReportEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BroadcastFinalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BroadcastFinalEvent>),
    doc = "Register a handler closure to be invoked after the oracle, as leader, broadcasts a Final. Optional."))]
    on_broadcast_final: Option<HandlerPtr<BroadcastFinalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptReportEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptReportEvent>),
    doc = "Register a handler closure to be invoked after the oracle accepts a report for transmission. Optional."))]
    on_accept_report: Option<HandlerPtr<AcceptReportEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ScheduleTransmissionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ScheduleTransmissionEvent>),
    doc = "Register a handler closure to be invoked after the oracle schedules a transmission. Optional."))]
    on_schedule_transmission: Option<HandlerPtr<ScheduleTransmissionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TransmitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TransmitEvent>),
    doc = "Register a handler closure to be invoked after the oracle submits a transmission. Optional."))]
    on_transmit: Option<HandlerPtr<TransmitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DiscardTransmissionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DiscardTransmissionEvent>),
    doc = "Register a handler closure to be invoked after the oracle discards a report instead of transmitting it. Optional."))]
    on_discard_transmission: Option<HandlerPtr<DiscardTransmissionEvent>>,
}

impl<B, DS, CT, DB> OracleSpec<B, DS, CT, DB>
where
    B: BinaryNetworkEndpoint,
    DS: DataSource,
    CT: ContractTransmitter,
    DB: Database,
{
    /// Load the active configuration, locate this oracle in its roster, and start the protocol threads.
    pub fn start(mut self) -> Result<Oracle<B>, OracleStartError> {
        let timeouts = LocalTimeouts::from(&self.local_config);
        let contract_config = self.load_contract_config(timeouts.database_timeout)?;
        let shared_config = SharedConfig::from_contract_config(&contract_config, &self.shared_secret)?;
        let config_digest = shared_config.config_digest;

        let offchain_keypair =
            OffchainKeypair::new(self.local_config.offchain_signing_key.clone());
        let id = shared_config
            .oracle_id_of(&offchain_keypair.public())
            .ok_or(OracleStartError::NotInRoster)?;
        let onchain_keypair = OnchainKeypair::new(self.local_config.onchain_signing_key.clone());
        let expected = shared_config.oracle_identities[id.index()].onchain_signing_address;
        if onchain_keypair.address() != expected {
            return Err(OracleStartError::OnchainKeyMismatch {
                expected,
                actual: onchain_keypair.address(),
            });
        }
        log::info!(
            "Starting oracle {} of {} under config digest {}",
            id,
            shared_config.n(),
            config_digest
        );

        let (telemetry, telemetry_shutdown, telemetry_sender) = match self.telemetry_sink.take() {
            Some(sink) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let (handle, sender) = start_telemetry(
                    sink,
                    self.local_config.telemetry_buffer_capacity,
                    shutdown_receiver,
                );
                (Some(handle), Some(shutdown), Some(sender))
            }
            None => (None, None, None),
        };

        let mut network =
            SerializingEndpoint::new(self.network, config_digest, telemetry_sender.clone());
        network.start().map_err(OracleStartError::Network)?;

        let event_handlers = EventHandlers::new(
            self.local_config.log_events,
            self.on_start_epoch,
            self.on_send_new_epoch,
            self.on_receive_new_epoch,
            self.on_progress_timeout,
            self.on_change_leader,
            self.on_start_round,
            self.on_send_observation,
            self.on_broadcast_report_req,
            self.on_sign_report,
            self.on_skip_report,
            self.on_broadcast_final,
            self.on_accept_report,
            self.on_schedule_transmission,
            self.on_transmit,
            self.on_discard_transmission,
        );
        let (event_bus, event_bus_shutdown, event_publisher) = if event_handlers.is_empty() {
            (None, None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let handle = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            (Some(handle), Some(shutdown), Some(event_publisher))
        };

        let shared_config = Arc::new(shared_config);
        let (to_pacemaker, pacemaker_inbox) = inbox("Pacemaker", INBOX_CAPACITY);
        let (to_transmission, transmission_inbox) = mpsc::channel();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(network.clone(), to_pacemaker.clone(), poller_shutdown_receiver);

        let deps = ReportGenerationDeps {
            shared_config: shared_config.clone(),
            timeouts,
            id,
            offchain_keypair,
            onchain_keypair,
            sender: SenderHandle::new(network.clone()),
            data_source: self.data_source,
            contract_transmitter: self.contract_transmitter.clone(),
            to_pacemaker,
            to_transmission,
            event_publisher: event_publisher.clone(),
            telemetry: telemetry_sender,
        };

        let (pacemaker_shutdown, pacemaker_shutdown_receiver) = mpsc::channel();
        let pacemaker = Pacemaker::new(deps, self.database.clone())
            .start(pacemaker_inbox, pacemaker_shutdown_receiver);

        let (transmission_shutdown, transmission_shutdown_receiver) = mpsc::channel();
        let transmission = Transmission::new(
            shared_config,
            id,
            timeouts,
            self.contract_transmitter,
            self.database,
            event_publisher,
        )
        .start(transmission_inbox, transmission_shutdown_receiver);

        Ok(Oracle {
            id,
            config_digest,
            network,
            pacemaker: Some(pacemaker),
            pacemaker_shutdown,
            transmission: Some(transmission),
            transmission_shutdown,
            poller: Some(poller),
            poller_shutdown,
            telemetry,
            telemetry_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }

    fn load_contract_config(
        &mut self,
        database_timeout: Duration,
    ) -> Result<ContractConfig, OracleStartError> {
        let mut database = self.database.clone();
        match self.contract_config.take() {
            Some(contract_config) => {
                let written = contract_config.clone();
                match block_for_at_most(database_timeout, move |ctx| {
                    database.write_config(ctx, written)
                }) {
                    Some(Ok(())) => Ok(contract_config),
                    Some(Err(err)) => Err(OracleStartError::Database(err)),
                    None => Err(OracleStartError::DatabaseTimeout),
                }
            }
            None => match block_for_at_most(database_timeout, move |ctx| database.read_config(ctx)) {
                Some(Ok(Some(contract_config))) => Ok(contract_config),
                Some(Ok(None)) => Err(OracleStartError::NoContractConfig),
                Some(Err(err)) => Err(OracleStartError::Database(err)),
                None => Err(OracleStartError::DatabaseTimeout),
            },
        }
    }
}

/// A running oracle. Dropping it stops every thread it started and closes the network.
pub struct Oracle<B: BinaryNetworkEndpoint> {
    id: OracleID,
    config_digest: ConfigDigest,
    network: SerializingEndpoint<B>,
    pacemaker: Option<JoinHandle<()>>,
    pacemaker_shutdown: Sender<()>,
    transmission: Option<JoinHandle<()>>,
    transmission_shutdown: Sender<()>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    telemetry: Option<JoinHandle<()>>,
    telemetry_shutdown: Option<Sender<()>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<B: BinaryNetworkEndpoint> Oracle<B> {
    /// This oracle's index in the roster.
    pub fn id(&self) -> OracleID {
        self.id
    }

    /// The digest of the configuration this oracle runs under.
    pub fn config_digest(&self) -> ConfigDigest {
        self.config_digest
    }
}

/// Send `()` on `shutdown` and wait for `thread` to exit.
fn stop(shutdown: &Sender<()>, thread: &mut Option<JoinHandle<()>>) {
    let _ = shutdown.send(());
    if let Some(thread) = thread.take() {
        let _ = thread.join();
    }
}

impl<B: BinaryNetworkEndpoint> Drop for Oracle<B> {
    fn drop(&mut self) {
        // The pacemaker stops report generation, which feeds transmission. The poller feeds the pacemaker
        // but outlives it, so that the pacemaker never sees its inbox disconnect while running.
        stop(&self.pacemaker_shutdown, &mut self.pacemaker);
        stop(&self.transmission_shutdown, &mut self.transmission);
        stop(&self.poller_shutdown, &mut self.poller);

        if let Err(err) = self.network.close() {
            log::error!("Failed to close the network: {}", err);
        }

        if let Some(shutdown) = &self.telemetry_shutdown {
            stop(shutdown, &mut self.telemetry);
        }
        if let Some(shutdown) = &self.event_bus_shutdown {
            stop(shutdown, &mut self.event_bus);
        }
    }
}

/// Enumerates the ways [`OracleSpec::start`] can fail.
#[derive(Debug)]
pub enum OracleStartError {
    /// The database did not answer within the database timeout.
    DatabaseTimeout,

    /// The database failed to read or write the contract configuration.
    Database(PluggableError),

    /// No contract configuration was provided, and none is stored in the database.
    NoContractConfig,

    /// The contract configuration is invalid. See [`ConfigError`].
    Config(ConfigError),

    /// The off-chain signing key does not belong to any oracle in the roster.
    NotInRoster,

    /// The on-chain signing key does not match the roster's signing address for this oracle.
    OnchainKeyMismatch {
        expected: OnchainAddress,
        actual: OnchainAddress,
    },

    /// The network failed to start.
    Network(PluggableError),
}

impl From<ConfigError> for OracleStartError {
    fn from(value: ConfigError) -> Self {
        OracleStartError::Config(value)
    }
}

impl Display for OracleStartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OracleStartError::DatabaseTimeout => write!(f, "timed out accessing the database"),
            OracleStartError::Database(err) => write!(f, "database error: {}", err),
            OracleStartError::NoContractConfig => write!(f, "no contract configuration available"),
            OracleStartError::Config(err) => write!(f, "invalid contract configuration: {}", err),
            OracleStartError::NotInRoster => {
                write!(f, "the off-chain signing key is not in the roster")
            }
            OracleStartError::OnchainKeyMismatch { expected, actual } => write!(
                f,
                "on-chain signing key has address {}, the roster expects {}",
                actual, expected
            ),
            OracleStartError::Network(err) => write!(f, "failed to start the network: {}", err),
        }
    }
}

impl std::error::Error for OracleStartError {}
