/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The immutable configuration that every oracle in a roster shares.
//!
//! ## From contract to shared configuration
//!
//! The on-chain consumer stores a [`ContractConfig`]: the roster's on-chain signing and transmitting
//! addresses, the fault threshold, and an opaque `encoded_config` blob. The blob is the borsh encoding of
//! [`PublicConfigParameters`], which carries the protocol timing constants and the roster's off-chain
//! public keys.
//!
//! Every oracle decodes the same `ContractConfig`, combines it with a [`SharedSecret`] distributed
//! out-of-band, and obtains an identical [`SharedConfig`] with
//! [`SharedConfig::from_contract_config`]. The [`ConfigDigest`] binds all of these inputs together, so
//! two oracles agree on the digest only if they agree on the whole configuration.

use std::{
    fmt::{self, Display, Formatter},
    io,
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{keccak256, VerifyingKey},
    data_types::{ConfigDigest, OnchainAddress, OracleID, Round, MAX_ORACLES},
};

/// Maximum number of transmission stages a configuration may define.
const MAX_TRANSMISSION_STAGES: usize = 1000;

/// Identities of a single oracle in the roster.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OracleIdentity {
    /// Key that verifies the oracle's off-chain (message authentication) signatures.
    pub offchain_public_key: VerifyingKey,

    /// Address that the oracle's on-chain (report) signatures recover to.
    pub onchain_signing_address: OnchainAddress,

    /// Address the oracle submits transmissions from.
    pub transmit_address: OnchainAddress,
}

/// The protocol parameters stored, borsh-encoded, in [`ContractConfig::encoded_config`].
///
/// Durations are stored as nanoseconds so that the encoding is platform independent.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct PublicConfigParameters {
    pub delta_progress_nanos: u64,
    pub delta_resend_nanos: u64,
    pub delta_round_nanos: u64,
    pub delta_grace_nanos: u64,
    pub delta_c_nanos: u64,
    pub delta_stage_nanos: u64,
    pub r_max: Round,
    pub alpha_ppb: u64,
    pub s: Vec<u32>,
    pub offchain_public_keys: Vec<[u8; 32]>,
}

impl PublicConfigParameters {
    pub fn encode(&self) -> Vec<u8> {
        // Safety: borsh serialization into a Vec cannot fail.
        self.try_to_vec().unwrap()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        Self::try_from_slice(bytes).map_err(ConfigError::DecodeError)
    }
}

/// The configuration record of the on-chain consumer contract.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ContractConfig {
    pub config_digest: ConfigDigest,
    pub contract_address: OnchainAddress,
    pub config_count: u64,
    pub signers: Vec<OnchainAddress>,
    pub transmitters: Vec<OnchainAddress>,
    pub threshold: u8,
    pub encoded_config_version: u64,
    pub encoded_config: Vec<u8>,
}

impl ContractConfig {
    /// Create a `ContractConfig`, computing its [`ConfigDigest`] from the other fields.
    pub fn new(
        contract_address: OnchainAddress,
        config_count: u64,
        signers: Vec<OnchainAddress>,
        transmitters: Vec<OnchainAddress>,
        threshold: u8,
        encoded_config_version: u64,
        encoded_config: Vec<u8>,
    ) -> Self {
        let config_digest = compute_config_digest(
            &contract_address,
            config_count,
            &signers,
            &transmitters,
            threshold,
            encoded_config_version,
            &encoded_config,
        );
        Self {
            config_digest,
            contract_address,
            config_count,
            signers,
            transmitters,
            threshold,
            encoded_config_version,
            encoded_config,
        }
    }
}

/// Compute the digest that binds a contract configuration: the first 16 bytes of the Keccak-256 hash of
/// the borsh encoding of all inputs.
pub fn compute_config_digest(
    contract_address: &OnchainAddress,
    config_count: u64,
    signers: &Vec<OnchainAddress>,
    transmitters: &Vec<OnchainAddress>,
    threshold: u8,
    encoded_config_version: u64,
    encoded_config: &Vec<u8>,
) -> ConfigDigest {
    // Safety: borsh serialization into a Vec cannot fail.
    let preimage = (
        contract_address,
        config_count,
        signers,
        transmitters,
        threshold,
        encoded_config_version,
        encoded_config,
    )
        .try_to_vec()
        .unwrap();
    let hash = keccak256(&preimage);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hash[..16]);
    ConfigDigest::new(digest)
}

/// A 16-byte secret shared out-of-band by all oracles of a roster.
///
/// The secret keys the pseudo-random functions for leader selection and transmission ordering, so that
/// outsiders cannot predict either sequence.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SharedSecret([u8; 16]);

impl SharedSecret {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn leader_selection_key(&self) -> [u8; 16] {
        self.derive(b"leader selection key")
    }

    pub fn transmission_order_key(&self) -> [u8; 16] {
        self.derive(b"transmission order key")
    }

    fn derive(&self, label: &[u8]) -> [u8; 16] {
        let mut preimage = self.0.to_vec();
        preimage.extend_from_slice(label);
        let hash = keccak256(&preimage);
        let mut key = [0u8; 16];
        key.copy_from_slice(&hash[..16]);
        key
    }
}

/// Immutable configuration shared by every oracle of one roster for the lifetime of one
/// [`ConfigDigest`].
#[derive(Clone, Debug)]
pub struct SharedConfig {
    pub config_digest: ConfigDigest,

    /// Time without progress after which an oracle votes to change the leader.
    pub delta_progress: Duration,

    /// Interval at which an oracle re-broadcasts its `NewEpoch` message.
    pub delta_resend: Duration,

    /// Duration of a round, from the leader's point of view.
    pub delta_round: Duration,

    /// Time the leader waits for late observations after it has collected enough of them.
    pub delta_grace: Duration,

    /// Maximum time between two transmissions, regardless of deviation.
    pub delta_c: Duration,

    /// Width of one transmission stage.
    pub delta_stage: Duration,

    /// Maximum number of rounds in an epoch.
    pub r_max: Round,

    /// Deviation threshold, in parts per billion, that triggers a new report.
    pub alpha_ppb: u64,

    /// Number of oracles assigned to each transmission stage.
    pub s: Vec<u32>,

    pub oracle_identities: Vec<OracleIdentity>,

    /// Maximum number of faulty oracles.
    pub f: usize,

    pub leader_selection_key: [u8; 16],

    pub transmission_order_key: [u8; 16],
}

impl SharedConfig {
    /// Decode and validate `contract_config`, combining it with `shared_secret`.
    pub fn from_contract_config(
        contract_config: &ContractConfig,
        shared_secret: &SharedSecret,
    ) -> Result<SharedConfig, ConfigError> {
        let recomputed_digest = compute_config_digest(
            &contract_config.contract_address,
            contract_config.config_count,
            &contract_config.signers,
            &contract_config.transmitters,
            contract_config.threshold,
            contract_config.encoded_config_version,
            &contract_config.encoded_config,
        );
        if recomputed_digest != contract_config.config_digest {
            return Err(ConfigError::DigestMismatch {
                expected: contract_config.config_digest,
                computed: recomputed_digest,
            });
        }

        let params = PublicConfigParameters::decode(&contract_config.encoded_config)?;

        let n = contract_config.signers.len();
        if contract_config.transmitters.len() != n || params.offchain_public_keys.len() != n {
            return Err(ConfigError::RosterLengthMismatch {
                signers: n,
                transmitters: contract_config.transmitters.len(),
                offchain_public_keys: params.offchain_public_keys.len(),
            });
        }

        let mut oracle_identities = Vec::with_capacity(n);
        for (i, key_bytes) in params.offchain_public_keys.iter().enumerate() {
            let offchain_public_key = VerifyingKey::from_bytes(key_bytes)
                .map_err(|_| ConfigError::InvalidOffchainPublicKey { index: i })?;
            oracle_identities.push(OracleIdentity {
                offchain_public_key,
                onchain_signing_address: contract_config.signers[i],
                transmit_address: contract_config.transmitters[i],
            });
        }

        let shared_config = SharedConfig {
            config_digest: contract_config.config_digest,
            delta_progress: Duration::from_nanos(params.delta_progress_nanos),
            delta_resend: Duration::from_nanos(params.delta_resend_nanos),
            delta_round: Duration::from_nanos(params.delta_round_nanos),
            delta_grace: Duration::from_nanos(params.delta_grace_nanos),
            delta_c: Duration::from_nanos(params.delta_c_nanos),
            delta_stage: Duration::from_nanos(params.delta_stage_nanos),
            r_max: params.r_max,
            alpha_ppb: params.alpha_ppb,
            s: params.s,
            oracle_identities,
            f: contract_config.threshold as usize,
            leader_selection_key: shared_secret.leader_selection_key(),
            transmission_order_key: shared_secret.transmission_order_key(),
        };
        shared_config.validate()?;
        Ok(shared_config)
    }

    /// Number of oracles in the roster.
    pub fn n(&self) -> usize {
        self.oracle_identities.len()
    }

    /// Find the [`OracleID`] of the oracle whose off-chain public key is `key`.
    pub fn oracle_id_of(&self, key: &VerifyingKey) -> Option<OracleID> {
        self.oracle_identities
            .iter()
            .position(|identity| &identity.offchain_public_key == key)
            .map(|index| OracleID::new(index as u8))
    }

    /// Check whether `id` is an index into the roster.
    pub fn contains(&self, id: OracleID) -> bool {
        id.index() < self.n()
    }

    /// Check the invariants that the protocol's safety and liveness arguments rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.n();
        if n == 0 || n > MAX_ORACLES {
            return Err(ConfigError::InvalidOracleCount { n });
        }
        if n <= 3 * self.f {
            return Err(ConfigError::FaultToleranceTooHigh { n, f: self.f });
        }
        if self.r_max == 0 || self.r_max == Round::MAX {
            return Err(ConfigError::InvalidRMax { r_max: self.r_max });
        }
        if self.delta_resend.is_zero() {
            return Err(ConfigError::InvalidTiming {
                reason: "delta_resend must be positive",
            });
        }
        if self.delta_grace >= self.delta_round {
            return Err(ConfigError::InvalidTiming {
                reason: "delta_grace must be shorter than delta_round",
            });
        }
        if self.delta_round >= self.delta_progress {
            return Err(ConfigError::InvalidTiming {
                reason: "delta_round must be shorter than delta_progress",
            });
        }
        if self.s.len() > MAX_TRANSMISSION_STAGES {
            return Err(ConfigError::TooManyStages { len: self.s.len() });
        }
        Ok(())
    }
}

/// Enumerates the ways deriving a [`SharedConfig`] can fail.
#[derive(Debug)]
pub enum ConfigError {
    /// The `encoded_config` blob is not a valid [`PublicConfigParameters`] encoding.
    DecodeError(io::Error),

    /// The stored digest does not match the digest recomputed from the configuration.
    DigestMismatch {
        expected: ConfigDigest,
        computed: ConfigDigest,
    },

    RosterLengthMismatch {
        signers: usize,
        transmitters: usize,
        offchain_public_keys: usize,
    },

    InvalidOffchainPublicKey { index: usize },

    InvalidOracleCount { n: usize },

    /// `n <= 3f`: the roster cannot tolerate `f` Byzantine oracles.
    FaultToleranceTooHigh { n: usize, f: usize },

    InvalidRMax { r_max: Round },

    InvalidTiming { reason: &'static str },

    TooManyStages { len: usize },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DecodeError(err) => write!(f, "could not decode config: {}", err),
            ConfigError::DigestMismatch { expected, computed } => write!(
                f,
                "config digest mismatch: expected {}, computed {}",
                expected, computed
            ),
            ConfigError::RosterLengthMismatch {
                signers,
                transmitters,
                offchain_public_keys,
            } => write!(
                f,
                "roster length mismatch: {} signers, {} transmitters, {} off-chain public keys",
                signers, transmitters, offchain_public_keys
            ),
            ConfigError::InvalidOffchainPublicKey { index } => {
                write!(f, "invalid off-chain public key for oracle {}", index)
            }
            ConfigError::InvalidOracleCount { n } => write!(
                f,
                "roster has {} oracles, expected between 1 and {}",
                n, MAX_ORACLES
            ),
            ConfigError::FaultToleranceTooHigh { n, f: faults } => write!(
                f,
                "{} oracles cannot tolerate {} faulty oracles",
                n, faults
            ),
            ConfigError::InvalidRMax { r_max } => write!(f, "invalid r_max {}", r_max),
            ConfigError::InvalidTiming { reason } => write!(f, "invalid timing: {}", reason),
            ConfigError::TooManyStages { len } => {
                write!(f, "{} transmission stages exceed the maximum", len)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_contract_config, test_public_params, TestRoster};

    #[test]
    fn shared_config_round_trips_through_contract_config() {
        let roster = TestRoster::new(4, 1);
        let shared_config = roster.shared_config();
        assert_eq!(shared_config.n(), 4);
        assert_eq!(shared_config.f, 1);
        assert_eq!(shared_config.config_digest, roster.contract_config.config_digest);
        for (i, keypair) in roster.offchain_keys.iter().enumerate() {
            assert_eq!(
                shared_config.oracle_id_of(&keypair.verifying_key()),
                Some(OracleID::new(i as u8))
            );
        }
    }

    #[test]
    fn tampered_config_is_rejected() {
        let roster = TestRoster::new(4, 1);
        let mut contract_config = roster.contract_config.clone();
        contract_config.threshold = 0;
        assert!(matches!(
            SharedConfig::from_contract_config(&contract_config, &roster.shared_secret),
            Err(ConfigError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn too_many_faults_are_rejected() {
        let roster = TestRoster::new(3, 1);
        let contract_config = test_contract_config(&roster, 1, test_public_params(&roster));
        assert!(matches!(
            SharedConfig::from_contract_config(&contract_config, &roster.shared_secret),
            Err(ConfigError::FaultToleranceTooHigh { n: 3, f: 1 })
        ));
    }

    #[test]
    fn grace_must_be_shorter_than_round() {
        let roster = TestRoster::new(4, 1);
        let mut params = test_public_params(&roster);
        params.delta_grace_nanos = params.delta_round_nanos;
        let contract_config = test_contract_config(&roster, 1, params);
        assert!(matches!(
            SharedConfig::from_contract_config(&contract_config, &roster.shared_secret),
            Err(ConfigError::InvalidTiming { .. })
        ));
    }

    #[test]
    fn derived_keys_are_distinct() {
        let secret = SharedSecret::new([7; 16]);
        assert_ne!(secret.leader_selection_key(), secret.transmission_order_key());
    }
}
