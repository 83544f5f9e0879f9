/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed observations and attested reports.
//!
//! Report generation moves through three kinds of signed artifacts:
//! 1. [`SignedObservation`]: a follower's observation, signed in the off-chain domain under a
//!    [`ReportingContext`] so that it cannot be replayed in another round.
//! 2. [`AttestedReportOne`]: the leader's sorted list of observations, signed by a single follower in the
//!    on-chain domain over the [encoded report](encode_report).
//! 3. [`AttestedReportMany`]: the same list with more than `f` on-chain signatures; this is what gets
//!    transmitted to the on-chain consumer.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{
        recover_onchain_address, verify_offchain, OffchainKeypair, OnchainKeypair,
        OnchainSignatureError, VerifyingKey,
    },
    data_types::{OnchainAddress, OnchainSignature, OracleID, ReportingContext, SignatureBytes},
    observation::{Observation, OBSERVATION_BYTE_WIDTH},
};

/// Prefix of every off-chain observation signature.
const OBSERVATION_DOMAIN_TAG: &[u8] = b"ocr-observation";

/// Width of one word in the on-chain report encoding.
const WORD: usize = 32;

/// An observation together with the oracle that made it. Not signed on its own.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct AttributedObservation {
    pub observation: Observation,
    pub observer: OracleID,
}

/// An observation signed by its observer under a [`ReportingContext`].
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SignedObservation {
    pub observation: Observation,
    pub signature: SignatureBytes,
}

impl SignedObservation {
    pub(crate) fn sign(
        keypair: &OffchainKeypair,
        context: &ReportingContext,
        observation: Observation,
    ) -> SignedObservation {
        let signature = keypair.sign(&observation_signing_payload(context, &observation));
        SignedObservation {
            observation,
            signature,
        }
    }

    /// Check that the signature is by `verifying_key` over this observation in `context`.
    pub fn verify(&self, context: &ReportingContext, verifying_key: &VerifyingKey) -> bool {
        verify_offchain(
            verifying_key,
            &observation_signing_payload(context, &self.observation),
            &self.signature,
        )
    }
}

fn observation_signing_payload(context: &ReportingContext, observation: &Observation) -> Vec<u8> {
    let mut payload = OBSERVATION_DOMAIN_TAG.to_vec();
    // Safety: borsh serialization into a Vec cannot fail.
    payload.extend((context, observation).try_to_vec().unwrap());
    payload
}

/// A [`SignedObservation`] with the claimed observer.
///
/// The `observer` field comes off the wire, so it is only meaningful after the signature has been
/// verified against that observer's public key.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct AttributedSignedObservation {
    pub signed_observation: SignedObservation,
    pub observer: OracleID,
}

impl AttributedSignedObservation {
    pub fn attributed_observation(&self) -> AttributedObservation {
        AttributedObservation {
            observation: self.signed_observation.observation.clone(),
            observer: self.observer,
        }
    }
}

/// Encode a report the way the on-chain consumer decodes it:
///
/// ```text
/// (bytes32 rawReportContext, bytes32 rawObservers, int192[] observations)
/// ```
///
/// where `rawReportContext` is `0^11 ‖ config digest ‖ epoch (big endian) ‖ round` and `rawObservers`
/// lists the observer index of each observation, in report order, zero padded.
///
/// `observations` must contain at most 32 entries, which holds for every report built from a roster
/// of at most [`MAX_ORACLES`](super::data_types::MAX_ORACLES) oracles.
pub fn encode_report(context: &ReportingContext, observations: &[AttributedObservation]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(WORD * (4 + observations.len()));

    let mut raw_report_context = [0u8; WORD];
    raw_report_context[11..27].copy_from_slice(&context.config_digest.bytes());
    raw_report_context[27..31].copy_from_slice(&context.epoch.to_be_bytes());
    raw_report_context[31] = context.round;
    encoded.extend_from_slice(&raw_report_context);

    let mut raw_observers = [0u8; WORD];
    for (slot, attributed) in raw_observers.iter_mut().zip(observations) {
        *slot = attributed.observer.int();
    }
    encoded.extend_from_slice(&raw_observers);

    // Offset of the dynamic array, counted from the start of the tuple.
    encoded.extend_from_slice(&uint256_word(3 * WORD as u64));
    encoded.extend_from_slice(&uint256_word(observations.len() as u64));

    for attributed in observations {
        let value = attributed.observation.marshal();
        let fill = if value[0] & 0x80 != 0 { 0xff } else { 0x00 };
        let mut word = [fill; WORD];
        word[WORD - OBSERVATION_BYTE_WIDTH..].copy_from_slice(&value);
        encoded.extend_from_slice(&word);
    }

    encoded
}

fn uint256_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// The median of a report: the observation at index `len / 2`. Reports are sorted by value, so this is
/// the same element [`median`](super::observation::median) would pick.
pub fn report_median(observations: &[AttributedObservation]) -> Option<Observation> {
    observations
        .get(observations.len() / 2)
        .map(|attributed| attributed.observation.clone())
}

/// A report carrying the on-chain signature of the single oracle that sent it.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct AttestedReportOne {
    pub attributed_observations: Vec<AttributedObservation>,
    pub signature: OnchainSignature,
}

impl AttestedReportOne {
    pub(crate) fn make(
        context: &ReportingContext,
        attributed_observations: Vec<AttributedObservation>,
        keypair: &OnchainKeypair,
    ) -> Result<AttestedReportOne, OnchainSignatureError> {
        let signature = keypair.sign(&encode_report(context, &attributed_observations))?;
        Ok(AttestedReportOne {
            attributed_observations,
            signature,
        })
    }

    /// Check that the signature over this report in `context` recovers to `signer`.
    pub fn verify(&self, context: &ReportingContext, signer: &OnchainAddress) -> bool {
        let encoded = encode_report(context, &self.attributed_observations);
        matches!(recover_onchain_address(&encoded, &self.signature), Ok(address) if &address == signer)
    }
}

/// A report carrying independently produced on-chain signatures from several oracles.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct AttestedReportMany {
    pub attributed_observations: Vec<AttributedObservation>,
    pub signatures: Vec<OnchainSignature>,
}

impl AttestedReportMany {
    /// Accept the report iff it carries strictly more than `f` valid signatures from distinct members of
    /// `signers`, and no signature from outside of it.
    pub fn verify(
        &self,
        context: &ReportingContext,
        f: usize,
        signers: &[OnchainAddress],
    ) -> Result<(), ReportVerificationError> {
        if self.signatures.len() <= f {
            return Err(ReportVerificationError::InsufficientSignatures {
                signatures: self.signatures.len(),
                f,
            });
        }
        if self.attributed_observations.is_empty()
            || self.attributed_observations.len() > signers.len()
        {
            return Err(ReportVerificationError::MalformedObservations);
        }

        let encoded = encode_report(context, &self.attributed_observations);
        let mut seen = HashSet::new();
        for (index, signature) in self.signatures.iter().enumerate() {
            let address = recover_onchain_address(&encoded, signature)
                .map_err(|_| ReportVerificationError::InvalidSignature { index })?;
            if !signers.contains(&address) {
                return Err(ReportVerificationError::UnknownSigner { address });
            }
            if !seen.insert(address) {
                return Err(ReportVerificationError::DuplicateSigner { address });
            }
        }
        Ok(())
    }

    pub fn median(&self) -> Option<Observation> {
        report_median(&self.attributed_observations)
    }

    /// Split the report into the arguments of an on-chain transmission.
    pub fn transmission_args(&self, context: &ReportingContext) -> TransmissionArgs {
        TransmissionArgs {
            report: encode_report(context, &self.attributed_observations),
            rs: self.signatures.iter().map(|s| s.r()).collect(),
            ss: self.signatures.iter().map(|s| s.s()).collect(),
            vs: self.signatures.iter().map(|s| s.v()).collect(),
        }
    }
}

/// The arguments of an on-chain transmission: the encoded report and its signatures, split into their
/// `r`, `s`, and `v` components.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TransmissionArgs {
    pub report: Vec<u8>,
    pub rs: Vec<[u8; 32]>,
    pub ss: Vec<[u8; 32]>,
    pub vs: Vec<u8>,
}

/// Enumerates the reasons an [`AttestedReportMany`] can be rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum ReportVerificationError {
    InsufficientSignatures { signatures: usize, f: usize },
    MalformedObservations,
    InvalidSignature { index: usize },
    UnknownSigner { address: OnchainAddress },
    DuplicateSigner { address: OnchainAddress },
}

impl Display for ReportVerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReportVerificationError::InsufficientSignatures { signatures, f: faults } => write!(
                f,
                "{} signatures do not exceed the fault threshold {}",
                signatures, faults
            ),
            ReportVerificationError::MalformedObservations => {
                write!(f, "report has an invalid number of observations")
            }
            ReportVerificationError::InvalidSignature { index } => {
                write!(f, "signature {} is invalid", index)
            }
            ReportVerificationError::UnknownSigner { address } => {
                write!(f, "signer {} is not in the roster", address)
            }
            ReportVerificationError::DuplicateSigner { address } => {
                write!(f, "signer {} signed more than once", address)
            }
        }
    }
}

impl std::error::Error for ReportVerificationError {}
