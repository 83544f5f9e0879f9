/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide the primitives of two independent signature
//! domains, plus the hashes they rely on:
//! 1. **Off-chain signatures** authenticate protocol messages between oracles. Provided by the
//!    [`ed25519_dalek`] crate.
//! 2. **On-chain signatures** authenticate reports to the on-chain consumer. These are recoverable
//!    secp256k1 signatures provided by the [`k256`] crate, so that the signer's
//!    [`OnchainAddress`] can be derived from `(message, signature)` alone.
//! 3. **Cryptographic hashes**: SHA-256 from [`sha2`] for off-chain derivations, and Keccak-256 from
//!    [`sha3`] for everything the on-chain consumer must be able to recompute.

use k256::ecdsa::{RecoveryId, Signature as OnchainEcdsaSignature};

use super::data_types::{OnchainAddress, OnchainSignature, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;
pub use sha3::Keccak256;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

pub use k256::ecdsa::{SigningKey as OnchainSigningKey, VerifyingKey as OnchainVerifyingKey};

/// Compute the Keccak-256 hash of `bytes`.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// A facade around an ed25519 [`SigningKey`] used to sign protocol messages.
#[derive(Clone)]
pub(crate) struct OffchainKeypair(pub(crate) SigningKey);

impl OffchainKeypair {
    /// Create an `OffchainKeypair` that wraps over `signing_key`.
    pub(crate) fn new(signing_key: SigningKey) -> OffchainKeypair {
        OffchainKeypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `OffchainKeypair`.
    pub(crate) fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `OffchainKeypair`.
    pub(crate) fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

/// Verify that `signature` is an ed25519 signature by `verifying_key` over `message`.
pub(crate) fn verify_offchain(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(message, &signature).is_ok()
}

/// A facade around a secp256k1 signing key used to sign reports for the on-chain consumer.
#[derive(Clone)]
pub(crate) struct OnchainKeypair(pub(crate) OnchainSigningKey);

impl OnchainKeypair {
    /// Create an `OnchainKeypair` that wraps over `signing_key`.
    pub(crate) fn new(signing_key: OnchainSigningKey) -> OnchainKeypair {
        OnchainKeypair(signing_key)
    }

    /// Produce a recoverable signature over the Keccak-256 hash of `message`.
    pub(crate) fn sign(&self, message: &[u8]) -> Result<OnchainSignature, OnchainSignatureError> {
        let prehash = keccak256(message);
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(&prehash)
            .map_err(|_| OnchainSignatureError::SigningFailed)?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(OnchainSignature::new(bytes))
    }

    /// Get the on-chain address that signatures of this keypair recover to.
    pub(crate) fn address(&self) -> OnchainAddress {
        onchain_address(self.0.verifying_key())
    }
}

/// Derive the [`OnchainAddress`] of a secp256k1 public key: the last 20 bytes of the Keccak-256 hash of
/// its uncompressed encoding (without the `0x04` prefix).
pub fn onchain_address(verifying_key: &OnchainVerifyingKey) -> OnchainAddress {
    let encoded = verifying_key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..32]);
    OnchainAddress::new(address)
}

/// Recover the address of the key that produced `signature` over the Keccak-256 hash of `message`.
pub(crate) fn recover_onchain_address(
    message: &[u8],
    signature: &OnchainSignature,
) -> Result<OnchainAddress, OnchainSignatureError> {
    let bytes = signature.bytes();
    let ecdsa_signature = OnchainEcdsaSignature::from_slice(&bytes[..64])
        .map_err(|_| OnchainSignatureError::MalformedSignature)?;
    let recovery_id =
        RecoveryId::from_byte(bytes[64]).ok_or(OnchainSignatureError::MalformedSignature)?;
    let verifying_key = OnchainVerifyingKey::recover_from_prehash(
        &keccak256(message),
        &ecdsa_signature,
        recovery_id,
    )
    .map_err(|_| OnchainSignatureError::RecoveryFailed)?;
    Ok(onchain_address(&verifying_key))
}

/// Enumerates the ways producing or checking an [`OnchainSignature`] can fail.
#[derive(Debug, PartialEq, Eq)]
pub enum OnchainSignatureError {
    SigningFailed,
    MalformedSignature,
    RecoveryFailed,
}
