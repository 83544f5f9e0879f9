/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or counters, and do not have any major "active" behavior.

use std::fmt::{self, Debug, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

/// A leadership term. Epochs increase monotonically across leader changes.
pub type Epoch = u32;

/// One attempted observation-to-report cycle inside an [`Epoch`]. Rounds start at 1 in every epoch.
pub type Round = u8;

/// The maximum number of oracles a single configuration may contain.
///
/// The on-chain report encodes the index of every observer in a single 32-byte word, so a roster can
/// never be larger than that word.
pub const MAX_ORACLES: usize = 31;

/// 16-byte digest that binds an oracle roster and its protocol constants to one on-chain configuration.
///
/// Every protocol message and every piece of persisted state is scoped to exactly one `ConfigDigest`.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct ConfigDigest([u8; 16]);

impl ConfigDigest {
    /// Create a new `ConfigDigest` wrapping `bytes`.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 16]` value of this `ConfigDigest`.
    pub const fn bytes(&self) -> [u8; 16] {
        self.0
    }
}

impl Display for ConfigDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for ConfigDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Index of an oracle in the roster of a [`SharedConfig`](super::config::SharedConfig), in `[0, N)`.
///
/// Oracle IDs received over the wire are attacker controlled. Code that receives one must bounds-check
/// it against the roster before using it as an index.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, BorshSerialize, BorshDeserialize,
)]
pub struct OracleID(u8);

impl OracleID {
    /// Create a new `OracleID` with an `int` value.
    pub const fn new(int: u8) -> Self {
        Self(int)
    }

    /// Get the `u8` value of this `OracleID`.
    pub const fn int(&self) -> u8 {
        self.0
    }

    /// Get this `OracleID` as an index into per-oracle vectors.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for OracleID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// An `(epoch, round)` pair, totally ordered lexicographically (epoch first).
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct EpochRound {
    pub epoch: Epoch,
    pub round: Round,
}

impl EpochRound {
    pub const fn new(epoch: Epoch, round: Round) -> Self {
        Self { epoch, round }
    }
}

impl Display for EpochRound {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch, self.round)
    }
}

/// Domain-separation tag mixed into every signature so that a signature produced in one
/// `(config digest, epoch, round)` can never be replayed in another.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ReportingContext {
    pub config_digest: ConfigDigest,
    pub epoch: Epoch,
    pub round: Round,
}

impl ReportingContext {
    pub const fn new(config_digest: ConfigDigest, epoch: Epoch, round: Round) -> Self {
        Self {
            config_digest,
            epoch,
            round,
        }
    }

    pub const fn epoch_round(&self) -> EpochRound {
        EpochRound::new(self.epoch, self.round)
    }
}

/// Ed25519 digital signature used in the off-chain (message authentication) domain.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({:02x?}..)", &self.0[..4])
    }
}

/// Recoverable secp256k1 signature used in the on-chain (report authentication) domain, laid out as
/// `r (32 bytes) ‖ s (32 bytes) ‖ v (1 byte recovery id)`.
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OnchainSignature([u8; 65]);

impl OnchainSignature {
    /// Create a new `OnchainSignature` wrapping `bytes`.
    pub const fn new(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 65]` value of this `OnchainSignature`.
    pub const fn bytes(&self) -> [u8; 65] {
        self.0
    }

    pub fn r(&self) -> [u8; 32] {
        let mut r = [0u8; 32];
        r.copy_from_slice(&self.0[0..32]);
        r
    }

    pub fn s(&self) -> [u8; 32] {
        let mut s = [0u8; 32];
        s.copy_from_slice(&self.0[32..64]);
        s
    }

    pub const fn v(&self) -> u8 {
        self.0[64]
    }
}

impl Debug for OnchainSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "OnchainSignature({:02x?}..)", &self.0[..4])
    }
}

/// 20-byte on-chain account address.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct OnchainAddress([u8; 20]);

impl OnchainAddress {
    /// Create a new `OnchainAddress` wrapping `bytes`.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 20]` value of this `OnchainAddress`.
    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl Display for OnchainAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for OnchainAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
