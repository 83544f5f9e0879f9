/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The numeric value that oracles observe and agree on.
//!
//! An [`Observation`] is a signed integer in `[-2^191, 2^191 - 1]`, so that it always fits into an on-chain
//! `int192` word. The range is enforced when an `Observation` is constructed, which is why
//! [`marshal`](Observation::marshal) can treat an out-of-range value as a programming error.
//!
//! ## Canonical encoding
//!
//! Observations are encoded as exactly [`OBSERVATION_BYTE_WIDTH`] big-endian bytes in two's complement,
//! with the sign in the top bit of byte 0. This encoding is used both on the wire and inside signatures.

use std::{
    fmt::{self, Display, Formatter},
    io::{self, Read, Write},
};

use borsh::{BorshDeserialize, BorshSerialize};
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, Zero};

/// Width of the canonical encoding of an [`Observation`].
pub const OBSERVATION_BYTE_WIDTH: usize = 24;

/// Number of bits in an on-chain observation word.
const OBSERVATION_BITS: usize = OBSERVATION_BYTE_WIDTH * 8;

/// Denominator of every deviation threshold expressed in parts per billion.
const PARTS_PER_BILLION: u64 = 1_000_000_000;

/// A single numeric observation, guaranteed to lie within the on-chain `int192` range.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Observation(BigInt);

impl Observation {
    /// Create an `Observation` from `value`, failing if `value` does not fit into 192 signed bits.
    pub fn new(value: BigInt) -> Result<Self, ObservationError> {
        if value < min_value() || value > max_value() {
            return Err(ObservationError::OutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Create an `Observation` from an `i64`. Every `i64` is in range.
    pub fn from_i64(value: i64) -> Self {
        Self(BigInt::from(value))
    }

    /// The smallest representable observation, `-2^191`.
    pub fn min() -> Self {
        Self(min_value())
    }

    /// The largest representable observation, `2^191 - 1`.
    pub fn max() -> Self {
        Self(max_value())
    }

    /// Get a reference to the inner integer value.
    pub fn value(&self) -> &BigInt {
        &self.0
    }

    /// Encode this observation into its canonical 24-byte two's complement form.
    ///
    /// # Panics
    ///
    /// Panics if the inner value is out of range. [`new`](Self::new) makes this unreachable.
    pub fn marshal(&self) -> [u8; OBSERVATION_BYTE_WIDTH] {
        let minimal = self.0.to_signed_bytes_be();
        assert!(
            minimal.len() <= OBSERVATION_BYTE_WIDTH,
            "observation {} does not fit into {} bits",
            self.0,
            OBSERVATION_BITS
        );

        let fill = if self.0.sign() == Sign::Minus { 0xff } else { 0x00 };
        let mut encoded = [fill; OBSERVATION_BYTE_WIDTH];
        encoded[OBSERVATION_BYTE_WIDTH - minimal.len()..].copy_from_slice(&minimal);
        encoded
    }

    /// Decode an observation from its canonical form. Every 24-byte string decodes to an in-range value.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self, ObservationError> {
        if bytes.len() != OBSERVATION_BYTE_WIDTH {
            return Err(ObservationError::WrongLength { len: bytes.len() });
        }
        Ok(Self(BigInt::from_signed_bytes_be(bytes)))
    }

    /// Check whether this observation deviates from `old` by at least `threshold_ppb` parts per billion,
    /// i.e., whether `|self - old| / |old| >= threshold_ppb / 10^9`.
    ///
    /// Any non-zero value deviates from an `old` of zero; zero never deviates from zero.
    pub fn deviates(&self, old: &Observation, threshold_ppb: u64) -> bool {
        if old.0.is_zero() {
            return !self.0.is_zero();
        }

        let change = (&self.0 - &old.0).abs() * BigInt::from(PARTS_PER_BILLION);
        let threshold = old.0.abs() * BigInt::from(threshold_ppb);
        change >= threshold
    }
}

impl Display for Observation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl BorshSerialize for Observation {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.marshal())
    }
}

impl BorshDeserialize for Observation {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; OBSERVATION_BYTE_WIDTH];
        reader.read_exact(&mut bytes)?;
        Ok(Self(BigInt::from_signed_bytes_be(&bytes)))
    }
}

/// Compute the median of `observations`: the element at index `len / 2` once sorted by value.
///
/// Returns `None` if `observations` is empty.
pub fn median(observations: &[Observation]) -> Option<Observation> {
    let mut sorted = observations.to_vec();
    sorted.sort();
    sorted.get(sorted.len() / 2).cloned()
}

fn max_value() -> BigInt {
    (BigInt::one() << (OBSERVATION_BITS - 1)) - BigInt::one()
}

fn min_value() -> BigInt {
    -(BigInt::one() << (OBSERVATION_BITS - 1))
}

/// Enumerates the ways constructing or decoding an [`Observation`] can fail.
#[derive(Debug)]
pub enum ObservationError {
    /// The value does not fit into 192 signed bits.
    OutOfRange { value: BigInt },

    /// The encoding is not exactly [`OBSERVATION_BYTE_WIDTH`] bytes long.
    WrongLength { len: usize },
}

impl Display for ObservationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ObservationError::OutOfRange { value } => {
                write!(f, "observation {} is outside of the int192 range", value)
            }
            ObservationError::WrongLength { len } => write!(
                f,
                "observation encoding has {} bytes, expected {}",
                len, OBSERVATION_BYTE_WIDTH
            ),
        }
    }
}

impl std::error::Error for ObservationError {}
