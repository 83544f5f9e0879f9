/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Staggered transmission delays.
//!
//! Every oracle that accepts a report schedules its own transmission of it. To avoid all of them
//! submitting at once, the oracles of a roster are placed into stages of width `delta_stage`: the first
//! `s[0]` oracles transmit immediately, the next `s[1]` after one `delta_stage`, and so on. Oracles not
//! covered by `s` transmit after `s.len()` stages.
//!
//! Which oracle lands in which stage is decided by a pseudo-random permutation of the roster, seeded by
//! the Keccak-256 hash of the shared transmission order key and the report's `(config digest, epoch,
//! round)`. Every oracle computes the same permutation, but outsiders without the key cannot predict it.

use std::time::Duration;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::types::{
    crypto_primitives::keccak256,
    data_types::{ConfigDigest, Epoch, OracleID, Round},
};

/// The pseudo-random permutation of `0..n` for one `(config digest, epoch, round)`.
pub(crate) fn transmission_permutation(
    transmission_order_key: &[u8; 16],
    config_digest: &ConfigDigest,
    epoch: Epoch,
    round: Round,
    n: usize,
) -> Vec<usize> {
    let mut preimage = Vec::with_capacity(16 + 16 + 8 + 8);
    preimage.extend_from_slice(transmission_order_key);
    preimage.extend_from_slice(&config_digest.bytes());
    preimage.extend_from_slice(&(epoch as u64).to_le_bytes());
    preimage.extend_from_slice(&(round as u64).to_le_bytes());

    let mut rng = StdRng::from_seed(keccak256(&preimage));
    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut rng);
    permutation
}

/// How long oracle `id` waits before transmitting the report of `(epoch, round)`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn transmission_delay(
    transmission_order_key: &[u8; 16],
    config_digest: &ConfigDigest,
    epoch: Epoch,
    round: Round,
    id: OracleID,
    n: usize,
    s: &[u32],
    delta_stage: Duration,
) -> Duration {
    let permutation =
        transmission_permutation(transmission_order_key, config_digest, epoch, round, n);
    let position = permutation[id.index()];

    let mut covered = 0usize;
    for (stage, width) in s.iter().enumerate() {
        covered += *width as usize;
        if position < covered {
            return delta_stage.saturating_mul(stage as u32);
        }
    }
    delta_stage.saturating_mul(s.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [4; 16];
    const DIGEST: ConfigDigest = ConfigDigest::new([8; 16]);
    const STAGE: Duration = Duration::from_secs(10);

    fn delays(n: usize, s: &[u32], epoch: Epoch, round: Round) -> Vec<Duration> {
        (0..n)
            .map(|id| {
                transmission_delay(&KEY, &DIGEST, epoch, round, OracleID::new(id as u8), n, s, STAGE)
            })
            .collect()
    }

    #[test]
    fn one_oracle_per_stage() {
        let mut sorted = delays(4, &[1, 1, 1, 1], 1, 1);
        sorted.sort();
        assert_eq!(sorted, vec![STAGE * 0, STAGE * 1, STAGE * 2, STAGE * 3]);
    }

    #[test]
    fn oracles_beyond_the_schedule_go_last() {
        let mut sorted = delays(4, &[1, 2], 3, 7);
        sorted.sort();
        assert_eq!(sorted, vec![STAGE * 0, STAGE * 1, STAGE * 1, STAGE * 2]);
    }

    #[test]
    fn schedule_is_deterministic_per_round() {
        assert_eq!(delays(7, &[1, 1, 1, 1, 1, 1, 1], 2, 3), delays(7, &[1, 1, 1, 1, 1, 1, 1], 2, 3));
        let permutations: Vec<Vec<usize>> = (1..=10)
            .map(|round| transmission_permutation(&KEY, &DIGEST, 1, round, 7))
            .collect();
        assert!(permutations.iter().any(|p| p != &permutations[0]));
    }
}
