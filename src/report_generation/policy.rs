/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Checks a follower runs on a `ReportReq` before signing the report it carries.

use std::{
    fmt::{self, Display, Formatter},
    time::SystemTime,
};

use crate::{
    oracle::LocalTimeouts,
    pluggables::ContractTransmitter,
    subprocess::block_for_at_most,
    types::{
        config::SharedConfig,
        data_types::{OracleID, ReportingContext},
        observation::Observation,
        report::AttributedSignedObservation,
    },
};

/// Enumerates the reasons a follower rejects the observations in a `ReportReq`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum InvalidReportReq {
    Unsorted,
    ObserverOutOfBounds { observer: OracleID },
    DuplicateObserver { observer: OracleID },
    InvalidSignature { observer: OracleID },
    TooFewObservations { observations: usize, f: usize },
}

impl Display for InvalidReportReq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReportReq::Unsorted => write!(f, "observations are not sorted by value"),
            InvalidReportReq::ObserverOutOfBounds { observer } => {
                write!(f, "observer {} is not in the roster", observer)
            }
            InvalidReportReq::DuplicateObserver { observer } => {
                write!(f, "observer {} appears more than once", observer)
            }
            InvalidReportReq::InvalidSignature { observer } => {
                write!(f, "observation of {} has an invalid signature", observer)
            }
            InvalidReportReq::TooFewObservations {
                observations,
                f: faults,
            } => write!(
                f,
                "{} observations do not exceed 2f = {}",
                observations,
                2 * faults
            ),
        }
    }
}

/// Accept the observations of a `ReportReq` iff they are sorted by value, come from strictly more than
/// `2f` distinct members of the roster, and are all validly signed in `context`.
pub(crate) fn verify_report_req(
    context: &ReportingContext,
    observations: &[AttributedSignedObservation],
    shared_config: &SharedConfig,
) -> Result<(), InvalidReportReq> {
    let sorted = observations.windows(2).all(|pair| {
        pair[0].signed_observation.observation <= pair[1].signed_observation.observation
    });
    if !sorted {
        return Err(InvalidReportReq::Unsorted);
    }

    let mut seen = vec![false; shared_config.n()];
    for attributed in observations {
        let observer = attributed.observer;
        if !shared_config.contains(observer) {
            return Err(InvalidReportReq::ObserverOutOfBounds { observer });
        }
        if seen[observer.index()] {
            return Err(InvalidReportReq::DuplicateObserver { observer });
        }
        seen[observer.index()] = true;

        let public_key = &shared_config.oracle_identities[observer.index()].offchain_public_key;
        if !attributed.signed_observation.verify(context, public_key) {
            return Err(InvalidReportReq::InvalidSignature { observer });
        }
    }

    if observations.len() <= 2 * shared_config.f {
        return Err(InvalidReportReq::TooFewObservations {
            observations: observations.len(),
            f: shared_config.f,
        });
    }
    Ok(())
}

/// Decide whether a report with `median` for `context` is worth signing, given the state of the
/// on-chain consumer.
///
/// The report is signed if any of these hold:
/// 1. The consumer has not received any report for this configuration yet.
/// 2. `median` deviates from the consumer's latest answer by at least `alpha`.
/// 3. The consumer's latest answer is older than `delta_c`.
/// 4. A new round was requested on chain and has not been answered yet.
///
/// It is never signed if the consumer already holds a report for this configuration from the same or a
/// later `(epoch, round)`. If either read from the chain fails or times out, the report is signed.
pub(crate) fn should_report<CT: ContractTransmitter>(
    contract_transmitter: &CT,
    timeouts: &LocalTimeouts,
    shared_config: &SharedConfig,
    context: &ReportingContext,
    median: &Observation,
) -> bool {
    let mut transmitter = contract_transmitter.clone();
    let details = match block_for_at_most(timeouts.blockchain_timeout, move |ctx| {
        transmitter.latest_transmission_details(ctx)
    }) {
        Some(Ok(details)) => details,
        Some(Err(err)) => {
            log::error!("Failed to read latest transmission details, reporting anyway: {}", err);
            return true;
        }
        None => {
            log::error!("Timed out reading latest transmission details, reporting anyway");
            return true;
        }
    };

    let mut transmitter = contract_transmitter.clone();
    let delta_c = shared_config.delta_c;
    let requested = match block_for_at_most(timeouts.blockchain_timeout, move |ctx| {
        transmitter.latest_round_requested(ctx, delta_c)
    }) {
        Some(Ok(requested)) => requested,
        Some(Err(err)) => {
            log::error!("Failed to read latest round requested, reporting anyway: {}", err);
            return true;
        }
        None => {
            log::error!("Timed out reading latest round requested, reporting anyway");
            return true;
        }
    };

    let same_config = details.config_digest == context.config_digest;
    let contract_epoch_round = details.epoch_round();
    if same_config && context.epoch_round() <= contract_epoch_round {
        log::debug!(
            "Not reporting {}: contract already holds {}",
            context.epoch_round(),
            contract_epoch_round
        );
        return false;
    }

    let initial_round = same_config && details.epoch == 0 && details.round == 0;
    let deviation = median.deviates(&details.latest_answer, shared_config.alpha_ppb);
    let delta_c_expired = details
        .latest_timestamp
        .checked_add(delta_c)
        .map_or(true, |expiry| expiry < SystemTime::now());
    let unfulfilled_request = requested.config_digest == context.config_digest
        && requested.epoch_round() >= contract_epoch_round;

    log::debug!(
        "shouldReport {}: initial_round={} deviation={} delta_c_expired={} unfulfilled_request={}",
        context.epoch_round(),
        initial_round,
        deviation,
        delta_c_expired,
        unfulfilled_request
    );
    initial_round || deviation || delta_c_expired || unfulfilled_request
}
