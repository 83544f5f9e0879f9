/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Byzantine fault tolerant off-chain reporting protocol.
//!
//! A roster of `N` oracles, up to `f < N/3` of which may be faulty, repeatedly observe a numeric value
//! from an external [data source](pluggables::DataSource), agree off-chain on a report containing the
//! signed observations of more than `2f` of them, and submit that report to an on-chain consumer. The
//! consumer only needs to check the `f+1` on-chain signatures attached to the report, and reads the
//! median of its observations as the new answer.
//!
//! The protocol is made of three subprotocols, each running on its own thread:
//! 1. [`pacemaker`]: elects a leader per epoch, and replaces leaders that fail to make progress.
//! 2. [`report_generation`]: within one epoch, the leader gathers observations into reports, and the
//!    followers sign the reports worth sending on chain.
//! 3. [`transmission`]: schedules accepted reports for submission, staggered across oracles so that
//!    only a few of them pay for each transmission.
//!
//! Start with [`oracle::OracleSpec`] to build and run an oracle.

pub mod types;

pub mod networking;

pub mod pluggables;

pub mod events;

pub mod oracle;

pub mod telemetry;

pub mod serialization;

pub mod subprocess;

pub mod pacemaker;

pub mod report_generation;

pub mod transmission;

pub(crate) mod event_bus;

pub(crate) mod logging;

#[cfg(test)]
extern crate self as offchain_reporting;

#[cfg(test)]
pub(crate) mod test_utils;
