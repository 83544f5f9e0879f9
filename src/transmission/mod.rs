/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol for submitting accepted reports to the on-chain consumer.
//!
//! # Staggered transmission
//!
//! Every correct oracle that accepts a report (see [`report_generation`](crate::report_generation))
//! is able to transmit it. If all of them did so at once, the consumer would pay for `N` transmissions of
//! the same report. Instead, each oracle waits for a delay computed by the [`schedule`] module before
//! transmitting, and before transmitting checks whether the consumer has already received the report (or
//! a newer one) from somebody else. In the common case, only the oracles in the first stage transmit.
//!
//! # Crash recovery
//!
//! A scheduled transmission is written to the [`Database`](crate::pluggables::Database) before it enters
//! the in-memory queue, and deleted before it is attempted. An oracle that restarts therefore resumes
//! its schedule, and never attempts the same transmission twice.
//!
//! Pending transmissions older than [`PENDING_TRANSMISSION_MAX_AGE`](implementation::PENDING_TRANSMISSION_MAX_AGE)
//! are deleted at startup instead of being restored.
//!
//! # Deciding whether to transmit
//!
//! A report for `(epoch, round)` with median `m` is scheduled only if:
//! 1. The consumer's latest report is for an earlier `(epoch, round)`.
//! 2. This oracle has not already scheduled a report for the same or a later `(epoch, round)`.
//! 3. If this oracle's latest scheduled report has not yet landed on chain, `m` deviates from that
//!    report's median by at least `alpha`.

pub mod implementation;

pub(crate) mod schedule;

pub(crate) mod types;
