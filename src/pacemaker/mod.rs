/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol for Byzantine leader election.
//!
//! # Epochs and leaders
//!
//! Oracles report in **epochs**. Every epoch has exactly one leader, selected by
//! [`leader`](implementation::leader) from a hash of the epoch number and a key shared only by the
//! roster. An oracle spends its time in a single epoch at a time, and runs one
//! [report generation](crate::report_generation) instance for it.
//!
//! The Pacemaker (this module) decides when to leave the current epoch. It does so when the leader
//! appears to be faulty, either because:
//! 1. No round has completed in `delta_progress` (the **progress timeout**), or
//! 2. Report generation asks for a leader change, because the leader has started more than `r_max`
//!    rounds.
//!
//! # Agreeing on the next epoch
//!
//! An oracle that wants to leave epoch `e` cannot simply move to `e + 1` by itself: a single faulty
//! oracle would then be able to make the roster churn through leaders. Instead, oracles announce the
//! epoch they want to be in by broadcasting `NewEpoch` messages, and track the highest epoch every other
//! oracle has announced. With `f` the maximum number of faulty oracles, two rules apply on every
//! `NewEpoch` received:
//! 1. **Join**: if more than `f` oracles announce epochs above the one this oracle announces, at least one
//!    of them is correct, so this oracle starts announcing the `(f+1)`-th highest of them too.
//! 2. **Move**: if more than `2f` oracles announce epochs above the current one, a quorum has committed
//!    to moving on, so this oracle enters the `(2f+1)`-th highest of them, and restarts report generation
//!    for it.
//!
//! The oracle re-broadcasts its announcement every `delta_resend`, so that announcements lost by the
//! network are eventually delivered.
//!
//! # Persistence
//!
//! The current epoch, the highest announced epoch, and the announcements of every other oracle are
//! persisted through [`Database::write_state`](crate::pluggables::Database::write_state) on every change
//! (see [`persistence`]). At startup, an oracle resumes from the persisted state, but never announces an
//! epoch at or below the epoch of the latest report accepted on chain.

pub(crate) mod persistence;

pub mod messages;

pub mod implementation;

pub mod types;
