/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Subprotocol for agreeing on reports within one epoch.
//!
//! # Rounds
//!
//! The [pacemaker](crate::pacemaker) assigns every epoch a single leader, and spawns exactly one
//! [`ReportGeneration`](implementation::ReportGeneration) instance for it. Within the epoch, the leader
//! drives a sequence of rounds numbered from 1. Each round tries to turn a fresh set of observations into
//! a report signed by enough oracles to be accepted on chain:
//!
//! ```text
//!  leader                  followers
//!    | ---- ObserveReq ----> |
//!    | <----- Observe ------ |   (more than 2f, then wait delta_grace)
//!    | ----- ReportReq ----> |
//!    | <------ Report ------ |   (more than f)
//!    | ------- Final ------> |
//!    |        FinalEcho <--> |   (all to all; accept after more than f)
//! ```
//!
//! The leader starts a new round every `delta_round`, whether or not the previous round produced a
//! report. See [`leader`] and [`follower`] for the two roles.
//!
//! # Leader changes
//!
//! The instance tells the pacemaker about two things:
//! 1. Every completed round, as a progress signal that keeps the current leader in place.
//! 2. A leader that has started more than `r_max` rounds, which followers treat as a request for a new
//!    epoch.
//!
//! A leader that stops driving rounds altogether is caught by the pacemaker's progress timeout.
//!
//! # Deciding whether to report
//!
//! Followers only sign reports that are worth sending on chain: see [`policy`].

pub(crate) mod follower;

pub(crate) mod implementation;

pub(crate) mod leader;

pub mod messages;

pub(crate) mod policy;
