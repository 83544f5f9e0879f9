//! Types and traits that are used across multiple sub-protocols or components of the oracle.
//!
//! Other types, specific to single components, can be found in the "messages" or "types" submodules
//! of those components, e.g., [`crate::transmission::types`].

pub mod config;

pub mod crypto_primitives;

pub mod data_types;

pub mod observation;

pub mod report;
