/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Wire encoding of protocol messages and telemetry events.
//!
//! ## Envelope
//!
//! Every serialized protocol message is:
//!
//! ```text
//! version (1 byte) ‖ borsh((ConfigDigest, Message))
//! ```
//!
//! The version byte lets a future encoding coexist with this one. Decoding rejects unknown versions,
//! malformed payloads, and trailing bytes. Telemetry events use the same envelope around
//! `borsh(TelemetryEvent)`.

use std::{
    fmt::{self, Display, Formatter},
    io,
};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    networking::messages::Message, telemetry::TelemetryEvent, types::data_types::ConfigDigest,
};

/// Version byte of the current wire encoding.
pub const WIRE_VERSION: u8 = 1;

pub fn serialize_message(config_digest: &ConfigDigest, message: &Message) -> Vec<u8> {
    envelope(&(config_digest, message))
}

pub fn deserialize_message(bytes: &[u8]) -> Result<(ConfigDigest, Message), SerializationError> {
    open_envelope(bytes)
}

pub fn serialize_telemetry(event: &TelemetryEvent) -> Vec<u8> {
    envelope(event)
}

pub fn deserialize_telemetry(bytes: &[u8]) -> Result<TelemetryEvent, SerializationError> {
    open_envelope(bytes)
}

fn envelope<T: BorshSerialize>(payload: &T) -> Vec<u8> {
    let mut bytes = vec![WIRE_VERSION];
    // Safety: borsh serialization into a Vec cannot fail.
    payload.serialize(&mut bytes).unwrap();
    bytes
}

fn open_envelope<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, SerializationError> {
    match bytes.split_first() {
        None => Err(SerializationError::Empty),
        Some((&WIRE_VERSION, payload)) => {
            T::try_from_slice(payload).map_err(SerializationError::Malformed)
        }
        Some((&version, _)) => Err(SerializationError::UnsupportedVersion(version)),
    }
}

#[derive(Debug)]
pub enum SerializationError {
    Empty,
    UnsupportedVersion(u8),
    Malformed(io::Error),
}

impl Display for SerializationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Empty => write!(f, "empty message"),
            SerializationError::UnsupportedVersion(version) => {
                write!(f, "unsupported wire version {}", version)
            }
            SerializationError::Malformed(err) => write!(f, "malformed message: {}", err),
        }
    }
}

impl std::error::Error for SerializationError {}
