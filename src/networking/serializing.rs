//! A [`NetworkEndpoint`] on top of a [`BinaryNetworkEndpoint`].

use crate::{
    pluggables::PluggableError,
    serialization::{deserialize_message, serialize_message},
    telemetry::{emit, AssertionViolation, TelemetryEvent, TelemetrySender},
    types::data_types::{ConfigDigest, OracleID},
};

use super::{
    messages::Message,
    network::{BinaryNetworkEndpoint, NetworkEndpoint},
};

/// Serializes outgoing messages and deserializes incoming ones, scoping both to one [`ConfigDigest`].
///
/// Incoming byte strings that fail to deserialize are dropped and reported as an
/// [`InvalidSerialization`](AssertionViolation::InvalidSerialization) assertion violation. Messages for
/// any other config digest are dropped silently: they are expected around configuration changes.
#[derive(Clone)]
pub(crate) struct SerializingEndpoint<B: BinaryNetworkEndpoint> {
    binary: B,
    config_digest: ConfigDigest,
    telemetry: Option<TelemetrySender>,
}

impl<B: BinaryNetworkEndpoint> SerializingEndpoint<B> {
    pub(crate) fn new(
        binary: B,
        config_digest: ConfigDigest,
        telemetry: Option<TelemetrySender>,
    ) -> Self {
        Self {
            binary,
            config_digest,
            telemetry,
        }
    }
}

impl<B: BinaryNetworkEndpoint> NetworkEndpoint for SerializingEndpoint<B> {
    fn start(&mut self) -> Result<(), PluggableError> {
        self.binary.start()
    }

    fn close(&mut self) -> Result<(), PluggableError> {
        self.binary.close()
    }

    fn send_to(&mut self, message: Message, to: OracleID) {
        let bytes = serialize_message(&self.config_digest, &message);
        emit(
            &self.telemetry,
            TelemetryEvent::MessageSent {
                config_digest: self.config_digest,
                receiver: to,
                message: bytes.clone(),
            },
        );
        self.binary.send_to(bytes, to)
    }

    fn broadcast(&mut self, message: Message) {
        let bytes = serialize_message(&self.config_digest, &message);
        emit(
            &self.telemetry,
            TelemetryEvent::MessageBroadcast {
                config_digest: self.config_digest,
                message: bytes.clone(),
            },
        );
        self.binary.broadcast(bytes)
    }

    fn recv(&mut self) -> Option<(OracleID, Message)> {
        while let Some((sender, bytes)) = self.binary.recv() {
            match deserialize_message(&bytes) {
                Ok((config_digest, message)) if config_digest == self.config_digest => {
                    emit(
                        &self.telemetry,
                        TelemetryEvent::MessageReceived {
                            config_digest,
                            sender,
                            message: bytes,
                        },
                    );
                    return Some((sender, message));
                }
                Ok((config_digest, message)) => {
                    log::debug!(
                        "Dropping {} from oracle {} for config digest {}, expected {}",
                        message.name(),
                        sender,
                        config_digest,
                        self.config_digest
                    );
                }
                Err(err) => {
                    log::warn!("Dropping message from oracle {}: {}", sender, err);
                    emit(
                        &self.telemetry,
                        TelemetryEvent::AssertionViolation {
                            config_digest: self.config_digest,
                            violation: AssertionViolation::InvalidSerialization { sender, bytes },
                        },
                    );
                }
            }
        }
        None
    }
}
