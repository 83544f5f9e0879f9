//! Traits for pluggable peer-to-peer networking.
//!
//! The library user provides a [`BinaryNetworkEndpoint`] that moves opaque byte strings between the
//! oracles of a roster. The oracle wraps it in a
//! [`SerializingEndpoint`](super::serializing::SerializingEndpoint), which implements
//! [`NetworkEndpoint`] by composing the binary transport with [`serialization`](crate::serialization).

use crate::{pluggables::PluggableError, types::data_types::OracleID};

use super::messages::Message;

/// A transport for opaque byte strings, with peers identified by their [`OracleID`].
///
/// The endpoint is responsible for authenticating peers: the `OracleID` returned by `recv` must be the
/// roster index of the oracle that actually sent the bytes.
pub trait BinaryNetworkEndpoint: Clone + Send + 'static {
    fn start(&mut self) -> Result<(), PluggableError>;

    fn close(&mut self) -> Result<(), PluggableError>;

    /// Send `payload` to the oracle `to` without blocking.
    fn send_to(&mut self, payload: Vec<u8>, to: OracleID);

    /// Send `payload` to every oracle in the roster, including this one, without blocking.
    fn broadcast(&mut self, payload: Vec<u8>);

    /// Receive bytes from any peer. Returns immediately with a None if nothing is available now.
    fn recv(&mut self) -> Option<(OracleID, Vec<u8>)>;
}

/// A transport for typed protocol [`Message`]s.
pub trait NetworkEndpoint: Clone + Send + 'static {
    fn start(&mut self) -> Result<(), PluggableError>;

    fn close(&mut self) -> Result<(), PluggableError>;

    /// Send `message` to the oracle `to` without blocking.
    fn send_to(&mut self, message: Message, to: OracleID);

    /// Send `message` to every oracle in the roster, including this one, without blocking.
    fn broadcast(&mut self, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(OracleID, Message)>;
}
