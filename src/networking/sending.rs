//! Functions and types for sending messages to the P2P network.

use crate::types::data_types::OracleID;

use super::{messages::Message, network::NetworkEndpoint};

/// Handle for sending and broadcasting messages to the [`NetworkEndpoint`].
///
/// It can be used to send or broadcast instances of any type that implement the [`Into<Message>`]
/// trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: NetworkEndpoint> {
    network: N,
}

impl<N: NetworkEndpoint> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send_to<S: Into<Message>>(&mut self, peer: OracleID, msg: S) {
        self.network.send_to(msg.into(), peer)
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) {
        self.network.broadcast(msg.into())
    }
}
