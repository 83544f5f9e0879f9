use std::sync::{
    mpsc::{self, Receiver, Sender, TryRecvError},
    Arc, Mutex,
};

use offchain_reporting::{
    networking::network::BinaryNetworkEndpoint, pluggables::PluggableError,
    types::data_types::OracleID,
};

/// A mock network stub which passes byte strings from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: OracleID,
    all_peers: Vec<Sender<(OracleID, Vec<u8>)>>,
    inbox: Arc<Mutex<Receiver<(OracleID, Vec<u8>)>>>,
}

impl BinaryNetworkEndpoint for NetworkStub {
    fn start(&mut self) -> Result<(), PluggableError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PluggableError> {
        Ok(())
    }

    fn send_to(&mut self, payload: Vec<u8>, to: OracleID) {
        if let Some(peer) = self.all_peers.get(to.index()) {
            let _ = peer.send((self.me, payload));
        }
    }

    fn broadcast(&mut self, payload: Vec<u8>) {
        for peer in &self.all_peers {
            let _ = peer.send((self.me, payload.clone()));
        }
    }

    fn recv(&mut self) -> Option<(OracleID, Vec<u8>)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Connect `n` oracles. The `i`-th stub belongs to the oracle with ID `i`.
pub(crate) fn mock_network(n: usize) -> Vec<NetworkStub> {
    let (all_peers, inboxes): (Vec<_>, Vec<_>) = (0..n).map(|_| mpsc::channel()).unzip();

    inboxes
        .into_iter()
        .enumerate()
        .map(|(i, inbox)| NetworkStub {
            me: OracleID::new(i as u8),
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
