//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{telemetry::Taper, types::data_types::OracleID};

use super::{messages::Message, network::NetworkEndpoint};

/// How long the poller sleeps when the network has nothing to deliver.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Number of inputs an inbox buffers before it starts dropping new ones.
pub(crate) const INBOX_CAPACITY: usize = 1024;

/// Returned by [`InboxSender::deliver`] when the receiving end has been dropped.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct InboxClosed;

/// The sending end of a bounded inbox.
///
/// Peers can send faster than a component consumes, so delivery never blocks: an input that does not fit
/// is dropped, and a warning is logged at the 1st, 2nd, 4th, 8th... consecutive drop.
pub(crate) struct InboxSender<T> {
    name: &'static str,
    sender: SyncSender<T>,
    taper: Taper,
}

impl<T> Clone for InboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
            taper: self.taper.clone(),
        }
    }
}

impl<T> InboxSender<T> {
    pub(crate) fn deliver(&self, input: T) -> Result<(), InboxClosed> {
        let ok = match self.sender.try_send(input) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => return Err(InboxClosed),
        };
        self.taper.trigger(ok, |dropped| {
            log::warn!(
                "{} inbox full, dropped {} consecutive inputs",
                self.name,
                dropped
            )
        });
        Ok(())
    }
}

/// Create an inbox named `name` (for logging) that holds at most `capacity` inputs.
pub(crate) fn inbox<T>(name: &'static str, capacity: usize) -> (InboxSender<T>, Receiver<T>) {
    let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
    (
        InboxSender {
            name,
            sender,
            taper: Taper::new(),
        },
        receiver,
    )
}

/// Spawn the poller thread, which polls the [`NetworkEndpoint`] for messages and forwards them, in
/// arrival order, to `inbox`.
///
/// All messages go to a single inbox: the [pacemaker](crate::pacemaker) handles its own messages and
/// routes report generation messages to the live report generation instance. Messages that arrive while
/// the inbox is full are dropped.
pub(crate) fn start_polling<N, T>(
    mut network: N,
    inbox: InboxSender<T>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()>
where
    N: NetworkEndpoint,
    T: From<(OracleID, Message)> + Send + 'static,
{
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, msg)) = network.recv() {
            if inbox.deliver(T::from((origin, msg))).is_err() {
                // The consumer has shut down.
                return;
            }
        } else {
            thread::sleep(IDLE_SLEEP)
        }
    })
}
