/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The pacemaker's background persistence thread.
//!
//! The pacemaker hands every state change that must survive a crash to this thread without blocking.
//! The hand-off channel holds at most [`PERSISTENCE_BUFFER_CAPACITY`] states; when it is full, the newest
//! state is dropped and a warning is logged. Losing a write only slows down recovery after a crash: the
//! epoch can always be re-derived from peers' `NewEpoch` messages and the on-chain state.

use std::{
    sync::mpsc::{self, SyncSender, TrySendError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    pluggables::{Database, PersistentState},
    subprocess::block_for_at_most,
    types::data_types::ConfigDigest,
};

pub(crate) const PERSISTENCE_BUFFER_CAPACITY: usize = 256;

pub(crate) struct PersistenceHandle {
    sender: SyncSender<PersistentState>,
    thread: JoinHandle<()>,
}

impl PersistenceHandle {
    /// Spawn the persistence thread, which writes every state it receives to `database` under
    /// `config_digest`, waiting at most `database_timeout` for each write.
    pub(crate) fn start<DB: Database>(
        database: DB,
        config_digest: ConfigDigest,
        database_timeout: Duration,
    ) -> PersistenceHandle {
        let (sender, receiver) = mpsc::sync_channel::<PersistentState>(PERSISTENCE_BUFFER_CAPACITY);
        let thread = thread::spawn(move || {
            // Exits once the pacemaker drops its sender.
            for state in receiver {
                let mut database = database.clone();
                match block_for_at_most(database_timeout, move |ctx| {
                    database.write_state(ctx, config_digest, state)
                }) {
                    Some(Ok(())) => (),
                    Some(Err(err)) => log::error!("Failed to persist pacemaker state: {}", err),
                    None => log::error!(
                        "Timed out after {:?} persisting pacemaker state",
                        database_timeout
                    ),
                }
            }
        });
        PersistenceHandle { sender, thread }
    }

    pub(crate) fn persist(&self, state: PersistentState) {
        match self.sender.try_send(state) {
            Ok(()) => (),
            Err(TrySendError::Full(state)) => log::warn!(
                "Persistence buffer full, dropping pacemaker state for epoch {}",
                state.epoch
            ),
            Err(TrySendError::Disconnected(_)) => {
                log::error!("Persistence thread is gone, pacemaker state will not be persisted")
            }
        }
    }

    /// Flush the states still in the buffer and wait for the persistence thread to exit.
    pub(crate) fn stop(self) {
        drop(self.sender);
        let _ = self.thread.join();
    }
}
