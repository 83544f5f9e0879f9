//! A simple, volatile, in-memory implementation of [`Database`].
//!
//! Shared with the crate's unit tests, which include this file from `src/test_utils.rs`.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::SystemTime,
};

use offchain_reporting::{
    pluggables::{
        Database, PendingTransmission, PendingTransmissionKey, PersistentState, PluggableError,
    },
    subprocess::CallContext,
    types::{config::ContractConfig, data_types::ConfigDigest},
};

#[derive(Default)]
struct Tables {
    states: HashMap<ConfigDigest, PersistentState>,
    config: Option<ContractConfig>,
    pending: BTreeMap<PendingTransmissionKey, PendingTransmission>,
}

/// An in-memory implementation of [`Database`]. Clones share their contents.
#[derive(Clone, Default)]
pub(crate) struct MemDB {
    tables: Arc<Mutex<Tables>>,
    state_gate: Arc<Mutex<()>>,
    state_writes: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB::default()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.tables.lock().unwrap().pending.len()
    }

    /// Holding the returned lock stalls every `write_state` call until it is released.
    pub(crate) fn state_gate(&self) -> Arc<Mutex<()>> {
        self.state_gate.clone()
    }

    /// Number of `write_state` calls so far, including calls still in progress.
    pub(crate) fn state_writes(&self) -> usize {
        self.state_writes.load(Ordering::SeqCst)
    }
}

impl Database for MemDB {
    fn read_state(
        &mut self,
        _: &CallContext,
        config_digest: ConfigDigest,
    ) -> Result<Option<PersistentState>, PluggableError> {
        Ok(self.tables.lock().unwrap().states.get(&config_digest).cloned())
    }

    fn write_state(
        &mut self,
        _: &CallContext,
        config_digest: ConfigDigest,
        state: PersistentState,
    ) -> Result<(), PluggableError> {
        self.state_writes.fetch_add(1, Ordering::SeqCst);
        let _gate = self.state_gate.lock().unwrap();
        self.tables.lock().unwrap().states.insert(config_digest, state);
        Ok(())
    }

    fn read_config(&mut self, _: &CallContext) -> Result<Option<ContractConfig>, PluggableError> {
        Ok(self.tables.lock().unwrap().config.clone())
    }

    fn write_config(
        &mut self,
        _: &CallContext,
        config: ContractConfig,
    ) -> Result<(), PluggableError> {
        self.tables.lock().unwrap().config = Some(config);
        Ok(())
    }

    fn store_pending_transmission(
        &mut self,
        _: &CallContext,
        key: PendingTransmissionKey,
        transmission: PendingTransmission,
    ) -> Result<(), PluggableError> {
        self.tables.lock().unwrap().pending.insert(key, transmission);
        Ok(())
    }

    fn pending_transmissions_with_config_digest(
        &mut self,
        _: &CallContext,
        config_digest: ConfigDigest,
    ) -> Result<BTreeMap<PendingTransmissionKey, PendingTransmission>, PluggableError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .pending
            .iter()
            .filter(|(key, _)| key.config_digest == config_digest)
            .map(|(key, transmission)| (*key, transmission.clone()))
            .collect())
    }

    fn delete_pending_transmission(
        &mut self,
        _: &CallContext,
        key: PendingTransmissionKey,
    ) -> Result<(), PluggableError> {
        self.tables.lock().unwrap().pending.remove(&key);
        Ok(())
    }

    fn delete_pending_transmissions_older_than(
        &mut self,
        _: &CallContext,
        time: SystemTime,
    ) -> Result<(), PluggableError> {
        self.tables
            .lock()
            .unwrap()
            .pending
            .retain(|_, transmission| transmission.time >= time);
        Ok(())
    }
}
