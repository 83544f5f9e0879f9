pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod mocks;

pub(crate) mod network;

pub(crate) mod node;
