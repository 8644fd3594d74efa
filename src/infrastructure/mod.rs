pub mod auth;
pub mod config;
pub mod error;
pub mod local_cache;
pub mod logging;
#[cfg(test)]
pub mod memory_store;
pub mod remote_store;
pub mod storage;
pub mod wire;
