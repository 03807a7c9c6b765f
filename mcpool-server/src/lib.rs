//! # mcpool Test Server
//!
//! Purpose: A small in-memory server speaking the get/set/flush_all text
//! protocol, used as the backing store for integration tests and the bench
//! driver. It keeps everything in one map and never evicts.

pub mod protocol;
pub mod server;
pub mod stats;
pub mod store;

pub use server::{handle_connection, serve, ServerHandle, ServerState};
pub use stats::StatsSnapshot;
pub use store::{Item, MemoryStore};
