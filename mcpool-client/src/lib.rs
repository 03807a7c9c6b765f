//! # mcpool Client
//!
//! Purpose: Talk the line-oriented get/set/flush_all cache protocol and
//! spread that traffic over a fixed number of persistent connections per
//! shard.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections instead of dialing per call.
//! 2. **Bounded Waiting**: Acquisition never blocks past the acquire timeout.
//! 3. **Protocol Clarity**: Framing and reply parsing live in one module.
//! 4. **Caller Decides**: Ambiguous `get` outcomes are available untangled
//!    through `lookup`.

mod connection;
mod manager;
mod pool;
pub mod protocol;
mod transport;

pub use connection::Connection;
pub use manager::PoolManager;
pub use pool::PooledConnection;
pub use protocol::Lookup;
pub use transport::{ConnectOptions, Transport};

pub use mcpool_common::{McError, McResult, Network, PoolConfig, ShardConfig};
