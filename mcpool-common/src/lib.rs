// mcpool-common - Shared error and configuration types for the mcpool client
//
// Both the protocol connection and the pool manager report through `McError`.

pub mod config;
pub mod error;

// Re-export for convenience
pub use config::*;
pub use error::*;
