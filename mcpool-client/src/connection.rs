//! # Protocol Connection
//!
//! Purpose: Own one live stream to a shard and run `get`, `set` and
//! `flush_all` over it.
//!
//! ## Design Principles
//! 1. **One Command In Flight**: Every method takes `&mut self`, so a second
//!    command cannot start before the previous reply was read.
//! 2. **Flush On Read**: Writes stay in the buffer until a reply is awaited.
//! 3. **No Handshake**: The stream is usable as soon as `connect` returns.
//! 4. **Explicit Teardown**: `disconnect` consumes the connection.

use std::io::{BufReader, BufWriter, Write};

use tracing::debug;

use mcpool_common::{McResult, Network};

use crate::protocol::{self, Lookup, WRITE_BUFFER_SIZE};
use crate::transport::{ConnectOptions, Transport};

/// A single non-pipelined connection to one shard.
pub struct Connection {
    reader: BufReader<Transport>,
    writer: BufWriter<Transport>,
    // Reused across replies to keep reads allocation-free.
    line_buf: Vec<u8>,
    address: String,
}

impl Connection {
    /// Opens a connection with default options.
    pub fn connect(network: Network, address: &str) -> McResult<Self> {
        Self::connect_with(network, address, &ConnectOptions::default())
    }

    /// Opens a connection applying the given socket options.
    pub fn connect_with(network: Network, address: &str, options: &ConnectOptions) -> McResult<Self> {
        let transport = Transport::connect(network, address, options)?;
        let write_half = transport.try_clone()?;
        debug!(%network, address, "connected");

        Ok(Connection {
            reader: BufReader::new(transport),
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, write_half),
            line_buf: Vec::with_capacity(128),
            address: address.to_string(),
        })
    }

    /// Address this connection was opened against.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Closes the stream. Buffered output that cannot be delivered is dropped.
    pub fn disconnect(mut self) {
        let _ = self.writer.flush();
        self.reader.get_ref().shutdown();
        debug!(address = %self.address, "disconnected");
    }

    /// Sends `flush_all`; fails with `FlushFailed` unless the reply starts with `OK`.
    pub fn flush_all(&mut self) -> McResult<()> {
        protocol::write_flush_all(&mut self.writer)?;
        self.writer.flush()?;
        protocol::read_flush_reply(&mut self.reader, &mut self.line_buf)
    }

    /// Fetches a key, collapsing misses and server errors to an empty value.
    pub fn get(&mut self, key: &str) -> McResult<Vec<u8>> {
        self.lookup(key).map(Lookup::into_value)
    }

    /// Fetches a key and reports hit, miss and server error separately.
    pub fn lookup(&mut self, key: &str) -> McResult<Lookup> {
        let chunk = self.writer.capacity();
        protocol::write_get(&mut self.writer, key, chunk)?;
        self.writer.flush()?;
        protocol::read_get_reply(&mut self.reader, &mut self.line_buf)
    }

    /// Stores a value with zero flags and no expiry.
    ///
    /// Returns `Ok(false)` when the server answered without storing (e.g.
    /// `NOT_STORED`) and `SetFailed` when it answered with an error line.
    pub fn set(&mut self, key: &str, value: &[u8]) -> McResult<bool> {
        let chunk = self.writer.capacity();
        protocol::write_set(&mut self.writer, key, value, chunk)?;
        self.writer.flush()?;
        protocol::read_set_reply(&mut self.reader, &mut self.line_buf)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .finish()
    }
}
