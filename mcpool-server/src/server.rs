//! # TCP Server
//!
//! Accept text-protocol connections, parse commands, and answer them from
//! the in-memory store.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::protocol::{parse_command, Command, ParseError};
use crate::stats::{ServerStats, StatsSnapshot};
use crate::store::{Item, MemoryStore};

/// State shared by every connection of one server.
#[derive(Debug, Default)]
pub struct ServerState {
    pub store: MemoryStore,
    pub stats: ServerStats,
}

/// Accepts connections until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            state.stats.connection_opened();
            debug!(%peer, "accepted connection");
            if let Err(err) = handle_connection(stream, state.clone()).await {
                warn!(%peer, error = %err, "connection failed");
            }
            state.stats.connection_closed();
        });
    }
}

/// Handles a single client connection.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let mut stream = stream;
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            match parse_command(&mut buffer) {
                Ok(Some(command)) => {
                    let response = dispatch_command(command, &state);
                    if !response.is_empty() {
                        stream.write_all(&response).await?;
                    }
                }
                Ok(None) => break,
                Err(ParseError::BadDataChunk) => {
                    state.stats.record_error();
                    stream.write_all(b"CLIENT_ERROR bad data chunk\r\n").await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn dispatch_command(command: Command, state: &ServerState) -> Vec<u8> {
    match command {
        Command::Get { keys } => handle_get(&keys, state),
        Command::Set {
            key,
            flags,
            data,
            noreply,
        } => {
            state.store.set(key, Item { flags, data });
            state.stats.record_set();
            reply(noreply, b"STORED\r\n")
        }
        Command::FlushAll { noreply } => {
            state.store.flush();
            state.stats.record_flush();
            reply(noreply, b"OK\r\n")
        }
        Command::Malformed => {
            state.stats.record_error();
            b"CLIENT_ERROR bad command line format\r\n".to_vec()
        }
        Command::Unknown => {
            state.stats.record_error();
            b"ERROR\r\n".to_vec()
        }
    }
}

fn handle_get(keys: &[Vec<u8>], state: &ServerState) -> Vec<u8> {
    let mut out = Vec::new();
    for key in keys {
        let item = state.store.get(key);
        state.stats.record_get(item.is_some());
        if let Some(item) = item {
            out.extend_from_slice(b"VALUE ");
            out.extend_from_slice(key);
            out.extend_from_slice(format!(" {} {}\r\n", item.flags, item.data.len()).as_bytes());
            out.extend_from_slice(&item.data);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b"END\r\n");
    out
}

fn reply(noreply: bool, line: &[u8]) -> Vec<u8> {
    if noreply {
        Vec::new()
    } else {
        line.to_vec()
    }
}

/// Server running on its own thread with a private tokio runtime.
///
/// Dropping the handle stops the server and closes every client connection.
pub struct ServerHandle {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Binds `addr` (use port 0 for an ephemeral port) and starts serving.
    pub fn spawn(addr: &str) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(ServerState::default());
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("mcpool-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            warn!(error = %err, "could not register listener");
                            return;
                        }
                    };
                    tokio::select! {
                        result = serve(listener, task_state) => {
                            if let Err(err) = result {
                                warn!(error = %err, "server stopped");
                            }
                        }
                        _ = shutdown_rx => {}
                    }
                });
                // Dropping the runtime cancels every connection task.
            })?;
        debug!(addr = %local_addr, "server started");

        Ok(ServerHandle {
            addr: local_addr,
            state,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.state.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Stops the server and waits for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
