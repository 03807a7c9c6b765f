//! # Transport
//!
//! Purpose: Open the byte stream a connection talks over, for any of the
//! supported network families.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use mcpool_common::{McError, McResult, Network, PoolConfig};

/// Socket options applied when a transport is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on establishing a TCP connection; `None` waits on the OS.
    /// Unix socket connects ignore it.
    pub connect_timeout: Option<Duration>,
    /// Socket read timeout.
    pub read_timeout: Option<Duration>,
    /// Socket write timeout.
    pub write_timeout: Option<Duration>,
}

impl From<&PoolConfig> for ConnectOptions {
    fn from(config: &PoolConfig) -> Self {
        ConnectOptions {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Reliable, ordered byte stream to one shard.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Opens a transport of the given family.
    pub fn connect(network: Network, address: &str, options: &ConnectOptions) -> McResult<Self> {
        match network {
            Network::Unix => connect_unix(address, options),
            _ => connect_tcp(network, address, options),
        }
    }

    /// Returns a second handle to the same stream.
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Transport::Tcp(stream) => stream.try_clone().map(Transport::Tcp),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.try_clone().map(Transport::Unix),
        }
    }

    /// Shuts both directions down; errors from an already closed peer are ignored.
    pub fn shutdown(&self) {
        let _ = match self {
            Transport::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
    }

    fn apply_timeouts(&self, options: &ConnectOptions) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => {
                stream.set_read_timeout(options.read_timeout)?;
                stream.set_write_timeout(options.write_timeout)?;
                // Commands are small and strictly request/response.
                stream.set_nodelay(true)
            }
            #[cfg(unix)]
            Transport::Unix(stream) => {
                stream.set_read_timeout(options.read_timeout)?;
                stream.set_write_timeout(options.write_timeout)
            }
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Transport::Unix(stream) => stream.flush(),
        }
    }
}

fn connect_tcp(network: Network, address: &str, options: &ConnectOptions) -> McResult<Transport> {
    let candidates: Vec<SocketAddr> = address
        .to_socket_addrs()
        .map_err(|source| connect_error(address, source))?
        .filter(|addr| match network {
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
            _ => true,
        })
        .collect();

    let mut last_err = None;
    for addr in candidates {
        let attempt = match options.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                let transport = Transport::Tcp(stream);
                transport
                    .apply_timeouts(options)
                    .map_err(|source| connect_error(address, source))?;
                return Ok(transport);
            }
            Err(err) => last_err = Some(err),
        }
    }

    match last_err {
        Some(source) => Err(connect_error(address, source)),
        None => Err(McError::InvalidAddress {
            address: address.to_string(),
        }),
    }
}

// std has no timed connect for unix sockets; `connect_timeout` is ignored.
#[cfg(unix)]
fn connect_unix(path: &str, options: &ConnectOptions) -> McResult<Transport> {
    let stream = UnixStream::connect(path).map_err(|source| connect_error(path, source))?;
    let transport = Transport::Unix(stream);
    transport
        .apply_timeouts(options)
        .map_err(|source| connect_error(path, source))?;
    Ok(transport)
}

#[cfg(not(unix))]
fn connect_unix(path: &str, _options: &ConnectOptions) -> McResult<Transport> {
    Err(McError::InvalidAddress {
        address: path.to_string(),
    })
}

fn connect_error(address: &str, source: io::Error) -> McError {
    McError::Connect {
        address: address.to_string(),
        source,
    }
}
