#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mcpool_client::{PoolConfig, PoolManager, ShardConfig};
use mcpool_server::ServerHandle;

/// Starts an in-memory server on an ephemeral port.
pub fn start_server() -> ServerHandle {
    ServerHandle::spawn("127.0.0.1:0").expect("spawn server")
}

/// Builds a manager over `(name, port)` pairs on localhost.
pub fn manager(shards: &[(&str, u16)], parallelism: usize, acquire_timeout: Duration) -> PoolManager {
    let shards = shards
        .iter()
        .map(|(name, port)| ShardConfig::tcp(*name, "127.0.0.1", *port))
        .collect();
    let mut config = PoolConfig::new(parallelism, shards);
    config.acquire_timeout = acquire_timeout;
    config.read_timeout = Some(Duration::from_secs(5));
    PoolManager::initialize(config).expect("initialize")
}

/// Returns a localhost port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

/// Scripted peer: accepts `connections` connections one after another and
/// hands each to `handler` with its index.
pub fn spawn_scripted(
    connections: usize,
    handler: fn(usize, &mut BufReader<TcpStream>, &mut TcpStream),
) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let handle = thread::spawn(move || {
        for idx in 0..connections {
            let (mut stream, _) = listener.accept().expect("accept");
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            handler(idx, &mut reader, &mut stream);
        }
    });

    (port, handle)
}

/// Reads one CRLF line, without the terminator.
pub fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    line.trim_end_matches("\r\n").to_string()
}

pub fn write_all(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

/// Polls `condition` for up to two seconds.
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}
