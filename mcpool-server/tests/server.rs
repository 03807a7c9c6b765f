use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use mcpool_server::ServerHandle;

fn connect(server: &ServerHandle) -> (BufReader<TcpStream>, TcpStream) {
    let stream = TcpStream::connect(server.addr()).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).expect("timeout");
    let reader = BufReader::new(stream.try_clone().expect("clone"));
    (reader, stream)
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    line
}

#[test]
fn answers_set_get_flush() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("spawn");
    let (mut reader, mut stream) = connect(&server);

    stream.write_all(b"set k 5 0 5\r\nhello\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "STORED\r\n");

    stream.write_all(b"get k missing\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "VALUE k 5 5\r\n");
    assert_eq!(read_line(&mut reader), "hello\r\n");
    assert_eq!(read_line(&mut reader), "END\r\n");

    stream.write_all(b"flush_all\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "OK\r\n");

    stream.write_all(b"get k\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "END\r\n");

    let stats = server.stats();
    assert_eq!(stats.sets, 1);
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.gets, 3);
    assert_eq!(stats.get_hits, 1);
}

#[test]
fn answers_unknown_command_with_error() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("spawn");
    let (mut reader, mut stream) = connect(&server);

    stream.write_all(b"incr k 1\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "ERROR\r\n");
}

#[test]
fn accepts_payload_split_across_writes() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("spawn");
    let (mut reader, mut stream) = connect(&server);
    let value = vec![b'7'; 100_000];

    stream.write_all(b"set big 0 0 100000\r\n").expect("write");
    for piece in value.chunks(4096) {
        stream.write_all(piece).expect("write");
    }
    stream.write_all(b"\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "STORED\r\n");
    assert_eq!(server.store().get(b"big").expect("stored").data, value);
}

#[test]
fn closes_connection_on_bad_data_chunk() {
    let server = ServerHandle::spawn("127.0.0.1:0").expect("spawn");
    let (mut reader, mut stream) = connect(&server);

    stream.write_all(b"set k 0 0 1\r\nabc\r\n").expect("write");
    assert_eq!(read_line(&mut reader), "CLIENT_ERROR bad data chunk\r\n");
    let mut rest = Vec::new();
    // A reset counts as closed too.
    if let Ok(read) = reader.read_to_end(&mut rest) {
        assert_eq!(read, 0);
    }
}
