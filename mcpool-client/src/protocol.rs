//! # Text Protocol Framing
//!
//! Purpose: Frame `get`/`set`/`flush_all` commands onto a byte stream and
//! parse the CRLF-terminated reply lines that come back.
//!
//! ## Design Principles
//! 1. **Line Reassembly**: A reply line may span several buffer fills; the
//!    reader keeps appending until it sees the terminator.
//! 2. **Bounded Writes**: Payloads are copied in chunks no larger than the
//!    write buffer, so a 1 MB value never becomes one oversized write.
//! 3. **Buffer Reuse**: Callers own the line buffer and pass it in.
//! 4. **Lenient Replies**: Only the reply prefix is inspected; the byte count
//!    on a `VALUE` line is not cross-checked against the payload.
//!
//! ## Wire Summary
//!
//! ```text
//! flush_all\r\n                  -> OK\r\n
//! get <key>\r\n                  -> [VALUE <key> <flags> <len>\r\n<payload>\r\n] END\r\n
//! set <key> 0 0 <len>\r\n<v>\r\n -> STORED\r\n | NOT_STORED\r\n | ...ERROR...\r\n
//! ```

use std::io::{self, BufRead, Write};

use mcpool_common::{McError, McResult};

/// Capacity of the outbound buffer; also the largest single chunk written.
pub const WRITE_BUFFER_SIZE: usize = 4096;

const CRLF: &[u8] = b"\r\n";

/// Outcome of a `get` with the three reply shapes kept apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// A `VALUE` line was followed by this payload.
    Hit(Vec<u8>),
    /// The reply ended with `END` and carried no value.
    Miss,
    /// The server answered with an error line.
    ServerError(String),
}

impl Lookup {
    /// Collapses the outcome to the plain protocol value.
    ///
    /// `Miss` and `ServerError` both become an empty payload, which cannot be
    /// told apart from a stored empty value.
    pub fn into_value(self) -> Vec<u8> {
        match self {
            Lookup::Hit(value) => value,
            Lookup::Miss | Lookup::ServerError(_) => Vec::new(),
        }
    }

    /// Returns true for `Hit`.
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Writes `data` in pieces of at most `chunk` bytes.
pub fn write_chunked<W: Write>(out: &mut W, data: &[u8], chunk: usize) -> io::Result<()> {
    for piece in data.chunks(chunk.max(1)) {
        out.write_all(piece)?;
    }
    Ok(())
}

/// Frames `flush_all`.
pub fn write_flush_all<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(b"flush_all")?;
    out.write_all(CRLF)
}

/// Frames `get <key>`.
pub fn write_get<W: Write>(out: &mut W, key: &str, chunk: usize) -> io::Result<()> {
    out.write_all(b"get ")?;
    write_chunked(out, key.as_bytes(), chunk)?;
    out.write_all(CRLF)
}

/// Frames `set <key> 0 0 <len>` followed by the value line.
pub fn write_set<W: Write>(out: &mut W, key: &str, value: &[u8], chunk: usize) -> io::Result<()> {
    out.write_all(b"set ")?;
    write_chunked(out, key.as_bytes(), chunk)?;
    write!(out, " 0 0 {}", value.len())?;
    out.write_all(CRLF)?;
    write_chunked(out, value, chunk)?;
    out.write_all(CRLF)
}

/// Reads one logical line into `buf`, without its terminator.
///
/// Accepts both `\r\n` and a bare `\n`. Fails with `UnexpectedEof` when the
/// stream ends before any byte of the line arrived.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<()> {
    buf.clear();
    loop {
        let (complete, used) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                if buf.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed while reading a line",
                    ));
                }
                // Final line without terminator.
                (true, 0)
            } else {
                match available.iter().position(|&b| b == b'\n') {
                    Some(idx) => {
                        buf.extend_from_slice(&available[..idx]);
                        (true, idx + 1)
                    }
                    None => {
                        buf.extend_from_slice(available);
                        (false, available.len())
                    }
                }
            }
        };
        reader.consume(used);
        if complete {
            break;
        }
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(())
}

/// Parses the single reply line of `flush_all`.
pub fn read_flush_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> McResult<()> {
    read_line(reader, line_buf)?;
    if line_buf.starts_with(b"OK") {
        Ok(())
    } else {
        Err(McError::FlushFailed)
    }
}

/// Parses the reply of `get`, reading until `END` or an error line.
///
/// Lines the client does not recognize are skipped.
pub fn read_get_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> McResult<Lookup> {
    let mut found = None;
    loop {
        read_line(reader, line_buf)?;
        if line_buf.starts_with(b"VALUE") {
            read_line(reader, line_buf)?;
            found = Some(line_buf.clone());
        } else if line_buf.starts_with(b"END") {
            return Ok(found.map_or(Lookup::Miss, Lookup::Hit));
        } else if is_error_line(line_buf) {
            return Ok(Lookup::ServerError(
                String::from_utf8_lossy(line_buf).into_owned(),
            ));
        }
    }
}

/// Parses the reply of `set`.
///
/// Returns `Ok(true)` for `STORED`, `Ok(false)` for any other non-error line
/// (e.g. `NOT_STORED`), and `SetFailed` when the line mentions `ERROR`.
pub fn read_set_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> McResult<bool> {
    read_line(reader, line_buf)?;
    if contains(line_buf, b"ERROR") {
        return Err(McError::set_failed(String::from_utf8_lossy(line_buf)));
    }
    Ok(line_buf.starts_with(b"STORED"))
}

fn is_error_line(line: &[u8]) -> bool {
    line.starts_with(b"ERROR") || line.starts_with(b"CLIENT_ERROR") || line.starts_with(b"SERVER_ERROR")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn frames_commands() {
        let mut out = Vec::new();
        write_flush_all(&mut out).unwrap();
        write_get(&mut out, "alpha", WRITE_BUFFER_SIZE).unwrap();
        write_set(&mut out, "alpha", b"value", WRITE_BUFFER_SIZE).unwrap();
        assert_eq!(
            out,
            b"flush_all\r\nget alpha\r\nset alpha 0 0 5\r\nvalue\r\n".to_vec()
        );
    }

    #[test]
    fn chunked_writes_respect_chunk_size() {
        struct Recorder(Vec<usize>, Vec<u8>);
        impl Write for Recorder {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.push(buf.len());
                self.1.extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let data = vec![b'1'; 10_000];
        let mut out = Recorder(Vec::new(), Vec::new());
        write_chunked(&mut out, &data, 4096).unwrap();
        assert_eq!(out.0, vec![4096, 4096, 1808]);
        assert_eq!(out.1, data);
    }

    #[test]
    fn reassembles_line_across_buffer_fills() {
        // An 8-byte read buffer forces the payload to arrive in many pieces.
        let payload = vec![b'x'; 100];
        let mut wire = payload.clone();
        wire.extend_from_slice(b"\r\nEND\r\n");
        let mut reader = BufReader::with_capacity(8, Cursor::new(wire));
        let mut line = Vec::new();

        read_line(&mut reader, &mut line).unwrap();
        assert_eq!(line, payload);
        read_line(&mut reader, &mut line).unwrap();
        assert_eq!(line, b"END");
    }

    #[test]
    fn read_line_reports_eof() {
        let mut reader = Cursor::new(Vec::new());
        let mut line = Vec::new();
        let err = read_line(&mut reader, &mut line).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn parses_get_hit() {
        let mut reader = Cursor::new(b"VALUE k 0 5\r\nhello\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        let lookup = read_get_reply(&mut reader, &mut line).unwrap();
        assert_eq!(lookup, Lookup::Hit(b"hello".to_vec()));
    }

    #[test]
    fn get_trusts_payload_over_declared_length() {
        let mut reader = Cursor::new(b"VALUE k 0 99\r\nshort\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        let lookup = read_get_reply(&mut reader, &mut line).unwrap();
        assert_eq!(lookup, Lookup::Hit(b"short".to_vec()));
    }

    #[test]
    fn miss_and_empty_value_collapse_to_same_plain_value() {
        let mut line = Vec::new();
        let miss = read_get_reply(&mut Cursor::new(b"END\r\n".to_vec()), &mut line).unwrap();
        let empty =
            read_get_reply(&mut Cursor::new(b"VALUE k 0 0\r\n\r\nEND\r\n".to_vec()), &mut line)
                .unwrap();

        assert_eq!(miss, Lookup::Miss);
        assert_eq!(empty, Lookup::Hit(Vec::new()));
        // Ambiguous once collapsed: absent key and stored empty value look alike.
        assert_eq!(miss.into_value(), empty.into_value());
    }

    #[test]
    fn get_error_line_is_not_an_error() {
        let mut reader = Cursor::new(b"ERROR\r\n".to_vec());
        let mut line = Vec::new();
        let lookup = read_get_reply(&mut reader, &mut line).unwrap();
        assert_eq!(lookup, Lookup::ServerError("ERROR".to_string()));
        assert!(lookup.into_value().is_empty());
    }

    #[test]
    fn get_stops_at_client_and_server_error_lines() {
        // Nothing after the error line belongs to this reply.
        let mut reader = Cursor::new(b"SERVER_ERROR out of memory\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        let lookup = read_get_reply(&mut reader, &mut line).unwrap();
        assert_eq!(lookup, Lookup::ServerError("SERVER_ERROR out of memory".to_string()));
        assert_eq!(reader.position(), 28);

        let mut reader = Cursor::new(b"CLIENT_ERROR bad command line format\r\n".to_vec());
        let lookup = read_get_reply(&mut reader, &mut line).unwrap();
        assert_eq!(
            lookup,
            Lookup::ServerError("CLIENT_ERROR bad command line format".to_string())
        );
    }

    #[test]
    fn get_skips_unknown_lines() {
        let mut reader = Cursor::new(b"NOISE 1\r\nVALUE k 0 1\r\nv\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        let lookup = read_get_reply(&mut reader, &mut line).unwrap();
        assert_eq!(lookup, Lookup::Hit(b"v".to_vec()));
    }

    #[test]
    fn get_without_end_is_io_error() {
        let mut reader = Cursor::new(b"VALUE k 0 1\r\nv\r\n".to_vec());
        let mut line = Vec::new();
        let err = read_get_reply(&mut reader, &mut line).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn parses_set_replies() {
        let mut line = Vec::new();
        assert!(read_set_reply(&mut Cursor::new(b"STORED\r\n".to_vec()), &mut line).unwrap());
        assert!(!read_set_reply(&mut Cursor::new(b"NOT_STORED\r\n".to_vec()), &mut line).unwrap());

        let err = read_set_reply(
            &mut Cursor::new(b"CLIENT_ERROR bad data chunk\r\n".to_vec()),
            &mut line,
        )
        .unwrap_err();
        assert!(matches!(err, McError::SetFailed { .. }));
    }

    #[test]
    fn parses_flush_replies() {
        let mut line = Vec::new();
        assert!(read_flush_reply(&mut Cursor::new(b"OK\r\n".to_vec()), &mut line).is_ok());
        let err = read_flush_reply(&mut Cursor::new(b"ERROR\r\n".to_vec()), &mut line).unwrap_err();
        assert!(matches!(err, McError::FlushFailed));
    }
}
