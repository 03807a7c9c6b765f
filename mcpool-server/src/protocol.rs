//! # Command Parser
//!
//! Incremental parser for the text protocol: commands are pulled off the
//! front of a `BytesMut` once they are complete, and partial input is left
//! in place for the next read.

use bytes::{Buf, BytesMut};

/// A fully received client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { keys: Vec<Vec<u8>> },
    Set {
        key: Vec<u8>,
        flags: u32,
        data: Vec<u8>,
        noreply: bool,
    },
    FlushAll { noreply: bool },
    /// Known command with unusable arguments.
    Malformed,
    /// Anything else, including an empty line.
    Unknown,
}

/// Input that cannot be resynchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Set payload was not followed by CRLF.
    BadDataChunk,
}

/// Removes one complete command from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn parse_command(buf: &mut BytesMut) -> Result<Option<Command>, ParseError> {
    let line_end = match find_crlf(buf) {
        Some(idx) => idx,
        None => return Ok(None),
    };
    let parts: Vec<Vec<u8>> = buf[..line_end]
        .split(|&b| b == b' ')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_vec())
        .collect();
    let header_len = line_end + 2;

    let command = match parts.first().map(Vec::as_slice) {
        Some(b"get") | Some(b"gets") if parts.len() > 1 => Command::Get {
            keys: parts[1..].to_vec(),
        },
        Some(b"set") => {
            let (key, flags, len, noreply) = match parse_set_header(&parts) {
                Some(header) => header,
                None => {
                    buf.advance(header_len);
                    return Ok(Some(Command::Malformed));
                }
            };
            let total = header_len + len + 2;
            if buf.len() < total {
                return Ok(None);
            }
            if &buf[header_len + len..total] != b"\r\n" {
                return Err(ParseError::BadDataChunk);
            }
            let data = buf[header_len..header_len + len].to_vec();
            buf.advance(total);
            return Ok(Some(Command::Set {
                key,
                flags,
                data,
                noreply,
            }));
        }
        Some(b"flush_all") => Command::FlushAll {
            noreply: parts.last().map(Vec::as_slice) == Some(&b"noreply"[..]),
        },
        Some(b"get") | Some(b"gets") => Command::Malformed,
        _ => Command::Unknown,
    };

    buf.advance(header_len);
    Ok(Some(command))
}

fn parse_set_header(parts: &[Vec<u8>]) -> Option<(Vec<u8>, u32, usize, bool)> {
    if parts.len() != 5 && parts.len() != 6 {
        return None;
    }
    let flags = parse_number(&parts[2])?;
    // Expiry is accepted and ignored.
    parse_number::<i64>(&parts[3])?;
    let len = parse_number(&parts[4])?;
    let noreply = match parts.get(5).map(Vec::as_slice) {
        None => false,
        Some(b"noreply") => true,
        Some(_) => return None,
    };
    Some((parts[1].clone(), flags, len, noreply))
}

fn parse_number<T: std::str::FromStr>(raw: &[u8]) -> Option<T> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}
