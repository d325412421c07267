//! Response framing for the client side.
//!
//! This module reassembles one HTTP response from whatever byte slices the
//! socket hands out, without performing any I/O itself.

use super::protocol::{has_blank_line, parse_chunk, parse_length, scan_head};
use super::types::{BodyFraming, ChunkResult, RawMessage};
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::{Error, Result};

/// Response reader state
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseState {
    /// Collecting the status line and header fields
    Header,
    /// Collecting the body
    Body {
        /// How the end of the body is recognised
        framing: BodyFraming,
    },
    /// A complete response is waiting in `poll_message()`
    Done,
    /// The input was malformed; no further input is accepted
    Error {
        /// Error message
        message: String,
    },
}

/// Sans-IO reader for one HTTP response.
///
/// The body is delimited by `Content-length`, by chunked transfer encoding,
/// or, if neither is given, by the server closing the connection. A
/// response larger than the size limit is rejected.
///
/// - `handle_input()`: feed bytes read from the socket
/// - `handle_eof()`: report that the peer closed the connection
/// - `poll_message()`: take the finished response
///
/// # Example
///
/// ```
/// use xmlrpc::sansio::ResponseReader;
///
/// let mut reader = ResponseReader::new();
/// reader.handle_input(b"HTTP/1.1 200 OK\r\nContent-length: 2\r\n\r\n")?;
/// assert!(reader.poll_message().is_none());
/// reader.handle_input(b"ok")?;
/// let response = reader.poll_message().unwrap();
/// assert_eq!(response.body, b"ok");
/// # Ok::<(), xmlrpc::Error>(())
/// ```
#[derive(Debug)]
pub struct ResponseReader {
    state: ResponseState,
    head: Vec<u8>,
    /// Header bytes already searched for the blank line.
    scanned: usize,
    /// Undecoded chunked input, or the plain body for the other framings.
    pending: Vec<u8>,
    body: Vec<u8>,
    surplus: usize,
    max_size: usize,
    read_to_eof: bool,
    message: Option<RawMessage>,
}

impl ResponseReader {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// A reader refusing responses over `max_size` bytes, header included.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: ResponseState::Header,
            head: Vec::new(),
            scanned: 0,
            pending: Vec::new(),
            body: Vec::new(),
            surplus: 0,
            max_size,
            read_to_eof: false,
            message: None,
        }
    }

    /// Process incoming data from the network.
    ///
    /// Returns an error for malformed framing. Input after a complete
    /// response is counted in `surplus()` and otherwise ignored.
    pub fn handle_input(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            ResponseState::Header => {
                self.head.extend_from_slice(data);
                let found = has_blank_line(&self.head, self.scanned);
                self.scanned = self.head.len().saturating_sub(2);
                let info = match found.then(|| scan_head(&self.head)).flatten() {
                    Some(info) => info,
                    None => return self.check_size(self.head.len()),
                };

                let framing = if info.chunked {
                    BodyFraming::Chunked
                } else {
                    match info.content_length {
                        Some(raw) => match parse_length(&raw) {
                            Some(n) if n >= 0 => {
                                self.check_size(info.body_start.saturating_add(n as usize))?;
                                BodyFraming::Length(n as usize)
                            }
                            Some(_) => BodyFraming::UntilEof,
                            None => return self.fail("invalid Content-length"),
                        },
                        None => {
                            log::warn!("No Content-length parameter found, reading to EOF");
                            BodyFraming::UntilEof
                        }
                    }
                };

                let rest = self.head.split_off(info.body_start);
                self.state = ResponseState::Body { framing };
                self.body_input(&rest)
            }
            ResponseState::Body { .. } => self.body_input(data),
            ResponseState::Done => {
                self.surplus += data.len();
                Ok(())
            }
            ResponseState::Error { ref message } => Err(Error::protocol(message.clone())),
        }
    }

    /// The peer closed the connection.
    ///
    /// This completes a response read to EOF; for every other state it is
    /// an error.
    pub fn handle_eof(&mut self) -> Result<()> {
        match self.state {
            ResponseState::Body {
                framing: BodyFraming::UntilEof,
            } => {
                let body = std::mem::take(&mut self.pending);
                self.read_to_eof = true;
                self.finish(body);
                Ok(())
            }
            ResponseState::Header => self.fail("got EOS while reading"),
            ResponseState::Body { .. } => self.fail("unexpected EOF while reading"),
            ResponseState::Done => Ok(()),
            ResponseState::Error { ref message } => Err(Error::protocol(message.clone())),
        }
    }

    fn body_input(&mut self, data: &[u8]) -> Result<()> {
        let framing = match self.state {
            ResponseState::Body { framing } => framing,
            _ => return Ok(()),
        };
        self.pending.extend_from_slice(data);
        // A `Content-length` body was checked against the limit up front.
        if !matches!(framing, BodyFraming::Length(_)) {
            self.check_size(self.head.len() + self.pending.len() + self.body.len())?;
        }

        match framing {
            BodyFraming::Length(len) => {
                if self.pending.len() >= len {
                    let mut body = std::mem::take(&mut self.pending);
                    self.surplus = body.len() - len;
                    body.truncate(len);
                    self.finish(body);
                }
                Ok(())
            }
            BodyFraming::UntilEof => Ok(()),
            BodyFraming::Chunked => loop {
                match parse_chunk(&self.pending) {
                    ChunkResult::Data {
                        start,
                        len,
                        consumed,
                    } => {
                        self.body
                            .extend_from_slice(&self.pending[start..start + len]);
                        self.pending.drain(..consumed);
                    }
                    ChunkResult::Last => {
                        let body = std::mem::take(&mut self.body);
                        self.pending.clear();
                        self.finish(body);
                        return Ok(());
                    }
                    ChunkResult::Incomplete => return Ok(()),
                    ChunkResult::Invalid { error } => return self.fail(&error),
                }
            },
        }
    }

    fn check_size(&mut self, size: usize) -> Result<()> {
        if size > self.max_size {
            return self.fail(&format!("message larger than {} bytes", self.max_size));
        }
        Ok(())
    }

    fn finish(&mut self, body: Vec<u8>) {
        self.message = Some(RawMessage {
            head: std::mem::take(&mut self.head),
            body,
        });
        self.state = ResponseState::Done;
    }

    fn fail(&mut self, message: &str) -> Result<()> {
        self.state = ResponseState::Error {
            message: message.into(),
        };
        Err(Error::protocol(message))
    }

    /// Take the complete response, once there is one.
    pub fn poll_message(&mut self) -> Option<RawMessage> {
        self.message.take()
    }

    /// Bytes received past the end of a `Content-length` body.
    pub fn surplus(&self) -> usize {
        self.surplus
    }

    /// The response ended with the connection; it cannot carry another.
    pub fn read_to_eof(&self) -> bool {
        self.read_to_eof
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    /// True while still collecting the header.
    pub fn in_header(&self) -> bool {
        matches!(self.state, ResponseState::Header)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ResponseState::Done)
    }
}

impl Default for ResponseReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_bytewise(input: &[u8], eof: bool) -> Result<RawMessage> {
        let mut reader = ResponseReader::new();
        for b in input {
            reader.handle_input(std::slice::from_ref(b))?;
        }
        if eof {
            reader.handle_eof()?;
        }
        reader
            .poll_message()
            .ok_or_else(|| Error::protocol("incomplete"))
    }

    #[test]
    fn test_content_length() {
        let mut reader = ResponseReader::new();
        reader
            .handle_input(b"HTTP/1.1 200 OK\r\nContent-length: 5\r\n\r\nhel")
            .unwrap();
        assert_eq!(
            reader.state(),
            &ResponseState::Body {
                framing: BodyFraming::Length(5)
            }
        );
        assert!(reader.poll_message().is_none());
        reader.handle_input(b"loXYZ").unwrap();
        let message = reader.poll_message().unwrap();
        assert_eq!(message.body, b"hello");
        assert_eq!(reader.surplus(), 3);
        assert!(reader.is_done());
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let message =
            feed_bytewise(b"HTTP/1.1 200 OK\r\nCONTENT-LENGTH: 4\r\n\r\nbody", false).unwrap();
        assert_eq!(message.head, b"HTTP/1.1 200 OK\r\nCONTENT-LENGTH: 4\r\n\r\n");
        assert_eq!(message.body, b"body");
    }

    #[test]
    fn test_chunked_matches_content_length() {
        let plain = feed_bytewise(
            b"HTTP/1.1 200 OK\r\nContent-length: 11\r\n\r\nhello world",
            false,
        )
        .unwrap();
        let chunked = feed_bytewise(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            false,
        )
        .unwrap();
        assert_eq!(plain.body, chunked.body);
    }

    #[test]
    fn test_read_to_eof() {
        let mut reader = ResponseReader::new();
        reader
            .handle_input(b"HTTP/1.0 200 OK\r\n\r\nall of it")
            .unwrap();
        assert!(reader.poll_message().is_none());
        reader.handle_eof().unwrap();
        assert!(reader.read_to_eof());
        assert_eq!(reader.poll_message().unwrap().body, b"all of it");

        // A complete `Content-length` body leaves the connection usable.
        let mut reader = ResponseReader::new();
        reader
            .handle_input(b"HTTP/1.1 200 OK\r\nContent-length: 2\r\n\r\nok")
            .unwrap();
        reader.handle_eof().unwrap();
        assert!(!reader.read_to_eof());
    }

    #[test]
    fn test_early_eof() {
        let mut reader = ResponseReader::new();
        reader.handle_input(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(
            reader.handle_eof(),
            Err(Error::protocol("got EOS while reading"))
        );

        let mut reader = ResponseReader::new();
        reader
            .handle_input(b"HTTP/1.1 200 OK\r\nContent-length: 10\r\n\r\nshort")
            .unwrap();
        assert!(reader.handle_eof().is_err());
    }

    #[test]
    fn test_bad_chunk() {
        let mut reader = ResponseReader::new();
        let err = reader
            .handle_input(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nxyz\r\n")
            .unwrap_err();
        assert_eq!(err, Error::protocol("invalid size in chunk"));
        assert!(matches!(reader.state(), ResponseState::Error { .. }));
        assert!(reader.handle_input(b"more").is_err());
    }

    #[test]
    fn test_size_limit() {
        let mut reader = ResponseReader::with_max_size(64);
        assert_eq!(
            reader.handle_input(b"HTTP/1.1 200 OK\r\nContent-length: 100\r\n\r\n"),
            Err(Error::protocol("message larger than 64 bytes"))
        );

        // Without a blank line the header alone runs into the limit.
        let mut reader = ResponseReader::with_max_size(64);
        reader.handle_input(b"HTTP/1.1 200 OK\r\n").unwrap();
        let mut result = Ok(());
        for _ in 0..10 {
            result = reader.handle_input(b"X-Filler: abc\r\n");
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
        assert!(matches!(reader.state(), ResponseState::Error { .. }));

        let mut reader = ResponseReader::with_max_size(64);
        reader.handle_input(b"HTTP/1.0 200 OK\r\n\r\n").unwrap();
        assert!(reader.handle_input(&[b'x'; 50]).unwrap_err().to_string().contains("64"));

        // Bytes past a `Content-length` body do not count.
        let mut reader = ResponseReader::with_max_size(64);
        reader
            .handle_input(b"HTTP/1.1 200 OK\r\nContent-length: 2\r\n\r\nok")
            .unwrap();
        reader.handle_input(&[b'x'; 100]).unwrap();
        assert_eq!(reader.poll_message().unwrap().body, b"ok");
    }

    #[test]
    fn test_long_header_bytewise() {
        let mut input = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..2000 {
            input.extend_from_slice(format!("X-Field-{}: value\r\n", i).as_bytes());
        }
        input.extend_from_slice(b"Content-length: 3\r\n\r\nend");
        let message = feed_bytewise(&input, false).unwrap();
        assert_eq!(message.body, b"end");
        assert_eq!(message.head.len(), input.len() - 3);
    }

    #[test]
    fn test_invalid_content_length() {
        let mut reader = ResponseReader::new();
        assert!(reader
            .handle_input(b"HTTP/1.1 200 OK\r\nContent-length: many\r\n\r\n")
            .is_err());
    }
}
