//! Request framing for the server side.
//!
//! Requests must carry a `Content-length`; chunked requests are not
//! accepted.

use super::protocol::{has_blank_line, parse_length, scan_head};
use super::types::RawMessage;
use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::{Error, Result};

/// Request reader state
#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    /// Collecting the request line and header fields
    Header,
    /// Collecting exactly `length` body bytes
    Body {
        /// Announced body length
        length: usize,
    },
    /// A complete request is waiting in `poll_message()`
    Done,
    /// The client closed the connection before sending anything
    Closed,
    /// The input was malformed
    Error {
        /// Error message
        message: String,
    },
}

/// Sans-IO reader for one HTTP request.
///
/// # Example
///
/// ```
/// use xmlrpc::sansio::RequestReader;
///
/// let mut reader = RequestReader::new();
/// reader.handle_input(b"POST /RPC2 HTTP/1.1\r\nContent-length: 4\r\n\r\n<?x>")?;
/// let request = reader.poll_message().unwrap();
/// assert_eq!(request.body, b"<?x>");
/// # Ok::<(), xmlrpc::Error>(())
/// ```
#[derive(Debug)]
pub struct RequestReader {
    state: RequestState,
    head: Vec<u8>,
    /// Header bytes already searched for the blank line.
    scanned: usize,
    body: Vec<u8>,
    max_size: usize,
    message: Option<RawMessage>,
}

impl RequestReader {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// A reader refusing requests over `max_size` bytes, header included.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: RequestState::Header,
            head: Vec::new(),
            scanned: 0,
            body: Vec::new(),
            max_size,
            message: None,
        }
    }

    /// Process incoming data from the network.
    pub fn handle_input(&mut self, data: &[u8]) -> Result<()> {
        match self.state {
            RequestState::Header => {
                self.head.extend_from_slice(data);
                let found = has_blank_line(&self.head, self.scanned);
                self.scanned = self.head.len().saturating_sub(2);
                let info = match found.then(|| scan_head(&self.head)).flatten() {
                    Some(info) => info,
                    None => return self.check_size(self.head.len()),
                };
                let length = match info.content_length {
                    None => return self.fail("no Content-length parameter found in header"),
                    Some(raw) => match parse_length(&raw) {
                        Some(n) if n >= 0 => n as usize,
                        _ => return self.fail("invalid Content-length"),
                    },
                };
                self.check_size(info.body_start.saturating_add(length))?;
                let rest = self.head.split_off(info.body_start);
                self.state = RequestState::Body { length };
                self.body_input(&rest)
            }
            RequestState::Body { .. } => self.body_input(data),
            RequestState::Done | RequestState::Closed => {
                self.fail("readRequest read too many bytes")
            }
            RequestState::Error { ref message } => Err(Error::protocol(message.clone())),
        }
    }

    /// The client closed the connection.
    ///
    /// Closing before the first byte of a request is not an error; the
    /// state becomes `Closed` so the caller can drop the connection quietly.
    pub fn handle_eof(&mut self) -> Result<()> {
        match self.state {
            RequestState::Header if self.head.is_empty() => {
                self.state = RequestState::Closed;
                Ok(())
            }
            RequestState::Header => self.fail("got EOS while reading"),
            RequestState::Body { .. } => self.fail("got EOS while reading body"),
            RequestState::Done | RequestState::Closed => Ok(()),
            RequestState::Error { ref message } => Err(Error::protocol(message.clone())),
        }
    }

    fn body_input(&mut self, data: &[u8]) -> Result<()> {
        let length = match self.state {
            RequestState::Body { length } => length,
            _ => return Ok(()),
        };
        self.body.extend_from_slice(data);
        if self.body.len() > length {
            return self.fail("readRequest read too many bytes");
        }
        if self.body.len() == length {
            self.message = Some(RawMessage {
                head: std::mem::take(&mut self.head),
                body: std::mem::take(&mut self.body),
            });
            self.state = RequestState::Done;
        }
        Ok(())
    }

    fn check_size(&mut self, size: usize) -> Result<()> {
        if size > self.max_size {
            return self.fail(&format!("message larger than {} bytes", self.max_size));
        }
        Ok(())
    }

    fn fail(&mut self, message: &str) -> Result<()> {
        self.state = RequestState::Error {
            message: message.into(),
        };
        Err(Error::protocol(message))
    }

    /// Take the complete request, once there is one.
    pub fn poll_message(&mut self) -> Option<RawMessage> {
        self.message.take()
    }

    pub fn state(&self) -> &RequestState {
        &self.state
    }

    pub fn in_header(&self) -> bool {
        matches!(self.state, RequestState::Header)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, RequestState::Done)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, RequestState::Closed)
    }
}

impl Default for RequestReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"POST /RPC2 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";

    #[test]
    fn test_one_byte_at_a_time() {
        let mut reader = RequestReader::new();
        for (i, b) in REQUEST.iter().enumerate() {
            reader.handle_input(std::slice::from_ref(b)).unwrap();
            assert_eq!(reader.poll_message().is_some(), i == REQUEST.len() - 1);
        }
        assert_eq!(reader.state(), &RequestState::Done);
    }

    #[test]
    fn test_whole_request() {
        let mut reader = RequestReader::new();
        reader.handle_input(REQUEST).unwrap();
        let message = reader.poll_message().unwrap();
        assert_eq!(message.body, b"hello");
        assert_eq!(message.to_bytes(), REQUEST);
    }

    #[test]
    fn test_missing_content_length() {
        let mut reader = RequestReader::new();
        let err = reader
            .handle_input(b"POST / HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap_err();
        assert_eq!(
            err,
            Error::protocol("no Content-length parameter found in header")
        );
    }

    #[test]
    fn test_too_many_bytes() {
        let mut reader = RequestReader::new();
        assert_eq!(
            reader.handle_input(b"POST / HTTP/1.1\r\nContent-length: 2\r\n\r\nabc"),
            Err(Error::protocol("readRequest read too many bytes"))
        );
    }

    #[test]
    fn test_size_limit() {
        let mut reader = RequestReader::with_max_size(REQUEST.len());
        reader.handle_input(REQUEST).unwrap();
        assert!(reader.poll_message().is_some());

        let mut reader = RequestReader::with_max_size(REQUEST.len() - 1);
        assert_eq!(
            reader.handle_input(REQUEST),
            Err(Error::protocol(format!(
                "message larger than {} bytes",
                REQUEST.len() - 1
            )))
        );

        // A header that never ends is cut off at the limit.
        let mut reader = RequestReader::with_max_size(1024);
        reader.handle_input(b"POST / HTTP/1.1\r\n").unwrap();
        let filler = [b'a'; 100];
        let failed = (0..20).any(|_| reader.handle_input(&filler).is_err());
        assert!(failed);
        assert!(matches!(reader.state(), RequestState::Error { .. }));
    }

    #[test]
    fn test_eof() {
        let mut reader = RequestReader::new();
        reader.handle_eof().unwrap();
        assert!(reader.is_closed());

        let mut reader = RequestReader::new();
        reader.handle_input(b"POST / HTTP/1.1\r\n").unwrap();
        assert_eq!(
            reader.handle_eof(),
            Err(Error::protocol("got EOS while reading"))
        );

        let mut reader = RequestReader::new();
        reader
            .handle_input(b"POST / HTTP/1.1\r\nContent-length: 9\r\n\r\nabc")
            .unwrap();
        assert_eq!(
            reader.handle_eof(),
            Err(Error::protocol("got EOS while reading body"))
        );
    }
}
