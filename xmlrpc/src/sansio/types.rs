//! Core types for the sans-io framing readers.

/// A complete HTTP message as read off the wire.
///
/// For chunked responses `body` holds the reassembled chunk data, the
/// framing itself is gone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMessage {
    /// Start line and header fields, including the blank line that ends them.
    pub head: Vec<u8>,
    /// Message body.
    pub body: Vec<u8>,
}

impl RawMessage {
    /// Header and body as one buffer, the input the message parsers expect.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.head.len() + self.body.len());
        bytes.extend_from_slice(&self.head);
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// How the body following a header is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Exactly this many bytes.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes the connection.
    UntilEof,
}

/// What the header scan found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    /// Offset of the first body byte.
    pub body_start: usize,
    /// Raw `Content-length` value, up to the end of its line.
    pub content_length: Option<Vec<u8>>,
    /// The body uses chunked transfer encoding.
    pub chunked: bool,
}

/// Result of parsing one chunk of a chunked body.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkResult {
    /// A data chunk.
    Data {
        /// Offset of the chunk data in the input.
        start: usize,
        /// Length of the chunk data.
        len: usize,
        /// Bytes consumed including the size line and trailing CR LF.
        consumed: usize,
    },
    /// The terminal zero-length chunk and its trailer were complete.
    Last,
    /// More data is needed to complete the chunk.
    Incomplete,
    /// The input is not a valid chunk.
    Invalid {
        /// Description of the framing error
        error: String,
    },
}
