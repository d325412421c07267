//! Sans-IO HTTP framing for XML-RPC.
//!
//! The readers in this module turn a stream of byte slices into complete
//! HTTP messages. They perform no I/O, so the same code runs behind the
//! non-blocking dispatcher and in unit tests that feed one byte at a time.
//!
//! - `handle_input()`: feed bytes read from the socket
//! - `handle_eof()`: the peer closed its side
//! - `poll_message()`: take a finished message
//!
//! # Example
//!
//! ```
//! use xmlrpc::sansio::RequestReader;
//! use xmlrpc::message::parse_request;
//!
//! let mut reader = RequestReader::new();
//! let wire = xmlrpc::message::build_request(
//!     "http://localhost/RPC2",
//!     "ping",
//!     &[],
//!     &xmlrpc::Headers::new(),
//!     "demo",
//! )?;
//! reader.handle_input(&wire)?;
//! let message = reader.poll_message().unwrap();
//! let request = parse_request(&message.to_bytes())?;
//! assert_eq!(request.method, "ping");
//! # Ok::<(), xmlrpc::Error>(())
//! ```

pub mod client;
pub mod protocol;
pub mod server;
pub mod types;

pub use self::client::{ResponseReader, ResponseState};
pub use self::protocol::{parse_chunk, scan_head};
pub use self::server::{RequestReader, RequestState};
pub use self::types::{BodyFraming, ChunkResult, HeadInfo, RawMessage};
