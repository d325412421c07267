//! Non-blocking [XML-RPC](http://xmlrpc.com) client and server.
//!
//! Everything runs on one thread. A [`Dispatcher`] waits with `select()`
//! on a set of [`Source`]s, each a file descriptor plus the continuation to
//! run when it becomes ready. The [`Client`] and [`Server`] are chains of
//! such continuations, so one dispatcher can serve many connections and
//! issue calls of its own at the same time.
//!
//! # Client
//!
//! ```no_run
//! use std::time::Duration;
//! use xmlrpc::{Client, Value};
//!
//! let mut client = Client::new("localhost", 8000, "/RPC2");
//! let reply = client.execute(
//!     "echo",
//!     &[Value::from("hello")],
//!     Some(Duration::from_secs(10)),
//!     None,
//!     None,
//! )?;
//! println!("{:?}", reply);
//! # Ok::<(), xmlrpc::Error>(())
//! ```
//!
//! # Server
//!
//! A method receives a [`Call`] describing the request and the decoded
//! parameters. It answers with a [`Value`], fails with [`Error::Fault`], or
//! returns [`Error::Postpone`] and answers later through the
//! [`ServerHandle`].
//!
//! ```no_run
//! use std::time::Duration;
//! use xmlrpc::{Error, Server, Value};
//!
//! let mut server = Server::bind_and_listen(8000, 5)?;
//! server.add_method("echo", |_call, params| Ok(Value::Array(params)));
//! server.add_method("divide", |_call, params| match params.as_slice() {
//!     [Value::Int(_), Value::Int(0)] => Err(Error::fault(1, "division by zero")),
//!     [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a / b)),
//!     _ => Err(Error::fault(2, "expected two integers")),
//! });
//! server.work(None)?;
//! # Ok::<(), xmlrpc::Error>(())
//! ```
//!
//! # Values
//!
//! ```
//! use xmlrpc::{decode, encode, Value};
//!
//! let value = Value::structure(vec![("answer", Value::Int(42))]);
//! let xml = encode(&value)?;
//! let (back, rest) = decode(&xml)?;
//! assert_eq!(back, value);
//! assert!(rest.is_empty());
//! # Ok::<(), xmlrpc::Error>(())
//! ```

mod client;
mod codec;
mod config;
mod dispatch;
mod error;
pub mod message;
pub mod sansio;
mod server;
mod source;
mod sys;
mod value;

pub use crate::client::{Client, Completion};
pub use crate::codec::{decode, encode, MAX_DEPTH};
pub use crate::config::{Config, DEFAULT_MAX_MESSAGE_SIZE};
pub use crate::dispatch::{Dispatcher, Outcome, SourceId};
pub use crate::error::{Error, Result};
pub use crate::message::{Headers, HttpVersion, Request, Response};
pub use crate::server::{Call, ConnectionId, Method, Server, ServerHandle};
pub use crate::source::{
    Callback, Continuation, ErrorHandler, Interest, Recovery, Source, SourceInfo,
};
pub use crate::value::{DateTime, Struct, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_not_impl_any;

    // Sources and continuations live on the dispatcher's thread.
    assert_not_impl_any!(Dispatcher: Send, Sync);
    assert_not_impl_any!(Source: Send, Sync);
    assert_not_impl_any!(Server: Send, Sync);
    assert_not_impl_any!(Client: Send, Sync);
}
