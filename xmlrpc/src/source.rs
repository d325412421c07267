//! I/O endpoints and the continuations that drive them.
//!
//! A [`Source`] is a file descriptor together with the events it is waiting
//! for and the single piece of work to run when they occur. It never
//! schedules itself: it runs only after being handed to
//! [`Dispatcher::add_source`], and the dispatcher gives up ownership again
//! before invoking the continuation. A continuation that wants to run again
//! registers the source anew.

use bitflags::bitflags;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::dispatch::{Dispatcher, SourceId};
use crate::error::{Error, Result};
use crate::sys;

bitflags! {
    /// Events a source waits for, and events that occurred.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        /// Readable, or the peer closed its side.
        const INPUT = 0b0001;
        /// Writable, or a pending connect finished.
        const OUTPUT = 0b0010;
        /// Exceptional condition (out of band data).
        const EXCEPT = 0b0100;
        /// Ready on the next pass without polling the descriptor.
        const IMMEDIATE = 0b1000;
    }
}

bitflags! {
    /// What to do after a continuation failed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Recovery: u8 {
        /// Log the error against the source.
        const KEEP_DEFAULT = 0b01;
        /// Swallow the error and keep the dispatcher running.
        const KEEP_WORKING = 0b10;
    }
}

/// A callback that may run many times.
///
/// The dispatcher registers the source again, with its current interest
/// and the same callback, whenever `call` returns `Ok(true)`.
pub trait Callback {
    fn call(
        &self,
        dispatcher: &mut Dispatcher,
        source: &mut Source,
        occurred: Interest,
    ) -> Result<bool>;
}

impl<F> Callback for F
where
    F: Fn(&mut Dispatcher, &mut Source, Interest) -> Result<bool>,
{
    fn call(
        &self,
        dispatcher: &mut Dispatcher,
        source: &mut Source,
        occurred: Interest,
    ) -> Result<bool> {
        self(dispatcher, source, occurred)
    }
}

type NativeFn = Box<dyn FnOnce(&mut Dispatcher, Source, Interest) -> Result<()>>;

/// The work to run when a source becomes ready.
pub enum Continuation {
    /// One step of a protocol exchange. Its captured state is the state of
    /// the exchange; it owns the source and re-registers it for the next
    /// step, or drops it when the exchange is over.
    Native(NativeFn),
    /// A shared callback, re-armed as long as it asks for it.
    Foreign(Rc<dyn Callback>),
}

impl Continuation {
    pub fn native<F>(f: F) -> Self
    where
        F: FnOnce(&mut Dispatcher, Source, Interest) -> Result<()> + 'static,
    {
        Continuation::Native(Box::new(f))
    }

    pub fn foreign<C: Callback + 'static>(callback: C) -> Self {
        Continuation::Foreign(Rc::new(callback))
    }

    pub(crate) fn invoke(
        self,
        dispatcher: &mut Dispatcher,
        mut source: Source,
        occurred: Interest,
    ) -> Result<()> {
        match self {
            Continuation::Native(f) => f(dispatcher, source, occurred),
            Continuation::Foreign(callback) => {
                if callback.call(dispatcher, &mut source, occurred)? {
                    source.continuation = Some(Continuation::Foreign(callback));
                    dispatcher.add_source(source);
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Continuation::Native(_) => f.write_str("Continuation::Native"),
            Continuation::Foreign(_) => f.write_str("Continuation::Foreign"),
        }
    }
}

type HandlerFn = Rc<dyn Fn(&SourceInfo, &Error) -> Result<Recovery>>;

/// Error policy of a source.
#[derive(Clone, Default)]
pub enum ErrorHandler {
    /// Log the error and stop the dispatcher with it.
    #[default]
    Default,
    /// Ask a callable. If the callable itself fails, its failure is logged
    /// and the default policy applies.
    Custom(HandlerFn),
}

impl ErrorHandler {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&SourceInfo, &Error) -> Result<Recovery> + 'static,
    {
        ErrorHandler::Custom(Rc::new(f))
    }

    /// Always log and keep going; the policy of accepted connections.
    pub fn keep_working() -> Self {
        ErrorHandler::custom(|_, _| Ok(Recovery::KEEP_DEFAULT | Recovery::KEEP_WORKING))
    }

    pub(crate) fn recover(&self, info: &SourceInfo, err: &Error, target: &str) -> Recovery {
        let recovery = match self {
            ErrorHandler::Default => Recovery::KEEP_DEFAULT,
            ErrorHandler::Custom(f) => match f(info, err) {
                Ok(recovery) => recovery,
                Err(handler_err) => {
                    log::error!(target: target, "error handler for {} failed: {}", info, handler_err);
                    Recovery::KEEP_DEFAULT
                }
            },
        };
        if recovery.contains(Recovery::KEEP_DEFAULT) {
            log::error!(target: target, "Error from source {}: {}", info, err);
        }
        recovery
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorHandler::Default => f.write_str("ErrorHandler::Default"),
            ErrorHandler::Custom(_) => f.write_str("ErrorHandler::Custom"),
        }
    }
}

/// What an error handler learns about the failed source.
///
/// Taken just before the continuation runs, since the source itself is
/// gone by the time the error surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: SourceId,
    pub fd: RawFd,
    pub desc: String,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.desc.is_empty() {
            write!(f, "<fd {}>", self.fd)
        } else {
            write!(f, "<{}, fd {}>", self.desc, self.fd)
        }
    }
}

/// A file descriptor plus its pending continuation.
///
/// A source created with [`Source::owned`] closes its descriptor when
/// dropped; one created with [`Source::new`] leaves it open.
#[derive(Debug)]
pub struct Source {
    fd: RawFd,
    pub(crate) interest: Interest,
    pub(crate) continuation: Option<Continuation>,
    on_error: ErrorHandler,
    close_on_drop: bool,
    desc: String,
}

impl Source {
    /// Wrap a descriptor owned by someone else.
    pub fn new(fd: RawFd) -> Self {
        Source {
            fd,
            interest: Interest::empty(),
            continuation: None,
            on_error: ErrorHandler::Default,
            close_on_drop: false,
            desc: String::new(),
        }
    }

    /// Take ownership of a descriptor.
    pub fn owned(fd: RawFd) -> Self {
        let mut source = Source::new(fd);
        source.close_on_drop = true;
        source
    }

    /// The descriptor, or `-1` once closed.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn set_fd(&mut self, fd: RawFd) {
        self.fd = fd;
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }

    pub fn set_continuation(&mut self, continuation: Continuation) {
        self.continuation = Some(continuation);
    }

    pub fn has_continuation(&self) -> bool {
        self.continuation.is_some()
    }

    /// Set interest and continuation in one go.
    pub fn arm(&mut self, interest: Interest, continuation: Continuation) {
        self.interest = interest;
        self.continuation = Some(continuation);
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.on_error = handler;
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.on_error
    }

    /// Human readable name used in log lines, e.g. the peer address.
    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn set_desc<S: Into<String>>(&mut self, desc: S) {
        self.desc = desc.into();
    }

    pub fn set_close_on_drop(&mut self, close_on_drop: bool) {
        self.close_on_drop = close_on_drop;
    }

    /// Close the descriptor. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Ok(());
        }
        let fd = self.fd;
        self.fd = -1;
        sys::close(fd)?;
        Ok(())
    }

    /// Give up ownership of the descriptor without closing it.
    pub fn into_raw_fd(mut self) -> RawFd {
        let fd = self.fd;
        self.fd = -1;
        fd
    }

    pub fn info(&self, id: SourceId) -> SourceInfo {
        SourceInfo {
            id,
            fd: self.fd,
            desc: self.desc.clone(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.desc.is_empty() {
            write!(f, "<fd {}>", self.fd)
        } else {
            write!(f, "<{}, fd {}>", self.desc, self.fd)
        }
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if self.close_on_drop && self.fd >= 0 {
            let _ = sys::close(self.fd);
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let (a, b) = sys::socketpair().unwrap();
        let mut source = Source::owned(a);
        source.close().unwrap();
        assert_eq!(source.fd(), -1);
        source.close().unwrap();
        drop(source);

        // Dropping a borrowed descriptor leaves it open.
        let source = Source::new(b);
        drop(source);
        sys::close(b).unwrap();
    }

    #[test]
    fn test_owned_closes_on_drop() {
        let (a, b) = sys::socketpair().unwrap();
        drop(Source::owned(a));
        // The peer sees the hangup.
        let mut buf = [0u8; 4];
        assert_eq!(sys::read(b, &mut buf).unwrap(), 0);
        sys::close(b).unwrap();
    }

    #[test]
    fn test_display() {
        let mut source = Source::new(7);
        assert_eq!(source.to_string(), "<fd 7>");
        source.set_desc("localhost:8000");
        assert_eq!(source.to_string(), "<localhost:8000, fd 7>");
        assert_eq!(source.info(3).to_string(), "<localhost:8000, fd 7>");
    }

    #[test]
    fn test_error_handler_policies() {
        let info = Source::new(5).info(1);
        let err = Error::protocol("boom");
        assert_eq!(
            ErrorHandler::Default.recover(&info, &err, "xmlrpc"),
            Recovery::KEEP_DEFAULT
        );
        assert_eq!(
            ErrorHandler::custom(|_, _| Ok(Recovery::KEEP_WORKING)).recover(&info, &err, "xmlrpc"),
            Recovery::KEEP_WORKING
        );
        // A failing handler falls back to the default.
        assert_eq!(
            ErrorHandler::custom(|_, _| Err(Error::protocol("handler"))).recover(&info, &err, "xmlrpc"),
            Recovery::KEEP_DEFAULT
        );
    }
}
