//! The `select(2)` driven run loop.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::source::{Interest, Recovery, Source};
use crate::sys::{self, FdSet};

/// Identifies a source while it is registered. Ids start at 1 and are
/// never reused by the same dispatcher.
pub type SourceId = u64;

/// Why [`Dispatcher::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No sources are left.
    AllDone,
    /// The deadline passed with sources still registered.
    TimedOut,
    /// [`Dispatcher::exit`] was called.
    Exited,
}

#[derive(Debug)]
struct Entry {
    id: SourceId,
    source: Source,
    occurred: Interest,
}

/// Owns a set of sources and runs their continuations as they become ready.
///
/// Everything happens on the calling thread. A continuation receives the
/// dispatcher itself and may add or remove sources while a pass is under
/// way. It must not call [`run_until`](Dispatcher::run_until) on the
/// dispatcher that invoked it.
#[derive(Debug)]
pub struct Dispatcher {
    config: Config,
    sources: Vec<Entry>,
    next_id: SourceId,
    exit: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Dispatcher {
            config,
            sources: Vec::new(),
            next_id: 1,
            exit: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a source and return its id.
    pub fn add_source(&mut self, source: Source) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;
        log::trace!(target: self.config.target(), "registered source {} as {}", source, id);
        self.sources.push(Entry {
            id,
            source,
            occurred: Interest::empty(),
        });
        id
    }

    /// Unregister and drop a source. Returns `false` if no source has this id.
    pub fn remove_source(&mut self, id: SourceId) -> bool {
        self.take_source(id).is_some()
    }

    /// Unregister a source and hand it back.
    pub fn take_source(&mut self, id: SourceId) -> Option<Source> {
        let pos = self.position(id)?;
        Some(self.sources.remove(pos).source)
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Drop every source.
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Make the current `run_until` return after the pass in progress.
    pub fn exit(&mut self) {
        self.exit = true;
    }

    /// Descriptors that registered sources wait on, as
    /// `(input, output, except)`.
    pub fn active_fds(&self) -> (Vec<RawFd>, Vec<RawFd>, Vec<RawFd>) {
        let mut input = Vec::new();
        let mut output = Vec::new();
        let mut except = Vec::new();
        for entry in &self.sources {
            let interest = entry.source.interest();
            let fd = entry.source.fd();
            if interest.contains(Interest::INPUT) {
                input.push(fd);
            }
            if interest.contains(Interest::OUTPUT) {
                output.push(fd);
            }
            if interest.contains(Interest::EXCEPT) {
                except.push(fd);
            }
        }
        (input, output, except)
    }

    /// Move every source of `other` into this dispatcher, keeping their
    /// order. The sources get fresh ids.
    pub fn absorb(&mut self, other: &mut Dispatcher) -> Vec<SourceId> {
        other
            .sources
            .drain(..)
            .map(|entry| self.add_source(entry.source))
            .collect()
    }

    /// Run for at most `timeout`, or until no sources are left if `None`.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<Outcome> {
        self.run_until(timeout.map(|t| Instant::now() + t))
    }

    /// Run until `deadline`, until no sources are left, or until
    /// [`exit`](Dispatcher::exit) is called.
    ///
    /// A failed `select` ends the run with its error. A failed continuation
    /// is handed to the error handler of its source; unless the handler
    /// answers [`Recovery::KEEP_WORKING`] the run ends with that error.
    pub fn run_until(&mut self, deadline: Option<Instant>) -> Result<Outcome> {
        self.exit = false;
        while !self.sources.is_empty() {
            let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            self.poll(timeout)?;

            // Snapshot the ready set; continuations below may change `sources`.
            let ready: Vec<(SourceId, Interest)> = self
                .sources
                .iter()
                .filter(|e| !e.occurred.is_empty())
                .map(|e| (e.id, e.occurred))
                .collect();

            for (id, occurred) in ready {
                let pos = match self.position(id) {
                    Some(pos) => pos,
                    None => continue,
                };
                let mut source = self.sources.remove(pos).source;
                let continuation = match source.continuation.take() {
                    Some(continuation) => continuation,
                    None => {
                        log::warn!(
                            target: self.config.target(),
                            "dropping source {} without a continuation",
                            source
                        );
                        continue;
                    }
                };
                let info = source.info(id);
                let handler = source.error_handler().clone();

                if let Err(err) = continuation.invoke(self, source, occurred) {
                    let recovery = handler.recover(&info, &err, self.config.target());
                    if !recovery.contains(Recovery::KEEP_WORKING) {
                        return Err(err);
                    }
                }
            }

            if self.exit {
                self.exit = false;
                return Ok(Outcome::Exited);
            }
            if let Some(deadline) = deadline {
                if Instant::now() > deadline {
                    return Ok(Outcome::TimedOut);
                }
            }
        }
        Ok(Outcome::AllDone)
    }

    /// One `select` call; marks what occurred on every source.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<()> {
        let mut read = FdSet::new();
        let mut write = FdSet::new();
        let mut except = FdSet::new();
        let mut immediate = false;

        for entry in self.sources.iter_mut() {
            entry.occurred = Interest::empty();
            let interest = entry.source.interest();
            if interest.is_empty() {
                continue;
            }
            if interest.contains(Interest::IMMEDIATE) {
                entry.occurred = Interest::IMMEDIATE;
                immediate = true;
                continue;
            }
            let fd = entry.source.fd();
            if fd < 0 {
                // Closed behind our back; let the continuation hit the error.
                log::warn!(target: self.config.target(), "bad fd for source {}", entry.source);
                entry.occurred = interest;
                immediate = true;
                continue;
            }
            if interest.contains(Interest::INPUT) {
                read.insert(fd)?;
            }
            if interest.contains(Interest::OUTPUT) {
                write.insert(fd)?;
            }
            if interest.contains(Interest::EXCEPT) {
                except.insert(fd)?;
            }
        }

        let timeout = if immediate {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        if read.is_empty() && write.is_empty() && except.is_empty() {
            if immediate {
                return Ok(());
            }
            return match timeout {
                Some(timeout) => {
                    std::thread::sleep(timeout);
                    Ok(())
                }
                None => Err(Error::from(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no registered source can become ready",
                ))),
            };
        }

        sys::select(&mut read, &mut write, &mut except, timeout)?;

        for entry in self.sources.iter_mut() {
            let interest = entry.source.interest();
            if interest.contains(Interest::IMMEDIATE) || !entry.occurred.is_empty() {
                continue;
            }
            let fd = entry.source.fd();
            if interest.contains(Interest::INPUT) && read.contains(fd) {
                entry.occurred |= Interest::INPUT;
            }
            if interest.contains(Interest::OUTPUT) && write.contains(fd) {
                entry.occurred |= Interest::OUTPUT;
            }
            if interest.contains(Interest::EXCEPT) && except.contains(fd) {
                entry.occurred |= Interest::EXCEPT;
            }
        }
        Ok(())
    }

    fn position(&self, id: SourceId) -> Option<usize> {
        self.sources.iter().position(|e| e.id == id)
    }
}
