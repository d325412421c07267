//! XML-RPC client over non-blocking sockets.
//!
//! One call runs as a chain of steps, each a continuation registered with a
//! [`Dispatcher`]:
//!
//! `Connect → Connecting → Write → ReadHeader → ReadBody → Deliver`
//!
//! A connection the server keeps alive is reused by the next call, which
//! then starts at `Write`.

use std::cell::RefCell;
use std::io;
use std::net::ToSocketAddrs;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{Dispatcher, Outcome, SourceId};
use crate::error::{Error, Result};
use crate::message::{self, Headers};
use crate::sansio::ResponseReader;
use crate::source::{Continuation, ErrorHandler, Interest, Source};
use crate::sys;
use crate::value::Value;

/// Called once with the outcome of a call submitted with
/// [`Client::submit`]: the result value, a fault, or a parse error.
/// Transport errors go to the error handler of the connection instead.
pub type Completion = Box<dyn FnOnce(&mut Dispatcher, Result<Value>) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Connect,
    Connecting,
    Write,
    ReadHeader,
    ReadBody,
}

#[derive(Debug)]
struct Endpoint {
    host: String,
    port: u16,
    url: String,
    /// `Host` header value, also the description of the connection.
    desc: String,
}

#[derive(Debug, Default)]
struct Shared {
    /// The connection between calls.
    idle: Option<Source>,
    in_flight: bool,
    /// Id of the registered step while a call is in flight on the
    /// client's own dispatcher.
    registered: Option<SourceId>,
    own_loop: bool,
    close_requested: bool,
    on_error: ErrorHandler,
}

/// An XML-RPC client for one server endpoint.
///
/// # Example
///
/// ```no_run
/// use xmlrpc::{Client, Value};
/// use std::time::Duration;
///
/// let mut client = Client::new("localhost", 8000, "/RPC2");
/// let sum = client.execute(
///     "add",
///     &[Value::from(2), Value::from(3)],
///     Some(Duration::from_secs(5)),
///     None,
///     None,
/// )?;
/// assert_eq!(sum, Value::Int(5));
/// # Ok::<(), xmlrpc::Error>(())
/// ```
pub struct Client {
    config: Config,
    endpoint: Rc<Endpoint>,
    dispatcher: Dispatcher,
    shared: Rc<RefCell<Shared>>,
}

impl Client {
    pub fn new(host: &str, port: u16, url: &str) -> Self {
        Client::with_config(host, port, url, Config::default())
    }

    pub fn with_config(host: &str, port: u16, url: &str, config: Config) -> Self {
        let desc = if port == 80 {
            host.to_string()
        } else {
            format!("{}:{}", host, port)
        };
        Client {
            dispatcher: Dispatcher::with_config(config.clone()),
            config,
            endpoint: Rc::new(Endpoint {
                host: host.into(),
                port,
                url: url.into(),
                desc,
            }),
            shared: Rc::new(RefCell::new(Shared::default())),
        }
    }

    /// `host` or `host:port`, as sent in the `Host` header.
    pub fn desc(&self) -> &str {
        &self.endpoint.desc
    }

    pub fn is_executing(&self) -> bool {
        self.shared.borrow().in_flight
    }

    /// Whether a kept-alive connection is waiting for the next call.
    pub fn is_connected(&self) -> bool {
        self.shared
            .borrow()
            .idle
            .as_ref()
            .map_or(false, Source::is_open)
    }

    /// Call `method` and wait for the result.
    ///
    /// The call runs on a private dispatcher. If `timeout` passes first the
    /// call fails with [`Error::Timeout`]; the exchange stays registered
    /// with the client's own dispatcher, where [`work`](Client::work)
    /// finishes it and [`close`](Client::close) abandons it.
    pub fn execute(
        &mut self,
        method: &str,
        params: &[Value],
        timeout: Option<Duration>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Value> {
        let slot: Rc<RefCell<Option<Result<Value>>>> = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        let mut scratch = Dispatcher::with_config(self.config.clone());
        start(
            &self.config,
            &self.endpoint,
            &self.shared,
            &mut scratch,
            false,
            method,
            params,
            user,
            password,
            Box::new(move |_, result| {
                *sink.borrow_mut() = Some(result);
                Ok(())
            }),
        )?;

        let outcome = match scratch.run(timeout) {
            Ok(outcome) => outcome,
            Err(err) => {
                // The exchange dies with the scratch dispatcher.
                let mut shared = self.shared.borrow_mut();
                shared.in_flight = false;
                shared.registered = None;
                shared.own_loop = false;
                shared.close_requested = false;
                return Err(err);
            }
        };

        match outcome {
            Outcome::TimedOut => {
                let ids = self.dispatcher.absorb(&mut scratch);
                let mut shared = self.shared.borrow_mut();
                if shared.in_flight {
                    shared.registered = ids.last().copied();
                    shared.own_loop = true;
                }
                Err(Error::Timeout)
            }
            Outcome::AllDone | Outcome::Exited => {
                let result = slot.borrow_mut().take();
                result.unwrap_or_else(|| Err(Error::protocol("call aborted by error handler")))
            }
        }
    }

    /// Queue a call on the client's own dispatcher and return at once.
    ///
    /// `on_complete` runs from [`work`](Client::work).
    pub fn submit<F>(
        &mut self,
        method: &str,
        params: &[Value],
        on_complete: F,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, Result<Value>) -> Result<()> + 'static,
    {
        start(
            &self.config,
            &self.endpoint,
            &self.shared,
            &mut self.dispatcher,
            true,
            method,
            params,
            user,
            password,
            Box::new(on_complete),
        )
    }

    /// Queue a call on another dispatcher, typically the one of a
    /// [`Server`](crate::Server) whose loop is already running.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_on<F>(
        &mut self,
        dispatcher: &mut Dispatcher,
        method: &str,
        params: &[Value],
        on_complete: F,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()>
    where
        F: FnOnce(&mut Dispatcher, Result<Value>) -> Result<()> + 'static,
    {
        start(
            &self.config,
            &self.endpoint,
            &self.shared,
            dispatcher,
            false,
            method,
            params,
            user,
            password,
            Box::new(on_complete),
        )
    }

    /// Run the client's own dispatcher.
    pub fn work(&mut self, timeout: Option<Duration>) -> Result<Outcome> {
        self.dispatcher.run(timeout)
    }

    /// Error policy for the connection.
    pub fn set_on_error(&mut self, handler: ErrorHandler) {
        let mut shared = self.shared.borrow_mut();
        if let Some(idle) = shared.idle.as_mut() {
            idle.set_error_handler(handler.clone());
        }
        shared.on_error = handler;
    }

    pub fn active_fds(&self) -> (Vec<RawFd>, Vec<RawFd>, Vec<RawFd>) {
        self.dispatcher.active_fds()
    }

    /// Close the connection.
    ///
    /// A call in flight on the client's own dispatcher is abandoned. One in
    /// flight elsewhere completes, and the connection is closed afterwards.
    pub fn close(&mut self) -> Result<()> {
        let (abandoned, idle) = {
            let mut shared = self.shared.borrow_mut();
            let mut abandoned = None;
            if shared.in_flight {
                if shared.own_loop {
                    abandoned = shared.registered.take();
                    shared.in_flight = false;
                } else {
                    shared.close_requested = true;
                }
            }
            (abandoned, shared.idle.take())
        };
        if let Some(id) = abandoned {
            self.dispatcher.remove_source(id);
        }
        if let Some(mut idle) = idle {
            idle.close()?;
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn start(
    config: &Config,
    endpoint: &Rc<Endpoint>,
    shared: &Rc<RefCell<Shared>>,
    dispatcher: &mut Dispatcher,
    own_loop: bool,
    method: &str,
    params: &[Value],
    user: Option<&str>,
    password: Option<&str>,
    on_complete: Completion,
) -> Result<()> {
    let target = config.target().to_string();
    let mut state = shared.borrow_mut();
    if state.in_flight {
        return Err(Error::ClientBusy);
    }

    log::debug!(target: target.as_str(), "<{}> client queueing command '{}'", endpoint.desc, method);
    log::trace!(target: target.as_str(), "<{}> params {:?}", endpoint.desc, params);

    let mut extra = Headers::new();
    if let Some(auth) = message::basic_credentials(user, password) {
        extra.insert("Authorization", auth);
    }
    extra.insert("Host", endpoint.desc.as_str());
    let request = message::build_request(
        &endpoint.url,
        method,
        params,
        &extra,
        &config.user_agent,
    )?;

    let source = match state.idle.take() {
        Some(source) => source,
        None => {
            let mut source = Source::owned(-1);
            source.set_desc(endpoint.desc.as_str());
            source.set_error_handler(state.on_error.clone());
            source
        }
    };
    let step = if source.is_open() {
        Step::Write
    } else {
        Step::Connect
    };

    state.in_flight = true;
    state.own_loop = own_loop;
    state.close_requested = false;
    drop(state);

    let exchange = Exchange {
        shared: shared.clone(),
        endpoint: endpoint.clone(),
        target,
        read_size: config.read_size,
        request,
        written: 0,
        reader: ResponseReader::with_max_size(config.max_message_size),
        on_complete,
    };
    exchange.arm(dispatcher, source, step, Interest::IMMEDIATE);
    Ok(())
}

/// The state of one call between steps.
struct Exchange {
    shared: Rc<RefCell<Shared>>,
    endpoint: Rc<Endpoint>,
    target: String,
    read_size: usize,
    request: Vec<u8>,
    written: usize,
    reader: ResponseReader,
    on_complete: Completion,
}

impl Exchange {
    fn arm(self, dispatcher: &mut Dispatcher, mut source: Source, step: Step, interest: Interest) {
        let shared = self.shared.clone();
        source.arm(
            interest,
            Continuation::native(move |dispatcher, source, _occurred| {
                self.resume(step, dispatcher, source)
            }),
        );
        let id = dispatcher.add_source(source);
        shared.borrow_mut().registered = Some(id);
    }

    fn resume(self, step: Step, dispatcher: &mut Dispatcher, source: Source) -> Result<()> {
        let shared = self.shared.clone();
        let result = match step {
            Step::Connect => self.connect(dispatcher, source),
            Step::Connecting => self.connecting(dispatcher, source),
            Step::Write => self.write(dispatcher, source),
            Step::ReadHeader | Step::ReadBody => self.read(dispatcher, source),
        };
        if result.is_err() {
            let mut shared = shared.borrow_mut();
            shared.in_flight = false;
            shared.registered = None;
        }
        result
    }

    fn connect(self, dispatcher: &mut Dispatcher, mut source: Source) -> Result<()> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", self.endpoint.host),
                )
            })?;
        let (fd, in_progress) = sys::connect_nonblocking(&addr)?;
        source.set_fd(fd);
        log::debug!(
            target: self.target.as_str(),
            "{} client connecting to {}{}",
            source,
            addr,
            if in_progress { "" } else { " (connected)" }
        );
        self.arm(dispatcher, source, Step::Connecting, Interest::OUTPUT);
        Ok(())
    }

    fn connecting(self, dispatcher: &mut Dispatcher, source: Source) -> Result<()> {
        match sys::take_socket_error(source.fd())? {
            None => {
                log::info!(target: self.target.as_str(), "{} client connection succeeded", source);
                self.arm(dispatcher, source, Step::Write, Interest::OUTPUT);
                Ok(())
            }
            Some(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == Some(libc::EINPROGRESS) =>
            {
                self.arm(dispatcher, source, Step::Connecting, Interest::OUTPUT);
                Ok(())
            }
            Some(e) => Err(e.into()),
        }
    }

    fn write(mut self, dispatcher: &mut Dispatcher, source: Source) -> Result<()> {
        match sys::write(source.fd(), &self.request[self.written..]) {
            Ok(n) => self.written += n,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        log::trace!(
            target: self.target.as_str(),
            "{} client wrote {} of {} bytes",
            source,
            self.written,
            self.request.len()
        );
        if self.written < self.request.len() {
            self.arm(dispatcher, source, Step::Write, Interest::OUTPUT);
        } else {
            log::trace!(target: self.target.as_str(), "{} client finished writing request", source);
            self.arm(dispatcher, source, Step::ReadHeader, Interest::INPUT);
        }
        Ok(())
    }

    fn read(mut self, dispatcher: &mut Dispatcher, source: Source) -> Result<()> {
        let mut buf = vec![0u8; self.read_size];
        let mut eof = false;
        loop {
            match sys::read(source.fd(), &mut buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    log::trace!(target: self.target.as_str(), "{} client read {} bytes", source, n);
                    self.reader.handle_input(&buf[..n])?;
                    if self.reader.is_done() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if eof {
            self.reader.handle_eof()?;
        }

        if self.reader.is_done() {
            self.deliver(dispatcher, source)
        } else if self.reader.in_header() {
            self.arm(dispatcher, source, Step::ReadHeader, Interest::INPUT);
            Ok(())
        } else {
            self.arm(dispatcher, source, Step::ReadBody, Interest::INPUT);
            Ok(())
        }
    }

    fn deliver(mut self, dispatcher: &mut Dispatcher, mut source: Source) -> Result<()> {
        let response = self.reader.poll_message().unwrap_or_default();
        if self.reader.surplus() > 0 {
            log::warn!(
                target: self.target.as_str(),
                "{} ignoring {} bytes after the response body",
                source,
                self.reader.surplus()
            );
        }
        let bytes = response.to_bytes();
        log::trace!(
            target: self.target.as_str(),
            "{} server response is {:?}",
            source,
            String::from_utf8_lossy(&bytes)
        );

        let keep_alive = !self.reader.read_to_eof()
            && message::parse_response_head(&response.head)
                .map(|headers| message::keep_alive(&headers))
                .unwrap_or(false);
        let result = message::parse_response(&bytes).map(|response| response.value);

        {
            let mut shared = self.shared.borrow_mut();
            shared.in_flight = false;
            shared.registered = None;
            if !keep_alive || shared.close_requested {
                log::debug!(target: self.target.as_str(), "{} client closing connection", source);
                source.close()?;
            }
            if !shared.close_requested {
                source.set_interest(Interest::empty());
                shared.idle = Some(source);
            }
            shared.close_requested = false;
        }

        (self.on_complete)(dispatcher, result)
    }
}
