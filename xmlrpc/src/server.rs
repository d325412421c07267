//! XML-RPC server over non-blocking sockets.
//!
//! The listening socket is a source with a re-arming callback that accepts
//! one connection per readiness event. Every accepted connection then runs
//! its own chain of steps on the same [`Dispatcher`]:
//!
//! `ReadHeader → ReadBody → Dispatch → WriteResponse`
//!
//! followed by `ReadHeader` again when the connection is kept alive. A
//! handler may answer later by returning [`Error::Postpone`]; the connection
//! is then parked until [`ServerHandle::queue_response`] or
//! [`ServerHandle::queue_fault`] resumes it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{Dispatcher, Outcome, SourceId};
use crate::error::{Error, Result};
use crate::message::{self, Headers};
use crate::sansio::RequestReader;
use crate::source::{Callback, Continuation, ErrorHandler, Interest, Source};
use crate::sys;
use crate::value::Value;

/// Identifies an accepted connection for as long as the server lives.
pub type ConnectionId = u64;

/// A method the server can call.
///
/// Return [`Error::Fault`] to send a fault to the caller, and
/// [`Error::Postpone`] to answer later through [`Call::server`]. Any other
/// error is sent as a fault with code `-1`.
pub trait Method {
    fn call(&self, call: &mut Call<'_>, params: Vec<Value>) -> Result<Value>;
}

impl<F> Method for F
where
    F: Fn(&mut Call<'_>, Vec<Value>) -> Result<Value>,
{
    fn call(&self, call: &mut Call<'_>, params: Vec<Value>) -> Result<Value> {
        self(call, params)
    }
}

type AuthFn = Rc<dyn Fn(&str, Option<&str>, Option<&str>) -> Result<(bool, String)>>;

/// Everything a [`Method`] learns about the request it serves.
pub struct Call<'a> {
    uri: &'a str,
    method: &'a str,
    connection: ConnectionId,
    headers: &'a Headers,
    dispatcher: &'a mut Dispatcher,
    server: ServerHandle,
}

impl<'a> Call<'a> {
    /// Request target from the request line, e.g. `/RPC2`.
    pub fn uri(&self) -> &str {
        self.uri
    }

    pub fn method(&self) -> &str {
        self.method
    }

    /// The connection to resume when the method postpones its answer.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn headers(&self) -> &Headers {
        self.headers
    }

    /// The dispatcher running the server, for registering extra sources.
    ///
    /// Running it from inside a method is not supported.
    pub fn dispatcher(&mut self) -> &mut Dispatcher {
        self.dispatcher
    }

    pub fn server(&self) -> &ServerHandle {
        &self.server
    }
}

/// A connection waiting for its postponed answer.
struct Postponed {
    source: Source,
    keep_alive: bool,
}

struct ServerShared {
    config: Config,
    methods: HashMap<String, Rc<dyn Method>>,
    auth: Option<AuthFn>,
    on_error: Option<ErrorHandler>,
    postponed: HashMap<ConnectionId, Postponed>,
    next_connection: ConnectionId,
    listen_fd: Option<RawFd>,
}

impl ServerShared {
    fn new(config: Config) -> Self {
        ServerShared {
            config,
            methods: HashMap::new(),
            auth: None,
            on_error: None,
            postponed: HashMap::new(),
            next_connection: 1,
            listen_fd: None,
        }
    }

    /// The policy of accepted connections: the server's handler if one was
    /// set, otherwise log and keep serving.
    fn connection_error_handler(&self) -> ErrorHandler {
        self.on_error
            .clone()
            .unwrap_or_else(ErrorHandler::keep_working)
    }
}

/// A cloneable reference to a server, usable from inside its own loop.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Rc<RefCell<ServerShared>>,
}

impl ServerHandle {
    /// Send the postponed answer of `connection`.
    pub fn queue_response(
        &self,
        dispatcher: &mut Dispatcher,
        connection: ConnectionId,
        value: &Value,
    ) -> Result<()> {
        self.resume(dispatcher, connection, Ok(value))
    }

    /// Send a fault as the postponed answer of `connection`.
    pub fn queue_fault(
        &self,
        dispatcher: &mut Dispatcher,
        connection: ConnectionId,
        code: i32,
        message: &str,
    ) -> Result<()> {
        self.resume(dispatcher, connection, Err(Error::fault(code, message)))
    }

    pub fn is_postponed(&self, connection: ConnectionId) -> bool {
        self.shared.borrow().postponed.contains_key(&connection)
    }

    /// Register a method while the server is running.
    pub fn add_method<F>(&self, name: &str, method: F)
    where
        F: Fn(&mut Call<'_>, Vec<Value>) -> Result<Value> + 'static,
    {
        self.shared
            .borrow_mut()
            .methods
            .insert(name.to_string(), Rc::new(method));
    }

    fn resume(
        &self,
        dispatcher: &mut Dispatcher,
        connection: ConnectionId,
        outcome: Result<&Value>,
    ) -> Result<()> {
        let parked = self.shared.borrow_mut().postponed.remove(&connection);
        let Postponed { source, keep_alive } = parked.ok_or(Error::NotPostponed(connection))?;
        let mut conn = Connection::new(&self.shared, connection);
        conn.keep_alive = keep_alive;
        conn.respond(dispatcher, source, outcome)
    }
}

/// An XML-RPC server.
///
/// # Example
///
/// ```no_run
/// use xmlrpc::{Server, Value};
/// use std::time::Duration;
///
/// let mut server = Server::bind_and_listen(8000, 5)?;
/// server.add_method("add", |_call, params| {
///     let sum: i64 = params.iter().filter_map(Value::as_int).sum();
///     Ok(Value::Int(sum))
/// });
/// server.work(Some(Duration::from_secs(60)))?;
/// # Ok::<(), xmlrpc::Error>(())
/// ```
pub struct Server {
    dispatcher: Dispatcher,
    shared: Rc<RefCell<ServerShared>>,
}

impl Server {
    /// A server without a listening socket; see [`listen_port`](Server::listen_port)
    /// and [`listen_fd`](Server::listen_fd).
    pub fn new() -> Self {
        Server::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Server {
            dispatcher: Dispatcher::with_config(config.clone()),
            shared: Rc::new(RefCell::new(ServerShared::new(config))),
        }
    }

    /// Listen on `port` on all interfaces.
    pub fn bind_and_listen(port: u16, queue: i32) -> Result<Self> {
        let mut server = Server::new();
        server.listen_port(port, queue)?;
        Ok(server)
    }

    /// Adopt an already bound socket and listen on it.
    pub fn from_fd(fd: RawFd, queue: i32) -> Result<Self> {
        let mut server = Server::new();
        server.listen_fd(fd, queue)?;
        Ok(server)
    }

    pub fn listen_port(&mut self, port: u16, queue: i32) -> Result<()> {
        let fd = sys::bind_and_listen(port, queue)?;
        let port = sys::local_addr(fd).map(|addr| addr.port()).unwrap_or(port);
        log::info!(target: self.target().as_str(), "server listening on port {}", port);
        self.register_listener(fd);
        Ok(())
    }

    pub fn listen_fd(&mut self, fd: RawFd, queue: i32) -> Result<()> {
        sys::set_nonblocking(fd)?;
        sys::listen(fd, queue)?;
        log::info!(target: self.target().as_str(), "server listening on fd {}", fd);
        self.register_listener(fd);
        Ok(())
    }

    fn register_listener(&mut self, fd: RawFd) {
        let on_error = {
            let mut shared = self.shared.borrow_mut();
            shared.listen_fd = Some(fd);
            shared.on_error.clone().unwrap_or_default()
        };
        let mut listener = Source::owned(fd);
        listener.set_desc("listener");
        listener.set_error_handler(on_error);
        listener.arm(
            Interest::INPUT,
            Continuation::foreign(Acceptor {
                shared: self.shared.clone(),
            }),
        );
        self.dispatcher.add_source(listener);
    }

    /// Address of the listening socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let fd = self.shared.borrow().listen_fd;
        let fd = fd.ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not listening"))?;
        Ok(sys::local_addr(fd)?)
    }

    pub fn add_method<F>(&mut self, name: &str, method: F)
    where
        F: Fn(&mut Call<'_>, Vec<Value>) -> Result<Value> + 'static,
    {
        self.handle().add_method(name, method);
    }

    /// Register a batch of methods, replacing those with the same name.
    pub fn add_methods<I, S>(&mut self, methods: I)
    where
        I: IntoIterator<Item = (S, Rc<dyn Method>)>,
        S: Into<String>,
    {
        let mut shared = self.shared.borrow_mut();
        for (name, method) in methods {
            shared.methods.insert(name.into(), method);
        }
    }

    /// Check every request with `auth(uri, user, password)`.
    ///
    /// A request without an `Authorization` header is checked with
    /// `(None, None)`. On `Ok((false, realm))` the caller gets the fault
    /// "authentication failed for domain '<realm>'".
    pub fn set_auth<F>(&mut self, auth: F)
    where
        F: Fn(&str, Option<&str>, Option<&str>) -> Result<(bool, String)> + 'static,
    {
        self.shared.borrow_mut().auth = Some(Rc::new(auth));
    }

    /// Error policy of the listening socket, inherited by connections
    /// accepted from now on.
    pub fn set_on_error(&mut self, handler: ErrorHandler) {
        self.shared.borrow_mut().on_error = Some(handler);
    }

    /// Register a source of the caller's own with the server loop.
    pub fn add_source(&mut self, source: Source) -> SourceId {
        self.dispatcher.add_source(source)
    }

    pub fn remove_source(&mut self, id: SourceId) -> bool {
        self.dispatcher.remove_source(id)
    }

    /// Serve until `timeout` passes, [`exit`](Server::exit) is called, or
    /// an error escapes the error handlers.
    pub fn work(&mut self, timeout: Option<Duration>) -> Result<Outcome> {
        self.dispatcher.run(timeout)
    }

    pub fn exit(&mut self) {
        self.dispatcher.exit();
    }

    /// Close the listening socket and every connection.
    pub fn close(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.listen_fd = None;
        shared.postponed.clear();
        drop(shared);
        self.dispatcher.clear();
    }

    pub fn active_fds(&self) -> (Vec<RawFd>, Vec<RawFd>, Vec<RawFd>) {
        self.dispatcher.active_fds()
    }

    pub fn queue_response(&mut self, connection: ConnectionId, value: &Value) -> Result<()> {
        self.handle()
            .queue_response(&mut self.dispatcher, connection, value)
    }

    pub fn queue_fault(&mut self, connection: ConnectionId, code: i32, message: &str) -> Result<()> {
        self.handle()
            .queue_fault(&mut self.dispatcher, connection, code, message)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: self.shared.clone(),
        }
    }

    /// The loop of the server, e.g. for [`Client::submit_on`](crate::Client::submit_on).
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    fn target(&self) -> String {
        self.shared.borrow().config.target().to_string()
    }
}

impl Default for Server {
    fn default() -> Self {
        Server::new()
    }
}

/// Accepts one connection per readiness event and stays armed.
struct Acceptor {
    shared: Rc<RefCell<ServerShared>>,
}

impl Callback for Acceptor {
    fn call(&self, dispatcher: &mut Dispatcher, listener: &mut Source, _: Interest) -> Result<bool> {
        let target = self.shared.borrow().config.target().to_string();
        match sys::accept(listener.fd()) {
            Ok((fd, peer)) => {
                let (id, on_error) = {
                    let mut shared = self.shared.borrow_mut();
                    let id = shared.next_connection;
                    shared.next_connection += 1;
                    (id, shared.connection_error_handler())
                };
                log::info!(target: target.as_str(), "server got connection from {}", peer);
                let mut source = Source::owned(fd);
                source.set_desc(peer.to_string());
                source.set_error_handler(on_error);
                Connection::new(&self.shared, id).arm(dispatcher, source, Interest::INPUT);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::debug!(target: target.as_str(), "{} blocked on accept", listener);
            }
            Err(e) => {
                log::error!(target: target.as_str(), "{} accept failed: {}", listener, e);
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Read,
    Write,
}

/// The state of one connection between steps.
struct Connection {
    shared: Rc<RefCell<ServerShared>>,
    id: ConnectionId,
    target: String,
    read_size: usize,
    max_message_size: usize,
    server_name: String,
    reader: RequestReader,
    response: Vec<u8>,
    written: usize,
    keep_alive: bool,
}

impl Connection {
    fn new(shared: &Rc<RefCell<ServerShared>>, id: ConnectionId) -> Self {
        let (target, read_size, max_message_size, server_name) = {
            let state = shared.borrow();
            (
                state.config.target().to_string(),
                state.config.read_size,
                state.config.max_message_size,
                state.config.user_agent.clone(),
            )
        };
        Connection {
            shared: shared.clone(),
            id,
            target,
            read_size,
            max_message_size,
            server_name,
            reader: RequestReader::with_max_size(max_message_size),
            response: Vec::new(),
            written: 0,
            keep_alive: false,
        }
    }

    fn arm(self, dispatcher: &mut Dispatcher, source: Source, interest: Interest) {
        let step = if interest.contains(Interest::OUTPUT) {
            Step::Write
        } else {
            Step::Read
        };
        self.arm_step(dispatcher, source, step, interest);
    }

    fn arm_step(self, dispatcher: &mut Dispatcher, mut source: Source, step: Step, interest: Interest) {
        source.arm(
            interest,
            Continuation::native(move |dispatcher, source, _occurred| match step {
                Step::Read => self.read(dispatcher, source),
                Step::Write => self.write(dispatcher, source),
            }),
        );
        dispatcher.add_source(source);
    }

    fn read(mut self, dispatcher: &mut Dispatcher, mut source: Source) -> Result<()> {
        let mut buf = vec![0u8; self.read_size];
        let mut eof = false;
        loop {
            match sys::read(source.fd(), &mut buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    log::trace!(target: self.target.as_str(), "{} server read {} bytes", source, n);
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
        if eof && !self.reader.is_done() {
            self.reader.handle_eof()?;
            if self.reader.is_closed() {
                log::debug!(target: self.target.as_str(), "{} received EOF", source);
                return source.close();
            }
        }

        match self.reader.poll_message() {
            Some(request) => {
                let bytes = request.to_bytes();
                self.dispatch(dispatcher, source, request.head, bytes)
            }
            None => {
                self.arm(dispatcher, source, Interest::INPUT);
                Ok(())
            }
        }
    }

    fn dispatch(
        mut self,
        dispatcher: &mut Dispatcher,
        source: Source,
        head: Vec<u8>,
        bytes: Vec<u8>,
    ) -> Result<()> {
        log::trace!(
            target: self.target.as_str(),
            "{} server got request {:?}",
            source,
            String::from_utf8_lossy(&bytes)
        );
        self.keep_alive = message::parse_request_head(&head)
            .map(|headers| message::keep_alive(&headers))
            .unwrap_or(false);

        let outcome = self.call_method(dispatcher, &source, &bytes);
        match outcome {
            Err(Error::Postpone) => {
                log::debug!(target: self.target.as_str(), "{} received postpone request", source);
                self.shared.borrow_mut().postponed.insert(
                    self.id,
                    Postponed {
                        source,
                        keep_alive: self.keep_alive,
                    },
                );
                Ok(())
            }
            Ok(value) => self.respond(dispatcher, source, Ok(&value)),
            Err(e) => self.respond(dispatcher, source, Err(e)),
        }
    }

    fn call_method(&self, dispatcher: &mut Dispatcher, source: &Source, bytes: &[u8]) -> Result<Value> {
        let request = message::parse_request(bytes)?;
        self.authenticate(&request.headers)?;
        log::debug!(
            target: self.target.as_str(),
            "{} server got request for '{}'",
            source,
            request.method
        );
        log::trace!(target: self.target.as_str(), "{} params {:?}", source, request.params);

        let method = self.shared.borrow().methods.get(&request.method).cloned();
        let method = method.ok_or_else(|| Error::UnknownMethod(request.method.clone()))?;
        let mut call = Call {
            uri: request.headers.uri().unwrap_or("/"),
            method: &request.method,
            connection: self.id,
            headers: &request.headers,
            dispatcher,
            server: ServerHandle {
                shared: self.shared.clone(),
            },
        };
        method.call(&mut call, request.params)
    }

    fn authenticate(&self, headers: &Headers) -> Result<()> {
        let auth = self.shared.borrow().auth.clone();
        let Some(auth) = auth else {
            return Ok(());
        };
        let (user, password) = match headers.get("Authorization") {
            Some(value) => {
                let (user, password) = message::parse_basic_auth(value)?;
                (Some(user), Some(password))
            }
            None => (None, None),
        };
        let uri = headers.uri().unwrap_or("/");
        match auth(uri, user.as_deref(), password.as_deref()) {
            Ok((true, _)) => Ok(()),
            Ok((false, realm)) => Err(Error::AuthenticationFailed { realm }),
            Err(e) => {
                log::error!(target: self.target.as_str(), "authentication callable failed: {}", e);
                Err(Error::AuthenticationFailed {
                    realm: "unknown".to_string(),
                })
            }
        }
    }

    /// Encode the answer and start writing it.
    fn respond(mut self, dispatcher: &mut Dispatcher, source: Source, outcome: Result<&Value>) -> Result<()> {
        let mut extra = Headers::new();
        if !self.keep_alive {
            extra.insert("Connection", "close");
        }
        let built = match outcome {
            Ok(value) => message::build_response(value, &extra, &self.server_name),
            Err(e) => {
                if !e.is_fault() {
                    log::warn!(target: self.target.as_str(), "{} request failed: {}", source, e);
                }
                let (code, text) = e.as_fault();
                message::build_fault(code, &text, &extra, &self.server_name)
            }
        };
        self.response = match built {
            Ok(response) => response,
            Err(e) => {
                log::error!(target: self.target.as_str(), "{} cannot encode response: {}", source, e);
                message::build_fault(-1, &e.to_string(), &extra, &self.server_name)?
            }
        };
        self.written = 0;
        self.write(dispatcher, source)
    }

    fn write(mut self, dispatcher: &mut Dispatcher, mut source: Source) -> Result<()> {
        match sys::write(source.fd(), &self.response[self.written..]) {
            Ok(n) => self.written += n,
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        log::trace!(
            target: self.target.as_str(),
            "{} server wrote {} of {} bytes",
            source,
            self.written,
            self.response.len()
        );
        if self.written < self.response.len() {
            self.arm(dispatcher, source, Interest::OUTPUT);
            return Ok(());
        }

        if self.keep_alive {
            log::trace!(target: self.target.as_str(), "{} server keeping connection alive", source);
            self.reader = RequestReader::with_max_size(self.max_message_size);
            self.response = Vec::new();
            self.written = 0;
            self.arm(dispatcher, source, Interest::INPUT);
            Ok(())
        } else {
            log::debug!(target: self.target.as_str(), "{} server closing connection", source);
            source.close()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_response;

    /// A server plus one end of a socketpair standing in for an accepted
    /// connection; the test plays the client on the other end.
    fn connected(server: &mut Server) -> (ConnectionId, RawFd) {
        let (ours, theirs) = sys::socketpair().unwrap();
        let id = {
            let mut shared = server.shared.borrow_mut();
            let id = shared.next_connection;
            shared.next_connection += 1;
            id
        };
        let mut source = Source::owned(ours);
        source.set_error_handler(ErrorHandler::keep_working());
        Connection::new(&server.shared, id).arm(&mut server.dispatcher, source, Interest::INPUT);
        (id, theirs)
    }

    fn send(fd: RawFd, method: &str, params: &[Value], extra: &Headers) {
        let request = message::build_request("/RPC2", method, params, extra, "test").unwrap();
        let mut written = 0;
        while written < request.len() {
            written += sys::write(fd, &request[written..]).unwrap();
        }
    }

    fn receive(server: &mut Server, fd: RawFd) -> Result<Value> {
        let mut reader = crate::sansio::ResponseReader::new();
        let mut buf = [0u8; 1024];
        for _ in 0..100 {
            server.work(Some(Duration::from_millis(10))).unwrap();
            loop {
                match sys::read(fd, &mut buf) {
                    Ok(0) => {
                        reader.handle_eof().unwrap();
                        break;
                    }
                    Ok(n) => reader.handle_input(&buf[..n]).unwrap(),
                    Err(_) => break,
                }
            }
            if let Some(message) = reader.poll_message() {
                return parse_response(&message.to_bytes()).map(|response| response.value);
            }
        }
        panic!("no response");
    }

    fn echo_server() -> Server {
        let mut server = Server::new();
        server.add_method("echo", |_call: &mut Call<'_>, params: Vec<Value>| {
            Ok(Value::Array(params))
        });
        server
    }

    #[test]
    fn test_method_call() {
        let mut server = echo_server();
        let (_, fd) = connected(&mut server);
        let mut extra = Headers::new();
        extra.insert("Connection", "close");
        send(fd, "echo", &[Value::from(1), Value::from("two")], &extra);
        assert_eq!(
            receive(&mut server, fd),
            Ok(Value::array(vec![Value::from(1), Value::from("two")]))
        );
        assert!(server.dispatcher.is_empty());
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_unknown_method_and_handler_errors() {
        let mut server = echo_server();
        server.add_method("fail", |_call: &mut Call<'_>, _params: Vec<Value>| {
            Err(Error::protocol("broken"))
        });
        server.add_method("fault", |_call: &mut Call<'_>, _params: Vec<Value>| {
            Err(Error::fault(42, "bad things"))
        });

        let (_, fd) = connected(&mut server);
        send(fd, "nope", &[], &Headers::new());
        assert_eq!(
            receive(&mut server, fd),
            Err(Error::fault(-1, "unknown command: 'nope'"))
        );
        sys::close(fd).unwrap();

        let (_, fd) = connected(&mut server);
        send(fd, "fail", &[], &Headers::new());
        assert_eq!(receive(&mut server, fd), Err(Error::fault(-1, "broken")));
        sys::close(fd).unwrap();

        let (_, fd) = connected(&mut server);
        send(fd, "fault", &[], &Headers::new());
        assert_eq!(receive(&mut server, fd), Err(Error::fault(42, "bad things")));
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_keep_alive() {
        let mut server = echo_server();
        let (_, fd) = connected(&mut server);
        // HTTP/1.1 keeps the connection open by default.
        let extra = Headers::new();
        for i in 0..3 {
            send(fd, "echo", &[Value::from(i)], &extra);
            assert_eq!(
                receive(&mut server, fd),
                Ok(Value::array(vec![Value::from(i)]))
            );
            assert_eq!(server.dispatcher.len(), 1);
        }
        // The client hanging up ends the connection quietly.
        sys::close(fd).unwrap();
        server.work(Some(Duration::from_millis(10))).unwrap();
        assert!(server.dispatcher.is_empty());
    }

    #[test]
    fn test_authentication() {
        let mut server = echo_server();
        server.set_auth(|_uri, user, password| {
            Ok((user == Some("alice") && password == Some("secret"), "demo".to_string()))
        });

        let (_, fd) = connected(&mut server);
        send(fd, "echo", &[], &Headers::new());
        assert_eq!(
            receive(&mut server, fd),
            Err(Error::fault(-1, "authentication failed for domain 'demo'"))
        );
        sys::close(fd).unwrap();

        let (_, fd) = connected(&mut server);
        let mut extra = Headers::new();
        extra.insert(
            "Authorization",
            message::basic_credentials(Some("alice"), Some("secret")).unwrap(),
        );
        send(fd, "echo", &[], &extra);
        assert_eq!(receive(&mut server, fd), Ok(Value::array(vec![])));
        sys::close(fd).unwrap();

        let (_, fd) = connected(&mut server);
        let mut extra = Headers::new();
        extra.insert("Authorization", "Digest abc");
        send(fd, "echo", &[], &extra);
        assert_eq!(
            receive(&mut server, fd),
            Err(Error::fault(-1, "unsupported authentication method"))
        );
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_postpone() {
        let mut server = echo_server();
        let parked: Rc<RefCell<Option<ConnectionId>>> = Rc::new(RefCell::new(None));
        let sink = parked.clone();
        server.add_method("later", move |call: &mut Call<'_>, _params: Vec<Value>| {
            *sink.borrow_mut() = Some(call.connection());
            Err(Error::Postpone)
        });

        let (id, fd) = connected(&mut server);
        send(fd, "later", &[], &Headers::new());
        server.work(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(*parked.borrow(), Some(id));
        assert!(server.handle().is_postponed(id));
        assert!(server.dispatcher.is_empty());

        server.queue_response(id, &Value::from("done")).unwrap();
        assert_eq!(receive(&mut server, fd), Ok(Value::from("done")));
        assert_eq!(
            server.queue_response(id, &Value::from("again")),
            Err(Error::NotPostponed(id))
        );
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_postponed_fault() {
        let mut server = Server::new();
        server.add_method("later", |_call: &mut Call<'_>, _params: Vec<Value>| {
            Err(Error::Postpone)
        });
        let (id, fd) = connected(&mut server);
        send(fd, "later", &[], &Headers::new());
        server.work(Some(Duration::from_millis(20))).unwrap();
        server.queue_fault(id, 7, "too late").unwrap();
        assert_eq!(receive(&mut server, fd), Err(Error::fault(7, "too late")));
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_malformed_request_gets_a_fault() {
        let mut server = echo_server();
        let (_, fd) = connected(&mut server);
        let body = b"<?xml version=\"1.0\"?>\n<methodCall><nonsense/></methodCall>\n";
        let request = format!(
            "POST /RPC2 HTTP/1.0\r\nContent-length: {}\r\n\r\n",
            body.len()
        );
        sys::write(fd, request.as_bytes()).unwrap();
        sys::write(fd, body).unwrap();
        let err = receive(&mut server, fd).unwrap_err();
        assert!(matches!(err, Error::Fault { code: -1, .. }), "{:?}", err);
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_oversized_request_is_dropped() {
        let mut server = Server::with_config(Config::default().with_max_message_size(512));
        server.add_method("echo", |_call: &mut Call<'_>, params: Vec<Value>| {
            Ok(Value::Array(params))
        });

        let (_, fd) = connected(&mut server);
        send(fd, "echo", &[Value::from("x".repeat(100).as_str())], &Headers::new());
        assert_eq!(
            receive(&mut server, fd),
            Ok(Value::array(vec![Value::from("x".repeat(100).as_str())]))
        );

        send(fd, "echo", &[Value::from("x".repeat(1000).as_str())], &Headers::new());
        server.work(Some(Duration::from_millis(20))).unwrap();
        assert!(server.dispatcher.is_empty());
        let mut buf = [0u8; 64];
        match sys::read(fd, &mut buf) {
            Ok(0) => {}
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            Ok(n) => panic!("unexpected {} byte answer", n),
        }
        sys::close(fd).unwrap();
    }

    #[test]
    fn test_close_drops_everything() {
        let mut server = Server::bind_and_listen(0, 5).unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
        let (input, _, _) = server.active_fds();
        assert_eq!(input.len(), 1);
        server.close();
        assert_eq!(server.active_fds(), (vec![], vec![], vec![]));
        assert!(server.local_addr().is_err());
    }
}
