/// Settings shared by the dispatcher, clients and servers.
///
/// A `Config` is cloned into every constructor that needs it, nothing is
/// read from process-wide state.
///
/// # Examples
///
/// ```
/// use xmlrpc::Config;
///
/// let config = Config::default().with_read_size(512).with_listen_queue(16);
/// assert_eq!(config.read_size, 512);
/// assert_eq!(config.listen_queue, 16);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bytes requested from the socket per `read()` call.
    pub read_size: usize,
    /// Backlog passed to `listen()`.
    pub listen_queue: i32,
    /// Sent as `User-Agent` by clients and `Server` by servers.
    pub user_agent: String,
    /// Overrides the `log` target of every record the library emits.
    pub log_target: Option<String>,
    /// Largest request or response, header included, a reader accepts.
    pub max_message_size: usize,
}

/// Default for [`Config::max_message_size`].
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Config {
            read_size: 4096,
            listen_queue: 5,
            user_agent: concat!("xmlrpc-rust/", env!("CARGO_PKG_VERSION")).to_string(),
            log_target: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    pub fn with_listen_queue(mut self, listen_queue: i32) -> Self {
        self.listen_queue = listen_queue;
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_log_target<S: Into<String>>(mut self, target: S) -> Self {
        self.log_target = Some(target.into());
        self
    }

    pub(crate) fn target(&self) -> &str {
        self.log_target.as_deref().unwrap_or("xmlrpc")
    }
}
