use std::io;

/// Every failure the library reports.
///
/// Faults and postponements travel through the same channel as real errors,
/// use [`Error::is_fault`] and [`Error::is_postpone`] to tell them apart.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {1}")]
    Io(io::ErrorKind, String),
    #[error("Connection Closed")]
    ConnectionClosed,
    #[error("{message}")]
    Syntax { line: usize, message: String },
    #[error("EOS error while decoding xml")]
    Eos,
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    InvalidValue(String),
    #[error("Fault {code}: {message}")]
    Fault { code: i32, message: String },
    #[error("response postponed")]
    Postpone,
    #[error("Timeout Error")]
    Timeout,
    #[error("unknown command: '{0}'")]
    UnknownMethod(String),
    #[error("authentication failed for domain '{realm}'")]
    AuthenticationFailed { realm: String },
    #[error("client already executing")]
    ClientBusy,
    #[error("no postponed response for connection {0}")]
    NotPostponed(u64),
}

impl Error {
    pub fn fault<S: Into<String>>(code: i32, message: S) -> Self {
        Error::Fault {
            code,
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Error::Protocol(message.into())
    }

    pub fn syntax<S: Into<String>>(line: usize, message: S) -> Self {
        Error::Syntax {
            line,
            message: message.into(),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Error::Fault { .. })
    }

    pub fn is_postpone(&self) -> bool {
        matches!(self, Error::Postpone)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// The `(code, message)` pair sent to a peer when this error ends a request.
    pub fn as_fault(&self) -> (i32, String) {
        match self {
            Error::Fault { code, message } => (*code, message.clone()),
            e => (-1, e.to_string()),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset => Error::ConnectionClosed,
            io::ErrorKind::TimedOut => Error::Timeout,
            kind => Error::Io(kind, e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping() {
        let e: Error = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(e, Error::ConnectionClosed);

        let e: Error = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(e.is_timeout());

        let e: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(e, Error::Io(io::ErrorKind::NotFound, _)));
    }

    #[test]
    fn test_as_fault() {
        assert_eq!(
            Error::fault(4, "too many").as_fault(),
            (4, "too many".to_string())
        );
        assert_eq!(
            Error::UnknownMethod("nope".into()).as_fault(),
            (-1, "unknown command: 'nope'".to_string())
        );
    }
}
