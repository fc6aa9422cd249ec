//! Error types for radb operations.

use std::fmt;
use std::io;

/// Alias for `Result<T, radb::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by ADB client operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller-supplied deadline elapsed.
    ///
    /// Always distinct from other I/O failures so callers can retry with a
    /// larger budget.
    #[error("operation timed out")]
    Timeout,

    /// A shell command produced no output for longer than the idle window.
    ///
    /// Distinct from [`Error::Timeout`]: the overall budget may not have
    /// elapsed, the command just went quiet.
    #[error("no output within the idle window")]
    IdleTimeout,

    /// A received frame violated the protocol grammar.
    ///
    /// Fatal to the current exchange, never silently recovered.
    #[error("ADB protocol error: {message}")]
    Protocol {
        /// What was malformed.
        message: String,
        /// The underlying decode failure, when one exists.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server or daemon answered `FAIL`; `message` is its text verbatim.
    #[error("'{service}' failed: {message}")]
    AdbFail {
        /// The service request or transfer that was rejected.
        service: String,
        /// The remote error text, unmodified.
        message: String,
    },

    /// Every candidate server address failed; carries all causes.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A precondition violation detected before any bytes were sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An I/O error from the underlying channel.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Builds a [`Error::Protocol`] from a message alone.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a [`Error::Protocol`] retaining the decode failure as source.
    pub fn protocol_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<radb_proto::WireError> for Error {
    fn from(e: radb_proto::WireError) -> Self {
        match e {
            radb_proto::WireError::RequestTooLong(n) => {
                Self::InvalidArgument(format!("service request of {n} bytes is too long"))
            }
            other => Self::protocol_with_source("bad length prefix", other),
        }
    }
}

/// Aggregated failure after exhausting every candidate server address.
///
/// The attempts are kept in order so the message enumerates exactly what was
/// tried; no cause is ever collapsed into "last error wins".
#[derive(Debug)]
pub struct ConnectError {
    /// Each candidate tried, paired with why it failed.
    pub attempts: Vec<(String, io::Error)>,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot connect to ADB server, tried: ")?;
        for (i, (addr, cause)) in self.attempts.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{addr} ({cause})")?;
        }
        if self.attempts.is_empty() {
            write!(f, "(no candidate addresses)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        // The full cause set is in `attempts`; expose the first as source.
        self.attempts.first().map(|(_, e)| e as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_enumerates_every_attempt() {
        let err = ConnectError {
            attempts: vec![
                (
                    "127.0.0.1:5037".into(),
                    io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                ),
                (
                    "[::1]:5037".into(),
                    io::Error::new(io::ErrorKind::TimedOut, "timed out"),
                ),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:5037"));
        assert!(text.contains("[::1]:5037"));
        assert!(text.contains("refused"));
        assert!(text.contains("timed out"));
    }

    #[test]
    fn fail_message_kept_verbatim() {
        let err = Error::AdbFail {
            service: "sync send /data/x".into(),
            message: "No such file or directory".into(),
        };
        assert!(err.to_string().contains("No such file or directory"));
    }
}
