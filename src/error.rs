use std::fmt;

use crate::clock;

/// Protocol-level error taxonomy shared by client and server paths.
///
/// `Validation`, `Temporal` and `Identity` are always fatal to the request
/// at hand; `Overload` may be retried by the caller; `Transport` carries the
/// underlying cause of a failed exchange.
#[derive(Debug)]
pub enum Error {
    /// Malformed identifiers or artifact structure.
    Validation(String),
    /// Timestamp or signature outside the clock window. Both compared times
    /// are kept so a possible falseticker can be diagnosed.
    Temporal {
        what: String,
        stamp: i64,
        now: i64,
    },
    /// Signature made by an unexpected key. Surfaced distinctly because it
    /// indicates potential impersonation rather than corruption.
    Identity { expected: String, got: String },
    /// Signing admission timed out; the server is saturated.
    Overload,
    /// Connection failure or unexpected HTTP status.
    Transport(String),
    /// GnuPG invocation or output parsing failure.
    Gpg(String),
    Io(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "validation error: {}", msg),
            Error::Temporal { what, stamp, now } => write!(
                f,
                "{} timestamp {} ({}) is off by {} seconds from local time {} ({}); \
                 possible falseticker, check both clocks",
                what,
                stamp,
                clock::time_str(*stamp),
                stamp - now,
                now,
                clock::time_str(*now)
            ),
            Error::Identity { expected, got } => write!(
                f,
                "signature made with key {} but expected {} -- refusing",
                got, expected
            ),
            Error::Overload => write!(f, "too many concurrent signing requests"),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Gpg(msg) => write!(f, "gpg error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
