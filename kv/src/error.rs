use std::fmt::{Display, Formatter};

/// The result type used throughout the `mvkv` core.
pub type CResult<T> = std::result::Result<T, Error>;

/// Errors produced by the storage engine, change log, node, and replication
/// layers. HTTP-facing code in `mvkv-cli` maps these onto the JSON error
/// envelope of the HTTP surface.
#[derive(Debug)]
pub enum Error {
    /// The key is absent, or its latest version is a tombstone.
    NotFound,

    /// The key is empty, or contains a 0x00 byte.
    InvalidKey(String),

    /// CAS/append envelope resolution recursed past depth 10.
    DeepCas,

    /// The clock is behind the last change-log timestamp at open time.
    TimeSkew { clock: i64, log_tail: i64 },

    /// The change log is not block-aligned, or a fragment length is invalid.
    Corruption(String),

    /// I/O or network failure; callers may retry.
    Transient(String),

    /// Programmer error / invariant violation that isn't one of the above.
    Internal(String),

    /// A lock in the per-key write-lock table was poisoned by a panicking
    /// holder.
    Lock,

    Io(std::io::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "key not found"),
            Error::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            Error::DeepCas => write!(f, "cas/append envelope chain exceeded depth 10"),
            Error::TimeSkew { clock, log_tail } => write!(
                f,
                "clock skew detected: clock={} is behind log tail={}",
                clock, log_tail
            ),
            Error::Corruption(msg) => write!(f, "corruption: {}", msg),
            Error::Transient(msg) => write!(f, "transient error: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::Lock => write!(f, "write lock poisoned"),
            Error::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Lock
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("json: {}", err))
    }
}

impl Error {
    /// True if the request should be retried by the caller (used by the
    /// replication worker to decide whether to back off and retry vs. give
    /// up on a batch).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Io(_))
    }

    /// True if the error is fatal at node-open time: corruption and
    /// time-skew mean this node must not start serving traffic.
    pub fn is_fatal_at_open(&self) -> bool {
        matches!(self, Error::Corruption(_) | Error::TimeSkew { .. })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_messages_are_non_empty() {
        let errs = vec![
            Error::NotFound,
            Error::InvalidKey("contains 0x00".into()),
            Error::DeepCas,
            Error::TimeSkew { clock: 1, log_tail: 2 },
            Error::Corruption("short read".into()),
            Error::Transient("connection reset".into()),
            Error::Internal("unreachable".into()),
            Error::Lock,
        ];
        for err in errs {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Transient("x".into()).is_transient());
        assert!(!Error::NotFound.is_transient());
        assert!(Error::Corruption("x".into()).is_fatal_at_open());
        assert!(Error::TimeSkew { clock: 0, log_tail: 1 }.is_fatal_at_open());
        assert!(!Error::NotFound.is_fatal_at_open());
    }
}
