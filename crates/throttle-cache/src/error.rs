use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The operation a wrapped [`Error::Op`] failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Asking a cached entry whether its backing source changed.
    Update,
    /// Reloading a stale entry.
    Reload,
    /// Replacing the value of an entry.
    Replace,
    /// Checking the modification time of a file-backed entry.
    CheckUpdate,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Update => "update",
            Op::Reload => "reload",
            Op::Replace => "replace",
            Op::CheckUpdate => "check update",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the cache layer and its entries.
///
/// Collaborator failures (factories, unmarshal and marshal functions) are carried as
/// [`anyhow::Error`] so that the original cause stays inspectable via
/// [`std::error::Error::source`] or [`anyhow::Error::downcast_ref`].
#[derive(Debug, Error)]
pub enum Error {
    /// The backing file could not be opened or inspected while loading.
    #[error("failed to load `{}`", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The unmarshal collaborator rejected the persisted bytes.
    #[error("malformed: {0}")]
    Unmarshal(#[source] anyhow::Error),
    /// The marshal collaborator failed to serialize a value.
    #[error("failed to marshal value: {0}")]
    Marshal(#[source] anyhow::Error),
    /// A marshalled value could not be written to its backing file.
    #[error("failed to persist `{}`", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The entry outlived its deadline or was already released.
    #[error("cache already expired")]
    Expired,
    /// A key that is not managed by the cache.
    #[error("key {key} not found")]
    NotFound { key: String },
    /// Tags the operation an underlying error happened in.
    #[error("{op}: {source}")]
    Op {
        op: Op,
        #[source]
        source: Box<Error>,
    },
    /// Background expiration was requested outside of a tokio runtime.
    #[error("sweeper requires a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Any other failure, typically coming out of a [`Factory`](crate::Factory).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Wraps `self`, tagging it with the operation it happened in.
    pub fn during(self, op: Op) -> Self {
        Error::Op {
            op,
            source: Box::new(self),
        }
    }

    /// The operation this error is tagged with, if any.
    pub fn op(&self) -> Option<Op> {
        match self {
            Error::Op { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Walks through [`Error::Op`] wrappers to the error that caused them.
    pub fn root(&self) -> &Error {
        match self {
            Error::Op { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is (or wraps) [`Error::Expired`].
    pub fn is_expired(&self) -> bool {
        matches!(self.root(), Error::Expired)
    }
}

/// A [`Result`](std::result::Result) defaulting to the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_op_display() {
        let err = Error::NotFound {
            key: "\"foo\"".into(),
        }
        .during(Op::Replace);
        assert_eq!(err.to_string(), "replace: key \"foo\" not found");
        assert_eq!(err.op(), Some(Op::Replace));
    }

    #[test]
    fn test_source_is_preserved() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = Error::Io(io_err).during(Op::CheckUpdate).during(Op::Update);

        assert_eq!(err.to_string(), "update: check update: gone");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "check update: gone");

        match err.root() {
            Error::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected root error: {other:?}"),
        }
    }

    #[test]
    fn test_is_expired() {
        assert!(Error::Expired.is_expired());
        assert!(Error::Expired.during(Op::Reload).is_expired());
        assert!(!Error::Other(anyhow::anyhow!("nope")).is_expired());
    }
}
