use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::contracts::statement::QueryKind;

/// Boxed error returned by backend collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used by every keychain operation.
pub type KeychainResult<T> = Result<T, KeychainError>;

/// Keychain operation, carried by errors and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Next,
    NextN,
    Last,
    Forward,
    CreateTable,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Next => "fetch next value",
            Self::NextN => "fetch next values",
            Self::Last => "fetch last value",
            Self::Forward => "forward value",
            Self::CreateTable => "create table",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum KeychainError {
    #[error("connect to the database: {0}")]
    Connect(#[source] BoxError),

    #[error("{operation} {key}: acquire connection: {source}")]
    Connection {
        operation: Operation,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("generate the {kind} query: {reason}")]
    QueryGeneration { kind: QueryKind, reason: String },

    #[error("{operation} {key}: {source}")]
    Execution {
        operation: Operation,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} {key}: deadline of {timeout:?} exceeded")]
    DeadlineExceeded {
        operation: Operation,
        key: String,
        timeout: Duration,
    },

    #[error("close connection provider: {0}")]
    Close(#[source] BoxError),

    #[error("{operation} {key}: sequence overflow")]
    Overflow { operation: Operation, key: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl KeychainError {
    pub(crate) fn connection(operation: Operation, key: &str, source: BoxError) -> Self {
        Self::Connection {
            operation,
            key: key.to_owned(),
            source,
        }
    }

    pub(crate) fn execution(operation: Operation, key: &str, source: impl Into<BoxError>) -> Self {
        Self::Execution {
            operation,
            key: key.to_owned(),
            source: source.into(),
        }
    }

    pub(crate) fn overflow(operation: Operation, key: &str) -> Self {
        Self::Overflow {
            operation,
            key: key.to_owned(),
        }
    }

    /// Returns true when the error came from an expired deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}
