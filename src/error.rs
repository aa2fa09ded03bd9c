use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::encoding::format;

/// emberdb errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An update or delete referenced a key that does not exist.
    KeyNotFound,
    /// A unique index rejected an entry whose key is already present under a
    /// different row id.
    DuplicateKey(String),
    /// A three-way merge found conflicting edits. Carries the first
    /// conflicting key; the merge leaves no partial result behind.
    MergeConflict(Vec<u8>),
    /// A bulk index build received keys out of ascending (key, row id) order.
    OrderingViolation(String),
    /// Invalid caller input, typically an empty key, a non-normal row id, or
    /// an out-of-bounds damage range.
    InvalidArgument(String),
    /// An internal invariant failure, e.g. a poisoned lock.
    Internal(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::DuplicateKey(msg) => write!(f, "duplicate key: {msg}"),
            Error::MergeConflict(key) => {
                write!(f, "conflicting changes prevent merge at key {}", format::Raw::bytes(key))
            }
            Error::OrderingViolation(msg) => write!(f, "ordering violation: {msg}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidArgument for the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidArgument(format!($($args)*)).into() };
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}
