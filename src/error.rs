use std::{
    error::Error,
    fmt::{self, Display},
    io,
    time::Duration,
};

use crate::versioning::VersionId;

/// The result type used across the whole crate.
pub type Result<T> = std::result::Result<T, DbErr>;

/// The model database's error type.
#[derive(Debug)]
pub enum DbErr {
    /// A tensor or update record failed validation while decoding.
    MalformedRecord(String),
    VarCountMismatch {
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        index: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    SnapshotNotFound(VersionId),
    CorruptSnapshot {
        version: VersionId,
        reason: String,
    },
    /// Any I/O failure while reading, writing, listing or creating store entries.
    Storage(io::Error),
    EmptyWeight,
    NoUpdates,
    VersionCollision(VersionId),
    StaleVersion {
        got: VersionId,
        active: VersionId,
    },
    AlreadyInitialized(VersionId),
    Timeout(Duration),
    /// The blocking aggregation task panicked or was cancelled.
    Aborted(String),
    InvalidConfig(String),
}

impl Display for DbErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbErr::MalformedRecord(reason) => write!(f, "malformed record: {reason}"),
            DbErr::VarCountMismatch { got, expected } => write!(
                f,
                "variable count mismatch, got {got} and expected {expected}"
            ),
            DbErr::ShapeMismatch {
                index,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch at variable {index}, got {got:?} and expected {expected:?}"
            ),
            DbErr::SnapshotNotFound(version) => write!(f, "snapshot {version} not found"),
            DbErr::CorruptSnapshot { version, reason } => {
                write!(f, "snapshot {version} is corrupt: {reason}")
            }
            DbErr::Storage(e) => write!(f, "storage failure: {e}"),
            DbErr::EmptyWeight => f.write_str("the updates' total example count is zero"),
            DbErr::NoUpdates => f.write_str("there are no updates to aggregate"),
            DbErr::VersionCollision(version) => {
                write!(f, "allocated version {version} already exists in the store")
            }
            DbErr::StaleVersion { got, active } => write!(
                f,
                "update targets version {got} but the active version is {active}"
            ),
            DbErr::AlreadyInitialized(version) => {
                write!(f, "the store already holds snapshot {version}")
            }
            DbErr::Timeout(limit) => write!(f, "aggregation cycle timed out after {limit:?}"),
            DbErr::Aborted(reason) => write!(f, "aggregation task aborted: {reason}"),
            DbErr::InvalidConfig(reason) => write!(f, "invalid config: {reason}"),
        }
    }
}

impl Error for DbErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DbErr::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DbErr {
    fn from(value: io::Error) -> Self {
        Self::Storage(value)
    }
}
