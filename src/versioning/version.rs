use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{DbErr, Result};

/// Identifies a snapshot, versions are totally ordered by lexicographic comparison.
///
/// Ids double as file names inside a `FileStore`, so only ASCII alphanumerics,
/// `-` and `_` are allowed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(pub(super) String);

impl VersionId {
    const SENTINEL: &str = "0";

    /// Creates a new `VersionId`.
    ///
    /// # Arguments
    /// * `id` - The textual id.
    ///
    /// # Returns
    /// The version or `DbErr::MalformedRecord` if `id` is empty or has invalid characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(DbErr::MalformedRecord(format!("invalid version id {id:?}")));
        }

        Ok(Self(id))
    }

    /// The "no snapshot yet" sentinel, lower than every allocated version.
    pub fn min() -> Self {
        Self(Self::SENTINEL.to_string())
    }

    pub fn is_min(&self) -> bool {
        self.0 == Self::SENTINEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionId {
    type Error = DbErr;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.0
    }
}
