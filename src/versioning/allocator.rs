use std::time::{SystemTime, UNIX_EPOCH};

use super::VersionId;
use crate::{DbErr, Result};

/// The amount of digits of every allocated version id.
///
/// Fixed width keeps lexicographic and numeric order in agreement.
pub const VERSION_WIDTH: usize = 13;

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Mints strictly increasing version ids.
///
/// Ids are zero padded millisecond timestamps. Whenever the clock hasn't moved
/// past the last allocated id (same millisecond, clock skew) the counter is
/// bumped instead, so every id is greater than the previous one.
#[derive(Debug)]
pub struct VersionAllocator {
    last: u64,
    clock: fn() -> u64,
}

impl VersionAllocator {
    /// Creates a new `VersionAllocator` driven by the system clock.
    ///
    /// # Arguments
    /// * `floor` - Every allocated id will be greater than this one.
    ///
    /// # Returns
    /// A new `VersionAllocator` or `DbErr::InvalidConfig` if `floor` is neither
    /// the sentinel nor a `VERSION_WIDTH` digit id.
    pub fn new(floor: &VersionId) -> Result<Self> {
        Self::with_clock(floor, unix_millis)
    }

    /// Creates a new `VersionAllocator` with a custom clock.
    ///
    /// # Arguments
    /// * `floor` - Every allocated id will be greater than this one.
    /// * `clock` - Returns the current time in milliseconds.
    ///
    /// # Returns
    /// A new `VersionAllocator` or `DbErr::InvalidConfig` if `floor` is neither
    /// the sentinel nor a `VERSION_WIDTH` digit id.
    pub fn with_clock(floor: &VersionId, clock: fn() -> u64) -> Result<Self> {
        let last = floor_value(floor)?;
        Ok(Self { last, clock })
    }

    /// Allocates a new version id.
    ///
    /// # Returns
    /// An id strictly greater than the floor and every id allocated before.
    pub fn next(&mut self) -> VersionId {
        self.last = (self.clock)().max(self.last + 1);
        VersionId(format!("{:0width$}", self.last, width = VERSION_WIDTH))
    }

    /// Moves the floor forward, ignoring `floor` if it's behind the last allocated id.
    ///
    /// # Arguments
    /// * `floor` - A version known to exist.
    ///
    /// # Returns
    /// `DbErr::InvalidConfig` if `floor` is neither the sentinel nor a
    /// `VERSION_WIDTH` digit id, ids allocated after it wouldn't sort above it.
    pub fn observe(&mut self, floor: &VersionId) -> Result<()> {
        self.last = self.last.max(floor_value(floor)?);
        Ok(())
    }
}

fn floor_value(floor: &VersionId) -> Result<u64> {
    if floor.is_min() {
        return Ok(0);
    }

    parse_canonical(floor).ok_or_else(|| {
        DbErr::InvalidConfig(format!(
            "version {floor} is not a {VERSION_WIDTH} digit id, can't allocate after it"
        ))
    })
}

fn parse_canonical(version: &VersionId) -> Option<u64> {
    let id = version.as_str();

    if id.len() != VERSION_WIDTH || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    id.parse().ok()
}
