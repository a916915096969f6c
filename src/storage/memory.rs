use std::{collections::BTreeMap, io};

use parking_lot::RwLock;

use super::SnapshotStore;
use crate::{
    DbErr, Result,
    snapshot::{Snapshot, UpdateRecord},
    versioning::VersionId,
};

#[derive(Debug, Default)]
struct Versions {
    snapshots: BTreeMap<VersionId, Snapshot>,
    updates: BTreeMap<VersionId, Vec<UpdateRecord>>,
}

/// A `SnapshotStore` living entirely in memory, updates are listed in submission order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    versions: RwLock<Versions>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    async fn latest_version(&self) -> Result<VersionId> {
        let versions = self.versions.read();
        let latest = versions
            .snapshots
            .keys()
            .next_back()
            .cloned()
            .unwrap_or_else(VersionId::min);

        Ok(latest)
    }

    async fn contains(&self, version: &VersionId) -> Result<bool> {
        Ok(self.versions.read().snapshots.contains_key(version))
    }

    async fn load_snapshot(&self, version: &VersionId) -> Result<Snapshot> {
        self.versions
            .read()
            .snapshots
            .get(version)
            .cloned()
            .ok_or_else(|| DbErr::SnapshotNotFound(version.clone()))
    }

    async fn save_snapshot(&self, version: &VersionId, snapshot: &Snapshot) -> Result<()> {
        let mut versions = self.versions.write();
        versions.snapshots.insert(version.clone(), snapshot.clone());
        versions.updates.entry(version.clone()).or_default();
        Ok(())
    }

    async fn list_pending_updates(&self, version: &VersionId) -> Result<Vec<UpdateRecord>> {
        let versions = self.versions.read();
        Ok(versions.updates.get(version).cloned().unwrap_or_default())
    }

    async fn count_pending_updates(&self, version: &VersionId) -> Result<usize> {
        let versions = self.versions.read();
        Ok(versions.updates.get(version).map_or(0, Vec::len))
    }

    async fn put_update(&self, version: &VersionId, update: &UpdateRecord) -> Result<()> {
        let mut versions = self.versions.write();
        let Some(updates) = versions.updates.get_mut(version) else {
            return Err(DbErr::Storage(io::Error::new(
                io::ErrorKind::NotFound,
                format!("version {version} has no update area"),
            )));
        };

        updates.push(update.clone());
        Ok(())
    }
}
