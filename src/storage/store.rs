use crate::{
    Result,
    snapshot::{Snapshot, UpdateRecord},
    versioning::VersionId,
};

/// Persists model snapshots and the client updates submitted against them.
///
/// Each version owns a snapshot and an update area. The area must exist before
/// any update can be stored under that version.
#[allow(unused)]
#[trait_variant::make(SnapshotStore: Send)]
pub trait SnapshotStoreTemplate: Sync {
    /// Should return the greatest persisted version, or `VersionId::min()` if there is none.
    async fn latest_version(&self) -> Result<VersionId>;

    /// Should tell whether a snapshot was persisted under `version`.
    async fn contains(&self, version: &VersionId) -> Result<bool>;

    /// Should load the snapshot persisted under `version`.
    ///
    /// # Arguments
    /// * `version` - The version to load.
    ///
    /// # Returns
    /// The snapshot, `DbErr::SnapshotNotFound` if there is none or
    /// `DbErr::CorruptSnapshot` if it can't be decoded.
    async fn load_snapshot(&self, version: &VersionId) -> Result<Snapshot>;

    /// Should persist `snapshot` under `version` and then create the version's update area.
    ///
    /// Readers must observe either no snapshot or the complete one, never a partial write.
    ///
    /// # Arguments
    /// * `version` - The version to persist the snapshot under.
    /// * `snapshot` - The snapshot to persist.
    ///
    /// # Returns
    /// `DbErr::Storage` on any I/O error.
    async fn save_snapshot(&self, version: &VersionId, snapshot: &Snapshot) -> Result<()>;

    /// Should list every update stored under `version`.
    ///
    /// The order is stable within one call. A version without updates yields an empty vec.
    ///
    /// # Arguments
    /// * `version` - The version whose updates to list.
    ///
    /// # Returns
    /// The updates, `DbErr::Storage` on I/O errors or `DbErr::MalformedRecord`
    /// if an update can't be decoded.
    async fn list_pending_updates(&self, version: &VersionId) -> Result<Vec<UpdateRecord>>;

    /// Should count the updates stored under `version` without decoding them.
    async fn count_pending_updates(&self, version: &VersionId) -> Result<usize>;

    /// Should store `update` under `version`'s update area.
    ///
    /// # Arguments
    /// * `version` - The version the update was computed against.
    /// * `update` - The client's update.
    ///
    /// # Returns
    /// `DbErr::Storage` on I/O errors, including a missing update area.
    async fn put_update(&self, version: &VersionId, update: &UpdateRecord) -> Result<()>;
}
