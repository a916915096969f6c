use std::{
    io,
    path::{Path, PathBuf},
};

use futures::future::try_join_all;
use log::{debug, warn};
use serde::Serialize;
use tokio::{fs, io::AsyncWriteExt};

use super::SnapshotStore;
use crate::{
    DbErr, Result,
    snapshot::{Snapshot, SnapshotRecord, UpdateEntry, UpdateRecord},
    versioning::{VersionId, unix_millis},
};

const JSON_EXT: &str = "json";
const TMP_EXT: &str = "tmp";

/// A `SnapshotStore` backed by a directory of JSON files.
///
/// Layout:
/// * `<dir>/<version>.json` holds the snapshot `{"vars": [...]}`.
/// * `<dir>/<version>/<key>.json` holds one update `{"numExamples": n, "vars": [...]}`.
///
/// Only all-digit file stems are versions. Every file is written to a `.tmp`
/// sibling first and renamed into place, so readers never observe partial writes.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a `FileStore`, creating its directory if needed.
    ///
    /// # Arguments
    /// * `dir` - The root directory of the store.
    ///
    /// # Returns
    /// A new `FileStore` instance or `DbErr::Storage` if the directory can't be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, version: &VersionId) -> PathBuf {
        self.dir.join(format!("{version}.{JSON_EXT}"))
    }

    fn updates_dir(&self, version: &VersionId) -> PathBuf {
        self.dir.join(version.as_str())
    }

    /// Lists the update files under `version`, sorted by name.
    ///
    /// A missing update area is treated as an empty one.
    async fn update_paths(&self, version: &VersionId) -> Result<Vec<PathBuf>> {
        let dir = self.updates_dir(version);

        match json_stems(&dir).await {
            Ok(stems) => Ok(stems
                .into_iter()
                .map(|stem| dir.join(format!("{stem}.{JSON_EXT}")))
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SnapshotStore for FileStore {
    async fn latest_version(&self) -> Result<VersionId> {
        let latest = json_stems(&self.dir)
            .await?
            .into_iter()
            .filter(|stem| stem.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|stem| VersionId::new(stem).ok())
            .fold(VersionId::min(), |acc, version| acc.max(version));

        Ok(latest)
    }

    async fn contains(&self, version: &VersionId) -> Result<bool> {
        Ok(fs::try_exists(self.snapshot_path(version)).await?)
    }

    async fn load_snapshot(&self, version: &VersionId) -> Result<Snapshot> {
        let bytes = match fs::read(self.snapshot_path(version)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DbErr::SnapshotNotFound(version.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| DbErr::CorruptSnapshot {
            version: version.clone(),
            reason,
        };

        let record: SnapshotRecord =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

        Snapshot::decode(record).map_err(|e| corrupt(e.to_string()))
    }

    async fn save_snapshot(&self, version: &VersionId, snapshot: &Snapshot) -> Result<()> {
        // The rename of the snapshot file publishes the version, so it goes last.
        fs::create_dir_all(self.updates_dir(version)).await?;
        write_json(&self.snapshot_path(version), &snapshot.encode()).await?;

        debug!(version = version.as_str(); "snapshot persisted");
        Ok(())
    }

    async fn list_pending_updates(&self, version: &VersionId) -> Result<Vec<UpdateRecord>> {
        let paths = self.update_paths(version).await?;
        try_join_all(paths.iter().map(|path| read_update(path))).await
    }

    async fn count_pending_updates(&self, version: &VersionId) -> Result<usize> {
        Ok(self.update_paths(version).await?.len())
    }

    async fn put_update(&self, version: &VersionId, update: &UpdateRecord) -> Result<()> {
        let key = format!("{}-{:016x}", unix_millis(), rand::random::<u64>());
        let path = self
            .updates_dir(version)
            .join(format!("{key}.{JSON_EXT}"));

        write_json(&path, &update.encode()).await
    }
}

/// Returns the sorted file stems of every `.json` file directly inside `dir`.
async fn json_stems(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut stems = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(JSON_EXT) {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            stems.push(stem.to_string());
        }
    }

    stems.sort_unstable();
    Ok(stems)
}

async fn read_update(path: &Path) -> Result<UpdateRecord> {
    let bytes = fs::read(path).await?;
    let entry: UpdateEntry = serde_json::from_slice(&bytes).map_err(|e| {
        warn!("malformed update at {}: {e}", path.display());
        DbErr::MalformedRecord(format!("{}: {e}", path.display()))
    })?;

    UpdateRecord::decode(entry)
}

/// Atomically replaces `path` with the JSON encoding of `value`.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| DbErr::Storage(io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{TMP_EXT}"));
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
