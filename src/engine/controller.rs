use std::{
    fmt::{self, Display},
    num::NonZeroUsize,
    time::Duration,
};

use log::{debug, info};
use parking_lot::Mutex;
use tokio::{task, time};

use super::EngineState;
use crate::{
    DbErr, Result,
    aggregation::aggregate,
    snapshot::{Snapshot, UpdateRecord},
    storage::SnapshotStore,
    versioning::{VersionAllocator, VersionId},
};

/// Why a call to `Controller::maybe_run_cycle` did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    InsufficientUpdates { pending: usize, required: usize },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyRunning => f.write_str("an aggregation cycle is already running"),
            SkipReason::InsufficientUpdates { pending, required } => {
                write!(f, "{pending} pending updates of the {required} required")
            }
        }
    }
}

/// The outcome of a non failing call to `Controller::maybe_run_cycle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(VersionId),
}

/// Orchestrates aggregation cycles over a `SnapshotStore`.
///
/// At most one cycle runs at a time within a process. The guard is in-memory
/// only, running many controllers over the same store is not supported.
pub struct Controller<S: SnapshotStore> {
    store: S,
    state: EngineState,
    allocator: Mutex<VersionAllocator>,
    cycle_timeout: Option<Duration>,
}

impl<S: SnapshotStore> Controller<S> {
    /// Opens a new `Controller` over `store`.
    ///
    /// # Arguments
    /// * `store` - The snapshot store.
    /// * `initial` - The version to start at, defaults to the store's latest version.
    ///
    /// # Returns
    /// A new `Controller` instance, or an error if the store can't be read, the
    /// versions in it can't be allocated after or `initial` has no snapshot.
    pub async fn open(store: S, initial: Option<VersionId>) -> Result<Self> {
        let latest = store.latest_version().await?;
        let mut allocator = VersionAllocator::new(&latest)?;

        let active = match initial {
            Some(version) => {
                allocator.observe(&version)?;

                if !version.is_min() && !store.contains(&version).await? {
                    return Err(DbErr::InvalidConfig(format!(
                        "initial version {version} has no snapshot"
                    )));
                }

                version
            }
            None => latest,
        };

        info!(version = active.as_str(); "model db opened");

        Ok(Self {
            store,
            state: EngineState::new(active),
            allocator: Mutex::new(allocator),
            cycle_timeout: None,
        })
    }

    /// Bounds the I/O of every cycle, a timed out cycle fails with `DbErr::Timeout`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.cycle_timeout = Some(limit);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn current_version(&self) -> VersionId {
        self.state.active()
    }

    pub fn is_aggregating(&self) -> bool {
        self.state.is_updating()
    }

    /// Loads the snapshot clients should currently train against.
    pub async fn current_snapshot(&self) -> Result<(VersionId, Snapshot)> {
        let version = self.state.active();
        let snapshot = self.store.load_snapshot(&version).await?;
        Ok((version, snapshot))
    }

    /// Publishes the first snapshot of an empty store.
    ///
    /// # Arguments
    /// * `snapshot` - The initial model.
    ///
    /// # Returns
    /// The new active version, or `DbErr::AlreadyInitialized` if a snapshot is
    /// already active, persisted or being aggregated.
    pub async fn initialize(&self, snapshot: Snapshot) -> Result<VersionId> {
        let Some(_guard) = self.state.try_begin() else {
            return Err(DbErr::AlreadyInitialized(self.state.active()));
        };

        let active = self.state.active();
        if !active.is_min() {
            return Err(DbErr::AlreadyInitialized(active));
        }

        let latest = self.store.latest_version().await?;
        if !latest.is_min() {
            return Err(DbErr::AlreadyInitialized(latest));
        }

        let version = self.publish(&snapshot).await?;
        info!(version = version.as_str(); "initial snapshot published");
        Ok(version)
    }

    /// Stores a client update for the next aggregation cycle.
    ///
    /// An update accepted right before a cycle advances the version stays in the
    /// previous version's area and is never aggregated.
    ///
    /// # Arguments
    /// * `version` - The version the client trained against.
    /// * `update` - The client's update.
    ///
    /// # Returns
    /// `DbErr::StaleVersion` if `version` isn't the active version,
    /// `DbErr::VarCountMismatch` or `DbErr::ShapeMismatch` if the update doesn't
    /// match the active snapshot, or a storage error.
    pub async fn submit_update(&self, version: &VersionId, update: &UpdateRecord) -> Result<()> {
        let active = self.state.active();
        if *version != active {
            return Err(DbErr::StaleVersion {
                got: version.clone(),
                active,
            });
        }

        let base = self.store.load_snapshot(&active).await?;
        base.check_layout(update.vars())?;
        self.store.put_update(&active, update).await?;

        debug!(version = active.as_str(), examples = update.num_examples(); "update accepted");
        Ok(())
    }

    /// Runs an aggregation cycle if none is in flight and enough updates are pending.
    ///
    /// On failure the active version is left untouched and the pending updates
    /// will be part of the next cycle.
    ///
    /// # Arguments
    /// * `min_updates` - The minimum amount of pending updates to aggregate.
    ///
    /// # Returns
    /// Whether the cycle was skipped or the new active version, or the error of the failed step.
    pub async fn maybe_run_cycle(&self, min_updates: NonZeroUsize) -> Result<CycleOutcome> {
        let Some(_guard) = self.state.try_begin() else {
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let active = self.state.active();
        let cycle = self.run_cycle(&active, min_updates);

        match self.cycle_timeout {
            Some(limit) => time::timeout(limit, cycle)
                .await
                .map_err(|_| DbErr::Timeout(limit))?,
            None => cycle.await,
        }
    }

    async fn run_cycle(
        &self,
        active: &VersionId,
        min_updates: NonZeroUsize,
    ) -> Result<CycleOutcome> {
        let pending = self.store.count_pending_updates(active).await?;
        if pending < min_updates.get() {
            let reason = SkipReason::InsufficientUpdates {
                pending,
                required: min_updates.get(),
            };
            return Ok(CycleOutcome::Skipped(reason));
        }

        let base = self.store.load_snapshot(active).await?;
        let updates = self.store.list_pending_updates(active).await?;
        let nupdates = updates.len();

        let snapshot = task::spawn_blocking(move || aggregate(&base, &updates))
            .await
            .map_err(|e| DbErr::Aborted(e.to_string()))??;

        let version = self.publish(&snapshot).await?;

        info!(
            from = active.as_str(),
            to = version.as_str(),
            updates = nupdates;
            "aggregation cycle completed"
        );

        Ok(CycleOutcome::Completed(version))
    }

    /// Persists `snapshot` under a new version and makes it the active one.
    ///
    /// Must only be called while holding the in-flight guard.
    async fn publish(&self, snapshot: &Snapshot) -> Result<VersionId> {
        let version = self.allocator.lock().next();

        if self.store.contains(&version).await? {
            return Err(DbErr::VersionCollision(version));
        }

        self.store.save_snapshot(&version, snapshot).await?;
        self.state.advance(version.clone());
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::Tensor, storage::MemoryStore};

    fn min_updates(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    async fn seeded(value: f32) -> Controller<MemoryStore> {
        let controller = Controller::open(MemoryStore::new(), None).await.unwrap();
        let snapshot = Snapshot::new(vec![Tensor::scalar(value)]);
        controller.initialize(snapshot).await.unwrap();
        controller
    }

    #[tokio::test]
    async fn opens_at_latest_version() {
        let store = MemoryStore::new();
        let version = VersionId::new("1540000000000").unwrap();
        let snapshot = Snapshot::new(vec![Tensor::scalar(1.)]);
        store.save_snapshot(&version, &snapshot).await.unwrap();

        let controller = Controller::open(store, None).await.unwrap();
        assert_eq!(controller.current_version(), version);
    }

    #[tokio::test]
    async fn initial_version_must_be_allocatable_and_persisted() {
        let foreign = VersionId::new("abc").unwrap();
        let err = Controller::open(MemoryStore::new(), Some(foreign))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbErr::InvalidConfig(_)));

        let missing = VersionId::new("1540000000000").unwrap();
        let err = Controller::open(MemoryStore::new(), Some(missing))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DbErr::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn initialize_only_once() {
        let controller = seeded(1.).await;
        let version = controller.current_version();
        assert!(!version.is_min());

        let err = controller
            .initialize(Snapshot::new(vec![Tensor::scalar(2.)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbErr::AlreadyInitialized(v) if v == version));
    }

    #[tokio::test]
    async fn empty_store_skips_cycles() {
        let controller = Controller::open(MemoryStore::new(), None).await.unwrap();

        let outcome = controller.maybe_run_cycle(min_updates(1)).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Skipped(SkipReason::InsufficientUpdates {
                pending: 0,
                required: 1
            })
        );
        assert!(!controller.is_aggregating());
    }

    #[tokio::test]
    async fn completes_weighted_cycle() {
        let controller = seeded(5.).await;
        let v0 = controller.current_version();

        controller
            .submit_update(&v0, &UpdateRecord::new(1, vec![Tensor::scalar(2.)]))
            .await
            .unwrap();
        controller
            .submit_update(&v0, &UpdateRecord::new(3, vec![Tensor::scalar(4.)]))
            .await
            .unwrap();

        let outcome = controller.maybe_run_cycle(min_updates(2)).await.unwrap();
        let CycleOutcome::Completed(v1) = outcome else {
            panic!("expected a completed cycle");
        };

        assert!(v1 > v0);
        assert_eq!(controller.current_version(), v1);

        let (version, snapshot) = controller.current_snapshot().await.unwrap();
        assert_eq!(version, v1);
        assert_eq!(snapshot, Snapshot::new(vec![Tensor::scalar(8.5)]));
    }

    #[tokio::test]
    async fn rejects_stale_and_misshaped_updates() {
        let controller = seeded(0.).await;
        let active = controller.current_version();
        let update = UpdateRecord::new(1, vec![Tensor::scalar(1.)]);

        let err = controller
            .submit_update(&VersionId::min(), &update)
            .await
            .unwrap_err();
        assert!(matches!(err, DbErr::StaleVersion { .. }));

        let vector = Tensor::from_shape_vec(&[2], vec![1., 2.]).unwrap();
        let misshaped = UpdateRecord::new(1, vec![vector]);
        let err = controller
            .submit_update(&active, &misshaped)
            .await
            .unwrap_err();
        assert!(matches!(err, DbErr::ShapeMismatch { index: 0, .. }));

        let pending = controller.store().count_pending_updates(&active).await;
        assert_eq!(pending.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_weight_cycle_fails_and_releases() {
        let controller = seeded(1.).await;
        let v0 = controller.current_version();
        controller
            .submit_update(&v0, &UpdateRecord::new(0, vec![Tensor::scalar(3.)]))
            .await
            .unwrap();

        let err = controller.maybe_run_cycle(min_updates(1)).await.unwrap_err();
        assert!(matches!(err, DbErr::EmptyWeight));
        assert_eq!(controller.current_version(), v0);
        assert!(!controller.is_aggregating());
    }
}
