use std::{future::Future, num::NonZeroUsize, time::Duration};

use log::{debug, error, info};
use tokio::time::{self, MissedTickBehavior};

use super::{Controller, CycleOutcome};
use crate::storage::SnapshotStore;

/// Calls `Controller::maybe_run_cycle` every `period` until `shutdown` resolves.
///
/// Failed cycles are logged and retried on the next tick. A cycle that is
/// already running when `shutdown` resolves is allowed to finish.
///
/// # Arguments
/// * `controller` - The controller to drive.
/// * `period` - The time between two cycle attempts, must be non zero.
/// * `min_updates` - The minimum amount of pending updates to aggregate.
/// * `shutdown` - Stops the trigger once resolved.
///
/// # Returns
/// The amount of completed cycles.
pub async fn run_periodic<S, F>(
    controller: &Controller<S>,
    period: Duration,
    min_updates: NonZeroUsize,
    shutdown: F,
) -> usize
where
    S: SnapshotStore,
    F: Future<Output = ()>,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut completed = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        match controller.maybe_run_cycle(min_updates).await {
            Ok(CycleOutcome::Completed(version)) => {
                completed += 1;
                debug!(version = version.as_str(); "active version advanced");
            }
            Ok(CycleOutcome::Skipped(reason)) => debug!("cycle skipped: {reason}"),
            Err(e) => error!("aggregation cycle failed: {e}"),
        }
    }

    info!(completed = completed; "trigger stopped");
    completed
}
