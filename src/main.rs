use std::{fs, path::Path};

use anyhow::Context;
use log::{info, warn};
use tokio::signal;

use model_db::{
    config::DbConfig,
    engine::{Controller, run_periodic},
    snapshot::{Snapshot, SnapshotRecord},
    storage::{FileStore, SnapshotStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = DbConfig::from_env().context("reading configuration")?;
    info!("serving models from {}", config.data_dir.display());

    let store = FileStore::open(&config.data_dir)
        .await
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;

    let mut controller = Controller::open(store, config.initial_version.clone())
        .await
        .context("opening model db")?;

    if let Some(limit) = config.cycle_timeout() {
        controller = controller.with_timeout(limit);
    }

    seed_if_empty(&controller, &config).await?;

    let completed = run_periodic(
        &controller,
        config.cycle_interval(),
        config.min_updates,
        async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
            }
        },
    )
    .await;

    info!(
        completed = completed;
        "shutting down at version {}",
        controller.current_version()
    );

    Ok(())
}

/// Publishes the configured seed snapshot when the store holds no model yet.
async fn seed_if_empty<S: SnapshotStore>(
    controller: &Controller<S>,
    config: &DbConfig,
) -> anyhow::Result<()> {
    let Some(seed) = &config.seed else {
        return Ok(());
    };

    if !controller.current_version().is_min() {
        info!("store already holds a model, ignoring seed {}", seed.display());
        return Ok(());
    }

    let snapshot = read_seed(seed)?;
    let version = controller
        .initialize(snapshot)
        .await
        .context("publishing seed snapshot")?;

    info!("seeded version {version} from {}", seed.display());
    Ok(())
}

fn read_seed(path: &Path) -> anyhow::Result<Snapshot> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading seed {}", path.display()))?;

    let record: SnapshotRecord = serde_json::from_str(&content)
        .with_context(|| format!("parsing seed {}", path.display()))?;

    Ok(Snapshot::decode(record)?)
}
