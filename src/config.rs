use std::{
    env, fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{DbErr, Result, versioning::VersionId};

const DEFAULT_MIN_UPDATES: usize = 10;
const DEFAULT_CYCLE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_DATA_DIR: &str = "data";

/// Runtime configuration of a model db server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// Root directory of the `FileStore`.
    pub data_dir: PathBuf,
    /// Minimum amount of pending updates needed to run a cycle.
    pub min_updates: NonZeroUsize,
    /// The version to start at, defaults to the store's latest version.
    pub initial_version: Option<VersionId>,
    /// A JSON snapshot published when the store is empty.
    pub seed: Option<PathBuf>,
    pub cycle_interval_ms: u64,
    pub cycle_timeout_ms: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            min_updates: NonZeroUsize::new(DEFAULT_MIN_UPDATES).unwrap_or(NonZeroUsize::MIN),
            initial_version: None,
            seed: None,
            cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            cycle_timeout_ms: None,
        }
    }
}

impl DbConfig {
    /// Builds the configuration from the process' environment.
    ///
    /// Reads `MODEL_DB_DIR`, `MIN_UPDATES`, `MODEL_VERSION`, `MODEL_SEED`,
    /// `CYCLE_INTERVAL_MS` and `CYCLE_TIMEOUT_MS`, unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, if set.
    ///
    /// # Returns
    /// The configuration or `DbErr::InvalidConfig` if a value can't be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("MODEL_DB_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(min_updates) = lookup("MIN_UPDATES") {
            config.min_updates = parse("MIN_UPDATES", &min_updates)?;
        }

        if let Some(version) = lookup("MODEL_VERSION") {
            let version = VersionId::new(version)
                .map_err(|e| DbErr::InvalidConfig(format!("MODEL_VERSION: {e}")))?;
            config.initial_version = Some(version);
        }

        if let Some(seed) = lookup("MODEL_SEED") {
            config.seed = Some(PathBuf::from(seed));
        }

        if let Some(interval) = lookup("CYCLE_INTERVAL_MS") {
            config.cycle_interval_ms = parse("CYCLE_INTERVAL_MS", &interval)?;
        }

        if let Some(timeout) = lookup("CYCLE_TIMEOUT_MS") {
            config.cycle_timeout_ms = Some(parse("CYCLE_TIMEOUT_MS", &timeout)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from a JSON file, missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DbErr::InvalidConfig(format!("{}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.cycle_interval_ms == 0 {
            return Err(DbErr::InvalidConfig(
                "the cycle interval must be positive".to_string(),
            ));
        }

        if self.cycle_timeout_ms == Some(0) {
            return Err(DbErr::InvalidConfig(
                "the cycle timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DbErr::InvalidConfig(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = DbConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, DbConfig::default());
        assert_eq!(config.min_updates.get(), 10);
        assert_eq!(config.cycle_interval(), Duration::from_secs(5));
        assert!(config.cycle_timeout().is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = DbConfig::from_lookup(lookup(&[
            ("MODEL_DB_DIR", "/var/lib/model_db"),
            ("MIN_UPDATES", "3"),
            ("MODEL_VERSION", "1540000000000"),
            ("MODEL_SEED", "seed.json"),
            ("CYCLE_INTERVAL_MS", "250"),
            ("CYCLE_TIMEOUT_MS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/model_db"));
        assert_eq!(config.min_updates.get(), 3);
        assert_eq!(
            config.initial_version,
            Some(VersionId::new("1540000000000").unwrap())
        );
        assert_eq!(config.seed, Some(PathBuf::from("seed.json")));
        assert_eq!(config.cycle_interval(), Duration::from_millis(250));
        assert_eq!(config.cycle_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn rejects_invalid_values() {
        for vars in [
            [("MIN_UPDATES", "0")],
            [("MIN_UPDATES", "ten")],
            [("CYCLE_INTERVAL_MS", "0")],
            [("MODEL_VERSION", "../x")],
        ] {
            let err = DbConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, DbErr::InvalidConfig(_)), "{vars:?}");
        }
    }

    #[test]
    fn loads_json_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"data_dir": "models", "min_updates": 2}"#).unwrap();

        let config = DbConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("models"));
        assert_eq!(config.min_updates.get(), 2);
        assert_eq!(config.cycle_interval_ms, DEFAULT_CYCLE_INTERVAL_MS);
    }

    #[test]
    fn json_file_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"min_update": 2}"#).unwrap();

        let err = DbConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, DbErr::InvalidConfig(_)));
    }
}
