//! Fixture persistence: a JSON array of records, ordered by submission identity.
//!
//! Array order is the replay contract: position `i` answers the `i`-th
//! submitted call of a session. Entries are validated on load; anything
//! missing a required field is rejected outright.

use crate::error::Error;
use crate::snapshot::Record;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Abstract file access used by fixture load/save.
pub trait FixtureStore: Send + Sync {
    fn read(&self, path: &Path) -> Result<String, Error>;
    fn write(&self, path: &Path, contents: &str) -> Result<(), Error>;
}

/// Filesystem-backed store, the default. Creates parent directories on write.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl FixtureStore for FsStore {
    fn read(&self, path: &Path) -> Result<String, Error> {
        Ok(fs::read_to_string(path)?)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Where a fixture lives: `<dir>/<name>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureOptions {
    pub dir: PathBuf,
    pub name: String,
}

impl FixtureOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            dir: PathBuf::from("fixtures"),
            name: name.into(),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn path(&self) -> PathBuf {
        let mut file = self.name.clone();
        if !file.ends_with(".json") {
            file.push_str(".json");
        }
        self.dir.join(file)
    }
}

/// Load and validate a fixture. Missing files and malformed entries are fatal.
pub fn load(store: &dyn FixtureStore, options: &FixtureOptions) -> Result<Vec<Record>, Error> {
    let path = options.path();
    let contents = store.read(&path).map_err(|error| Error::FixtureLoad {
        path: path.clone(),
        reason: error.to_string(),
    })?;
    let records: Vec<Record> =
        serde_json::from_str(&contents).map_err(|error| Error::FixtureLoad {
            path: path.clone(),
            reason: error.to_string(),
        })?;
    info!(path = %path.display(), count = records.len(), "fixture loaded");
    Ok(records)
}

/// Persist records as a pretty-printed JSON array, returning the written path.
pub fn save(
    store: &dyn FixtureStore,
    options: &FixtureOptions,
    records: &[Record],
) -> Result<PathBuf, Error> {
    let path = options.path();
    let json = serde_json::to_string_pretty(records)?;
    store.write(&path, &json)?;
    info!(path = %path.display(), count = records.len(), "fixture saved");
    Ok(path)
}
