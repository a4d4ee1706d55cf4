//! Persistence backends behind one uniform get/put/list-versions
//! contract, so the recovery chain is an ordered list rather than ad hoc
//! fallbacks.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::{StateError, StateResult};

/// Number of historical versions each store retains.
const RETAINED_VERSIONS: usize = 8;

/// Uniform contract every persistence tier implements.
pub trait StateStore: Send + Sync {
    /// Short name used in logs ("memory", "file", "backup").
    fn name(&self) -> &str;

    /// Write one serialized snapshot under a version key.
    fn put(&self, version: u64, bytes: &[u8]) -> StateResult<()>;

    /// Read one snapshot back, `None` when the version is absent.
    fn get(&self, version: u64) -> StateResult<Option<Vec<u8>>>;

    /// All stored versions, ascending.
    fn list_versions(&self) -> StateResult<Vec<u64>>;
}

/// Fast tier: an in-process version map.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<u64, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn put(&self, version: u64, bytes: &[u8]) -> StateResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(version, bytes.to_vec());
        while entries.len() > RETAINED_VERSIONS {
            let oldest = *entries.keys().next().unwrap();
            entries.remove(&oldest);
        }
        Ok(())
    }

    fn get(&self, version: u64) -> StateResult<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(&version).cloned())
    }

    fn list_versions(&self) -> StateResult<Vec<u64>> {
        Ok(self.entries.lock().unwrap().keys().copied().collect())
    }
}

/// Durable tier: one JSON file per version in a directory. Writes go to
/// a temp file first and are renamed into place so a crash mid-write
/// never corrupts an existing snapshot.
pub struct FileStore {
    name: String,
    dir: PathBuf,
}

impl FileStore {
    pub fn new(name: impl Into<String>, dir: impl AsRef<Path>) -> StateResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            name: name.into(),
            dir,
        })
    }

    fn path_for(&self, version: u64) -> PathBuf {
        self.dir.join(format!("snapshot_v{version:020}.json"))
    }

    fn parse_version(path: &Path) -> Option<u64> {
        let stem = path.file_stem()?.to_str()?;
        let digits = stem.strip_prefix("snapshot_v")?;
        digits.parse().ok()
    }

    fn prune(&self, versions: &[u64]) {
        if versions.len() <= RETAINED_VERSIONS {
            return;
        }
        for version in &versions[..versions.len() - RETAINED_VERSIONS] {
            let path = self.path_for(*version);
            if let Err(err) = fs::remove_file(&path) {
                warn!(store = %self.name, version, error = %err, "failed to prune old snapshot");
            }
        }
    }
}

impl StateStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, version: u64, bytes: &[u8]) -> StateResult<()> {
        let target = self.path_for(version);
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &target)?;
        let versions = self.list_versions()?;
        self.prune(&versions);
        Ok(())
    }

    fn get(&self, version: u64) -> StateResult<Option<Vec<u8>>> {
        let path = self.path_for(version);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StateError::Io(err)),
        }
    }

    fn list_versions(&self) -> StateResult<Vec<u64>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(version) = Self::parse_version(&entry.path()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_round_trips_and_prunes() {
        let store = MemoryStore::new();
        for version in 1..=12u64 {
            store.put(version, format!("v{version}").as_bytes()).unwrap();
        }
        let versions = store.list_versions().unwrap();
        assert_eq!(versions.len(), RETAINED_VERSIONS);
        assert_eq!(*versions.first().unwrap(), 5);
        assert_eq!(store.get(12).unwrap().unwrap(), b"v12");
        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn file_store_round_trips_and_prunes() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new("file", dir.path()).unwrap();
        for version in 1..=10u64 {
            store.put(version, format!("v{version}").as_bytes()).unwrap();
        }
        let versions = store.list_versions().unwrap();
        assert_eq!(versions.len(), RETAINED_VERSIONS);
        assert_eq!(store.get(10).unwrap().unwrap(), b"v10");
        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn file_store_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new("file", dir.path()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();
        std::fs::write(dir.path().join("other.json"), b"{}").unwrap();
        store.put(3, b"v3").unwrap();
        assert_eq!(store.list_versions().unwrap(), vec![3]);
    }
}
