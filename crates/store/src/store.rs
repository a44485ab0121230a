use std::path::PathBuf;

use firefrp_common::{enforce_dir_mode, enforce_file_mode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::{Result, StoreError};

/// A record that can live in a [`Store`]: it carries a dense, monotonic
/// integer id assigned by the store on insert.
pub trait Identified {
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

/// A JSON-array-on-disk collection, atomically persisted and guarded by
/// owner-only filesystem permissions.
///
/// `Store` itself holds no lock: §5 makes it single-writer by construction
/// by funnelling every mutation through the owning service's state mutex,
/// so the type here stays a plain in-memory `Vec` mirrored to disk.
pub struct Store<T> {
    path: PathBuf,
    records: Vec<T>,
    next_id: u64,
}

impl<T> Store<T>
where
    T: Identified + Clone + Serialize + DeserializeOwned,
{
    /// Load the collection at `path`, creating an empty one if the file
    /// doesn't exist yet. A file that exists but fails to parse is treated
    /// as corrupt: it's replaced with an empty collection and the event is
    /// logged rather than propagated, per §4.1's failure mode.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
            enforce_dir_mode(parent);
        }

        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<T>>(&raw) {
                Ok(records) => {
                    enforce_file_mode(&path);
                    records
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "store file unparseable, resetting to empty collection");
                    Vec::new()
                },
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let next_id = records.iter().map(|r| r.id()).max().unwrap_or(0) + 1;
        Ok(Self {
            path,
            records,
            next_id,
        })
    }

    /// Atomically persist the collection: write to `<path>.tmp`, then
    /// rename over the target. On rename failure the temp file is removed
    /// and the error propagates.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records).map_err(|source| {
            StoreError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes()).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        enforce_file_mode(&tmp);

        if let Err(source) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(StoreError::Write {
                path: self.path.clone(),
                source,
            });
        }
        enforce_file_mode(&self.path);
        Ok(())
    }

    /// Assigns `nextId = max(existing.id) + 1` (starting at 1 on an empty
    /// collection), appends, and flushes to disk.
    pub fn insert(&mut self, mut record: T) -> Result<T> {
        record.set_id(self.next_id);
        self.next_id += 1;
        self.records.push(record.clone());
        self.save()?;
        Ok(record)
    }

    /// Applies `patch` to the record with the given id and flushes.
    pub fn update<F>(&mut self, id: u64, patch: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(StoreError::NotFound { id })?;
        patch(record);
        let updated = record.clone();
        self.save()?;
        Ok(updated)
    }

    pub fn delete(&mut self, id: u64) -> Result<()> {
        let before = self.records.len();
        self.records.retain(|r| r.id() != id);
        if self.records.len() == before {
            return Err(StoreError::NotFound { id });
        }
        self.save()
    }

    pub fn find_by_id(&self, id: u64) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn find_by<F>(&self, pred: F) -> Option<&T>
    where
        F: Fn(&T) -> bool,
    {
        self.records.iter().find(|r| pred(r))
    }

    pub fn filter<F>(&self, pred: F) -> Vec<&T>
    where
        F: Fn(&T) -> bool,
    {
        self.records.iter().filter(|r| pred(r)).collect()
    }

    pub fn all(&self) -> &[T] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: u64,
        name: String,
    }

    impl Identified for Widget {
        fn id(&self) -> u64 {
            self.id
        }
        fn set_id(&mut self, id: u64) {
            self.id = id;
        }
    }

    fn widget(name: &str) -> Widget {
        Widget {
            id: 0,
            name: name.to_string(),
        }
    }

    #[test]
    fn insert_assigns_dense_monotonic_ids_starting_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<Widget> = Store::load(dir.path().join("widgets.json")).unwrap();

        let a = store.insert(widget("a")).unwrap();
        let b = store.insert(widget("b")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn save_load_round_trip_preserves_next_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widgets.json");

        {
            let mut store: Store<Widget> = Store::load(path.clone()).unwrap();
            store.insert(widget("a")).unwrap();
            store.insert(widget("b")).unwrap();
        }

        let mut reloaded: Store<Widget> = Store::load(path).unwrap();
        assert_eq!(reloaded.all().len(), 2);
        let c = reloaded.insert(widget("c")).unwrap();
        assert_eq!(c.id, 3);
    }

    #[test]
    fn update_applies_patch_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<Widget> = Store::load(dir.path().join("widgets.json")).unwrap();
        let a = store.insert(widget("a")).unwrap();

        let updated = store
            .update(a.id, |w| w.name = "renamed".to_string())
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(store.find_by_id(a.id).unwrap().name, "renamed");
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: Store<Widget> = Store::load(dir.path().join("widgets.json")).unwrap();
        let a = store.insert(widget("a")).unwrap();

        store.delete(a.id).unwrap();
        assert!(store.find_by_id(a.id).is_none());
        assert!(store.delete(a.id).is_err());
    }

    #[test]
    fn corrupt_file_resets_to_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store: Store<Widget> = Store::load(path).unwrap();
        assert!(store.all().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn persisted_file_is_owner_rw_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("widgets.json");
        let mut store: Store<Widget> = Store::load(path.clone()).unwrap();
        store.insert(widget("a")).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
