//! Device-local persistence
//!
//! Each piece of state lives under its own key, stored as a JSON file in the
//! local data directory. Keys are independent: a missing key means "use the
//! default", so a partially written or partially cleared directory still
//! loads.
//!
//! Files (under `<data_dir>/local/`):
//! - `listary-lists.json` - every list with its nested items
//! - `listary-default-list.json` - default list id or `null`
//! - `listary-theme.json`
//! - `listary-new-list-placement.json`
//! - `listary-new-item-placement.json`
//!
//! Writes are atomic (write to temp file, then rename).

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};
use super::{Change, CollectionKind, PersistenceAdapter, PersistenceMode, Subscription};
use crate::models::{List, ListId, Placement, Preferences, PreferencesUpdate, Theme};
use crate::ordering;

pub const LISTS_KEY: &str = "listary-lists";
pub const DEFAULT_LIST_KEY: &str = "listary-default-list";
pub const THEME_KEY: &str = "listary-theme";
pub const NEW_LIST_PLACEMENT_KEY: &str = "listary-new-list-placement";
pub const NEW_ITEM_PLACEMENT_KEY: &str = "listary-new-item-placement";

const ALL_KEYS: [&str; 5] = [
    LISTS_KEY,
    DEFAULT_LIST_KEY,
    THEME_KEY,
    NEW_LIST_PLACEMENT_KEY,
    NEW_ITEM_PLACEMENT_KEY,
];

/// Key-value store backed by one JSON file per key
#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    /// Create a storage rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the key files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.key_path(key).exists()
    }

    /// Read a key
    ///
    /// Returns `None` if the key is absent.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let path = self.key_path(key);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::ReadError { path, source: e }),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StorageError::InvalidFormat {
                path,
                details: e.to_string(),
            })
    }

    /// Read a key, treating absence and unparseable content as the default
    ///
    /// Other read failures are returned.
    pub fn load<T: DeserializeOwned + Default>(&self, key: &str) -> StorageResult<T> {
        match self.read(key) {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(StorageError::InvalidFormat { path, details }) => {
                warn!("Ignoring unparseable {:?}: {}", path, details);
                Ok(T::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Read a key, falling back to the default on any failure
    pub fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.load(key).unwrap_or_else(|e| {
            warn!("Failed to read local key {}: {}", key, e);
            T::default()
        })
    }

    /// Write a key atomically
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        atomic_write(&self.key_path(key), json.as_bytes())
    }

    /// Remove a key (absent keys are fine)
    pub fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    /// All lists, sorted by rank with items sorted by rank
    pub fn lists(&self) -> StorageResult<Vec<List>> {
        let mut lists: Vec<List> = self.load(LISTS_KEY)?;
        normalize(&mut lists);
        Ok(lists)
    }

    /// Stored preferences, each field defaulting independently
    pub fn preferences(&self) -> Preferences {
        Preferences {
            default_list_id: self.read_or_default::<Option<ListId>>(DEFAULT_LIST_KEY),
            theme: self.read_or_default::<Theme>(THEME_KEY),
            new_list_placement: self.read_or_default::<Placement>(NEW_LIST_PLACEMENT_KEY),
            new_item_placement: self.read_or_default::<Placement>(NEW_ITEM_PLACEMENT_KEY),
        }
    }

    /// True if at least one list is stored
    pub fn has_data(&self) -> bool {
        !self.read_or_default::<Vec<List>>(LISTS_KEY).is_empty()
    }

    /// Replace the stored list array
    pub fn write_lists(&self, lists: &[List]) -> StorageResult<()> {
        self.write(LISTS_KEY, lists)
    }

    /// Write the preference keys touched by `update`, taking values from `snapshot`
    pub fn write_preferences(
        &self,
        update: &PreferencesUpdate,
        snapshot: &Preferences,
    ) -> StorageResult<()> {
        if update.default_list_id.is_some() {
            self.write(DEFAULT_LIST_KEY, &snapshot.default_list_id)?;
        }
        if update.theme.is_some() {
            self.write(THEME_KEY, &snapshot.theme)?;
        }
        if update.new_list_placement.is_some() {
            self.write(NEW_LIST_PLACEMENT_KEY, &snapshot.new_list_placement)?;
        }
        if update.new_item_placement.is_some() {
            self.write(NEW_ITEM_PLACEMENT_KEY, &snapshot.new_item_placement)?;
        }
        Ok(())
    }

    /// Remove every key
    pub fn clear(&self) -> StorageResult<()> {
        for key in ALL_KEYS {
            self.remove(key)?;
        }
        debug!("Cleared local storage in {:?}", self.dir);
        Ok(())
    }
}

/// Sort lists and their items by stored rank
fn normalize(lists: &mut [List]) {
    ordering::sort_by_rank(lists);
    for list in lists.iter_mut() {
        ordering::sort_by_rank(&mut list.items);
    }
}

/// Adapter persisting the store to device storage
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    storage: LocalStorage,
}

impl LocalAdapter {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PersistenceAdapter for LocalAdapter {
    fn mode(&self) -> PersistenceMode {
        PersistenceMode::Local
    }

    async fn load_lists(&self) -> StorageResult<Vec<List>> {
        self.storage.lists()
    }

    async fn load_preferences(&self) -> StorageResult<Preferences> {
        Ok(self.storage.preferences())
    }

    async fn mutate(&self, change: Change<'_>) -> StorageResult<()> {
        match change {
            Change::Lists { snapshot, .. } => self.storage.write_lists(snapshot),
            Change::Preferences { update, snapshot } => {
                self.storage.write_preferences(update, snapshot)
            }
        }
    }

    fn subscribe(&self, _kinds: &[CollectionKind]) -> Subscription {
        Subscription::inert()
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|e| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use tempfile::TempDir;

    fn sample_lists() -> Vec<List> {
        let mut shopping = List::with_id("shopping", "Shopping");
        shopping.color = "#FF6B6B".to_string();
        let mut milk = Item::with_id("milk", "Milk");
        milk.order = 0;
        let mut bread = Item::with_id("bread", "Bread");
        bread.order = 1;
        bread.completed = true;
        shopping.items = vec![milk, bread];

        let mut work = List::with_id("work", "Work");
        work.color = "#4ECDC4".to_string();
        work.order = 1;
        vec![shopping, work]
    }

    #[test]
    fn test_absent_keys_use_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path().join("local"));

        assert!(storage.lists().unwrap().is_empty());
        assert_eq!(storage.preferences(), Preferences::default());
        assert!(!storage.has_data());
    }

    #[test]
    fn test_lists_round_trip_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        let mut lists = sample_lists();
        lists.reverse();
        lists[1].items.reverse();
        storage.write_lists(&lists).unwrap();

        let loaded = storage.lists().unwrap();
        assert_eq!(loaded, sample_lists());
        assert!(storage.has_data());
    }

    #[test]
    fn test_keys_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        storage.write(THEME_KEY, &Theme::Dark).unwrap();

        let prefs = storage.preferences();
        assert_eq!(prefs.theme, Theme::Dark);
        assert_eq!(prefs.new_item_placement, Placement::Bottom);
        assert!(prefs.default_list_id.is_none());
    }

    #[test]
    fn test_unparseable_key_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        fs::write(storage.key_path(THEME_KEY), "\"neon\"").unwrap();
        fs::write(storage.key_path(LISTS_KEY), "{not json").unwrap();

        assert_eq!(storage.preferences().theme, Theme::System);
        assert!(storage.lists().unwrap().is_empty());
        assert!(matches!(
            storage.read::<Vec<List>>(LISTS_KEY),
            Err(StorageError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_write_preferences_only_touches_updated_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        let prefs = Preferences {
            default_list_id: Some("work".to_string()),
            theme: Theme::Light,
            new_list_placement: Placement::Top,
            new_item_placement: Placement::Top,
        };
        storage
            .write_preferences(&PreferencesUpdate::new().theme(Theme::Light), &prefs)
            .unwrap();

        assert!(storage.contains(THEME_KEY));
        assert!(!storage.contains(DEFAULT_LIST_KEY));
        assert!(!storage.contains(NEW_LIST_PLACEMENT_KEY));

        storage
            .write_preferences(&PreferencesUpdate::full(&prefs), &prefs)
            .unwrap();
        assert_eq!(storage.preferences(), prefs);
    }

    #[test]
    fn test_clear_removes_every_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        storage.write_lists(&sample_lists()).unwrap();
        storage
            .write(DEFAULT_LIST_KEY, &Some("shopping".to_string()))
            .unwrap();
        storage.write(THEME_KEY, &Theme::Dark).unwrap();

        storage.clear().unwrap();
        for key in ALL_KEYS {
            assert!(!storage.contains(key));
        }
        assert!(!storage.has_data());
        assert_eq!(storage.preferences(), Preferences::default());

        // Clearing twice is fine
        storage.clear().unwrap();
    }

    #[test]
    fn test_read_lists_and_preferences() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        storage.write_lists(&sample_lists()).unwrap();
        storage
            .write(DEFAULT_LIST_KEY, &Some("work".to_string()))
            .unwrap();

        assert!(storage.has_data());
        assert_eq!(storage.lists().unwrap().len(), 2);
        assert_eq!(storage.preferences().default_list_id.as_deref(), Some("work"));
    }

    #[tokio::test]
    async fn test_adapter_writes_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = LocalAdapter::new(LocalStorage::new(temp_dir.path()));
        assert_eq!(adapter.mode(), PersistenceMode::Local);

        let lists = sample_lists();
        adapter
            .mutate(Change::Lists {
                mutations: &[],
                snapshot: &lists,
            })
            .await
            .unwrap();

        assert_eq!(adapter.load_lists().await.unwrap(), lists);
        assert!(adapter.subscribe(&CollectionKind::ALL).is_inert());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("file.json");

        atomic_write(&nested_path, b"[]").unwrap();

        assert!(nested_path.exists());
        assert!(!nested_path.with_extension("tmp").exists());
        assert_eq!(fs::read_to_string(&nested_path).unwrap(), "[]");
    }
}
