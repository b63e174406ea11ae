//! Local to remote migration
//!
//! When an account signs in while device storage still holds lists, the user
//! is offered a one-time copy of that data into the remote store.
//!
//! ```text
//! Idle --sign in with local data--> Detected --confirm--> Migrating
//!                                       |                    |
//!                                     skip          Completed | Failed
//!                                       |                    |
//!                                       v      acknowledge   v
//!                                     Idle <-----------------+
//! ```
//!
//! Lists are copied one at a time in rank order, each followed by its items.
//! The first error stops the migration: lists already copied stay in the
//! remote store and local data is kept so the user can retry after signing
//! in again. Local data is cleared only after a completed migration or an
//! explicit skip.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::{ListId, Preferences, PreferencesUpdate};
use crate::storage::{LocalStorage, NewItemRow, NewListRow, RemoteBackend, StorageError};

/// Outcome of a completed migration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Lists copied
    pub lists: usize,
    /// Items copied
    pub items: usize,
    /// `(local_id, remote_id)` for every copied list
    pub id_map: Vec<(ListId, ListId)>,
    /// Whether the preferences were copied too
    pub preferences_migrated: bool,
}

impl MigrationReport {
    /// Remote id assigned to a local list
    pub fn remote_id(&self, local_id: &str) -> Option<&str> {
        self.id_map
            .iter()
            .find(|(local, _)| local == local_id)
            .map(|(_, remote)| remote.as_str())
    }
}

/// Where the migration flow stands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationState {
    #[default]
    Idle,
    /// Local data found for the signed-in account; waiting for a decision
    Detected,
    Migrating,
    Completed(MigrationReport),
    /// Migration stopped; holds the error message
    Failed(String),
}

impl MigrationState {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationState::Idle => "idle",
            MigrationState::Detected => "detected",
            MigrationState::Migrating => "migrating",
            MigrationState::Completed(_) => "completed",
            MigrationState::Failed(_) => "failed",
        }
    }
}

/// Errors from the migration flow
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("No migration is pending")]
    NotDetected,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Failed to read local data: {0}")]
    ReadLocal(#[source] StorageError),

    #[error("Failed to read the account's lists: {0}")]
    ReadRemote(#[source] StorageError),

    #[error("Failed to migrate list '{name}': {source}")]
    List {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to migrate items of list '{name}': {source}")]
    Items {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to clear local data: {0}")]
    ClearLocal(#[source] StorageError),
}

/// Drives the local to remote migration for the signed-in account
pub struct MigrationCoordinator {
    local: LocalStorage,
    backend: Arc<dyn RemoteBackend>,
    state: watch::Sender<MigrationState>,
    user_id: Option<String>,
    /// Account already checked for local data during this sign-in
    checked_user: Option<String>,
}

impl MigrationCoordinator {
    pub fn new(local: LocalStorage, backend: Arc<dyn RemoteBackend>) -> Self {
        let (state, _) = watch::channel(MigrationState::Idle);
        Self {
            local,
            backend,
            state,
            user_id: None,
            checked_user: None,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state.borrow().clone()
    }

    /// Follow state changes
    pub fn watch(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Called when an account signs in
    ///
    /// Checks device storage once per account per sign-in. Returns true if a
    /// migration is waiting for a decision.
    pub fn on_authenticated(&mut self, user_id: &str) -> bool {
        self.user_id = Some(user_id.to_string());

        if self.checked_user.as_deref() == Some(user_id) {
            return self.state() == MigrationState::Detected;
        }
        self.checked_user = Some(user_id.to_string());

        if self.state() != MigrationState::Idle {
            return false;
        }

        if self.local.has_data() {
            info!("Local lists found for {}; migration available", user_id);
            self.set_state(MigrationState::Detected);
            true
        } else {
            debug!("No local lists to migrate for {}", user_id);
            false
        }
    }

    /// Copy local data into the remote store
    pub async fn confirm(&mut self) -> Result<MigrationReport, MigrationError> {
        if self.state() != MigrationState::Detected {
            return Err(MigrationError::NotDetected);
        }
        let user_id = self.user_id.clone().ok_or(MigrationError::NotSignedIn)?;

        self.set_state(MigrationState::Migrating);

        match self.migrate(&user_id).await {
            Ok(report) => {
                if let Err(e) = self.local.clear() {
                    warn!("Migration completed but local data was not cleared: {}", e);
                }
                info!(
                    "Migrated {} lists and {} items for {}",
                    report.lists, report.items, user_id
                );
                self.set_state(MigrationState::Completed(report.clone()));
                Ok(report)
            }
            Err(e) => {
                warn!("Migration failed: {}", e);
                self.set_state(MigrationState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Discard local data without migrating
    pub fn skip(&mut self) -> Result<(), MigrationError> {
        if self.state() != MigrationState::Detected {
            return Err(MigrationError::NotDetected);
        }
        self.local.clear().map_err(MigrationError::ClearLocal)?;
        info!("Migration skipped; local data cleared");
        self.set_state(MigrationState::Idle);
        Ok(())
    }

    /// Dismiss a finished migration
    pub fn acknowledge(&mut self) {
        if matches!(
            self.state(),
            MigrationState::Completed(_) | MigrationState::Failed(_)
        ) {
            self.set_state(MigrationState::Idle);
        }
    }

    /// Called when the account signs out; the next sign-in checks again
    pub fn on_signed_out(&mut self) {
        self.user_id = None;
        self.checked_user = None;
        self.set_state(MigrationState::Idle);
    }

    fn set_state(&self, state: MigrationState) {
        debug!("Migration state: {}", state.name());
        self.state.send_replace(state);
    }

    async fn migrate(&self, user_id: &str) -> Result<MigrationReport, MigrationError> {
        let lists = self.local.lists().map_err(MigrationError::ReadLocal)?;
        let preferences = self.local.preferences();

        // Copied lists go after any the account already has
        let existing = self
            .backend
            .select_lists(user_id)
            .await
            .map_err(MigrationError::ReadRemote)?
            .len() as i64;

        let mut report = MigrationReport::default();

        for (index, list) in lists.iter().enumerate() {
            let row = self
                .backend
                .insert_list(NewListRow {
                    id: None,
                    user_id: user_id.to_string(),
                    name: list.name.clone(),
                    color: list.color.clone(),
                    order: existing + index as i64,
                })
                .await
                .map_err(|source| MigrationError::List {
                    name: list.name.clone(),
                    source,
                })?;
            report.id_map.push((list.id.clone(), row.id.clone()));
            report.lists += 1;

            if list.items.is_empty() {
                continue;
            }

            let items = list
                .items
                .iter()
                .enumerate()
                .map(|(rank, item)| NewItemRow {
                    id: None,
                    list_id: row.id.clone(),
                    text: item.text.clone(),
                    completed: item.completed,
                    order: rank as i64,
                })
                .collect();
            let inserted = self
                .backend
                .insert_items(user_id, items)
                .await
                .map_err(|source| MigrationError::Items {
                    name: list.name.clone(),
                    source,
                })?;
            report.items += inserted.len();
        }

        let remapped = Preferences {
            default_list_id: preferences
                .default_list_id
                .as_deref()
                .and_then(|id| report.remote_id(id))
                .map(str::to_string),
            ..preferences
        };
        match self.migrate_preferences(user_id, &remapped).await {
            Ok(()) => report.preferences_migrated = true,
            Err(e) => warn!("Preferences were not migrated: {}", e),
        }

        Ok(report)
    }

    async fn migrate_preferences(
        &self,
        user_id: &str,
        preferences: &Preferences,
    ) -> Result<(), StorageError> {
        match self.backend.select_preferences(user_id).await? {
            Some(_) => {
                self.backend
                    .update_preferences(user_id, &PreferencesUpdate::full(preferences))
                    .await
            }
            None => {
                self.backend
                    .insert_preferences(user_id, preferences)
                    .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, ItemId, ItemUpdate, List, ListUpdate, Theme};
    use crate::storage::{
        ItemRow, ListRow, PreferencesRow, RemoteAdapter, RowChange, SqliteBackend, StorageResult,
    };
    use crate::store::Store;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    fn local_lists() -> Vec<List> {
        let names: [(&str, &[(&str, bool)]); 3] = [
            ("Shopping", &[("Milk", false), ("Bread", true)]),
            ("Work", &[("Email", false)]),
            ("Books", &[("Dune", false), ("Emma", true), ("Ulysses", false)]),
        ];
        names
            .iter()
            .enumerate()
            .map(|(rank, (name, items))| {
                let mut list = List::with_id(format!("local-{}", rank), *name);
                list.order = rank as i64;
                list.items = items
                    .iter()
                    .enumerate()
                    .map(|(i, (text, completed))| {
                        let mut item = Item::new(&list.id, *text);
                        item.completed = *completed;
                        item.order = i as i64;
                        item
                    })
                    .collect();
                list
            })
            .collect()
    }

    fn seeded_local(dir: &TempDir) -> LocalStorage {
        let storage = LocalStorage::new(dir.path());
        storage.write_lists(&local_lists()).unwrap();
        storage
            .write_preferences(
                &PreferencesUpdate::new()
                    .default_list_id(Some("local-1".to_string()))
                    .theme(Theme::Dark),
                &Preferences {
                    default_list_id: Some("local-1".to_string()),
                    theme: Theme::Dark,
                    ..Preferences::default()
                },
            )
            .unwrap();
        storage
    }

    /// Backend that fails the nth `insert_items` call, or every list select
    struct FailingItemsBackend {
        inner: SqliteBackend,
        fail_on_call: usize,
        calls: AtomicUsize,
        fail_select_lists: AtomicBool,
    }

    impl FailingItemsBackend {
        fn new(fail_on_call: usize) -> Self {
            Self {
                inner: SqliteBackend::open_in_memory().unwrap(),
                fail_on_call,
                calls: AtomicUsize::new(0),
                fail_select_lists: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RemoteBackend for FailingItemsBackend {
        async fn select_lists(&self, user_id: &str) -> StorageResult<Vec<ListRow>> {
            if self.fail_select_lists.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("timeout".to_string()));
            }
            self.inner.select_lists(user_id).await
        }

        async fn select_items(
            &self,
            user_id: &str,
            list_ids: &[ListId],
        ) -> StorageResult<Vec<ItemRow>> {
            self.inner.select_items(user_id, list_ids).await
        }

        async fn insert_list(&self, row: NewListRow) -> StorageResult<ListRow> {
            self.inner.insert_list(row).await
        }

        async fn update_list(
            &self,
            user_id: &str,
            id: &str,
            update: &ListUpdate,
        ) -> StorageResult<()> {
            self.inner.update_list(user_id, id, update).await
        }

        async fn delete_lists(&self, user_id: &str, ids: &[ListId]) -> StorageResult<()> {
            self.inner.delete_lists(user_id, ids).await
        }

        async fn insert_items(
            &self,
            user_id: &str,
            rows: Vec<NewItemRow>,
        ) -> StorageResult<Vec<ItemRow>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on_call {
                return Err(StorageError::Unavailable("connection reset".to_string()));
            }
            self.inner.insert_items(user_id, rows).await
        }

        async fn update_item(
            &self,
            user_id: &str,
            id: &str,
            update: &ItemUpdate,
        ) -> StorageResult<()> {
            self.inner.update_item(user_id, id, update).await
        }

        async fn delete_items(&self, user_id: &str, ids: &[ItemId]) -> StorageResult<()> {
            self.inner.delete_items(user_id, ids).await
        }

        async fn select_preferences(
            &self,
            user_id: &str,
        ) -> StorageResult<Option<PreferencesRow>> {
            self.inner.select_preferences(user_id).await
        }

        async fn insert_preferences(
            &self,
            user_id: &str,
            prefs: &Preferences,
        ) -> StorageResult<PreferencesRow> {
            self.inner.insert_preferences(user_id, prefs).await
        }

        async fn update_preferences(
            &self,
            user_id: &str,
            update: &PreferencesUpdate,
        ) -> StorageResult<()> {
            self.inner.update_preferences(user_id, update).await
        }

        fn changes(&self) -> broadcast::Receiver<RowChange> {
            self.inner.changes()
        }
    }

    #[tokio::test]
    async fn test_round_trip_preserves_lists() {
        let dir = TempDir::new().unwrap();
        let local = seeded_local(&dir);
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut coordinator = MigrationCoordinator::new(local.clone(), backend.clone());
        let mut states = coordinator.watch();
        let expected = local.lists().unwrap();

        assert!(coordinator.on_authenticated("alice"));
        assert_eq!(coordinator.state(), MigrationState::Detected);

        let report = coordinator.confirm().await.unwrap();
        assert_eq!(report.lists, 3);
        assert_eq!(report.items, 6);
        assert!(report.preferences_migrated);
        assert!(matches!(*states.borrow_and_update(), MigrationState::Completed(_)));

        let store = Store::open(Arc::new(RemoteAdapter::new(backend, "alice")))
            .await
            .unwrap();
        assert_eq!(store.lists().len(), expected.len());
        for (remote, original) in store.lists().iter().zip(&expected) {
            assert_eq!(remote.name, original.name);
            assert_eq!(remote.color, original.color);
            assert_eq!(Some(remote.id.as_str()), report.remote_id(&original.id));

            let remote_items: Vec<(&str, bool, i64)> = remote
                .items
                .iter()
                .map(|item| (item.text.as_str(), item.completed, item.order))
                .collect();
            let original_items: Vec<(&str, bool, i64)> = original
                .items
                .iter()
                .map(|item| (item.text.as_str(), item.completed, item.order))
                .collect();
            assert_eq!(remote_items, original_items);
        }

        assert_eq!(store.preferences().theme, Theme::Dark);
        assert_eq!(store.default_list().unwrap().name, "Work");

        assert!(!local.has_data());

        coordinator.acknowledge();
        assert_eq!(coordinator.state(), MigrationState::Idle);
    }

    #[tokio::test]
    async fn test_unreadable_account_fails_before_copying() {
        let dir = TempDir::new().unwrap();
        let local = seeded_local(&dir);
        let backend = Arc::new(FailingItemsBackend::new(0));
        backend.fail_select_lists.store(true, Ordering::SeqCst);
        let mut coordinator = MigrationCoordinator::new(local.clone(), backend.clone());

        assert!(coordinator.on_authenticated("alice"));
        let err = coordinator.confirm().await.unwrap_err();
        assert!(matches!(err, MigrationError::ReadRemote(_)));
        assert!(!err.to_string().contains("Shopping"));
        assert!(local.has_data());

        backend.fail_select_lists.store(false, Ordering::SeqCst);
        assert!(backend.select_lists("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_on_second_list_items() {
        let dir = TempDir::new().unwrap();
        let local = seeded_local(&dir);
        let backend = Arc::new(FailingItemsBackend::new(2));
        let mut coordinator = MigrationCoordinator::new(local.clone(), backend.clone());
        let before = local.lists().unwrap();

        assert!(coordinator.on_authenticated("alice"));
        let err = coordinator.confirm().await.unwrap_err();
        assert!(matches!(err, MigrationError::Items { ref name, .. } if name == "Work"));
        assert!(matches!(coordinator.state(), MigrationState::Failed(ref msg) if msg.contains("Work")));

        let rows = backend.select_lists("alice").await.unwrap();
        let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["Shopping", "Work"]);

        let shopping_items = backend
            .select_items("alice", &[rows[0].id.clone()])
            .await
            .unwrap();
        assert_eq!(shopping_items.len(), 2);
        let work_items = backend
            .select_items("alice", &[rows[1].id.clone()])
            .await
            .unwrap();
        assert!(work_items.is_empty());

        // Local data untouched
        assert_eq!(local.lists().unwrap(), before);
        assert_eq!(local.preferences().theme, Theme::Dark);

        // Retry is offered after signing in again
        coordinator.acknowledge();
        assert!(!coordinator.on_authenticated("alice"));
        coordinator.on_signed_out();
        assert!(coordinator.on_authenticated("alice"));
    }

    #[tokio::test]
    async fn test_nothing_to_migrate() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut coordinator = MigrationCoordinator::new(LocalStorage::new(dir.path()), backend);

        assert!(!coordinator.on_authenticated("alice"));
        assert_eq!(coordinator.state(), MigrationState::Idle);
        assert!(matches!(
            coordinator.confirm().await,
            Err(MigrationError::NotDetected)
        ));
    }

    #[tokio::test]
    async fn test_skip_clears_local_data() {
        let dir = TempDir::new().unwrap();
        let local = seeded_local(&dir);
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut coordinator = MigrationCoordinator::new(local.clone(), backend.clone());

        assert!(coordinator.on_authenticated("alice"));
        coordinator.skip().unwrap();

        assert_eq!(coordinator.state(), MigrationState::Idle);
        assert!(!local.has_data());
        assert_eq!(local.preferences(), Preferences::default());
        assert!(backend.select_lists("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checked_once_per_sign_in() {
        let dir = TempDir::new().unwrap();
        let local = seeded_local(&dir);
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut coordinator = MigrationCoordinator::new(local, backend);

        assert!(coordinator.on_authenticated("alice"));
        // Same sign-in, prompt still pending
        assert!(coordinator.on_authenticated("alice"));

        coordinator.on_signed_out();
        assert_eq!(coordinator.state(), MigrationState::Idle);
        assert!(coordinator.user_id().is_none());
    }

    #[tokio::test]
    async fn test_migrated_lists_follow_existing_remote_lists() {
        let dir = TempDir::new().unwrap();
        let local = seeded_local(&dir);
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        backend
            .insert_list(NewListRow {
                id: None,
                user_id: "alice".to_string(),
                name: "Existing".to_string(),
                color: "#87CEEB".to_string(),
                order: 0,
            })
            .await
            .unwrap();

        let mut coordinator = MigrationCoordinator::new(local, backend.clone());
        coordinator.on_authenticated("alice");
        coordinator.confirm().await.unwrap();

        let orders: Vec<i64> = backend
            .select_lists("alice")
            .await
            .unwrap()
            .iter()
            .map(|row| row.order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2, 3]);
    }
}
