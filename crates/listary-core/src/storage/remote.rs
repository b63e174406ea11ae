//! Remote persistence
//!
//! [`RemoteBackend`] is the row-level interface of the remote store: one
//! method per query the client issues, every write scoped to an account.
//! [`RemoteAdapter`] turns store changes into those row writes and row reads
//! back into nested lists.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::{
    Change, CollectionKind, Mutation, PersistenceAdapter, PersistenceMode, RowChange, Subscription,
};
use crate::models::{
    Item, ItemId, ItemUpdate, List, ListId, ListUpdate, Placement, Preferences, PreferencesUpdate,
    Theme,
};
use crate::ordering;

/// A row of the `lists` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub id: ListId,
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListRow {
    /// Convert to a list without items
    pub fn into_list(self) -> List {
        List {
            id: self.id,
            name: self.name,
            color: self.color,
            order: self.order,
            items: Vec::new(),
        }
    }
}

/// A row of the `list_items` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub id: ItemId,
    pub list_id: ListId,
    pub text: String,
    pub completed: bool,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemRow {
    pub fn into_item(self) -> Item {
        Item {
            id: self.id,
            text: self.text,
            completed: self.completed,
            order: self.order,
        }
    }
}

/// A row of the `user_preferences` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferencesRow {
    pub user_id: String,
    pub default_list_id: Option<ListId>,
    pub theme: Theme,
    pub new_list_placement: Placement,
    pub new_item_placement: Placement,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PreferencesRow {
    pub fn preferences(&self) -> Preferences {
        Preferences {
            default_list_id: self.default_list_id.clone(),
            theme: self.theme,
            new_list_placement: self.new_list_placement,
            new_item_placement: self.new_item_placement,
        }
    }
}

/// Values for a new list row
///
/// Without an `id` the backend assigns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListRow {
    pub id: Option<ListId>,
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub order: i64,
}

/// Values for a new item row
///
/// Without an `id` the backend generates one scoped to `list_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItemRow {
    pub id: Option<ItemId>,
    pub list_id: ListId,
    pub text: String,
    pub completed: bool,
    pub order: i64,
}

impl NewItemRow {
    /// Row values for an existing item
    pub fn from_item(list_id: &str, item: &Item) -> Self {
        Self {
            id: Some(item.id.clone()),
            list_id: list_id.to_string(),
            text: item.text.clone(),
            completed: item.completed,
            order: item.order,
        }
    }
}

/// Row-level access to the remote store
///
/// Writes touching rows owned by another account fail with
/// [`StorageError::NotOwner`]. Updates of missing rows fail with
/// [`StorageError::RowNotFound`]; deletes of missing rows succeed.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Every list owned by the account
    async fn select_lists(&self, user_id: &str) -> StorageResult<Vec<ListRow>>;

    /// Items of the given lists, restricted to lists the account owns
    async fn select_items(&self, user_id: &str, list_ids: &[ListId])
        -> StorageResult<Vec<ItemRow>>;

    async fn insert_list(&self, row: NewListRow) -> StorageResult<ListRow>;

    async fn update_list(&self, user_id: &str, id: &str, update: &ListUpdate)
        -> StorageResult<()>;

    /// Delete lists and, by cascade, their items
    async fn delete_lists(&self, user_id: &str, ids: &[ListId]) -> StorageResult<()>;

    /// Insert items in one batch; every target list must belong to the account
    async fn insert_items(&self, user_id: &str, rows: Vec<NewItemRow>)
        -> StorageResult<Vec<ItemRow>>;

    async fn update_item(&self, user_id: &str, id: &str, update: &ItemUpdate)
        -> StorageResult<()>;

    async fn delete_items(&self, user_id: &str, ids: &[ItemId]) -> StorageResult<()>;

    async fn select_preferences(&self, user_id: &str) -> StorageResult<Option<PreferencesRow>>;

    async fn insert_preferences(
        &self,
        user_id: &str,
        prefs: &Preferences,
    ) -> StorageResult<PreferencesRow>;

    async fn update_preferences(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> StorageResult<()>;

    /// Row changes committed through this backend, for every account
    fn changes(&self) -> broadcast::Receiver<RowChange>;
}

/// Adapter persisting the store to a remote backend for one account
#[derive(Clone)]
pub struct RemoteAdapter {
    backend: Arc<dyn RemoteBackend>,
    user_id: String,
}

impl RemoteAdapter {
    pub fn new(backend: Arc<dyn RemoteBackend>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
        }
    }

    async fn apply(&self, mutation: &Mutation) -> StorageResult<()> {
        let user_id = self.user_id.as_str();
        match mutation {
            Mutation::InsertList(list) => {
                self.backend
                    .insert_list(NewListRow {
                        id: Some(list.id.clone()),
                        user_id: user_id.to_string(),
                        name: list.name.clone(),
                        color: list.color.clone(),
                        order: list.order,
                    })
                    .await?;
            }
            Mutation::UpdateList { id, update } => {
                self.backend.update_list(user_id, id, update).await?;
            }
            Mutation::DeleteLists(ids) => {
                self.backend.delete_lists(user_id, ids).await?;
            }
            Mutation::InsertItems { list_id, items } => {
                let rows = items
                    .iter()
                    .map(|item| NewItemRow::from_item(list_id, item))
                    .collect();
                self.backend.insert_items(user_id, rows).await?;
            }
            Mutation::UpdateItem { id, update } => {
                self.backend.update_item(user_id, id, update).await?;
            }
            Mutation::DeleteItems(ids) => {
                self.backend.delete_items(user_id, ids).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PersistenceAdapter for RemoteAdapter {
    fn mode(&self) -> PersistenceMode {
        PersistenceMode::Remote
    }

    async fn load_lists(&self) -> StorageResult<Vec<List>> {
        let rows = self.backend.select_lists(&self.user_id).await?;
        let ids: Vec<ListId> = rows.iter().map(|row| row.id.clone()).collect();

        let mut items: HashMap<ListId, Vec<Item>> = HashMap::new();
        if !ids.is_empty() {
            for row in self.backend.select_items(&self.user_id, &ids).await? {
                items
                    .entry(row.list_id.clone())
                    .or_default()
                    .push(row.into_item());
            }
        }

        let mut lists: Vec<List> = rows
            .into_iter()
            .map(|row| {
                let mut list = row.into_list();
                list.items = items.remove(&list.id).unwrap_or_default();
                ordering::sort_by_rank(&mut list.items);
                list
            })
            .collect();
        ordering::sort_by_rank(&mut lists);

        debug!("Loaded {} remote lists for {}", lists.len(), self.user_id);
        Ok(lists)
    }

    async fn load_preferences(&self) -> StorageResult<Preferences> {
        if let Some(row) = self.backend.select_preferences(&self.user_id).await? {
            return Ok(row.preferences());
        }

        // Returns the existing row if another client created it meanwhile
        debug!("Creating default preferences for {}", self.user_id);
        let row = self
            .backend
            .insert_preferences(&self.user_id, &Preferences::default())
            .await?;
        Ok(row.preferences())
    }

    async fn mutate(&self, change: Change<'_>) -> StorageResult<()> {
        match change {
            Change::Lists { mutations, .. } => {
                for mutation in mutations {
                    self.apply(mutation).await?;
                }
                Ok(())
            }
            Change::Preferences { update, snapshot } => {
                match self.backend.update_preferences(&self.user_id, update).await {
                    Err(StorageError::RowNotFound { .. }) => {
                        let row = self
                            .backend
                            .insert_preferences(&self.user_id, snapshot)
                            .await?;
                        if row.preferences() == *snapshot {
                            return Ok(());
                        }
                        // Created concurrently with other values
                        self.backend.update_preferences(&self.user_id, update).await
                    }
                    other => other,
                }
            }
        }
    }

    fn subscribe(&self, kinds: &[CollectionKind]) -> Subscription {
        Subscription::new(self.backend.changes(), self.user_id.clone(), kinds)
    }
}
