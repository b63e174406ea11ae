//! List and item store
//!
//! The `Store` holds every list (with its items) for the session and is the
//! only place they are mutated. Each operation:
//!
//! 1. computes the new in-memory state with the ordering engine,
//! 2. derives the row-level mutations (inserts, deletes and an explicit rank
//!    write for every entry whose rank changed),
//! 3. hands both to the persistence adapter.
//!
//! Changes are applied optimistically. A persistence error never reaches the
//! caller: it is logged and queued on the failure channel
//! ([`Store::take_failures`]). In remote mode the in-memory state is rolled
//! back to what the remote store holds; in local mode it stays ahead of what
//! is on disk.
//!
//! Operations naming an id that does not exist do nothing.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = Store::open_local(&config).await?;
//!
//! let shopping = store.add_list("Shopping").await?;
//! store.add_items(&shopping, &["Milk", "Bread"]).await;
//!
//! for list in store.lists() {
//!     println!("{} ({} items)", list.name, list.items.len());
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{
    generate_item_id, normalize_text, Item, ItemId, ItemUpdate, List, ListId, ListUpdate,
    Preferences,
};
use crate::ordering;
use crate::preferences::PreferencesStore;
use crate::storage::{
    Change, CollectionKind, LocalAdapter, LocalStorage, Mutation, PersistenceAdapter,
    PersistenceMode, RemoteAdapter, RemoteBackend, StorageError, StorageResult, Subscription,
};

/// A write the adapter rejected
#[derive(Error, Debug)]
#[error("{operation} was not saved: {source}")]
pub struct PersistenceFailure {
    /// Store operation whose write failed
    pub operation: &'static str,
    #[source]
    pub source: StorageError,
}

/// Input rejected before any change is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("List name cannot be empty")]
    BlankName,

    #[error("Item text cannot be empty")]
    BlankText,
}

/// Authoritative in-memory lists for the session
pub struct Store {
    adapter: Arc<dyn PersistenceAdapter>,
    lists: Vec<List>,
    preferences: PreferencesStore,
    failures_tx: mpsc::UnboundedSender<PersistenceFailure>,
    failures_rx: mpsc::UnboundedReceiver<PersistenceFailure>,
}

impl Store {
    /// Open the store over an adapter, loading lists and preferences
    pub async fn open(adapter: Arc<dyn PersistenceAdapter>) -> StorageResult<Self> {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        let mut lists = adapter.load_lists().await?;
        ordering::sort_by_rank(&mut lists);
        let preferences = PreferencesStore::load(adapter.clone(), failures_tx.clone()).await?;

        info!(
            "Opened {:?} store with {} lists",
            adapter.mode(),
            lists.len()
        );

        Ok(Self {
            adapter,
            lists,
            preferences,
            failures_tx,
            failures_rx,
        })
    }

    /// Open the store on device storage
    pub async fn open_local(config: &Config) -> StorageResult<Self> {
        let storage = LocalStorage::new(config.local_dir());
        Self::open(Arc::new(LocalAdapter::new(storage))).await
    }

    /// Open the store on a remote backend for one account
    pub async fn open_remote(
        backend: Arc<dyn RemoteBackend>,
        user_id: impl Into<String>,
    ) -> StorageResult<Self> {
        Self::open(Arc::new(RemoteAdapter::new(backend, user_id))).await
    }

    pub fn mode(&self) -> PersistenceMode {
        self.adapter.mode()
    }

    /// All lists, sorted by rank
    pub fn lists(&self) -> &[List] {
        &self.lists
    }

    pub fn list(&self, id: &str) -> Option<&List> {
        self.lists.iter().find(|list| list.id == id)
    }

    /// Find an item and the list holding it
    pub fn item(&self, item_id: &str) -> Option<(&List, &Item)> {
        self.lists
            .iter()
            .find_map(|list| list.item(item_id).map(|item| (list, item)))
    }

    pub fn preferences(&self) -> &Preferences {
        self.preferences.get()
    }

    /// Preferences store, for changing theme and placements
    pub fn preferences_mut(&mut self) -> &mut PreferencesStore {
        &mut self.preferences
    }

    /// Subscribe to changes made elsewhere to this store's data
    pub fn subscribe(&self, kinds: &[CollectionKind]) -> Subscription {
        self.adapter.subscribe(kinds)
    }

    /// Drain writes that failed since the last call
    pub fn take_failures(&mut self) -> Vec<PersistenceFailure> {
        let mut failures = Vec::new();
        while let Ok(failure) = self.failures_rx.try_recv() {
            failures.push(failure);
        }
        failures
    }

    // ==================== Lists ====================

    /// Create a list placed per the new-list placement preference
    pub async fn add_list(&mut self, name: &str) -> Result<ListId, ValidationError> {
        let name = normalize_text(name).ok_or(ValidationError::BlankName)?;

        let before = self.lists.clone();
        let list = List::new(name);
        let id = list.id.clone();

        let placement = self.preferences.new_list_placement();
        self.lists = ordering::append(std::mem::take(&mut self.lists), vec![list], placement);

        let mut mutations = Vec::new();
        if let Some(list) = self.list(&id) {
            mutations.push(Mutation::InsertList(list.clone()));
        }
        mutations.extend(list_rank_writes(&before, &self.lists));

        self.commit("add_list", before, mutations).await;
        Ok(id)
    }

    pub async fn delete_list(&mut self, id: &str) {
        self.delete_lists(&[id]).await;
    }

    /// Delete lists with their items
    pub async fn delete_lists<S: AsRef<str>>(&mut self, ids: &[S]) {
        let before = self.lists.clone();
        let (kept, removed) = ordering::remove(std::mem::take(&mut self.lists), ids);
        self.lists = kept;

        if removed.is_empty() {
            debug!("delete_lists: no matching lists");
            return;
        }

        let mut mutations = vec![Mutation::DeleteLists(
            removed.iter().map(|list| list.id.clone()).collect(),
        )];
        mutations.extend(list_rank_writes(&before, &self.lists));

        self.commit("delete_lists", before, mutations).await;
    }

    /// Rename or recolor a list; an `order` moves it to that position
    pub async fn update_list(
        &mut self,
        id: &str,
        update: ListUpdate,
    ) -> Result<(), ValidationError> {
        let mut update = update;
        if let Some(ref name) = update.name {
            update.name = Some(normalize_text(name).ok_or(ValidationError::BlankName)?);
        }

        let Some(index) = self.index_of(id) else {
            debug!("update_list: no list {}", id);
            return Ok(());
        };

        let before = self.lists.clone();
        self.lists[index].apply(&update);

        let fields = ListUpdate {
            order: None,
            ..update.clone()
        };
        let mut mutations = Vec::new();
        if !fields.is_empty() {
            mutations.push(Mutation::UpdateList {
                id: id.to_string(),
                update: fields,
            });
        }

        if let Some(position) = update.order {
            self.lists = ordering::reposition(std::mem::take(&mut self.lists), id, position);
            mutations.extend(list_rank_writes(&before, &self.lists));
        }

        self.commit("update_list", before, mutations).await;
        Ok(())
    }

    /// Reorder lists to follow `ids`
    ///
    /// Lists not mentioned keep their relative order after the mentioned ones.
    pub async fn reorder_lists<S: AsRef<str>>(&mut self, ids: &[S]) {
        let before = self.lists.clone();
        self.lists = ordering::arrange(std::mem::take(&mut self.lists), ids);

        let mutations = list_rank_writes(&before, &self.lists);
        self.commit("reorder_lists", before, mutations).await;
    }

    /// Make a list the default, or clear the default with `None`
    pub async fn set_default_list(&mut self, id: Option<&str>) {
        if let Some(id) = id {
            if self.list(id).is_none() {
                debug!("set_default_list: no list {}", id);
                return;
            }
        }
        self.preferences
            .set_default_list_id(id.map(str::to_string))
            .await;
    }

    /// The default list, or the first list when the default is unset or gone
    pub fn default_list(&self) -> Option<&List> {
        self.preferences.resolve_default_list(&self.lists)
    }

    // ==================== Items ====================

    /// Add one item, placed per the new-item placement preference
    ///
    /// Returns `None` if the list does not exist.
    pub async fn add_item(
        &mut self,
        list_id: &str,
        text: &str,
    ) -> Result<Option<ItemId>, ValidationError> {
        if normalize_text(text).is_none() {
            return Err(ValidationError::BlankText);
        }
        Ok(self.add_items(list_id, &[text]).await.into_iter().next())
    }

    /// Add several items at once, keeping their relative order
    ///
    /// Blank texts are dropped. Returns the new ids in input order.
    pub async fn add_items<S: AsRef<str>>(&mut self, list_id: &str, texts: &[S]) -> Vec<ItemId> {
        let Some(index) = self.index_of(list_id) else {
            debug!("add_items: no list {}", list_id);
            return Vec::new();
        };

        let new_items: Vec<Item> = texts
            .iter()
            .filter_map(|text| normalize_text(text.as_ref()))
            .map(|text| Item::new(list_id, text))
            .collect();
        if new_items.is_empty() {
            return Vec::new();
        }
        let ids: Vec<ItemId> = new_items.iter().map(|item| item.id.clone()).collect();

        let before = self.lists.clone();
        let placement = self.preferences.new_item_placement();
        let list = &mut self.lists[index];
        let prior = std::mem::take(&mut list.items);
        list.items = ordering::append(prior.clone(), new_items, placement);

        let inserted: Vec<Item> = list
            .items
            .iter()
            .filter(|item| ids.contains(&item.id))
            .cloned()
            .collect();
        let mut mutations = vec![Mutation::InsertItems {
            list_id: list_id.to_string(),
            items: inserted,
        }];
        mutations.extend(item_rank_writes(&prior, &list.items));

        self.commit("add_items", before, mutations).await;
        ids
    }

    pub async fn delete_item(&mut self, item_id: &str) {
        self.delete_items(&[item_id]).await;
    }

    /// Delete items from whichever lists hold them
    pub async fn delete_items<S: AsRef<str>>(&mut self, item_ids: &[S]) {
        let before = self.lists.clone();
        let mut deleted = Vec::new();
        let mut rank_writes = Vec::new();

        for list in self.lists.iter_mut() {
            if !item_ids.iter().any(|id| list.contains_item(id.as_ref())) {
                continue;
            }
            let prior = std::mem::take(&mut list.items);
            let (kept, removed) = ordering::remove(prior.clone(), item_ids);
            list.items = kept;

            deleted.extend(removed.into_iter().map(|item| item.id));
            rank_writes.extend(item_rank_writes(&prior, &list.items));
        }

        if deleted.is_empty() {
            debug!("delete_items: no matching items");
            return;
        }

        let mut mutations = vec![Mutation::DeleteItems(deleted)];
        mutations.extend(rank_writes);
        self.commit("delete_items", before, mutations).await;
    }

    /// Flip an item's completed flag
    pub async fn toggle_item(&mut self, list_id: &str, item_id: &str) {
        let before = self.lists.clone();

        let Some(item) = self
            .lists
            .iter_mut()
            .find(|list| list.id == list_id)
            .and_then(|list| list.items.iter_mut().find(|item| item.id == item_id))
        else {
            debug!("toggle_item: no item {} in list {}", item_id, list_id);
            return;
        };

        item.completed = !item.completed;
        let mutations = vec![Mutation::UpdateItem {
            id: item_id.to_string(),
            update: ItemUpdate::new().completed(item.completed),
        }];

        self.commit("toggle_item", before, mutations).await;
    }

    pub async fn update_item(
        &mut self,
        item_id: &str,
        update: ItemUpdate,
    ) -> Result<(), ValidationError> {
        self.update_items(&[item_id], update).await
    }

    /// Apply one update to several items
    ///
    /// Text and completed are merged. An `order` moves each item to that
    /// position within its own list.
    pub async fn update_items<S: AsRef<str>>(
        &mut self,
        item_ids: &[S],
        update: ItemUpdate,
    ) -> Result<(), ValidationError> {
        let mut update = update;
        if let Some(ref text) = update.text {
            update.text = Some(normalize_text(text).ok_or(ValidationError::BlankText)?);
        }

        let fields = ItemUpdate {
            order: None,
            ..update.clone()
        };

        let before = self.lists.clone();
        let mut field_writes = Vec::new();
        let mut rank_writes = Vec::new();

        for list in self.lists.iter_mut() {
            let targets: Vec<ItemId> = item_ids
                .iter()
                .map(|id| id.as_ref())
                .filter(|id| list.contains_item(id))
                .map(str::to_string)
                .collect();
            if targets.is_empty() {
                continue;
            }

            let prior = list.items.clone();
            for id in &targets {
                if let Some(item) = list.items.iter_mut().find(|item| &item.id == id) {
                    item.apply(&fields);
                }
                if !fields.is_empty() {
                    field_writes.push(Mutation::UpdateItem {
                        id: id.clone(),
                        update: fields.clone(),
                    });
                }
                if let Some(position) = update.order {
                    list.items =
                        ordering::reposition(std::mem::take(&mut list.items), id, position);
                }
            }
            rank_writes.extend(item_rank_writes(&prior, &list.items));
        }

        if field_writes.is_empty() && rank_writes.is_empty() {
            debug!("update_items: nothing to change");
            return Ok(());
        }

        field_writes.extend(rank_writes);
        self.commit("update_items", before, field_writes).await;
        Ok(())
    }

    /// Reorder a list's items to follow `ids`
    pub async fn reorder_items<S: AsRef<str>>(&mut self, list_id: &str, ids: &[S]) {
        let Some(index) = self.index_of(list_id) else {
            debug!("reorder_items: no list {}", list_id);
            return;
        };

        let before = self.lists.clone();
        let list = &mut self.lists[index];
        let prior = std::mem::take(&mut list.items);
        list.items = ordering::arrange(prior.clone(), ids);

        let mutations = item_rank_writes(&prior, &list.items);
        self.commit("reorder_items", before, mutations).await;
    }

    /// Move items to another list
    ///
    /// Moved items get new ids in the target list and are placed per the
    /// new-item placement preference. Returns `(old_id, new_id)` pairs.
    pub async fn move_items<S: AsRef<str>>(
        &mut self,
        from: &str,
        to: &str,
        item_ids: &[S],
    ) -> Vec<(ItemId, ItemId)> {
        if from == to {
            debug!("move_items: source and target are the same list");
            return Vec::new();
        }
        let (Some(from_index), Some(to_index)) = (self.index_of(from), self.index_of(to)) else {
            debug!("move_items: no list {} or {}", from, to);
            return Vec::new();
        };

        let before = self.lists.clone();
        let source = std::mem::take(&mut self.lists[from_index].items);
        let target = std::mem::take(&mut self.lists[to_index].items);

        let moved = ordering::move_entries(
            source.clone(),
            target.clone(),
            item_ids,
            self.preferences.new_item_placement(),
            |item: &mut Item| item.id = generate_item_id(to),
        );
        self.lists[from_index].items = moved.source;
        self.lists[to_index].items = moved.target;

        if moved.id_map.is_empty() {
            debug!("move_items: no matching items in {}", from);
            self.lists = before;
            return Vec::new();
        }

        let new_ids: Vec<&str> = moved.id_map.iter().map(|(_, new)| new.as_str()).collect();
        let inserted: Vec<Item> = self.lists[to_index]
            .items
            .iter()
            .filter(|item| new_ids.contains(&item.id.as_str()))
            .cloned()
            .collect();

        // Insert before deleting so a failed write duplicates instead of losing
        let mut mutations = vec![
            Mutation::InsertItems {
                list_id: to.to_string(),
                items: inserted,
            },
            Mutation::DeleteItems(moved.id_map.iter().map(|(old, _)| old.clone()).collect()),
        ];
        mutations.extend(item_rank_writes(&source, &self.lists[from_index].items));
        mutations.extend(item_rank_writes(&target, &self.lists[to_index].items));

        self.commit("move_items", before, mutations).await;
        moved.id_map
    }

    // ==================== Refresh ====================

    /// Replace the lists with what the adapter holds
    pub async fn refresh_lists(&mut self) -> StorageResult<()> {
        let mut lists = self.adapter.load_lists().await?;
        ordering::sort_by_rank(&mut lists);
        debug!("Refreshed {} lists", lists.len());
        self.lists = lists;
        Ok(())
    }

    pub async fn refresh_preferences(&mut self) -> StorageResult<()> {
        self.preferences.refresh().await
    }

    /// Refetch the collection a change notification was about
    ///
    /// Items live inside lists, so both kinds refetch the lists.
    pub async fn refresh(&mut self, kind: CollectionKind) -> StorageResult<()> {
        match kind {
            CollectionKind::Lists | CollectionKind::Items => self.refresh_lists().await,
            CollectionKind::Preferences => self.refresh_preferences().await,
        }
    }

    // ==================== Internals ====================

    fn index_of(&self, list_id: &str) -> Option<usize> {
        self.lists.iter().position(|list| list.id == list_id)
    }

    /// Persist the current lists, undoing the change in remote mode on failure
    ///
    /// A remote write of several mutations may fail after some of them were
    /// applied, so the lists are refetched instead of restored. `before` is
    /// only used when that refetch fails too.
    async fn commit(&mut self, operation: &'static str, before: Vec<List>, mutations: Vec<Mutation>) {
        if mutations.is_empty() {
            return;
        }

        let change = Change::Lists {
            mutations: &mutations,
            snapshot: &self.lists,
        };
        let Err(e) = self.adapter.mutate(change).await else {
            return;
        };

        warn!("{} was not saved: {}", operation, e);
        if self.adapter.mode() == PersistenceMode::Remote {
            if mutations.len() == 1 {
                self.lists = before;
            } else if let Err(refetch) = self.refresh_lists().await {
                warn!("Refetch after failed {} also failed: {}", operation, refetch);
                self.lists = before;
            }
        }
        // Receiver is owned by self
        let _ = self.failures_tx.send(PersistenceFailure {
            operation,
            source: e,
        });
    }
}

fn list_rank_writes(before: &[List], after: &[List]) -> Vec<Mutation> {
    ordering::rank_changes(before, after)
        .into_iter()
        .map(|(id, rank)| Mutation::list_rank(id, rank))
        .collect()
}

fn item_rank_writes(before: &[Item], after: &[Item]) -> Vec<Mutation> {
    ordering::rank_changes(before, after)
        .into_iter()
        .map(|(id, rank)| Mutation::item_rank(id, rank))
        .collect()
}
