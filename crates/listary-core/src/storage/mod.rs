//! Storage layer
//!
//! The store talks to durable storage through a [`PersistenceAdapter`].
//!
//! ## Architecture
//!
//! - **Local**: snapshot based. The whole list array and each preference are
//!   stored as independent JSON keys on the device.
//! - **Remote**: row based. Every store operation is replayed as row-level
//!   mutations against a [`RemoteBackend`] scoped to the signed-in account.
//!   Other devices' writes arrive as [`RowChange`] notifications, which the
//!   change listener answers with a full refetch.
//!
//! Multi-row changes are not atomic: mutations are applied in order and the
//! first failure aborts the rest.

pub mod error;
pub mod local;
pub mod remote;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

use crate::models::{Item, ItemId, ItemUpdate, List, ListId, ListUpdate, Preferences, PreferencesUpdate};

pub use error::{StorageError, StorageResult};
pub use local::{LocalAdapter, LocalStorage};
pub use remote::{
    ItemRow, ListRow, NewItemRow, NewListRow, PreferencesRow, RemoteAdapter, RemoteBackend,
};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteBackend;

/// Where an adapter keeps its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Device storage only
    Local,
    /// Remote store tied to an account
    Remote,
}

/// Collections the remote store tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Lists,
    Items,
    Preferences,
}

impl CollectionKind {
    /// All collections
    pub const ALL: [CollectionKind; 3] = [
        CollectionKind::Lists,
        CollectionKind::Items,
        CollectionKind::Preferences,
    ];

    /// Name of the remote table backing this collection
    pub fn table(&self) -> &'static str {
        match self {
            CollectionKind::Lists => "lists",
            CollectionKind::Items => "list_items",
            CollectionKind::Preferences => "user_preferences",
        }
    }

    /// Collection backed by the named remote table
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table() == table)
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

impl ChangeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEvent::Insert => "INSERT",
            ChangeEvent::Update => "UPDATE",
            ChangeEvent::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSERT" => Some(ChangeEvent::Insert),
            "UPDATE" => Some(ChangeEvent::Update),
            "DELETE" => Some(ChangeEvent::Delete),
            _ => None,
        }
    }
}

/// A row-level change published by the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub kind: CollectionKind,
    pub event: ChangeEvent,
    /// Primary key of the changed row
    pub row_id: String,
    /// Account owning the row
    pub owner: String,
}

/// What a subscription delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A single row changed
    Row(RowChange),
    /// Notifications were dropped; every collection must be refetched
    Resync,
}

/// A row-level mutation derived from a store operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert a list row (items follow as `InsertItems`)
    InsertList(List),
    UpdateList { id: ListId, update: ListUpdate },
    /// Delete lists; their items go with them
    DeleteLists(Vec<ListId>),
    InsertItems { list_id: ListId, items: Vec<Item> },
    UpdateItem { id: ItemId, update: ItemUpdate },
    DeleteItems(Vec<ItemId>),
}

impl Mutation {
    /// Explicit rank write for a list
    pub fn list_rank(id: impl Into<ListId>, rank: i64) -> Self {
        Mutation::UpdateList {
            id: id.into(),
            update: ListUpdate::new().order(rank),
        }
    }

    /// Explicit rank write for an item
    pub fn item_rank(id: impl Into<ItemId>, rank: i64) -> Self {
        Mutation::UpdateItem {
            id: id.into(),
            update: ItemUpdate::new().order(rank),
        }
    }
}

/// A change handed to an adapter
///
/// Carries both the row-level mutations and the resulting in-memory state so
/// that snapshot-based and row-based adapters can each take what they need.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    Lists {
        mutations: &'a [Mutation],
        snapshot: &'a [List],
    },
    Preferences {
        update: &'a PreferencesUpdate,
        snapshot: &'a Preferences,
    },
}

/// Boundary between the store and durable storage
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Where this adapter keeps its data
    fn mode(&self) -> PersistenceMode;

    /// Load every list with its items, sorted by rank
    async fn load_lists(&self) -> StorageResult<Vec<List>>;

    /// Load preferences, creating defaults on first access
    async fn load_preferences(&self) -> StorageResult<Preferences>;

    /// Durably apply a change
    async fn mutate(&self, change: Change<'_>) -> StorageResult<()>;

    /// Subscribe to changes made elsewhere
    ///
    /// Dropping the subscription unsubscribes.
    fn subscribe(&self, kinds: &[CollectionKind]) -> Subscription;
}

/// Stream of change notifications for one account
///
/// An inert subscription (local storage) yields nothing.
#[derive(Debug)]
pub struct Subscription {
    feed: Option<Feed>,
}

#[derive(Debug)]
struct Feed {
    rx: broadcast::Receiver<RowChange>,
    owner: String,
    kinds: Vec<CollectionKind>,
}

impl Feed {
    fn accepts(&self, change: &RowChange) -> bool {
        change.owner == self.owner && self.kinds.contains(&change.kind)
    }
}

impl Subscription {
    /// A subscription that never delivers anything
    pub fn inert() -> Self {
        Self { feed: None }
    }

    /// Filter a broadcast of row changes down to one account and some kinds
    pub fn new(
        rx: broadcast::Receiver<RowChange>,
        owner: impl Into<String>,
        kinds: &[CollectionKind],
    ) -> Self {
        Self {
            feed: Some(Feed {
                rx,
                owner: owner.into(),
                kinds: kinds.to_vec(),
            }),
        }
    }

    /// True if this subscription can never deliver
    pub fn is_inert(&self) -> bool {
        self.feed.is_none()
    }

    /// Wait for the next relevant notification
    ///
    /// Returns `None` once the source is gone (or immediately when inert).
    pub async fn recv(&mut self) -> Option<Notification> {
        let feed = self.feed.as_mut()?;
        loop {
            match feed.rx.recv().await {
                Ok(change) if feed.accepts(&change) => return Some(Notification::Row(change)),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Change subscription lagged, skipped {} notifications", skipped);
                    return Some(Notification::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take an already queued notification without waiting
    pub fn try_recv(&mut self) -> Option<Notification> {
        let feed = self.feed.as_mut()?;
        loop {
            match feed.rx.try_recv() {
                Ok(change) if feed.accepts(&change) => return Some(Notification::Row(change)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Change subscription lagged, skipped {} notifications", skipped);
                    return Some(Notification::Resync);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: CollectionKind, owner: &str) -> RowChange {
        RowChange {
            kind,
            event: ChangeEvent::Update,
            row_id: "row".to_string(),
            owner: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn test_inert_subscription_ends_immediately() {
        let mut sub = Subscription::inert();
        assert!(sub.is_inert());
        assert!(sub.recv().await.is_none());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscription_filters_owner_and_kind() {
        let (tx, rx) = broadcast::channel(16);
        let mut sub = Subscription::new(rx, "alice", &[CollectionKind::Lists]);

        tx.send(change(CollectionKind::Lists, "bob")).unwrap();
        tx.send(change(CollectionKind::Preferences, "alice")).unwrap();
        tx.send(change(CollectionKind::Lists, "alice")).unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(
            received,
            Notification::Row(change(CollectionKind::Lists, "alice"))
        );
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = Subscription::new(rx, "alice", &CollectionKind::ALL);
        drop(tx);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscription_requests_resync() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = Subscription::new(rx, "alice", &CollectionKind::ALL);
        for _ in 0..5 {
            tx.send(change(CollectionKind::Items, "alice")).unwrap();
        }
        assert_eq!(sub.recv().await, Some(Notification::Resync));
    }

    #[test]
    fn test_table_and_event_names() {
        for kind in CollectionKind::ALL {
            assert_eq!(CollectionKind::from_table(kind.table()), Some(kind));
        }
        assert_eq!(CollectionKind::from_table("links"), None);
        assert_eq!(CollectionKind::Items.table(), "list_items");

        for event in [ChangeEvent::Insert, ChangeEvent::Update, ChangeEvent::Delete] {
            assert_eq!(ChangeEvent::parse(event.as_str()), Some(event));
        }
        assert_eq!(ChangeEvent::parse("TRUNCATE"), None);
    }
}
