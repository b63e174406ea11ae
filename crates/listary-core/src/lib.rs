//! Listary Core Library
//!
//! This crate provides the core functionality for Listary, a personal
//! list and checklist manager that keeps its data either on the device or
//! in a remote store shared by every device of an account.
//!
//! # Architecture
//!
//! - **Store**: authoritative in-memory lists for the session, mutated
//!   optimistically and written through a persistence adapter
//! - **Ordering**: dense `0..n-1` ranks for lists and for the items of each list
//! - **Local storage**: independent JSON keys on the device
//! - **Remote storage**: row-level tables scoped to an account, with change
//!   notifications answered by a full refetch
//!
//! # Quick Start
//!
//! ```text
//! let mut store = Store::open_local(&config).await?;
//!
//! let shopping = store.add_list("Shopping").await?;
//! store.add_items(&shopping, &["Milk", "Bread"]).await;
//!
//! let lists = store.lists();
//! ```
//!
//! # Modules
//!
//! - `store`: List and item operations (main entry point)
//! - `preferences`: Theme, placements and the default list
//! - `ordering`: Rank computations shared by lists and items
//! - `models`: Data structures for lists, items and preferences
//! - `storage`: Local and remote persistence
//! - `migration`: One-time copy of local data into the remote store
//! - `listener`: Background refetch on remote changes
//! - `config`: Application configuration

pub mod config;
pub mod listener;
pub mod migration;
pub mod models;
pub mod ordering;
pub mod preferences;
pub mod storage;
pub mod store;

pub use config::Config;
pub use listener::{
    spawn_change_listener, ChangeListenerHandle, ListenerCommand, ListenerConfig, ListenerEvent,
};
pub use migration::{MigrationCoordinator, MigrationError, MigrationReport, MigrationState};
pub use models::{
    Item, ItemId, ItemUpdate, List, ListId, ListUpdate, Placement, Preferences, PreferencesUpdate,
    Theme,
};
pub use preferences::PreferencesStore;
pub use storage::{
    CollectionKind, LocalStorage, PersistenceAdapter, PersistenceMode, SqliteBackend,
    StorageError,
};
pub use store::{PersistenceFailure, Store, ValidationError};
