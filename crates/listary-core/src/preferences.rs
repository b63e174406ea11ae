//! Preferences store
//!
//! Holds the four preferences for the session and writes changes through the
//! persistence adapter. Setters never fail: a write error is logged and
//! reported on the failure channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{List, ListId, Placement, Preferences, PreferencesUpdate, Theme};
use crate::storage::{Change, PersistenceAdapter, PersistenceMode, StorageResult};
use crate::store::PersistenceFailure;

pub struct PreferencesStore {
    adapter: Arc<dyn PersistenceAdapter>,
    current: Preferences,
    failures: mpsc::UnboundedSender<PersistenceFailure>,
}

impl PreferencesStore {
    /// Load preferences, creating defaults if none are stored yet
    pub async fn load(
        adapter: Arc<dyn PersistenceAdapter>,
        failures: mpsc::UnboundedSender<PersistenceFailure>,
    ) -> StorageResult<Self> {
        let current = adapter.load_preferences().await?;
        Ok(Self {
            adapter,
            current,
            failures,
        })
    }

    pub fn get(&self) -> &Preferences {
        &self.current
    }

    pub fn theme(&self) -> Theme {
        self.current.theme
    }

    pub fn new_list_placement(&self) -> Placement {
        self.current.new_list_placement
    }

    pub fn new_item_placement(&self) -> Placement {
        self.current.new_item_placement
    }

    /// Stored default list id, possibly stale
    pub fn default_list_id(&self) -> Option<&str> {
        self.current.default_list_id.as_deref()
    }

    pub async fn set_theme(&mut self, theme: Theme) {
        self.update(PreferencesUpdate::new().theme(theme)).await;
    }

    pub async fn set_new_list_placement(&mut self, placement: Placement) {
        self.update(PreferencesUpdate::new().new_list_placement(placement))
            .await;
    }

    pub async fn set_new_item_placement(&mut self, placement: Placement) {
        self.update(PreferencesUpdate::new().new_item_placement(placement))
            .await;
    }

    /// Set the default list without checking that it exists
    ///
    /// The list store validates before calling this.
    pub(crate) async fn set_default_list_id(&mut self, id: Option<ListId>) {
        self.update(PreferencesUpdate::new().default_list_id(id))
            .await;
    }

    /// Apply an update in memory, then persist it
    pub async fn update(&mut self, update: PreferencesUpdate) {
        if update.is_empty() {
            return;
        }

        let before = self.current.clone();
        self.current.apply(&update);

        let change = Change::Preferences {
            update: &update,
            snapshot: &self.current,
        };
        if let Err(e) = self.adapter.mutate(change).await {
            warn!("Failed to save preferences: {}", e);
            if self.adapter.mode() == PersistenceMode::Remote {
                self.current = before;
            }
            // Receiver lives as long as the owning store
            let _ = self.failures.send(PersistenceFailure {
                operation: "update_preferences",
                source: e,
            });
        }
    }

    /// Replace in-memory preferences with the stored ones
    pub async fn refresh(&mut self) -> StorageResult<()> {
        self.current = self.adapter.load_preferences().await?;
        debug!("Refreshed preferences");
        Ok(())
    }

    /// The default list, falling back to the first list by rank
    ///
    /// A default id that no longer matches any list is treated as unset.
    pub fn resolve_default_list<'a>(&self, lists: &'a [List]) -> Option<&'a List> {
        self.default_list_id()
            .and_then(|id| lists.iter().find(|list| list.id == id))
            .or_else(|| lists.iter().min_by_key(|list| list.order))
    }
}
