//! Real-time change listener
//!
//! Runs as a background task that receives row-change notifications for the
//! signed-in account and refetches the affected collection into the shared
//! store. Notifications carry no data; every change triggers a full refetch
//! of its collection.
//!
//! Notifications arriving within the debounce window (or already queued)
//! are coalesced into one refetch per collection. Item changes are covered
//! by a list refetch, since items are loaded with their lists.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_REFETCH_DEBOUNCE_MS};
use crate::storage::{CollectionKind, Notification, Subscription};
use crate::store::Store;

/// Commands sent to the listener task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCommand {
    /// Refetch every collection now
    RefreshAll,
    /// Stop the listener
    Shutdown,
}

/// Events emitted by the listener task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A collection was refetched into the store
    Refetched(CollectionKind),
    /// A refetch failed; the store keeps its previous state
    Error(String),
}

/// Configuration for the change listener
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// How long to wait for further notifications before refetching;
    /// zero refetches immediately
    pub debounce: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_REFETCH_DEBOUNCE_MS),
        }
    }
}

impl ListenerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.refetch_debounce(),
        }
    }
}

/// Handle to control the change listener task
pub struct ChangeListenerHandle {
    /// Send commands to the listener task
    pub command_tx: mpsc::Sender<ListenerCommand>,
    /// Receive events from the listener task
    pub event_rx: mpsc::Receiver<ListenerEvent>,
    join: JoinHandle<()>,
}

impl ChangeListenerHandle {
    /// Ask for an immediate refetch of everything
    pub async fn refresh_all(&self) {
        let _ = self.command_tx.send(ListenerCommand::RefreshAll).await;
    }

    /// Stop the listener and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ListenerCommand::Shutdown).await;
        if let Err(e) = self.join.await {
            warn!("Change listener ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Collections waiting to be refetched
#[derive(Debug, Default)]
struct Pending {
    lists: bool,
    items: bool,
    preferences: bool,
}

impl Pending {
    fn add(&mut self, notification: Notification) {
        match notification {
            Notification::Row(change) => match change.kind {
                CollectionKind::Lists => self.lists = true,
                CollectionKind::Items => self.items = true,
                CollectionKind::Preferences => self.preferences = true,
            },
            Notification::Resync => self.add_all(),
        }
    }

    fn add_all(&mut self) {
        self.lists = true;
        self.preferences = true;
    }

    /// Collections to refetch, each once
    fn take(&mut self) -> Vec<CollectionKind> {
        let mut kinds = Vec::new();
        if self.lists {
            kinds.push(CollectionKind::Lists);
        } else if self.items {
            kinds.push(CollectionKind::Items);
        }
        if self.preferences {
            kinds.push(CollectionKind::Preferences);
        }
        *self = Pending::default();
        kinds
    }
}

/// Spawn the change listener
///
/// Returns a handle to control and monitor the task. The task runs until
/// shut down or until both the subscription and the command channel close.
pub fn spawn_change_listener(
    store: Arc<Mutex<Store>>,
    subscription: Subscription,
    config: ListenerConfig,
) -> ChangeListenerHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);

    let join = tokio::spawn(listener_loop(
        store,
        subscription,
        config,
        command_rx,
        event_tx,
    ));

    ChangeListenerHandle {
        command_tx,
        event_rx,
        join,
    }
}

async fn listener_loop(
    store: Arc<Mutex<Store>>,
    mut subscription: Subscription,
    config: ListenerConfig,
    mut command_rx: mpsc::Receiver<ListenerCommand>,
    event_tx: mpsc::Sender<ListenerEvent>,
) {
    let mut feed_open = !subscription.is_inert();
    info!("Change listener started (debounce {:?})", config.debounce);

    loop {
        let mut pending = Pending::default();

        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(ListenerCommand::Shutdown) | None => break,
                Some(ListenerCommand::RefreshAll) => pending.add_all(),
            },
            notification = subscription.recv(), if feed_open => match notification {
                Some(notification) => {
                    pending.add(notification);
                    feed_open = collect(&mut subscription, &mut pending, config.debounce).await;
                }
                None => {
                    debug!("Change feed closed");
                    feed_open = false;
                    continue;
                }
            },
        }

        for kind in pending.take() {
            refetch(&store, kind, &event_tx).await;
        }
    }

    info!("Change listener stopped");
}

/// Gather further notifications for the debounce window, then drain the queue
///
/// Returns false if the feed closed.
async fn collect(subscription: &mut Subscription, pending: &mut Pending, debounce: Duration) -> bool {
    if !debounce.is_zero() {
        let deadline = Instant::now() + debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                notification = subscription.recv() => match notification {
                    Some(notification) => pending.add(notification),
                    None => return false,
                },
            }
        }
    }

    while let Some(notification) = subscription.try_recv() {
        pending.add(notification);
    }
    true
}

async fn refetch(
    store: &Arc<Mutex<Store>>,
    kind: CollectionKind,
    event_tx: &mpsc::Sender<ListenerEvent>,
) {
    let result = store.lock().await.refresh(kind).await;

    let event = match result {
        Ok(()) => {
            debug!("Refetched {}", kind.table());
            ListenerEvent::Refetched(kind)
        }
        Err(e) => {
            warn!("Failed to refetch {}: {}", kind.table(), e);
            ListenerEvent::Error(format!("Failed to refetch {}: {}", kind.table(), e))
        }
    };

    // Nobody listening, or a slow reader; the store is already updated
    let _ = event_tx.try_send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Theme;
    use crate::storage::{ChangeEvent, RowChange, SqliteBackend};
    use tempfile::TempDir;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    async fn next_event(handle: &mut ChangeListenerHandle) -> ListenerEvent {
        timeout(WAIT, handle.event_rx.recv())
            .await
            .expect("timed out waiting for listener event")
            .expect("listener stopped")
    }

    async fn no_more_events(handle: &mut ChangeListenerHandle) {
        let next = timeout(Duration::from_millis(200), handle.event_rx.recv()).await;
        assert!(next.is_err(), "unexpected event: {:?}", next);
    }

    #[test]
    fn test_pending_coalesces() {
        let change = |kind| {
            Notification::Row(RowChange {
                kind,
                event: ChangeEvent::Update,
                row_id: "row".to_string(),
                owner: "alice".to_string(),
            })
        };

        let mut pending = Pending::default();
        pending.add(change(CollectionKind::Items));
        pending.add(change(CollectionKind::Items));
        assert_eq!(pending.take(), vec![CollectionKind::Items]);

        pending.add(change(CollectionKind::Items));
        pending.add(change(CollectionKind::Lists));
        pending.add(change(CollectionKind::Preferences));
        assert_eq!(
            pending.take(),
            vec![CollectionKind::Lists, CollectionKind::Preferences]
        );
        assert!(pending.take().is_empty());

        pending.add(Notification::Resync);
        assert_eq!(
            pending.take(),
            vec![CollectionKind::Lists, CollectionKind::Preferences]
        );
    }

    #[tokio::test]
    async fn test_refetches_on_remote_change() {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut phone = Store::open_remote(backend.clone(), "alice").await.unwrap();
        let laptop = Store::open_remote(backend.clone(), "alice").await.unwrap();

        let subscription = laptop.subscribe(&CollectionKind::ALL);
        let laptop = Arc::new(Mutex::new(laptop));
        let mut handle = spawn_change_listener(
            laptop.clone(),
            subscription,
            ListenerConfig {
                debounce: Duration::ZERO,
            },
        );

        phone.add_list("Shopping").await.unwrap();

        assert_eq!(
            next_event(&mut handle).await,
            ListenerEvent::Refetched(CollectionKind::Lists)
        );
        assert_eq!(laptop.lock().await.lists()[0].name, "Shopping");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_burst_is_coalesced() {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut phone = Store::open_remote(backend.clone(), "alice").await.unwrap();
        let laptop = Store::open_remote(backend.clone(), "alice").await.unwrap();

        let subscription = laptop.subscribe(&CollectionKind::ALL);
        let laptop = Arc::new(Mutex::new(laptop));
        let mut handle = spawn_change_listener(
            laptop.clone(),
            subscription,
            ListenerConfig {
                debounce: Duration::from_millis(50),
            },
        );

        let id = phone.add_list("Shopping").await.unwrap();
        phone.add_items(&id, &["Milk", "Bread", "Eggs"]).await;
        phone.preferences_mut().set_theme(Theme::Dark).await;

        assert_eq!(
            next_event(&mut handle).await,
            ListenerEvent::Refetched(CollectionKind::Lists)
        );
        assert_eq!(
            next_event(&mut handle).await,
            ListenerEvent::Refetched(CollectionKind::Preferences)
        );
        no_more_events(&mut handle).await;

        let laptop = laptop.lock().await;
        assert_eq!(laptop.lists()[0].items.len(), 3);
        assert_eq!(laptop.preferences().theme, Theme::Dark);
        drop(laptop);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_accounts_are_ignored() {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let mut bob = Store::open_remote(backend.clone(), "bob").await.unwrap();
        let alice = Store::open_remote(backend.clone(), "alice").await.unwrap();

        let subscription = alice.subscribe(&CollectionKind::ALL);
        let mut handle = spawn_change_listener(
            Arc::new(Mutex::new(alice)),
            subscription,
            ListenerConfig::default(),
        );

        bob.add_list("Bob's list").await.unwrap();
        no_more_events(&mut handle).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_local_store_listener_answers_commands() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = Store::open_local(&config).await.unwrap();
        let subscription = store.subscribe(&CollectionKind::ALL);
        assert!(subscription.is_inert());

        let mut handle = spawn_change_listener(
            Arc::new(Mutex::new(store)),
            subscription,
            ListenerConfig::from_config(&config),
        );

        handle.refresh_all().await;
        assert_eq!(
            next_event(&mut handle).await,
            ListenerEvent::Refetched(CollectionKind::Lists)
        );
        assert_eq!(
            next_event(&mut handle).await,
            ListenerEvent::Refetched(CollectionKind::Preferences)
        );

        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
