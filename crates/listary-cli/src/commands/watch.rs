//! Watch command handler
//!
//! Keeps the store open, follows changes made by other devices and prints
//! the refetched lists until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tracing::debug;

use listary_core::{
    spawn_change_listener, CollectionKind, Config, ListenerConfig, ListenerEvent, SqliteBackend,
    Store,
};

use crate::output::Output;

/// How often the remote database is checked for writes from other processes
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Follow remote changes until Ctrl-C
pub async fn watch(
    store: Store,
    backend: Option<Arc<SqliteBackend>>,
    config: &Config,
    output: &Output,
) -> Result<()> {
    let Some(backend) = backend else {
        bail!("Nothing to watch in local mode. Sign in with `listary login <user>` first.");
    };

    let poller = backend.spawn_poller(POLL_INTERVAL);
    let subscription = store.subscribe(&CollectionKind::ALL);
    let store = Arc::new(Mutex::new(store));
    let mut handle = spawn_change_listener(
        store.clone(),
        subscription,
        ListenerConfig::from_config(config),
    );

    {
        let store = store.lock().await;
        let default_id = store.default_list().map(|list| list.id.as_str());
        output.print_lists(store.lists(), default_id);
    }
    output.message("Watching for changes (Ctrl-C to stop)...");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("Interrupted");
                break;
            }
            event = handle.event_rx.recv() => match event {
                Some(ListenerEvent::Refetched(kind)) => {
                    let store = store.lock().await;
                    match kind {
                        CollectionKind::Lists | CollectionKind::Items => {
                            let default_id = store.default_list().map(|list| list.id.as_str());
                            output.print_lists(store.lists(), default_id);
                        }
                        CollectionKind::Preferences => {
                            output.print_preferences(store.preferences(), store.default_list());
                        }
                    }
                }
                Some(ListenerEvent::Error(message)) => eprintln!("Warning: {}", message),
                None => break,
            },
        }
    }

    handle.shutdown().await;
    poller.abort();
    Ok(())
}
