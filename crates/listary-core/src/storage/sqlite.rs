//! SQLite implementation of the remote store
//!
//! Several processes may open the same database file. Each write records
//! its row changes in `change_log` inside the same transaction, then
//! publishes them to in-process subscribers. [`SqliteBackend::poll_external`]
//! picks up changes committed by other connections and publishes those too.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::remote::{ItemRow, ListRow, NewItemRow, NewListRow, PreferencesRow, RemoteBackend};
use super::schema::{init_schema, needs_init};
use super::{ChangeEvent, CollectionKind, RowChange};
use crate::models::{
    generate_item_id, generate_list_id, ItemId, ItemUpdate, ListId, ListUpdate, Preferences,
    PreferencesUpdate,
};

/// Capacity of the in-process change channel
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change log entries older than this are pruned on open
const CHANGE_LOG_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

struct Inner {
    conn: Connection,
    /// Highest change_log sequence number already published
    cursor: i64,
}

/// Remote store backed by a SQLite database
pub struct SqliteBackend {
    inner: Mutex<Inner>,
    /// Identifies this connection's entries in the change log
    source: String,
    changes: broadcast::Sender<RowChange>,
}

impl SqliteBackend {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let backend = Self::from_connection(conn)?;
        info!("Opened remote store at {:?}", path);
        Ok(backend)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        let cutoff = now_millis() - CHANGE_LOG_RETENTION_MS;
        conn.execute("DELETE FROM change_log WHERE created_at < ?", [cutoff])?;

        let cursor: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM change_log",
            [],
            |row| row.get(0),
        )?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Mutex::new(Inner { conn, cursor }),
            source: Uuid::new_v4().to_string(),
            changes,
        })
    }

    /// Publish changes committed by other connections since the last poll
    ///
    /// Returns the number of changes published.
    pub async fn poll_external(&self) -> StorageResult<usize> {
        let mut inner = self.inner.lock().await;

        let mut stmt = inner.conn.prepare(
            "SELECT seq, source, kind, event, row_id, owner FROM change_log WHERE seq > ? ORDER BY seq",
        )?;
        let entries = stmt
            .query_map([inner.cursor], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut published = 0;
        for (seq, source, kind, event, row_id, owner) in entries {
            inner.cursor = seq;
            if source == self.source {
                continue;
            }
            let (Some(kind), Some(event)) = (CollectionKind::from_table(&kind), ChangeEvent::parse(&event))
            else {
                warn!("Skipping malformed change log entry {}", seq);
                continue;
            };
            self.publish(vec![RowChange {
                kind,
                event,
                row_id,
                owner,
            }]);
            published += 1;
        }

        if published > 0 {
            debug!("Published {} external changes", published);
        }
        Ok(published)
    }

    /// Poll for external changes every `interval` until the backend is dropped
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let backend: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(backend) = backend.upgrade() else {
                    break;
                };
                if let Err(e) = backend.poll_external().await {
                    warn!("Change poll failed: {}", e);
                }
            }
        })
    }

    fn publish(&self, changes: Vec<RowChange>) {
        for change in changes {
            // No receivers is fine
            let _ = self.changes.send(change);
        }
    }

    /// Run a write in a transaction, log its changes and publish them after commit
    ///
    /// The transaction takes the write lock up front. Writes read ownership
    /// first, and upgrading a read lock fails with SQLITE_BUSY when another
    /// process is writing.
    async fn write<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Transaction<'_>, &mut Vec<RowChange>) -> StorageResult<T>,
    {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut changes = Vec::new();
        let value = f(&tx, &mut changes)?;
        record_changes(&tx, &self.source, &changes)?;
        tx.commit()?;

        self.publish(changes);
        Ok(value)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn record_changes(tx: &Transaction<'_>, source: &str, changes: &[RowChange]) -> StorageResult<()> {
    let now = now_millis();
    let mut stmt = tx.prepare_cached(
        "INSERT INTO change_log (source, kind, event, row_id, owner, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for change in changes {
        stmt.execute(params![
            source,
            change.kind.table(),
            change.event.as_str(),
            change.row_id,
            change.owner,
            now,
        ])?;
    }
    Ok(())
}

fn row_change(kind: CollectionKind, event: ChangeEvent, row_id: &str, owner: &str) -> RowChange {
    RowChange {
        kind,
        event,
        row_id: row_id.to_string(),
        owner: owner.to_string(),
    }
}

/// Owner of a list, if it exists
fn list_owner(conn: &Connection, list_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT user_id FROM lists WHERE id = ?", [list_id], |row| {
        row.get(0)
    })
    .optional()
}

/// Owner of an item (through its list), if it exists
fn item_owner(conn: &Connection, item_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT l.user_id FROM list_items li JOIN lists l ON l.id = li.list_id WHERE li.id = ?",
        [item_id],
        |row| row.get(0),
    )
    .optional()
}

/// Error for an update that matched no owned row
fn missing_or_foreign(
    table: &'static str,
    id: &str,
    user_id: &str,
    owner: Option<String>,
) -> StorageError {
    match owner {
        Some(_) => StorageError::NotOwner {
            table,
            id: id.to_string(),
            user_id: user_id.to_string(),
        },
        None => StorageError::RowNotFound {
            table,
            id: id.to_string(),
        },
    }
}

fn read_list_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListRow> {
    Ok(ListRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        order: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        updated_at: from_millis(row.get(6)?),
    })
}

fn read_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        list_id: row.get(1)?,
        text: row.get(2)?,
        completed: row.get(3)?,
        order: row.get(4)?,
        created_at: from_millis(row.get(5)?),
        updated_at: from_millis(row.get(6)?),
    })
}

fn read_preferences_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PreferencesRow> {
    let theme: String = row.get(2)?;
    let new_list_placement: String = row.get(3)?;
    let new_item_placement: String = row.get(4)?;
    Ok(PreferencesRow {
        user_id: row.get(0)?,
        default_list_id: row.get(1)?,
        theme: theme.parse().unwrap_or_default(),
        new_list_placement: new_list_placement.parse().unwrap_or_default(),
        new_item_placement: new_item_placement.parse().unwrap_or_default(),
        created_at: from_millis(row.get(5)?),
        updated_at: from_millis(row.get(6)?),
    })
}

/// Column assignments for a partial update
struct Assignments {
    columns: Vec<&'static str>,
    values: Vec<Value>,
}

impl Assignments {
    fn new() -> Self {
        Self {
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    fn set(&mut self, column: &'static str, value: Value) {
        self.columns.push(column);
        self.values.push(value);
    }

    fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `UPDATE {table} SET ..., updated_at = ? WHERE {filter}`
    ///
    /// `keys` bind the placeholders in `filter`.
    fn execute(
        mut self,
        conn: &Connection,
        table: &str,
        filter: &str,
        keys: &[&str],
    ) -> rusqlite::Result<usize> {
        let mut sets: Vec<String> = self
            .columns
            .iter()
            .map(|column| format!("{} = ?", column))
            .collect();
        sets.push("updated_at = ?".to_string());
        self.values.push(Value::Integer(now_millis()));
        self.values
            .extend(keys.iter().map(|key| Value::Text(key.to_string())));

        let sql = format!("UPDATE {} SET {} WHERE {}", table, sets.join(", "), filter);
        conn.execute(&sql, params_from_iter(self.values.iter()))
    }
}

#[async_trait]
impl RemoteBackend for SqliteBackend {
    async fn select_lists(&self, user_id: &str) -> StorageResult<Vec<ListRow>> {
        let inner = self.inner.lock().await;
        let mut stmt = inner.conn.prepare(
            r#"SELECT id, user_id, name, color, "order", created_at, updated_at
               FROM lists WHERE user_id = ? ORDER BY "order""#,
        )?;
        let rows = stmt
            .query_map([user_id], read_list_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn select_items(
        &self,
        user_id: &str,
        list_ids: &[ListId],
    ) -> StorageResult<Vec<ItemRow>> {
        let inner = self.inner.lock().await;
        let mut stmt = inner.conn.prepare(
            r#"SELECT li.id, li.list_id, li.text, li.completed, li."order", li.created_at, li.updated_at
               FROM list_items li JOIN lists l ON l.id = li.list_id
               WHERE li.list_id = ? AND l.user_id = ?
               ORDER BY li."order""#,
        )?;

        let mut rows = Vec::new();
        for list_id in list_ids {
            let items = stmt
                .query_map(params![list_id, user_id], read_item_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.extend(items);
        }
        Ok(rows)
    }

    async fn insert_list(&self, row: NewListRow) -> StorageResult<ListRow> {
        self.write(|tx, changes| {
            let now = now_millis();
            let id = row.id.unwrap_or_else(generate_list_id);
            tx.execute(
                r#"INSERT INTO lists (id, user_id, name, color, "order", created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                params![id, row.user_id, row.name, row.color, row.order, now, now],
            )?;
            changes.push(row_change(
                CollectionKind::Lists,
                ChangeEvent::Insert,
                &id,
                &row.user_id,
            ));
            Ok(ListRow {
                id,
                user_id: row.user_id,
                name: row.name,
                color: row.color,
                order: row.order,
                created_at: from_millis(now),
                updated_at: from_millis(now),
            })
        })
        .await
    }

    async fn update_list(
        &self,
        user_id: &str,
        id: &str,
        update: &ListUpdate,
    ) -> StorageResult<()> {
        let mut assignments = Assignments::new();
        if let Some(ref name) = update.name {
            assignments.set("name", Value::Text(name.clone()));
        }
        if let Some(ref color) = update.color {
            assignments.set("color", Value::Text(color.clone()));
        }
        if let Some(order) = update.order {
            assignments.set(r#""order""#, Value::Integer(order));
        }
        if assignments.is_empty() {
            return Ok(());
        }

        self.write(|tx, changes| {
            let updated = assignments.execute(tx, "lists", "id = ? AND user_id = ?", &[id, user_id])?;
            if updated == 0 {
                return Err(missing_or_foreign("lists", id, user_id, list_owner(tx, id)?));
            }
            changes.push(row_change(
                CollectionKind::Lists,
                ChangeEvent::Update,
                id,
                user_id,
            ));
            Ok(())
        })
        .await
    }

    async fn delete_lists(&self, user_id: &str, ids: &[ListId]) -> StorageResult<()> {
        self.write(|tx, changes| {
            for id in ids {
                if list_owner(tx, id)?.as_deref() != Some(user_id) {
                    continue;
                }

                let mut stmt = tx.prepare_cached("SELECT id FROM list_items WHERE list_id = ?")?;
                let item_ids = stmt
                    .query_map([id], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                let referencing: Vec<String> = tx
                    .prepare_cached("SELECT user_id FROM user_preferences WHERE default_list_id = ?")?
                    .query_map([id], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;

                tx.execute("DELETE FROM lists WHERE id = ?", [id])?;

                for item_id in &item_ids {
                    changes.push(row_change(
                        CollectionKind::Items,
                        ChangeEvent::Delete,
                        item_id,
                        user_id,
                    ));
                }
                changes.push(row_change(
                    CollectionKind::Lists,
                    ChangeEvent::Delete,
                    id,
                    user_id,
                ));
                // default_list_id is nulled by the foreign key
                for owner in &referencing {
                    changes.push(row_change(
                        CollectionKind::Preferences,
                        ChangeEvent::Update,
                        owner,
                        owner,
                    ));
                }
            }
            Ok(())
        })
        .await
    }

    async fn insert_items(
        &self,
        user_id: &str,
        rows: Vec<NewItemRow>,
    ) -> StorageResult<Vec<ItemRow>> {
        self.write(|tx, changes| {
            let now = now_millis();
            let mut inserted = Vec::with_capacity(rows.len());

            for row in rows {
                match list_owner(tx, &row.list_id)? {
                    Some(owner) if owner == user_id => {}
                    owner => {
                        return Err(missing_or_foreign("lists", &row.list_id, user_id, owner));
                    }
                }

                let id = row.id.unwrap_or_else(|| generate_item_id(&row.list_id));
                tx.execute(
                    r#"INSERT INTO list_items (id, list_id, text, completed, "order", created_at, updated_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                    params![id, row.list_id, row.text, row.completed, row.order, now, now],
                )?;
                changes.push(row_change(
                    CollectionKind::Items,
                    ChangeEvent::Insert,
                    &id,
                    user_id,
                ));
                inserted.push(ItemRow {
                    id,
                    list_id: row.list_id,
                    text: row.text,
                    completed: row.completed,
                    order: row.order,
                    created_at: from_millis(now),
                    updated_at: from_millis(now),
                });
            }

            Ok(inserted)
        })
        .await
    }

    async fn update_item(
        &self,
        user_id: &str,
        id: &str,
        update: &ItemUpdate,
    ) -> StorageResult<()> {
        let mut assignments = Assignments::new();
        if let Some(ref text) = update.text {
            assignments.set("text", Value::Text(text.clone()));
        }
        if let Some(completed) = update.completed {
            assignments.set("completed", Value::Integer(i64::from(completed)));
        }
        if let Some(order) = update.order {
            assignments.set(r#""order""#, Value::Integer(order));
        }
        if assignments.is_empty() {
            return Ok(());
        }

        self.write(|tx, changes| {
            let updated = assignments.execute(
                tx,
                "list_items",
                "id = ? AND list_id IN (SELECT id FROM lists WHERE user_id = ?)",
                &[id, user_id],
            )?;
            if updated == 0 {
                return Err(missing_or_foreign("list_items", id, user_id, item_owner(tx, id)?));
            }
            changes.push(row_change(
                CollectionKind::Items,
                ChangeEvent::Update,
                id,
                user_id,
            ));
            Ok(())
        })
        .await
    }

    async fn delete_items(&self, user_id: &str, ids: &[ItemId]) -> StorageResult<()> {
        self.write(|tx, changes| {
            for id in ids {
                let deleted = tx.execute(
                    "DELETE FROM list_items WHERE id = ? AND list_id IN (SELECT id FROM lists WHERE user_id = ?)",
                    params![id, user_id],
                )?;
                if deleted > 0 {
                    changes.push(row_change(
                        CollectionKind::Items,
                        ChangeEvent::Delete,
                        id,
                        user_id,
                    ));
                }
            }
            Ok(())
        })
        .await
    }

    async fn select_preferences(&self, user_id: &str) -> StorageResult<Option<PreferencesRow>> {
        let inner = self.inner.lock().await;
        let row = inner
            .conn
            .query_row(
                "SELECT user_id, default_list_id, theme, new_list_placement, new_item_placement, created_at, updated_at
                 FROM user_preferences WHERE user_id = ?",
                [user_id],
                read_preferences_row,
            )
            .optional()?;
        Ok(row)
    }

    async fn insert_preferences(
        &self,
        user_id: &str,
        prefs: &Preferences,
    ) -> StorageResult<PreferencesRow> {
        self.write(|tx, changes| {
            let now = now_millis();
            let inserted = tx.execute(
                "INSERT INTO user_preferences (user_id, default_list_id, theme, new_list_placement, new_item_placement, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (user_id) DO NOTHING",
                params![
                    user_id,
                    prefs.default_list_id,
                    prefs.theme.as_str(),
                    prefs.new_list_placement.as_str(),
                    prefs.new_item_placement.as_str(),
                    now,
                    now,
                ],
            )?;
            if inserted == 0 {
                // Another connection created the row first
                let existing = tx.query_row(
                    "SELECT user_id, default_list_id, theme, new_list_placement, new_item_placement, created_at, updated_at
                     FROM user_preferences WHERE user_id = ?",
                    [user_id],
                    read_preferences_row,
                )?;
                return Ok(existing);
            }
            changes.push(row_change(
                CollectionKind::Preferences,
                ChangeEvent::Insert,
                user_id,
                user_id,
            ));
            Ok(PreferencesRow {
                user_id: user_id.to_string(),
                default_list_id: prefs.default_list_id.clone(),
                theme: prefs.theme,
                new_list_placement: prefs.new_list_placement,
                new_item_placement: prefs.new_item_placement,
                created_at: from_millis(now),
                updated_at: from_millis(now),
            })
        })
        .await
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        update: &PreferencesUpdate,
    ) -> StorageResult<()> {
        let mut assignments = Assignments::new();
        if let Some(ref default_list_id) = update.default_list_id {
            let value = match default_list_id {
                Some(id) => Value::Text(id.clone()),
                None => Value::Null,
            };
            assignments.set("default_list_id", value);
        }
        if let Some(theme) = update.theme {
            assignments.set("theme", Value::Text(theme.as_str().to_string()));
        }
        if let Some(placement) = update.new_list_placement {
            assignments.set("new_list_placement", Value::Text(placement.as_str().to_string()));
        }
        if let Some(placement) = update.new_item_placement {
            assignments.set("new_item_placement", Value::Text(placement.as_str().to_string()));
        }
        if assignments.is_empty() {
            return Ok(());
        }

        self.write(|tx, changes| {
            let updated = assignments.execute(tx, "user_preferences", "user_id = ?", &[user_id])?;
            if updated == 0 {
                return Err(StorageError::RowNotFound {
                    table: "user_preferences",
                    id: user_id.to_string(),
                });
            }
            changes.push(row_change(
                CollectionKind::Preferences,
                ChangeEvent::Update,
                user_id,
                user_id,
            ));
            Ok(())
        })
        .await
    }

    fn changes(&self) -> broadcast::Receiver<RowChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Placement, Theme};
    use tempfile::TempDir;

    fn new_list(id: &str, user: &str, order: i64) -> NewListRow {
        NewListRow {
            id: Some(id.to_string()),
            user_id: user.to_string(),
            name: format!("List {}", id),
            color: "#4ECDC4".to_string(),
            order,
        }
    }

    fn new_item(list_id: &str, text: &str, order: i64) -> NewItemRow {
        NewItemRow {
            id: None,
            list_id: list_id.to_string(),
            text: text.to_string(),
            completed: false,
            order,
        }
    }

    #[tokio::test]
    async fn test_insert_and_select() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert_list(new_list("b", "alice", 1)).await.unwrap();
        backend.insert_list(new_list("a", "alice", 0)).await.unwrap();

        let lists = backend.select_lists("alice").await.unwrap();
        let ids: Vec<&str> = lists.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let items = backend
            .insert_items("alice", vec![new_item("a", "Milk", 0), new_item("a", "Bread", 1)])
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].id.starts_with("a-"));

        let selected = backend
            .select_items("alice", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let texts: Vec<&str> = selected.iter().map(|row| row.text.as_str()).collect();
        assert_eq!(texts, vec!["Milk", "Bread"]);
    }

    #[tokio::test]
    async fn test_insert_list_assigns_id() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut row = new_list("x", "alice", 0);
        row.id = None;
        let inserted = backend.insert_list(row).await.unwrap();
        assert!(Uuid::parse_str(&inserted.id).is_ok());
    }

    #[tokio::test]
    async fn test_insert_items_requires_owned_list() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert_list(new_list("a", "alice", 0)).await.unwrap();

        let err = backend
            .insert_items("bob", vec![new_item("a", "Sneaky", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotOwner { .. }));

        let err = backend
            .insert_items("alice", vec![new_item("missing", "Lost", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RowNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_batch_inserts_nothing() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert_list(new_list("a", "alice", 0)).await.unwrap();

        let result = backend
            .insert_items(
                "alice",
                vec![new_item("a", "Milk", 0), new_item("missing", "Lost", 1)],
            )
            .await;
        assert!(result.is_err());

        let items = backend
            .select_items("alice", &["a".to_string()])
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_update_item_fields() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert_list(new_list("a", "alice", 0)).await.unwrap();
        let items = backend
            .insert_items("alice", vec![new_item("a", "Milk", 0)])
            .await
            .unwrap();

        backend
            .update_item(
                "alice",
                &items[0].id,
                &ItemUpdate::new().text("Oat milk").completed(true).order(3),
            )
            .await
            .unwrap();

        let row = &backend
            .select_items("alice", &["a".to_string()])
            .await
            .unwrap()[0];
        assert_eq!(row.text, "Oat milk");
        assert!(row.completed);
        assert_eq!(row.order, 3);

        let err = backend
            .update_item("bob", &items[0].id, &ItemUpdate::new().completed(false))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_delete_list_cascades_and_clears_default() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert_list(new_list("a", "alice", 0)).await.unwrap();
        backend
            .insert_items("alice", vec![new_item("a", "Milk", 0)])
            .await
            .unwrap();
        backend
            .insert_preferences(
                "alice",
                &Preferences {
                    default_list_id: Some("a".to_string()),
                    ..Preferences::default()
                },
            )
            .await
            .unwrap();

        let mut rx = backend.changes();
        backend
            .delete_lists("alice", &["a".to_string()])
            .await
            .unwrap();

        let inner = backend.inner.lock().await;
        let orphans: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM list_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
        drop(inner);

        let prefs = backend.select_preferences("alice").await.unwrap().unwrap();
        assert_eq!(prefs.default_list_id, None);

        let kinds: Vec<CollectionKind> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|change| change.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                CollectionKind::Items,
                CollectionKind::Lists,
                CollectionKind::Preferences
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_ignores_foreign_rows() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.insert_list(new_list("a", "alice", 0)).await.unwrap();

        backend.delete_lists("bob", &["a".to_string()]).await.unwrap();
        assert_eq!(backend.select_lists("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preferences_update() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        let err = backend
            .update_preferences("alice", &PreferencesUpdate::new().theme(Theme::Dark))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::RowNotFound { .. }));

        backend
            .insert_preferences("alice", &Preferences::default())
            .await
            .unwrap();
        backend
            .update_preferences(
                "alice",
                &PreferencesUpdate::new()
                    .theme(Theme::Dark)
                    .new_item_placement(Placement::Top),
            )
            .await
            .unwrap();

        let row = backend.select_preferences("alice").await.unwrap().unwrap();
        assert_eq!(row.theme, Theme::Dark);
        assert_eq!(row.new_item_placement, Placement::Top);
        assert_eq!(row.new_list_placement, Placement::Bottom);
    }

    #[tokio::test]
    async fn test_insert_preferences_keeps_existing_row() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut rx = backend.changes();

        backend
            .insert_preferences("alice", &Preferences::default())
            .await
            .unwrap();
        let dark = Preferences {
            theme: Theme::Dark,
            ..Preferences::default()
        };
        let row = backend.insert_preferences("alice", &dark).await.unwrap();

        assert_eq!(row.theme, Theme::System);
        assert_eq!(rx.try_recv().unwrap().event, ChangeEvent::Insert);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_writers_on_one_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote.db");

        let setup = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        setup.block_on(async {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.insert_list(new_list("a", "alice", 0)).await.unwrap();
        });

        let writers: Vec<_> = (0..2)
            .map(|writer| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .build()
                        .unwrap();
                    runtime.block_on(async {
                        let backend = SqliteBackend::open(&path).unwrap();
                        for i in 0..25 {
                            let text = format!("item {}-{}", writer, i);
                            backend
                                .insert_items("alice", vec![new_item("a", &text, i)])
                                .await
                                .unwrap();
                        }
                    });
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        setup.block_on(async {
            let backend = SqliteBackend::open(&path).unwrap();
            let items = backend
                .select_items("alice", &["a".to_string()])
                .await
                .unwrap();
            assert_eq!(items.len(), 50);
        });
    }

    #[tokio::test]
    async fn test_poll_external_sees_other_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote.db");

        let device_a = SqliteBackend::open(&path).unwrap();
        let device_b = SqliteBackend::open(&path).unwrap();
        let mut rx = device_b.changes();

        device_a.insert_list(new_list("a", "alice", 0)).await.unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(device_b.poll_external().await.unwrap(), 1);
        let change = rx.try_recv().unwrap();
        assert_eq!(change.kind, CollectionKind::Lists);
        assert_eq!(change.event, ChangeEvent::Insert);
        assert_eq!(change.row_id, "a");

        // Own writes are not republished
        assert_eq!(device_a.poll_external().await.unwrap(), 0);
        assert_eq!(device_b.poll_external().await.unwrap(), 0);
    }
}
