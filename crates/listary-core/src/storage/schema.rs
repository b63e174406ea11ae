//! SQLite schema for the remote store
//!
//! Mirrors the rows the remote adapter reads and writes. Timestamps are
//! unix milliseconds.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Lists, owned by an account
        CREATE TABLE IF NOT EXISTS lists (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            "order" INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Items, owned through their list
        CREATE TABLE IF NOT EXISTS list_items (
            id TEXT PRIMARY KEY,
            list_id TEXT NOT NULL,
            text TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            "order" INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (list_id) REFERENCES lists(id) ON DELETE CASCADE
        );

        -- One preferences row per account
        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY,
            default_list_id TEXT,
            theme TEXT NOT NULL DEFAULT 'system',
            new_list_placement TEXT NOT NULL DEFAULT 'bottom',
            new_item_placement TEXT NOT NULL DEFAULT 'bottom',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (default_list_id) REFERENCES lists(id) ON DELETE SET NULL
        );

        -- Row changes, read by other connections to the same database
        CREATE TABLE IF NOT EXISTS change_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            event TEXT NOT NULL,
            row_id TEXT NOT NULL,
            owner TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Indexes for common query patterns
        CREATE INDEX IF NOT EXISTS idx_lists_user_order ON lists(user_id, "order");
        CREATE INDEX IF NOT EXISTS idx_list_items_list_order ON list_items(list_id, "order");
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_info'",
        [],
        |row| row.get(0),
    )?;

    if !table_exists {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();

    Ok(version.and_then(|v| v.parse().ok()))
}

/// Check if the schema needs to be initialized or migrated
pub fn needs_init(conn: &Connection) -> bool {
    match get_schema_version(conn) {
        Ok(Some(version)) => version < SCHEMA_VERSION,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();

        assert!(!needs_init(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in ["lists", "list_items", "user_preferences", "change_log"] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {}", table);
        }
    }

    #[test]
    fn test_items_cascade_with_list() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            r#"INSERT INTO lists (id, user_id, name, color, "order", created_at, updated_at)
               VALUES ('l1', 'u1', 'Shopping', '#FF6B6B', 0, 0, 0)"#,
            [],
        )
        .unwrap();
        conn.execute(
            r#"INSERT INTO list_items (id, list_id, text, completed, "order", created_at, updated_at)
               VALUES ('i1', 'l1', 'Milk', 0, 0, 0, 0)"#,
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM lists WHERE id = 'l1'", []).unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM list_items", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
