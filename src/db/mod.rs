use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};


/// One quick-add favorite. Presence of a row *is* the favorite flag for
/// its `(server_connection, entity_id)` pair; there is no separate boolean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Favorite {
    pub compound_id: String,
    pub entity_id: String,
    pub server_connection: String,
    pub sort_order: i64,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ServerConnection {
    pub url: String,
    pub label: Option<String>,
    pub created_at_ms: i64,
}

/// Storage failure taxonomy. Everything fallible in this crate bottoms
/// out here; callers treat `StorageUnavailable` as transient and retry
/// the whole operation, while `ConstraintViolation` is surfaced as-is.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage constraint violated: {0}")]
    ConstraintViolation(rusqlite::Error),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(rusqlite::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                StoreError::ConstraintViolation(err)
            }
            _ => StoreError::StorageUnavailable(err),
        }
    }
}

/// Derives the primary key for a favorite from the two identifiers the
/// remote side hands us. Length-prefixing the connection part keeps
/// inputs containing the separator from colliding: `("a:1", "2")` and
/// `("a", "1:2")` produce distinct keys. Pure; re-derivable without
/// stored state.
pub fn compound_id(server_connection: &str, entity_id: &str) -> String {
    format!(
        "{}:{server_connection}:{entity_id}",
        server_connection.len()
    )
}

fn db_path(app_dir: &Path) -> PathBuf {
    app_dir.join("shelfmate.sqlite3")
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS server_connections (
  url TEXT PRIMARY KEY,
  label TEXT,
  created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS quick_add_favorites (
  compound_id TEXT PRIMARY KEY,
  entity_id TEXT NOT NULL,
  server_connection TEXT NOT NULL,
  sort_order INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quick_add_favorites_connection_order
  ON quick_add_favorites(server_connection, sort_order);

PRAGMA user_version = 1;
"#,
        )?;
    }

    Ok(())
}

pub fn open(app_dir: &Path) -> Result<Connection> {
    fs::create_dir_all(app_dir)?;
    let conn = Connection::open(db_path(app_dir))?;
    conn.busy_timeout(Duration::from_millis(5_000))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    migrate(&conn)?;
    Ok(conn)
}

/// Idempotent by identity: an existing row only gets its `sort_order`
/// updated, `created_at_ms` is preserved, no second row can appear.
pub fn upsert_favorite(
    conn: &Connection,
    server_connection: &str,
    entity_id: &str,
    sort_order: i64,
) -> Result<Favorite, StoreError> {
    let id = compound_id(server_connection, entity_id);
    let now = now_ms();

    conn.execute(
        r#"INSERT INTO quick_add_favorites
             (compound_id, entity_id, server_connection, sort_order, created_at_ms)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(compound_id) DO UPDATE SET sort_order = excluded.sort_order"#,
        params![id, entity_id, server_connection, sort_order, now],
    )?;

    let created_at_ms: i64 = conn.query_row(
        r#"SELECT created_at_ms FROM quick_add_favorites WHERE compound_id = ?1"#,
        params![id],
        |row| row.get(0),
    )?;

    Ok(Favorite {
        compound_id: id,
        entity_id: entity_id.to_string(),
        server_connection: server_connection.to_string(),
        sort_order,
        created_at_ms,
    })
}

/// Removing an absent row is a no-op, which keeps cleanup retries safe.
pub fn remove_favorite(conn: &Connection, compound_id: &str) -> Result<(), StoreError> {
    conn.execute(
        r#"DELETE FROM quick_add_favorites WHERE compound_id = ?1"#,
        params![compound_id],
    )?;
    Ok(())
}

pub fn get_favorite(
    conn: &Connection,
    server_connection: &str,
    entity_id: &str,
) -> Result<Option<Favorite>, StoreError> {
    let id = compound_id(server_connection, entity_id);
    let row = conn
        .query_row(
            r#"SELECT entity_id, server_connection, sort_order, created_at_ms
               FROM quick_add_favorites
               WHERE compound_id = ?1"#,
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(
        |(entity_id, server_connection, sort_order, created_at_ms)| Favorite {
            compound_id: id,
            entity_id,
            server_connection,
            sort_order,
            created_at_ms,
        },
    ))
}

/// Ascending by `(sort_order, created_at_ms, compound_id)` so the
/// ordering stays total when gap arithmetic produces ties. Fully
/// materialized: callers need a stable snapshot per reconcile pass.
pub fn list_favorites_by_connection(
    conn: &Connection,
    server_connection: &str,
) -> Result<Vec<Favorite>, StoreError> {
    let mut stmt = conn.prepare(
        r#"SELECT compound_id, entity_id, sort_order, created_at_ms
           FROM quick_add_favorites
           WHERE server_connection = ?1
           ORDER BY sort_order ASC, created_at_ms ASC, compound_id ASC"#,
    )?;

    let mut rows = stmt.query(params![server_connection])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(Favorite {
            compound_id: row.get(0)?,
            entity_id: row.get(1)?,
            server_connection: server_connection.to_string(),
            sort_order: row.get(2)?,
            created_at_ms: row.get(3)?,
        });
    }

    Ok(out)
}

/// Bulk delete for a removed server connection. A single statement, so
/// a concurrent listing sees either all of the rows or none of them.
pub fn remove_favorites_by_connection(
    conn: &Connection,
    server_connection: &str,
) -> Result<usize, StoreError> {
    let deleted = conn.execute(
        r#"DELETE FROM quick_add_favorites WHERE server_connection = ?1"#,
        params![server_connection],
    )?;
    Ok(deleted)
}

pub(crate) fn max_sort_order_by_connection(
    conn: &Connection,
    server_connection: &str,
) -> Result<Option<i64>, StoreError> {
    let max: Option<i64> = conn.query_row(
        r#"SELECT MAX(sort_order) FROM quick_add_favorites WHERE server_connection = ?1"#,
        params![server_connection],
        |row| row.get(0),
    )?;
    Ok(max)
}

pub(crate) fn set_favorite_sort_order(
    conn: &Connection,
    compound_id: &str,
    sort_order: i64,
) -> Result<(), StoreError> {
    conn.execute(
        r#"UPDATE quick_add_favorites SET sort_order = ?2 WHERE compound_id = ?1"#,
        params![compound_id, sort_order],
    )?;
    Ok(())
}

pub fn upsert_server_connection(
    conn: &Connection,
    url: &str,
    label: Option<&str>,
) -> Result<ServerConnection, StoreError> {
    let now = now_ms();
    conn.execute(
        r#"INSERT INTO server_connections (url, label, created_at_ms)
           VALUES (?1, ?2, ?3)
           ON CONFLICT(url) DO UPDATE SET label = excluded.label"#,
        params![url, label, now],
    )?;

    let created_at_ms: i64 = conn.query_row(
        r#"SELECT created_at_ms FROM server_connections WHERE url = ?1"#,
        params![url],
        |row| row.get(0),
    )?;

    Ok(ServerConnection {
        url: url.to_string(),
        label: label.map(|v| v.to_string()),
        created_at_ms,
    })
}

pub fn list_server_connections(conn: &Connection) -> Result<Vec<ServerConnection>, StoreError> {
    let mut stmt = conn.prepare(
        r#"SELECT url, label, created_at_ms
           FROM server_connections
           ORDER BY created_at_ms ASC, url ASC"#,
    )?;

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(ServerConnection {
            url: row.get(0)?,
            label: row.get(1)?,
            created_at_ms: row.get(2)?,
        });
    }

    Ok(out)
}

/// Removes a server connection and every favorite scoped to it. Runs in
/// one transaction so a listing never observes the registry row gone
/// while its favorites linger (or the other way round).
pub fn remove_server_connection(
    conn: &Connection,
    url: &str,
) -> Result<(), StoreError> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;

    let result: Result<(), StoreError> = (|| {
        conn.execute(
            r#"DELETE FROM server_connections WHERE url = ?1"#,
            params![url],
        )?;
        remove_favorites_by_connection(conn, url)?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(e)
        }
    }
}
