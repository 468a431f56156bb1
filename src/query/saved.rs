//! Saved queries
//!
//! The saved-query list is persisted as one JSON string in a key-value store.
//! [`QueryStore`] is the persistence seam; [`SqliteQueryStore`] backs it with
//! a single SQLite table.

use crate::query::ast::Subquery;
use crate::query::error::{QueryError, QueryResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Key the query list is stored under
const SAVED_QUERIES_KEY: &str = "savedQueries";

/// A named query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub name: String,
    pub query: Subquery,
}

impl SavedQuery {
    pub fn new(name: impl Into<String>, query: Subquery) -> Self {
        Self {
            name: name.into(),
            query,
        }
    }
}

/// Persistence for the saved-query list
pub trait QueryStore {
    /// Load the full list; a store that was never written yields an empty list
    fn load(&self) -> QueryResult<Vec<SavedQuery>>;

    /// Replace the full list
    fn save(&self, queries: &[SavedQuery]) -> QueryResult<()>;

    /// Insert or replace the query with the same name
    fn upsert(&self, saved: SavedQuery) -> QueryResult<()> {
        let mut queries = self.load()?;
        match queries.iter_mut().find(|q| q.name == saved.name) {
            Some(existing) => *existing = saved,
            None => queries.push(saved),
        }
        self.save(&queries)
    }

    /// Remove a query by name
    fn remove(&self, name: &str) -> QueryResult<()> {
        let mut queries = self.load()?;
        let before = queries.len();
        queries.retain(|q| q.name != name);
        if queries.len() == before {
            return Err(QueryError::NotFound(name.to_string()));
        }
        self.save(&queries)
    }

    /// Look up a query by name
    fn get(&self, name: &str) -> QueryResult<SavedQuery> {
        self.load()?
            .into_iter()
            .find(|q| q.name == name)
            .ok_or_else(|| QueryError::NotFound(name.to_string()))
    }
}

/// SQLite-backed key-value store
pub struct SqliteQueryStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteQueryStore {
    /// Create or open a store at `path`
    pub fn open(path: &Path) -> QueryResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Store that lives only as long as the value
    pub fn in_memory() -> QueryResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> QueryResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn, path })
    }

    pub fn get_value(&self, key: &str) -> QueryResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_value(&self, key: &str, value: &str) -> QueryResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Location on disk, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl QueryStore for SqliteQueryStore {
    fn load(&self) -> QueryResult<Vec<SavedQuery>> {
        match self.get_value(SAVED_QUERIES_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, queries: &[SavedQuery]) -> QueryResult<()> {
        let json = serde_json::to_string(queries)?;
        self.set_value(SAVED_QUERIES_KEY, &json)?;
        tracing::debug!(count = queries.len(), "Saved query list persisted");
        Ok(())
    }
}
