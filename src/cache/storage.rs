//! Cache storage traits' SQLite implementation.
//!
//! One database file holds the region-partitioned response cache and the
//! offline write queue, so a single durable store survives restarts and
//! both halves share one connection.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::fingerprint::Fingerprint;
use super::traits::{CacheEntry, RegionHandle, RegionStore};
use crate::net::{Method, Request, Response};
use crate::queue::{QueueStore, QueuedWrite};

/// SQLite-backed store for cache regions and the write queue.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("medsync").join("engine.db"))
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the cache regions and the write queue.
const SCHEMA: &str = r#"
-- Named cache regions; one row per region
CREATE TABLE IF NOT EXISTS regions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, keyed by request fingerprint within a region
CREATE TABLE IF NOT EXISTS entries (
    region TEXT NOT NULL,
    key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (region, key)
);

CREATE INDEX IF NOT EXISTS idx_entries_region_url ON entries(region, url);

-- Mutating requests captured while the network was unavailable
CREATE TABLE IF NOT EXISTS write_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers BLOB NOT NULL,
    body BLOB,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now')),
    attempts INTEGER NOT NULL DEFAULT 0
);
"#;

impl RegionStore for SqliteStore {
  fn open(&self, name: &str) -> Result<RegionHandle> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("INSERT OR IGNORE INTO regions (name) VALUES (?)", params![name])
      .map_err(|e| eyre!("Failed to open region {}: {}", name, e))?;

    Ok(RegionHandle::new(name))
  }

  fn get(&self, region: &RegionHandle, key: &Fingerprint) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, headers, body, stored_at FROM entries
         WHERE region = ? AND key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let row: Option<(String, String, u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![region.name(), key.as_str()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .ok();

    match row {
      Some((method, url, status, headers, body, stored_at)) => {
        let method = Method::parse(&method)
          .ok_or_else(|| eyre!("Unknown method {} in cache entry", method))?;
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize entry headers: {}", e))?;

        Ok(Some(CacheEntry {
          key: key.as_str().to_string(),
          method,
          url,
          response: Response {
            status,
            headers,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, region: &RegionHandle, request: &Request, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key = Fingerprint::of(request);
    let headers = serde_json::to_vec(&response.headers)
      .map_err(|e| eyre!("Failed to serialize entry headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entries (region, key, method, url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          region.name(),
          key.as_str(),
          request.method.as_str(),
          request.url,
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store entry in {}: {}", region.name(), e))?;

    Ok(())
  }

  fn entries(&self, region: &RegionHandle) -> Result<Vec<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT key, method, url, status, headers, body, stored_at FROM entries
         WHERE region = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare entries query: {}", e))?;

    let rows: Vec<(String, String, String, u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_map(params![region.name()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (key, method, url, status, headers, body, stored_at) in rows {
      let method =
        Method::parse(&method).ok_or_else(|| eyre!("Unknown method {} in cache entry", method))?;
      let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
        .map_err(|e| eyre!("Failed to deserialize entry headers: {}", e))?;

      entries.push(CacheEntry {
        key,
        method,
        url,
        response: Response {
          status,
          headers,
          body,
        },
        stored_at: parse_datetime(&stored_at)?,
      });
    }

    Ok(entries)
  }

  fn delete_regions_except(&self, keep: &[RegionHandle]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let names: Vec<&str> = keep.iter().map(|r| r.name()).collect();
    let placeholders = names.iter().map(|_| "?").collect::<Vec<_>>().join(", ");

    // Log what is about to go away; deletion is irreversible
    {
      let sql = if names.is_empty() {
        "SELECT name FROM regions".to_string()
      } else {
        format!("SELECT name FROM regions WHERE name NOT IN ({})", placeholders)
      };
      let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| eyre!("Failed to prepare region query: {}", e))?;
      let stale: Vec<String> = stmt
        .query_map(rusqlite::params_from_iter(names.iter().copied()), |row| row.get(0))
        .map_err(|e| eyre!("Failed to query regions: {}", e))?
        .filter_map(|r| r.ok())
        .collect();
      for name in &stale {
        info!(region = %name, "deleting stale cache region");
      }
    }

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let (entries_sql, regions_sql) = if names.is_empty() {
      (
        "DELETE FROM entries".to_string(),
        "DELETE FROM regions".to_string(),
      )
    } else {
      (
        format!("DELETE FROM entries WHERE region NOT IN ({})", placeholders),
        format!("DELETE FROM regions WHERE name NOT IN ({})", placeholders),
      )
    };

    conn
      .execute(&entries_sql, rusqlite::params_from_iter(names.iter().copied()))
      .map_err(|e| eyre!("Failed to delete stale entries: {}", e))?;
    conn
      .execute(&regions_sql, rusqlite::params_from_iter(names.iter().copied()))
      .map_err(|e| eyre!("Failed to delete stale regions: {}", e))?;

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

impl QueueStore for SqliteStore {
  fn enqueue(&self, request: &Request) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_vec(&request.headers)
      .map_err(|e| eyre!("Failed to serialize request headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO write_queue (method, url, headers, body) VALUES (?, ?, ?, ?)",
        params![request.method.as_str(), request.url, headers, request.body],
      )
      .map_err(|e| eyre!("Failed to enqueue write: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn snapshot(&self) -> Result<Vec<QueuedWrite>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, enqueued_at, attempts FROM write_queue
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(i64, String, String, Vec<u8>, Option<Vec<u8>>, String, i64)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query write queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut writes = Vec::with_capacity(rows.len());
    for (id, method, url, headers, body, enqueued_at, attempts) in rows {
      let method =
        Method::parse(&method).ok_or_else(|| eyre!("Unknown method {} in write queue", method))?;
      let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
        .map_err(|e| eyre!("Failed to deserialize request headers: {}", e))?;

      writes.push(QueuedWrite {
        id,
        request: Request {
          method,
          url,
          headers,
          body,
        },
        enqueued_at: parse_datetime(&enqueued_at)?,
        attempts,
      });
    }

    Ok(writes)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM write_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued write {}: {}", id, e))?;

    Ok(())
  }

  fn record_failure(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE write_queue SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record replay failure for {}: {}", id, e))?;

    Ok(())
  }

  fn pending(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM write_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count write queue: {}", e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
