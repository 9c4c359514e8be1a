//! Core traits and types for the versioned cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::fingerprint::Fingerprint;
use crate::net::{Method, Request, Response};

/// Which partition of the cache a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
  /// Application shell assets, populated at install time
  Static,
  /// API response snapshots, refreshed on every successful fetch
  Dynamic,
}

/// Handle to an open cache region. Obtained from `RegionStore::open`;
/// repeated opens of the same name return handles to the same region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionHandle {
  name: String,
}

impl RegionHandle {
  pub(crate) fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  /// Fingerprint the entry is stored under
  pub key: String,
  /// Method of the request that produced it
  pub method: Method,
  /// URL of the request that produced it
  pub url: String,
  /// The response snapshot
  pub response: Response,
  /// When the snapshot was stored
  pub stored_at: DateTime<Utc>,
}

/// Trait for region-partitioned cache storage backends.
///
/// Entries never expire implicitly: eviction happens only through
/// `delete_regions_except`, the garbage-collection half of a version
/// activation.
pub trait RegionStore: Send + Sync {
  /// Open a region by name, creating it if absent. Idempotent.
  fn open(&self, name: &str) -> Result<RegionHandle>;

  /// Look up an entry by fingerprint. `None` is a cache miss.
  fn get(&self, region: &RegionHandle, key: &Fingerprint) -> Result<Option<CacheEntry>>;

  /// Store a response snapshot, overwriting any entry with the same key.
  fn put(&self, region: &RegionHandle, request: &Request, response: &Response) -> Result<()>;

  /// All entries currently held by a region.
  fn entries(&self, region: &RegionHandle) -> Result<Vec<CacheEntry>>;

  /// Delete every region not in `keep`, entries included. Irreversible.
  fn delete_regions_except(&self, keep: &[RegionHandle]) -> Result<()>;
}
