//! Time-bounded ownership record in shared storage
//!
//! A [`Lease`] is an advisory lock: one JSON record `{tabId, timestamp}`
//! under a well-known key. Anyone may take a free or expired lease, only
//! the owner may release a live one, and any reader that finds an expired
//! record deletes it.

use crate::error::Result;
use crate::storage::{load_json, save_json, KeyValueStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default time after which an unreleased lease is considered abandoned
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Stored lease record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Owner identifier
    pub tab_id: String,
    /// Acquisition time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl LeaseRecord {
    /// Record owned by `owner`, stamped now
    pub fn new(owner: &str) -> Self {
        Self {
            tab_id: owner.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Milliseconds since the record was written
    pub fn age_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.timestamp
    }

    /// Whether the record is older than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age_millis() > ttl.as_millis() as i64
    }
}

/// Advisory lease over a key in a [`KeyValueStore`]
#[derive(Clone)]
pub struct Lease {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    ttl: Duration,
}

impl Lease {
    /// Create a lease handle; nothing is written until `acquire`
    pub fn new(storage: Arc<dyn KeyValueStore>, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            storage,
            key: key.into(),
            ttl,
        }
    }

    /// Expiry window
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current live holder, reclaiming an expired record
    ///
    /// An unreadable record is treated like an expired one.
    pub fn holder(&self) -> Result<Option<LeaseRecord>> {
        if self.storage.get(&self.key)?.is_none() {
            return Ok(None);
        }
        let Some(record) = load_json::<LeaseRecord>(self.storage.as_ref(), &self.key)? else {
            self.storage.remove(&self.key)?;
            return Ok(None);
        };
        if record.is_expired(self.ttl) {
            tracing::warn!(
                owner = %record.tab_id,
                age_ms = record.age_millis(),
                "Reclaiming expired lease"
            );
            self.storage.remove(&self.key)?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Whether any owner holds a live lease
    pub fn is_held(&self) -> Result<bool> {
        Ok(self.holder()?.is_some())
    }

    /// Whether `owner` holds a live lease
    pub fn is_held_by(&self, owner: &str) -> Result<bool> {
        Ok(self.holder()?.is_some_and(|r| r.tab_id == owner))
    }

    /// Take or refresh the lease for `owner`
    ///
    /// Returns false, writing nothing, when a different owner holds a live
    /// lease.
    pub fn acquire(&self, owner: &str) -> Result<bool> {
        if let Some(record) = self.holder()? {
            if record.tab_id != owner {
                tracing::debug!(owner, holder = %record.tab_id, "Lease is held elsewhere");
                return Ok(false);
            }
        }
        save_json(self.storage.as_ref(), &self.key, &LeaseRecord::new(owner))?;
        Ok(true)
    }

    /// Release the lease if `owner` holds it
    ///
    /// Returns whether a record was removed. Records owned by someone else
    /// are left alone; only expiry reclaims them.
    pub fn release(&self, owner: &str) -> Result<bool> {
        let Some(record) = load_json::<LeaseRecord>(self.storage.as_ref(), &self.key)? else {
            return Ok(false);
        };
        if record.tab_id != owner {
            return Ok(false);
        }
        self.storage.remove(&self.key)?;
        Ok(true)
    }
}
