// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Property persistence.
//!
//! The session engine treats the store as a black box behind the
//! [`PropertyStore`] contract; any backend satisfying it is acceptable.
//! Two ship with the crate: [`MemoryStore`] for volatile sessions and
//! tests, and [`SqliteStore`] for durable persistence.

mod memory;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

pub use self::{memory::MemoryStore, sqlite::SqliteStore};

/// Errors of the property store backends.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A stored property row.
///
/// The value is the raw BSON document exactly as published, so equality of
/// rows is equality of wire payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredProp {
    /// Name of the interface the property belongs to.
    pub interface: String,
    /// Mapping path, starting with `/`.
    pub path: String,
    /// The raw `{"v": …}` document as published.
    pub value: Vec<u8>,
    /// Major version of the interface at the time of the write.
    pub interface_major: i32,
}

/// Contract the session engine requires from a property store.
///
/// Rows are keyed by `(interface, path)`. [`load_all`] returns an ordered
/// snapshot; the order is unspecified but stable, and iterating the
/// snapshot while deleting rows is safe by construction.
///
/// [`load_all`]: PropertyStore::load_all
#[async_trait]
pub trait PropertyStore: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Upserts a row.
    async fn store_prop(&self, prop: StoredProp) -> Result<(), StoreError>;

    /// Loads the row for `(interface, path)` if it exists and its stored
    /// major version equals `interface_major`.
    async fn load_prop(
        &self,
        interface: &str,
        path: &str,
        interface_major: i32,
    ) -> Result<Option<StoredProp>, StoreError>;

    /// Removes the row, reporting whether it existed.
    async fn delete_prop(&self, interface: &str, path: &str) -> Result<bool, StoreError>;

    /// Ordered snapshot of all rows.
    async fn load_all(&self) -> Result<Vec<StoredProp>, StoreError>;

    /// Drops all rows.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Whether a row exists with the given major version and exactly the
    /// given value bytes.
    async fn contains(
        &self,
        interface: &str,
        path: &str,
        interface_major: i32,
        value: &[u8],
    ) -> Result<bool, StoreError> {
        Ok(self
            .load_prop(interface, path, interface_major)
            .await?
            .is_some_and(|prop| prop.value == value))
    }
}

/// A store paired with its durability.
///
/// Only a durable store takes part in property persistence: dedup on set,
/// reconciliation after reconnect, purge handling and the clean-session
/// flag all key off this.
#[derive(Clone, Debug)]
pub(crate) struct StoreWrapper<S> {
    store: S,
    durable: bool,
}

impl<S: PropertyStore> StoreWrapper<S> {
    pub(crate) fn volatile(store: S) -> Self {
        Self { store, durable: false }
    }

    pub(crate) fn durable(store: S) -> Self {
        Self { store, durable: true }
    }

    pub(crate) fn is_durable(&self) -> bool {
        self.durable
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn prop(interface: &str, path: &str, major: i32, value: &[u8]) -> StoredProp {
        StoredProp {
            interface: interface.to_owned(),
            path: path.to_owned(),
            value: value.to_vec(),
            interface_major: major,
        }
    }

    /// Exercises the whole contract against a backend.
    pub(crate) async fn exercise_store<S: PropertyStore>(store: S) {
        assert!(store.load_all().await.unwrap().is_empty());

        store.store_prop(prop("org.example.A", "/a", 0, &[1])).await.unwrap();
        store.store_prop(prop("org.example.A", "/b", 0, &[2])).await.unwrap();
        store.store_prop(prop("org.example.B", "/c", 1, &[3])).await.unwrap();

        // Upsert replaces the value.
        store.store_prop(prop("org.example.A", "/a", 0, &[9])).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 3);

        let loaded = store.load_prop("org.example.A", "/a", 0).await.unwrap().unwrap();
        assert_eq!(loaded.value, vec![9]);

        // A differing major misses.
        assert!(store.load_prop("org.example.A", "/a", 1).await.unwrap().is_none());

        assert!(store.contains("org.example.A", "/a", 0, &[9]).await.unwrap());
        assert!(!store.contains("org.example.A", "/a", 0, &[1]).await.unwrap());

        assert!(store.delete_prop("org.example.A", "/b").await.unwrap());
        assert!(!store.delete_prop("org.example.A", "/b").await.unwrap());
        assert_eq!(store.load_all().await.unwrap().len(), 2);

        store.clear().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
