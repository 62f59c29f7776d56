// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{PropertyStore, StoreError, StoredProp};

/// In-memory property store.
///
/// Keeps rows in a `BTreeMap`, so snapshots come out in key order. State is
/// shared between clones and lost on drop; use [`SqliteStore`] for state
/// that must survive restarts.
///
/// [`SqliteStore`]: super::SqliteStore
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    props: Arc<RwLock<BTreeMap<(String, String), Entry>>>,
}

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    interface_major: i32,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PropertyStore for MemoryStore {
    async fn store_prop(&self, prop: StoredProp) -> Result<(), StoreError> {
        self.props.write().await.insert(
            (prop.interface, prop.path),
            Entry {
                value: prop.value,
                interface_major: prop.interface_major,
            },
        );
        Ok(())
    }

    async fn load_prop(
        &self,
        interface: &str,
        path: &str,
        interface_major: i32,
    ) -> Result<Option<StoredProp>, StoreError> {
        let props = self.props.read().await;
        let entry = props
            .get(&(interface.to_owned(), path.to_owned()))
            .filter(|entry| entry.interface_major == interface_major);
        Ok(entry.map(|entry| StoredProp {
            interface: interface.to_owned(),
            path: path.to_owned(),
            value: entry.value.clone(),
            interface_major: entry.interface_major,
        }))
    }

    async fn delete_prop(&self, interface: &str, path: &str) -> Result<bool, StoreError> {
        let removed = self
            .props
            .write()
            .await
            .remove(&(interface.to_owned(), path.to_owned()));
        Ok(removed.is_some())
    }

    async fn load_all(&self) -> Result<Vec<StoredProp>, StoreError> {
        let props = self.props.read().await;
        Ok(props
            .iter()
            .map(|((interface, path), entry)| StoredProp {
                interface: interface.clone(),
                path: path.clone(),
                value: entry.value.clone(),
                interface_major: entry.interface_major,
            })
            .collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.props.write().await.clear();
        Ok(())
    }
}
