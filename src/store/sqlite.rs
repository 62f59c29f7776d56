// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, path::Path, sync::Arc};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::{PropertyStore, StoreError, StoredProp};

/// SQLite-backed property store.
///
/// One `properties` table keyed by `(interface, path)`. Statements are
/// short point lookups and writes, executed under an async mutex on the
/// single connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS properties (
                interface TEXT NOT NULL,
                path TEXT NOT NULL,
                interface_major INTEGER NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (interface, path)
            )",
            (),
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl PropertyStore for SqliteStore {
    async fn store_prop(&self, prop: StoredProp) -> Result<(), StoreError> {
        self.conn.lock().await.execute(
            "INSERT OR REPLACE INTO properties (interface, path, interface_major, value)
             VALUES (?1, ?2, ?3, ?4)",
            (&prop.interface, &prop.path, prop.interface_major, &prop.value),
        )?;
        Ok(())
    }

    async fn load_prop(
        &self,
        interface: &str,
        path: &str,
        interface_major: i32,
    ) -> Result<Option<StoredProp>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT interface_major, value FROM properties
                 WHERE interface = ?1 AND path = ?2",
                (interface, path),
                |row| Ok((row.get::<_, i32>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;
        Ok(row
            .filter(|(major, _)| *major == interface_major)
            .map(|(major, value)| StoredProp {
                interface: interface.to_owned(),
                path: path.to_owned(),
                value,
                interface_major: major,
            }))
    }

    async fn delete_prop(&self, interface: &str, path: &str) -> Result<bool, StoreError> {
        let deleted = self.conn.lock().await.execute(
            "DELETE FROM properties WHERE interface = ?1 AND path = ?2",
            (interface, path),
        )?;
        Ok(deleted > 0)
    }

    async fn load_all(&self) -> Result<Vec<StoredProp>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT interface, path, interface_major, value FROM properties
             ORDER BY interface, path",
        )?;
        let rows = stmt.query_map((), |row| {
            Ok(StoredProp {
                interface: row.get(0)?,
                path: row.get(1)?,
                interface_major: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.conn.lock().await.execute("DELETE FROM properties", ())?;
        Ok(())
    }
}
