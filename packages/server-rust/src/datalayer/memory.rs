//! In-memory [`Datalayer`] for tests and local runs.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::Locality;
use crate::traits::Datalayer;

/// Rows and map entries held in `DashMap`s, keyed by their full path.
#[derive(Default)]
pub struct MemoryDatalayer {
    rows: DashMap<String, Bytes>,
    maps: DashMap<String, Bytes>,
    fail_writes: AtomicBool,
    closed: AtomicBool,
}

fn row_path(keyspace: &str, table: &str, key: &str) -> String {
    format!("{keyspace}/{table}/{key}")
}

fn map_path(keyspace: &str, map_table: &str, map_name: &str, key: &str) -> String {
    format!("{keyspace}/{map_table}/{map_name}/{key}")
}

impl MemoryDatalayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn row(&self, keyspace: &str, table: &str, key: &str) -> Option<Bytes> {
        self.rows
            .get(&row_path(keyspace, table, key))
            .map(|v| v.value().clone())
    }

    #[must_use]
    pub fn map_entry(&self, keyspace: &str, map_table: &str, map_name: &str, key: &str) -> Option<Bytes> {
        self.maps
            .get(&map_path(keyspace, map_table, map_name, key))
            .map(|v| v.value().clone())
    }

    /// Number of stored map entries across all maps.
    #[must_use]
    pub fn map_entry_count(&self) -> usize {
        self.maps.len()
    }

    /// Makes every subsequent write report failure.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.is_closed(), "datalayer is closed");
        Ok(())
    }
}

#[async_trait]
impl Datalayer for MemoryDatalayer {
    async fn get(
        &self,
        keyspace: &str,
        table: &str,
        key: &str,
        _locality: Locality,
    ) -> anyhow::Result<Option<Bytes>> {
        self.check_open()?;
        Ok(self.row(keyspace, table, key).filter(|v| !v.is_empty()))
    }

    async fn put_into_map(
        &self,
        keyspace: &str,
        map_table: &str,
        map_name: &str,
        key: &str,
        value: &[u8],
        _locality: Locality,
    ) -> anyhow::Result<bool> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.maps.insert(
            map_path(keyspace, map_table, map_name, key),
            Bytes::copy_from_slice(value),
        );
        Ok(true)
    }

    async fn insert_row(
        &self,
        keyspace: &str,
        table: &str,
        key: &str,
        value: &[u8],
        _locality: Locality,
    ) -> anyhow::Result<bool> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.rows
            .insert(row_path(keyspace, table, key), Bytes::copy_from_slice(value));
        Ok(true)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
