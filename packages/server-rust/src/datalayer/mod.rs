//! Durable result and checkpoint storage.
//!
//! The [`Datalayer`] trait is the raw keyspace/table contract; [`SandboxStore`]
//! binds it to one sandbox's table names and the key layout the function
//! workers use.

pub mod memory;
pub mod redis;

pub use memory::MemoryDatalayer;
pub use redis::RedisDatalayer;

use std::sync::Arc;

use anyhow::Context;
use gateway_core::{ExecutionId, InvocationMessage};

use crate::traits::Datalayer;

/// Replication scope of a datalayer call. The gateway always uses `Global`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Locality {
    Local = 0,
    Global = 1,
}

/// Keyspace and table names derived from a sandbox id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatalayerTables {
    pub keyspace: String,
    pub table: String,
    pub map_table: String,
}

impl DatalayerTables {
    #[must_use]
    pub fn for_sandbox(sandbox_id: &str) -> Self {
        Self {
            keyspace: format!("sbox_{sandbox_id}"),
            table: format!("sbox_default_{sandbox_id}"),
            map_table: format!("sbox_map_{sandbox_id}"),
        }
    }
}

fn result_key(id: &ExecutionId) -> String {
    format!("result_{id}")
}

fn checkpoint_map(id: &ExecutionId) -> String {
    format!("execution_info_map_{id}")
}

/// A [`Datalayer`] scoped to one sandbox.
#[derive(Clone)]
pub struct SandboxStore {
    datalayer: Arc<dyn Datalayer>,
    tables: DatalayerTables,
}

impl SandboxStore {
    #[must_use]
    pub fn new(datalayer: Arc<dyn Datalayer>, tables: DatalayerTables) -> Self {
        Self { datalayer, tables }
    }

    #[must_use]
    pub fn tables(&self) -> &DatalayerTables {
        &self.tables
    }

    /// Looks up the persisted result of an execution.
    ///
    /// # Errors
    ///
    /// Fails if the datalayer call fails or the stored row is not a valid
    /// invocation message.
    pub async fn fetch_result(&self, id: &ExecutionId) -> anyhow::Result<Option<InvocationMessage>> {
        let row = self
            .datalayer
            .get(
                &self.tables.keyspace,
                &self.tables.table,
                &result_key(id),
                Locality::Global,
            )
            .await?;
        row.map(|bytes| {
            InvocationMessage::decode(&bytes)
                .with_context(|| format!("stored result for {id} is not a valid message"))
        })
        .transpose()
    }

    /// Records the dispatched payload as the execution's input and next step.
    ///
    /// # Errors
    ///
    /// Returns the first failing map write; the second write is skipped.
    pub async fn put_checkpoint(
        &self,
        id: &ExecutionId,
        entry_topic: &str,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let map = checkpoint_map(id);
        for key in [format!("input_{id}_{entry_topic}"), format!("next_{id}_frontend")] {
            let stored = self
                .datalayer
                .put_into_map(
                    &self.tables.keyspace,
                    &self.tables.map_table,
                    &map,
                    &key,
                    payload,
                    Locality::Global,
                )
                .await?;
            anyhow::ensure!(stored, "datalayer refused checkpoint entry {key}");
        }
        Ok(())
    }

    /// Persists a result row, as a worker would on completion.
    ///
    /// # Errors
    ///
    /// Fails if the message cannot be encoded or the insert fails.
    pub async fn insert_result(&self, message: &InvocationMessage) -> anyhow::Result<bool> {
        let encoded = message.encode()?;
        self.datalayer
            .insert_row(
                &self.tables.keyspace,
                &self.tables.table,
                &result_key(message.execution_id()),
                &encoded,
                Locality::Global,
            )
            .await
    }

    /// # Errors
    ///
    /// Propagates the datalayer's close failure.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.datalayer.close().await
    }
}
