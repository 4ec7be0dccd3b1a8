//! Redis-backed [`Datalayer`].
//!
//! Rows are plain string keys `<keyspace>:<table>:<key>`; named maps are
//! hashes at `<keyspace>:<map_table>:<map_name>`. Redis has a single
//! replication scope, so both localities address the same keys.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::debug;

use super::Locality;
use crate::traits::Datalayer;

pub struct RedisDatalayer {
    conn: Mutex<Option<ConnectionManager>>,
}

fn row_key(keyspace: &str, table: &str, key: &str) -> String {
    format!("{keyspace}:{table}:{key}")
}

fn map_key(keyspace: &str, map_table: &str, map_name: &str) -> String {
    format!("{keyspace}:{map_table}:{map_name}")
}

impl RedisDatalayer {
    /// Connects to `addr` (`host:port` or a `redis://` URL).
    ///
    /// # Errors
    ///
    /// Fails when the address is invalid or the server is unreachable.
    pub async fn connect(addr: &str) -> anyhow::Result<Self> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };
        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_connection_manager().await?;
        debug!(%url, "datalayer connected");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

#[async_trait]
impl Datalayer for RedisDatalayer {
    async fn get(
        &self,
        keyspace: &str,
        table: &str,
        key: &str,
        _locality: Locality,
    ) -> anyhow::Result<Option<Bytes>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("datalayer is closed"))?;
        let value: Option<Vec<u8>> = conn.get(row_key(keyspace, table, key)).await?;
        Ok(value.filter(|v| !v.is_empty()).map(Bytes::from))
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
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("datalayer is closed"))?;
        // HSET answers with the number of new fields; an overwrite is still a success.
        let _added: i64 = conn.hset(map_key(keyspace, map_table, map_name), key, value).await?;
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
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("datalayer is closed"))?;
        let () = conn.set(row_key(keyspace, table, key), value).await?;
        Ok(true)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.conn.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_colon_joined() {
        assert_eq!(row_key("sbox_a", "sbox_default_a", "result_x"), "sbox_a:sbox_default_a:result_x");
        assert_eq!(
            map_key("sbox_a", "sbox_map_a", "execution_info_map_x"),
            "sbox_a:sbox_map_a:execution_info_map_x"
        );
    }
}
