//! Coordinator load accounting: the `shards` table.
//!
//! Load reports are advisory; upgrade dispatch reads a snapshot without
//! locking anything beyond the statement itself.

use rusqlite::params;

use crate::database::Store;
use crate::error::Result;
use crate::models::ShardLoad;

impl Store {
    /// Register a freshly allocated shard with zero connections.
    pub async fn register_shard(&self, shard_id: u64) -> Result<()> {
        self.lock().await.execute(
            "INSERT OR IGNORE INTO shards (id, connection_count) VALUES (?1, 0)",
            params![shard_id as i64],
        )?;
        Ok(())
    }

    /// Record a shard's connection count after an open or close.
    pub async fn set_shard_connections(&self, shard_id: u64, count: u64) -> Result<()> {
        self.lock().await.execute(
            "UPDATE shards SET connection_count = ?2 WHERE id = ?1",
            params![shard_id as i64, count as i64],
        )?;
        Ok(())
    }

    /// Snapshot of the load table, ascending by shard id.
    pub async fn shard_loads(&self) -> Result<Vec<ShardLoad>> {
        let conn = self.lock().await;
        let mut stmt =
            conn.prepare("SELECT id, connection_count FROM shards ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(ShardLoad {
                id: row.get::<_, i64>(0)? as u64,
                connection_count: row.get::<_, i64>(1)?.max(0) as u64,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Drop every shard row. Run at boot alongside the peer reap: rows from a
    /// previous process describe workers that no longer exist.
    pub async fn clear_shards(&self) -> Result<usize> {
        let affected = self.lock().await.execute("DELETE FROM shards", [])?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;

    #[tokio::test]
    async fn load_accounting_round_trip() {
        let store = Store::open_in_memory().unwrap();

        store.register_shard(1).await.unwrap();
        store.register_shard(2).await.unwrap();
        store.set_shard_connections(1, 17).await.unwrap();

        let loads = store.shard_loads().await.unwrap();
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].id, 1);
        assert_eq!(loads[0].connection_count, 17);
        assert_eq!(loads[1].connection_count, 0);

        assert_eq!(store.clear_shards().await.unwrap(), 2);
        assert!(store.shard_loads().await.unwrap().is_empty());
    }
}
