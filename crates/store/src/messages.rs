//! Stored channel messages, replayable by source-assigned id.

use rusqlite::params;
use serde_json::Value as JsonValue;

use common::protocol::StoredMessageRef;

use crate::database::{now_timestamp, parse_timestamp, Store};
use crate::error::Result;
use crate::models::StoredMessage;

impl Store {
    /// Persist one channel payload under its source-assigned id. A resend
    /// with the same id replaces the row (replay dedup).
    pub async fn store_message(
        &self,
        id: &str,
        app_id: &str,
        channel_id: &str,
        data: &JsonValue,
    ) -> Result<()> {
        self.lock().await.execute(
            "INSERT OR REPLACE INTO stored_messages (id, app_id, channel_id, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                app_id,
                channel_id,
                now_timestamp(),
                serde_json::to_string(data)?,
            ],
        )?;
        Ok(())
    }

    /// Id + timestamp of every stored message of a channel, ascending by
    /// creation time. This is what `join-channel` advertises.
    pub async fn stored_message_refs(&self, channel_id: &str) -> Result<Vec<StoredMessageRef>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, created_at FROM stored_messages
             WHERE channel_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![channel_id], |row| {
            let raw: String = row.get(1)?;
            Ok(StoredMessageRef {
                id: row.get(0)?,
                date: parse_timestamp(1, &raw)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Fetch a set of stored messages by id, ascending by creation time.
    /// Unknown ids are silently absent from the result.
    pub async fn stored_messages_by_ids(
        &self,
        channel_id: &str,
        ids: &[String],
    ) -> Result<Vec<StoredMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock().await;
        let placeholders = std::iter::repeat("?")
            .take(ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, app_id, channel_id, created_at, data FROM stored_messages
             WHERE channel_id = ? AND id IN ({placeholders})
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bindings: Vec<&dyn rusqlite::ToSql> = vec![&channel_id];
        for id in ids {
            bindings.push(id);
        }
        let rows = stmt.query_map(bindings.as_slice(), row_to_stored_message)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Delete stored messages of a channel. `None` (or an empty set) deletes
    /// all of them; otherwise exactly the named set. Returns rows removed.
    pub async fn delete_stored_messages(
        &self,
        channel_id: &str,
        ids: Option<&[String]>,
    ) -> Result<usize> {
        let conn = self.lock().await;
        let affected = match ids {
            None | Some([]) => conn.execute(
                "DELETE FROM stored_messages WHERE channel_id = ?1",
                params![channel_id],
            )?,
            Some(ids) => {
                let placeholders = std::iter::repeat("?")
                    .take(ids.len())
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "DELETE FROM stored_messages WHERE channel_id = ? AND id IN ({placeholders})"
                );
                let mut bindings: Vec<&dyn rusqlite::ToSql> = vec![&channel_id];
                for id in ids {
                    bindings.push(id);
                }
                conn.execute(&sql, bindings.as_slice())?
            }
        };
        Ok(affected)
    }
}

fn row_to_stored_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let created_raw: String = row.get(3)?;
    let data_raw: String = row.get(4)?;
    let data = serde_json::from_str(&data_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredMessage {
        id: row.get(0)?,
        app_id: row.get(1)?,
        channel_id: row.get(2)?,
        created_at: parse_timestamp(3, &created_raw)?,
        data,
    })
}
