//! Channel rows and the `(app, name)` upsert.

use common::protocol::ChannelAuthMode;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Store;
use crate::error::Result;
use crate::models::Channel;

impl Store {
    /// Create a channel, or update `auth_mode`/`store_messages` on the
    /// existing `(app, name)` row and return it.
    pub async fn upsert_channel(
        &self,
        app_id: &str,
        name: &str,
        auth_mode: ChannelAuthMode,
        store_messages: bool,
    ) -> Result<Channel> {
        let conn = self.lock().await;
        conn.execute(
            "INSERT INTO channels (id, app_id, name, auth_mode, store_messages)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (app_id, name)
             DO UPDATE SET auth_mode = excluded.auth_mode,
                           store_messages = excluded.store_messages",
            params![
                Uuid::new_v4().to_string(),
                app_id,
                name,
                auth_mode.as_str(),
                store_messages as i64,
            ],
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, app_id, name, auth_mode, store_messages
             FROM channels WHERE app_id = ?1 AND name = ?2",
        )?;
        let channel = stmt.query_row(params![app_id, name], row_to_channel)?;
        Ok(channel)
    }

    pub async fn get_channel(&self, app_id: &str, channel_id: &str) -> Result<Option<Channel>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, app_id, name, auth_mode, store_messages
             FROM channels WHERE app_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![app_id, channel_id], row_to_channel)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Delete a channel; subscriptions and stored messages cascade.
    pub async fn delete_channel(&self, app_id: &str, channel_id: &str) -> Result<bool> {
        let affected = self.lock().await.execute(
            "DELETE FROM channels WHERE app_id = ?1 AND id = ?2",
            params![app_id, channel_id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let auth_raw: String = row.get(3)?;
    let auth_mode = ChannelAuthMode::parse(&auth_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown auth mode: {auth_raw}").into(),
        )
    })?;

    Ok(Channel {
        id: row.get(0)?,
        app_id: row.get(1)?,
        name: row.get(2)?,
        auth_mode,
        store_messages: row.get::<_, i64>(4)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_keeps_id_and_updates_flags() {
        let store = Store::open_in_memory().unwrap();
        let app = store.create_app("demo", "k").await.unwrap();

        let first = store
            .upsert_channel(&app.id, "room", ChannelAuthMode::Public, false)
            .await
            .unwrap();
        let second = store
            .upsert_channel(&app.id, "room", ChannelAuthMode::Presence, true)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.auth_mode, ChannelAuthMode::Presence);
        assert!(second.store_messages);
    }

    #[tokio::test]
    async fn name_is_scoped_per_app() {
        let store = Store::open_in_memory().unwrap();
        let a = store.create_app("a", "ka").await.unwrap();
        let b = store.create_app("b", "kb").await.unwrap();

        let ca = store
            .upsert_channel(&a.id, "room", ChannelAuthMode::Public, false)
            .await
            .unwrap();
        let cb = store
            .upsert_channel(&b.id, "room", ChannelAuthMode::Public, false)
            .await
            .unwrap();

        assert_ne!(ca.id, cb.id);
        // Lookup is app-scoped too.
        assert!(store.get_channel(&a.id, &cb.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = Store::open_in_memory().unwrap();
        let app = store.create_app("demo", "k").await.unwrap();
        let channel = store
            .upsert_channel(&app.id, "room", ChannelAuthMode::Public, false)
            .await
            .unwrap();

        assert!(store.delete_channel(&app.id, &channel.id).await.unwrap());
        assert!(!store.delete_channel(&app.id, &channel.id).await.unwrap());
    }
}
