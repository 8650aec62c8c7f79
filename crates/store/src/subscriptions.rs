//! Subscription rows: peer↔channel membership.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Store;
use crate::error::{is_unique_violation, Result};
use crate::models::{Peer, Subscription};
use crate::peers::row_to_peer;

/// Result of a subscribe attempt.
#[derive(Debug)]
pub enum SubscribeOutcome {
    /// The row was inserted. Carries the *other* current members as of the
    /// insert commit, so join notifications see a consistent snapshot.
    Inserted { other_members: Vec<Peer> },
    /// The `(app, peer, channel)` row already existed; treated as success
    /// without re-emitting join events.
    Duplicate,
}

impl Store {
    /// Insert a subscription and snapshot the other members in the same
    /// transaction. Uniqueness violations surface as
    /// [`SubscribeOutcome::Duplicate`].
    pub async fn subscribe(
        &self,
        app_id: &str,
        peer_id: &str,
        channel_id: &str,
    ) -> Result<SubscribeOutcome> {
        let mut conn = self.lock().await;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO subscriptions (id, app_id, peer_id, channel_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![Uuid::new_v4().to_string(), app_id, peer_id, channel_id],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(SubscribeOutcome::Duplicate),
            Err(e) => return Err(e.into()),
        }

        let other_members = {
            let mut stmt = tx.prepare(
                "SELECT p.id, p.app_id, p.kind, p.authenticated_user_id, p.user_info
                 FROM subscriptions s
                 JOIN peers p ON p.id = s.peer_id
                 WHERE s.channel_id = ?1 AND s.peer_id != ?2",
            )?;
            let rows = stmt.query_map(params![channel_id, peer_id], row_to_peer)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        tx.commit()?;
        Ok(SubscribeOutcome::Inserted { other_members })
    }

    /// Delete the membership row. Returns whether it existed.
    pub async fn unsubscribe(&self, app_id: &str, peer_id: &str, channel_id: &str) -> Result<bool> {
        let affected = self.lock().await.execute(
            "DELETE FROM subscriptions
             WHERE app_id = ?1 AND peer_id = ?2 AND channel_id = ?3",
            params![app_id, peer_id, channel_id],
        )?;
        Ok(affected > 0)
    }

    pub async fn is_subscribed(
        &self,
        app_id: &str,
        peer_id: &str,
        channel_id: &str,
    ) -> Result<bool> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT 1 FROM subscriptions
             WHERE app_id = ?1 AND peer_id = ?2 AND channel_id = ?3",
        )?;
        let found = stmt.exists(params![app_id, peer_id, channel_id])?;
        Ok(found)
    }

    /// Every current member of a channel, joined with its peer row.
    pub async fn channel_members(&self, channel_id: &str) -> Result<Vec<Peer>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.app_id, p.kind, p.authenticated_user_id, p.user_info
             FROM subscriptions s
             JOIN peers p ON p.id = s.peer_id
             WHERE s.channel_id = ?1",
        )?;
        let rows = stmt.query_map(params![channel_id], row_to_peer)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Every subscription held by a peer (used by the disconnect reaper).
    pub async fn subscriptions_for_peer(&self, peer_id: &str) -> Result<Vec<Subscription>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, app_id, peer_id, channel_id FROM subscriptions WHERE peer_id = ?1",
        )?;
        let rows = stmt.query_map(params![peer_id], |row| {
            Ok(Subscription {
                id: row.get(0)?,
                app_id: row.get(1)?,
                peer_id: row.get(2)?,
                channel_id: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeerKind;
    use common::protocol::ChannelAuthMode;

    async fn seeded() -> (Store, String, String) {
        let store = Store::open_in_memory().unwrap();
        let app = store.create_app("demo", "k").await.unwrap();
        let channel = store
            .upsert_channel(&app.id, "room", ChannelAuthMode::Public, false)
            .await
            .unwrap();
        (store, app.id, channel.id)
    }

    async fn add_sink(store: &Store, app_id: &str, id: &str) {
        store
            .insert_peer(&Peer {
                id: id.to_string(),
                app_id: app_id.to_string(),
                kind: PeerKind::Sink,
                authenticated_user_id: None,
                user_info: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_reported() {
        let (store, app_id, channel_id) = seeded().await;
        add_sink(&store, &app_id, "p1").await;

        let first = store.subscribe(&app_id, "p1", &channel_id).await.unwrap();
        assert!(matches!(
            first,
            SubscribeOutcome::Inserted { ref other_members } if other_members.is_empty()
        ));

        let second = store.subscribe(&app_id, "p1", &channel_id).await.unwrap();
        assert!(matches!(second, SubscribeOutcome::Duplicate));

        // Exactly one row survives.
        assert_eq!(store.channel_members(&channel_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_lists_only_other_members() {
        let (store, app_id, channel_id) = seeded().await;
        add_sink(&store, &app_id, "p1").await;
        add_sink(&store, &app_id, "p2").await;

        store.subscribe(&app_id, "p1", &channel_id).await.unwrap();
        let outcome = store.subscribe(&app_id, "p2", &channel_id).await.unwrap();

        match outcome {
            SubscribeOutcome::Inserted { other_members } => {
                assert_eq!(other_members.len(), 1);
                assert_eq!(other_members[0].id, "p1");
            }
            SubscribeOutcome::Duplicate => panic!("expected insert"),
        }
    }

    #[tokio::test]
    async fn peer_delete_cascades_subscriptions() {
        let (store, app_id, channel_id) = seeded().await;
        add_sink(&store, &app_id, "p1").await;
        store.subscribe(&app_id, "p1", &channel_id).await.unwrap();

        store.delete_peer("p1").await.unwrap();

        assert!(store.channel_members(&channel_id).await.unwrap().is_empty());
        assert!(store
            .subscriptions_for_peer("p1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn channel_delete_cascades_subscriptions() {
        let (store, app_id, channel_id) = seeded().await;
        add_sink(&store, &app_id, "p1").await;
        store.subscribe(&app_id, "p1", &channel_id).await.unwrap();

        store.delete_channel(&app_id, &channel_id).await.unwrap();

        assert!(store
            .subscriptions_for_peer("p1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_reports_missing_row() {
        let (store, app_id, channel_id) = seeded().await;
        add_sink(&store, &app_id, "p1").await;

        assert!(!store.unsubscribe(&app_id, "p1", &channel_id).await.unwrap());
        store.subscribe(&app_id, "p1", &channel_id).await.unwrap();
        assert!(store.unsubscribe(&app_id, "p1", &channel_id).await.unwrap());
        assert!(!store.is_subscribed(&app_id, "p1", &channel_id).await.unwrap());
    }
}
