//! Peer rows: one per live connection.

use rusqlite::params;
use serde_json::Value as JsonValue;

use crate::database::Store;
use crate::error::Result;
use crate::models::{Peer, PeerKind};

impl Store {
    /// Record a freshly opened connection.
    pub async fn insert_peer(&self, peer: &Peer) -> Result<()> {
        let user_info = peer
            .user_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.lock().await.execute(
            "INSERT INTO peers (id, app_id, kind, authenticated_user_id, user_info)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                peer.id,
                peer.app_id,
                peer.kind.as_str(),
                peer.authenticated_user_id,
                user_info,
            ],
        )?;
        Ok(())
    }

    pub async fn get_peer(&self, app_id: &str, peer_id: &str) -> Result<Option<Peer>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, app_id, kind, authenticated_user_id, user_info
             FROM peers WHERE app_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![app_id, peer_id], row_to_peer)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Remove the peer row; subscriptions cascade. Idempotent.
    pub async fn delete_peer(&self, peer_id: &str) -> Result<bool> {
        let affected = self
            .lock()
            .await
            .execute("DELETE FROM peers WHERE id = ?1", params![peer_id])?;
        Ok(affected > 0)
    }

    /// Attach a user identity to a peer. Returns whether the peer exists.
    pub async fn authenticate_peer(
        &self,
        app_id: &str,
        peer_id: &str,
        user_id: &str,
        user_info: Option<&JsonValue>,
    ) -> Result<bool> {
        let user_info = user_info.map(serde_json::to_string).transpose()?;
        let affected = self.lock().await.execute(
            "UPDATE peers SET authenticated_user_id = ?3, user_info = ?4
             WHERE app_id = ?1 AND id = ?2",
            params![app_id, peer_id, user_id, user_info],
        )?;
        Ok(affected > 0)
    }

    /// Resolve a subscriber/recipient id to a single peer: exact peer id
    /// first, then the first peer carrying it as an authenticated user id.
    pub async fn resolve_peer(&self, app_id: &str, subscriber_id: &str) -> Result<Option<Peer>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, app_id, kind, authenticated_user_id, user_info FROM peers
             WHERE app_id = ?1 AND (id = ?2 OR authenticated_user_id = ?2)
             ORDER BY (id = ?2) DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![app_id, subscriber_id], row_to_peer)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Resolve a recipient id to every matching peer. A user may hold several
    /// live connections; direct delivery targets all of them.
    pub async fn resolve_recipients(&self, app_id: &str, recipient_id: &str) -> Result<Vec<Peer>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, app_id, kind, authenticated_user_id, user_info FROM peers
             WHERE app_id = ?1 AND (id = ?2 OR authenticated_user_id = ?2)",
        )?;
        let rows = stmt.query_map(params![app_id, recipient_id], row_to_peer)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Delete every peer row. Run at boot: after a restart no socket can
    /// still be live, and membership events must not fire for ghosts.
    pub async fn reap_all_peers(&self) -> Result<usize> {
        let affected = self.lock().await.execute("DELETE FROM peers", [])?;
        Ok(affected)
    }
}

pub(crate) fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    let kind_raw: String = row.get(2)?;
    let kind = PeerKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown peer kind: {kind_raw}").into(),
        )
    })?;
    let user_info_raw: Option<String> = row.get(4)?;
    let user_info = user_info_raw
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Peer {
        id: row.get(0)?,
        app_id: row.get(1)?,
        kind,
        authenticated_user_id: row.get(3)?,
        user_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        let app = store.create_app("demo", "k").await.unwrap();
        (store, app.id)
    }

    fn sink(app_id: &str, id: &str) -> Peer {
        Peer {
            id: id.to_string(),
            app_id: app_id.to_string(),
            kind: PeerKind::Sink,
            authenticated_user_id: None,
            user_info: None,
        }
    }

    #[tokio::test]
    async fn authenticate_sets_identity() {
        let (store, app_id) = seeded().await;
        store.insert_peer(&sink(&app_id, "p1")).await.unwrap();

        let found = store
            .authenticate_peer(&app_id, "p1", "user-1", Some(&json!({"nick": "a"})))
            .await
            .unwrap();
        assert!(found);

        let peer = store.get_peer(&app_id, "p1").await.unwrap().unwrap();
        assert_eq!(peer.authenticated_user_id.as_deref(), Some("user-1"));
        assert_eq!(peer.user_info, Some(json!({"nick": "a"})));
        assert_eq!(peer.member_id(), "user-1");

        assert!(!store
            .authenticate_peer(&app_id, "nope", "user-2", None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn resolve_prefers_peer_id_over_user_id() {
        let (store, app_id) = seeded().await;
        // A peer whose authenticated user id collides with another peer's id.
        store.insert_peer(&sink(&app_id, "p1")).await.unwrap();
        store.insert_peer(&sink(&app_id, "p2")).await.unwrap();
        store
            .authenticate_peer(&app_id, "p2", "p1", None)
            .await
            .unwrap();

        let resolved = store.resolve_peer(&app_id, "p1").await.unwrap().unwrap();
        assert_eq!(resolved.id, "p1");

        let recipients = store.resolve_recipients(&app_id, "p1").await.unwrap();
        assert_eq!(recipients.len(), 2);
    }

    #[tokio::test]
    async fn resolve_scopes_to_app() {
        let (store, app_id) = seeded().await;
        let other = store.create_app("other", "k2").await.unwrap();
        store.insert_peer(&sink(&other.id, "p1")).await.unwrap();

        assert!(store.resolve_peer(&app_id, "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reap_clears_everything() {
        let (store, app_id) = seeded().await;
        store.insert_peer(&sink(&app_id, "p1")).await.unwrap();
        store.insert_peer(&sink(&app_id, "p2")).await.unwrap();

        assert_eq!(store.reap_all_peers().await.unwrap(), 2);
        assert!(store.get_peer(&app_id, "p1").await.unwrap().is_none());
    }
}
