//! App (tenant) reads and registry-side writes.

use rusqlite::params;
use uuid::Uuid;

use crate::database::{now_timestamp, parse_timestamp, Store};
use crate::error::Result;
use crate::models::App;

impl Store {
    /// Insert a new app row. The app manager owns this surface; the core
    /// calls it only from seeding and tests.
    pub async fn create_app(&self, name: &str, secret_key: &str) -> Result<App> {
        let created_raw = now_timestamp();
        let app = App {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            secret_key: secret_key.to_string(),
            enabled: true,
            created_at: parse_timestamp(4, &created_raw)?,
        };
        self.lock().await.execute(
            "INSERT INTO apps (id, name, secret_key, enabled, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![app.id, app.name, app.secret_key, created_raw],
        )?;
        Ok(app)
    }

    /// Look up an app by id. Returns `None` for unknown ids.
    pub async fn get_app(&self, app_id: &str) -> Result<Option<App>> {
        let conn = self.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, secret_key, enabled, created_at FROM apps WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![app_id], row_to_app)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Flip the enabled flag. Returns whether a row was updated.
    pub async fn set_app_enabled(&self, app_id: &str, enabled: bool) -> Result<bool> {
        let affected = self.lock().await.execute(
            "UPDATE apps SET enabled = ?2 WHERE id = ?1",
            params![app_id, enabled as i64],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_app(row: &rusqlite::Row<'_>) -> rusqlite::Result<App> {
    let created_raw: String = row.get(4)?;
    Ok(App {
        id: row.get(0)?,
        name: row.get(1)?,
        secret_key: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        created_at: parse_timestamp(4, &created_raw)?,
    })
}
