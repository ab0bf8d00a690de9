use crate::{UserStore, DEFAULT_MAX_HISTORY};
use async_trait::async_trait;
use bloom_common::{BloomError, Interaction, QueryCategory, Result, UserProfile};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    profile_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS interactions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    query TEXT NOT NULL,
    response TEXT NOT NULL,
    category TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_interactions_user_time
    ON interactions (user_id, created_at);
"#;

/// SQLite-backed store. Calls run on the blocking thread pool.
/// Each user's history is pruned to the newest `max_history_per_user` rows.
#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
    max_history_per_user: usize,
}

fn storage_err(e: impl std::fmt::Display) -> BloomError {
    BloomError::Storage(e.to_string())
}

impl SqliteUserStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(storage_err)?;
        info!("Opened user store at {:?}", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_history_per_user: DEFAULT_MAX_HISTORY,
        })
    }

    pub fn with_history_limit(mut self, max_history_per_user: usize) -> Self {
        self.max_history_per_user = max_history_per_user.max(1);
        self
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BloomError::Storage("connection mutex poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(storage_err)?
    }
}

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_interaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_interaction(raw: (String, String, String, String, String, String)) -> Result<Interaction> {
    let (id, user_id, query, response, category, created_at) = raw;

    let id = uuid::Uuid::parse_str(&id).map_err(storage_err)?;
    let category = QueryCategory::parse_label(&category)
        .ok_or_else(|| BloomError::Storage(format!("unknown category '{}' in store", category)))?;
    let timestamp = DateTime::parse_from_rfc3339(&created_at)
        .map_err(storage_err)?
        .with_timezone(&Utc);

    Ok(Interaction {
        id,
        user_id,
        query,
        response,
        category,
        timestamp,
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn save_profile(&self, user_id: &str, profile: UserProfile) -> Result<()> {
        let user_id = user_id.to_string();
        let json = serde_json::to_string(&profile)?;
        let now = format_time(&Utc::now());

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, profile_json, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET profile_json = excluded.profile_json,
                                                    updated_at = excluded.updated_at",
                params![user_id, json, now],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let user_id = user_id.to_string();

        let json: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT profile_json FROM profiles WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)
            })
            .await?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn record_interaction(&self, interaction: Interaction) -> Result<()> {
        let keep = i64::try_from(self.max_history_per_user).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO interactions (id, user_id, query, response, category, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    interaction.id.to_string(),
                    interaction.user_id,
                    interaction.query,
                    interaction.response,
                    interaction.category.label(),
                    format_time(&interaction.timestamp),
                ],
            )
            .map_err(storage_err)?;

            let pruned = conn
                .execute(
                    "DELETE FROM interactions
                     WHERE user_id = ?1 AND id NOT IN (
                         SELECT id FROM interactions
                         WHERE user_id = ?1
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT ?2
                     )",
                    params![interaction.user_id, keep],
                )
                .map_err(storage_err)?;
            if pruned > 0 {
                debug!("Pruned {} old interactions", pruned);
            }
            Ok(())
        })
        .await
    }

    async fn recent_interactions(&self, user_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        let user_id = user_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, user_id, query, response, category, created_at
                         FROM interactions
                         WHERE user_id = ?1
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT ?2",
                    )
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![user_id, limit], row_to_interaction)
                    .map_err(storage_err)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(storage_err)?;
                Ok(rows)
            })
            .await?;

        let mut interactions = rows
            .into_iter()
            .map(decode_interaction)
            .collect::<Result<Vec<_>>>()?;
        interactions.reverse();
        Ok(interactions)
    }

    async fn clear_history(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM interactions WHERE user_id = ?1", params![user_id])
                .map_err(storage_err)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_upsert() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        assert!(store.profile("u1").await.unwrap().is_none());

        let mut profile = UserProfile {
            menopause_stage: Some("perimenopause".to_string()),
            ..Default::default()
        };
        store.save_profile("u1", profile.clone()).await.unwrap();
        profile.age = Some(49);
        store.save_profile("u1", profile.clone()).await.unwrap();

        assert_eq!(store.profile("u1").await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_interactions_round_trip_in_order() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        for (i, category) in [QueryCategory::Diet, QueryCategory::Exercise, QueryCategory::BasicQuery]
            .into_iter()
            .enumerate()
        {
            store
                .record_interaction(Interaction::new("u1", format!("q{}", i), format!("a{}", i), category))
                .await
                .unwrap();
        }
        store
            .record_interaction(Interaction::new("u2", "other", "x", QueryCategory::Diet))
            .await
            .unwrap();

        let recent = store.recent_interactions("u1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "q1");
        assert_eq!(recent[0].category, QueryCategory::Exercise);
        assert_eq!(recent[1].query, "q2");
        assert_eq!(recent[1].category, QueryCategory::BasicQuery);
    }

    #[tokio::test]
    async fn test_history_is_pruned_to_limit() {
        let store = SqliteUserStore::open_in_memory().unwrap().with_history_limit(2);
        for i in 0..4 {
            store
                .record_interaction(Interaction::new("u1", format!("q{}", i), "a", QueryCategory::Diet))
                .await
                .unwrap();
        }
        store
            .record_interaction(Interaction::new("u2", "other", "x", QueryCategory::Diet))
            .await
            .unwrap();

        let recent = store.recent_interactions("u1", 10).await.unwrap();
        let queries: Vec<&str> = recent.iter().map(|i| i.query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3"]);
        assert_eq!(store.recent_interactions("u2", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_history() {
        let store = SqliteUserStore::open_in_memory().unwrap();
        store
            .record_interaction(Interaction::new("u1", "q", "a", QueryCategory::Consultation))
            .await
            .unwrap();

        assert_eq!(store.clear_history("u1").await.unwrap(), 1);
        assert!(store.recent_interactions("u1", 5).await.unwrap().is_empty());
    }
}
