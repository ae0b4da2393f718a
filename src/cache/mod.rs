// Nochistlán Marketplace - community listings for items, jobs and rentals
// Copyright (C) 2025 Marketplace Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Cache module for local data storage
//!
//! Uses SQLite for app settings and the persisted auth session.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AuthSession, AuthUser};

/// Settings key recording that the welcome dialog was shown
pub const WELCOME_FLAG_KEY: &str = "has_visited_marketplace";

/// Cache manager for local data storage
pub struct CacheManager {
    pool: SqlitePool,
}

impl CacheManager {
    /// Open (or create) the cache database at `db_path`
    pub async fn new(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }

        info!("Opening cache database at {}", db_path.display());

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        Self::open(&db_url, 5).await
    }

    /// Private in-memory database; one connection so every query sees it
    pub async fn in_memory() -> AppResult<Self> {
        Self::open("sqlite::memory:", 1).await
    }

    async fn open(db_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        let manager = Self { pool };
        manager.init_schema().await?;

        Ok(manager)
    }

    /// Initialize the database schema
    async fn init_schema(&self) -> AppResult<()> {
        debug!("Initializing cache schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS sessions (
                user_id TEXT PRIMARY KEY,
                email TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT,
                data TEXT NOT NULL,
                saved_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Cache schema initialized");

        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== SETTINGS =====

    /// Get a setting value
    pub async fn get_setting(&self, key: &str) -> AppResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(v,)| v))
    }

    /// Set a setting value
    pub async fn set_setting(&self, key: &str, value: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        debug!("Set setting {} = {}", key, value);
        Ok(())
    }

    /// Delete a setting
    pub async fn delete_setting(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get all settings as a map
    pub async fn get_all_settings(&self) -> AppResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().collect())
    }

    /// True the first time it is called for this database, false afterwards
    pub async fn take_welcome_flag(&self) -> AppResult<bool> {
        let first_visit = self.get_setting(WELCOME_FLAG_KEY).await?.as_deref() != Some("true");
        if first_visit {
            self.set_setting(WELCOME_FLAG_KEY, "true").await?;
        }
        Ok(first_visit)
    }

    // ===== SESSION =====

    /// Persist the session; only the latest one is kept
    pub async fn save_session(&self, session: &AuthSession) -> AppResult<()> {
        let data = serde_json::to_string(&session.user)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sessions WHERE user_id <> ?")
            .bind(&session.user.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (user_id, email, access_token, refresh_token, expires_at, data, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                data = excluded.data,
                saved_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&session.user.id)
        .bind(&session.user.email)
        .bind(&session.access_token)
        .bind(&session.refresh_token)
        .bind(session.expires_at.map(|t| t.to_rfc3339()))
        .bind(&data)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Saved session for {}", session.user.id);
        Ok(())
    }

    /// The persisted session, if any
    pub async fn load_session(&self) -> AppResult<Option<AuthSession>> {
        let row: Option<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT data, access_token, refresh_token, expires_at FROM sessions ORDER BY saved_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some((data, access_token, refresh_token, expires_at)) = row else {
            return Ok(None);
        };

        let user: AuthUser = match serde_json::from_str(&data) {
            Ok(user) => user,
            Err(e) => {
                warn!("Discarding unreadable persisted session: {}", e);
                self.clear_session().await?;
                return Ok(None);
            }
        };

        let expires_at = expires_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Some(AuthSession {
            access_token,
            refresh_token,
            expires_at,
            user,
        }))
    }

    /// Forget the persisted session
    pub async fn clear_session(&self) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions").execute(&self.pool).await?;
        debug!("Cleared persisted session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(user_id: &str, token: &str) -> AuthSession {
        AuthSession {
            access_token: token.to_string(),
            refresh_token: format!("refresh-{}", token),
            expires_at: DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            user: serde_json::from_value(json!({
                "id": user_id,
                "email": "ana@example.com",
                "created_at": "2025-03-01T12:00:00Z",
                "user_metadata": {"name": "Ana"}
            }))
            .unwrap(),
        }
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let cache = CacheManager::in_memory().await.unwrap();
        assert_eq!(cache.get_setting("theme").await.unwrap(), None);

        cache.set_setting("theme", "dark").await.unwrap();
        cache.set_setting("theme", "light").await.unwrap();
        assert_eq!(cache.get_setting("theme").await.unwrap().as_deref(), Some("light"));
        assert_eq!(cache.get_all_settings().await.unwrap().len(), 1);

        cache.delete_setting("theme").await.unwrap();
        assert_eq!(cache.get_setting("theme").await.unwrap(), None);
    }

    #[tokio::test]
    async fn welcome_flag_is_taken_once() {
        let cache = CacheManager::in_memory().await.unwrap();
        assert!(cache.take_welcome_flag().await.unwrap());
        assert!(!cache.take_welcome_flag().await.unwrap());
        assert!(!cache.take_welcome_flag().await.unwrap());
    }

    #[tokio::test]
    async fn only_the_latest_session_is_kept() {
        let cache = CacheManager::in_memory().await.unwrap();
        assert!(cache.load_session().await.unwrap().is_none());

        cache.save_session(&session("u1", "a")).await.unwrap();
        cache.save_session(&session("u2", "b")).await.unwrap();

        let loaded = cache.load_session().await.unwrap().unwrap();
        assert_eq!(loaded, session("u2", "b"));

        cache.clear_session().await.unwrap();
        assert!(cache.load_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let cache = CacheManager::new(&path).await.unwrap();
            cache.take_welcome_flag().await.unwrap();
            cache.pool().close().await;
        }

        let cache = CacheManager::new(&path).await.unwrap();
        assert!(!cache.take_welcome_flag().await.unwrap());
    }
}
