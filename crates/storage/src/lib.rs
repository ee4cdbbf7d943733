use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::ThemeMode;

mod bookmarks;
mod session;

pub use bookmarks::BookmarkError;
pub use session::{MemorySessionStore, SessionStore};

pub const TOKEN_KEY: &str = "token";
pub const USERNAME_KEY: &str = "username";
pub const SERVER_URL_KEY: &str = "server_url";
pub const THEME_KEY: &str = "theme";
pub const THEME_MODE_KEY: &str = "theme_mode";
pub const USER_AVATAR_KEY: &str = "user_avatar";
pub const NOTIFICATIONS_KEY: &str = "notifications_enabled";

/// On-device client state: flat settings plus saved server bookmarks.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM client_settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read setting '{key}'"))?;
        Ok(row.map(|row| row.get::<String, _>(0)))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO client_settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write setting '{key}'"))?;
        Ok(())
    }

    /// Returns whether a value was present.
    pub async fn remove_setting(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM client_settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove setting '{key}'"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn theme_mode(&self) -> Result<ThemeMode> {
        let stored = match self.get_setting(THEME_MODE_KEY).await? {
            Some(value) => Some(value),
            None => self.get_setting(THEME_KEY).await?,
        };
        Ok(stored
            .as_deref()
            .and_then(ThemeMode::parse)
            .unwrap_or_default())
    }

    pub async fn set_theme_mode(&self, mode: ThemeMode) -> Result<()> {
        self.set_setting(THEME_MODE_KEY, mode.as_str()).await?;
        self.set_setting(THEME_KEY, mode.as_str()).await
    }

    pub async fn user_avatar(&self) -> Result<Option<String>> {
        self.get_setting(USER_AVATAR_KEY).await
    }

    pub async fn set_user_avatar(&self, avatar_url: &str) -> Result<()> {
        self.set_setting(USER_AVATAR_KEY, avatar_url).await
    }

    pub async fn clear_user_avatar(&self) -> Result<()> {
        self.remove_setting(USER_AVATAR_KEY).await.map(|_| ())
    }

    pub async fn notifications_enabled(&self) -> Result<bool> {
        Ok(self.get_setting(NOTIFICATIONS_KEY).await?.as_deref() == Some("true"))
    }

    pub async fn set_notifications_enabled(&self, enabled: bool) -> Result<()> {
        self.set_setting(NOTIFICATIONS_KEY, if enabled { "true" } else { "false" })
            .await
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
