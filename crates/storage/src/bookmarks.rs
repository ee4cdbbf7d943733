use anyhow::{Context, Result};
use sqlx::Row;
use thiserror::Error;
use tracing::info;

use shared::domain::{normalize_server_url, ServerBookmark};

use crate::Storage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookmarkError {
    #[error("server name must not be empty")]
    EmptyName,
    #[error("server url must not be empty")]
    EmptyUrl,
    #[error("server name '{0}' already exists")]
    DuplicateName(String),
    #[error("server url '{0}' already exists")]
    DuplicateUrl(String),
    #[error("no saved server with id {0}")]
    NotFound(i64),
}

impl Storage {
    pub async fn list_servers(&self) -> Result<Vec<ServerBookmark>> {
        let rows = sqlx::query("SELECT id, name, url FROM server_bookmarks ORDER BY id ASC")
            .fetch_all(self.pool())
            .await
            .context("failed to list server bookmarks")?;
        Ok(rows
            .into_iter()
            .map(|row| ServerBookmark {
                id: row.get("id"),
                name: row.get("name"),
                url: row.get("url"),
            })
            .collect())
    }

    pub async fn find_server(&self, id: i64) -> Result<Option<ServerBookmark>> {
        let row = sqlx::query("SELECT id, name, url FROM server_bookmarks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .context("failed to load server bookmark")?;
        Ok(row.map(|row| ServerBookmark {
            id: row.get("id"),
            name: row.get("name"),
            url: row.get("url"),
        }))
    }

    pub async fn add_server(&self, name: &str, url: &str) -> Result<ServerBookmark> {
        let name = name.trim();
        let url = normalize_server_url(url);
        if name.is_empty() {
            return Err(BookmarkError::EmptyName.into());
        }
        if url.is_empty() {
            return Err(BookmarkError::EmptyUrl.into());
        }

        let existing = self.list_servers().await?;
        if existing.iter().any(|server| server.name == name) {
            return Err(BookmarkError::DuplicateName(name.to_string()).into());
        }
        if existing.iter().any(|server| server.url == url) {
            return Err(BookmarkError::DuplicateUrl(url).into());
        }

        let row = sqlx::query("INSERT INTO server_bookmarks (name, url) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(&url)
            .fetch_one(self.pool())
            .await
            .context("failed to insert server bookmark")?;
        let id: i64 = row.get(0);
        info!(id, name, url = %url, "saved server bookmark");

        Ok(ServerBookmark {
            id,
            name: name.to_string(),
            url,
        })
    }

    pub async fn rename_server(&self, id: i64, new_name: &str) -> Result<ServerBookmark> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(BookmarkError::EmptyName.into());
        }

        let existing = self.list_servers().await?;
        let Some(current) = existing.iter().find(|server| server.id == id).cloned() else {
            return Err(BookmarkError::NotFound(id).into());
        };
        if existing
            .iter()
            .any(|server| server.id != id && server.name == new_name)
        {
            return Err(BookmarkError::DuplicateName(new_name.to_string()).into());
        }

        sqlx::query("UPDATE server_bookmarks SET name = ? WHERE id = ?")
            .bind(new_name)
            .bind(id)
            .execute(self.pool())
            .await
            .context("failed to rename server bookmark")?;

        Ok(ServerBookmark {
            name: new_name.to_string(),
            ..current
        })
    }

    /// Returns whether a bookmark was removed.
    pub async fn delete_server(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM server_bookmarks WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .context("failed to delete server bookmark")?;
        Ok(result.rows_affected() > 0)
    }
}
