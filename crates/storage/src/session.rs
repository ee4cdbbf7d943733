use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use shared::domain::Session;

use crate::{Storage, SERVER_URL_KEY, TOKEN_KEY, USERNAME_KEY};

/// Where the authenticated session survives restarts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self) -> Result<Option<Session>>;
    async fn save_session(&self, session: &Session) -> Result<()>;
    /// Removes the token and username. Clearing an empty store is not an error.
    async fn clear_session(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self) -> Result<Option<Session>> {
        Ok(self.session.lock().await.clone())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        *self.session.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        *self.session.lock().await = None;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for Storage {
    async fn load_session(&self) -> Result<Option<Session>> {
        let Some(token) = self.get_setting(TOKEN_KEY).await? else {
            return Ok(None);
        };
        let Some(server_url) = self.get_setting(SERVER_URL_KEY).await? else {
            return Ok(None);
        };
        let username = self.get_setting(USERNAME_KEY).await?.unwrap_or_default();
        Ok(Some(Session::new(server_url, token, username)))
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.set_setting(SERVER_URL_KEY, &session.server_url).await?;
        self.set_setting(TOKEN_KEY, &session.token).await?;
        self.set_setting(USERNAME_KEY, &session.username).await
    }

    async fn clear_session(&self) -> Result<()> {
        self.remove_setting(TOKEN_KEY).await?;
        self.remove_setting(USERNAME_KEY).await?;
        Ok(())
    }
}
