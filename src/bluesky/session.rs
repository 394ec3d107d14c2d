//! Persistent session storage.

use anyhow::{bail, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;

use super::types::Session;

/// Redis hash key holding the platform session.
const SESSION_KEY: &str = "bluesky-session";

const ACCESS_TOKEN_FIELD: &str = "accessToken";
const REFRESH_TOKEN_FIELD: &str = "refreshToken";

/// External storage for the single platform session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>>;

    /// Replace the stored session. Both token fields are written together.
    async fn save_session(&self, session: &Session) -> Result<()>;
}

/// Stores the session as a Redis hash under a fixed key.
pub struct RedisSessionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get_session(&self) -> Result<Option<Session>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(SESSION_KEY).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        match (
            fields.get(ACCESS_TOKEN_FIELD),
            fields.get(REFRESH_TOKEN_FIELD),
        ) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(Session {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
            })),
            // Both fields are always written in one command, so a partial
            // hash means someone tampered with the key.
            _ => bail!("stored session hash is missing a token field"),
        }
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(
            SESSION_KEY,
            &[
                (ACCESS_TOKEN_FIELD, session.access_token.as_str()),
                (REFRESH_TOKEN_FIELD, session.refresh_token.as_str()),
            ],
        )
        .await?;
        Ok(())
    }
}
