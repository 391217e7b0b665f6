use anyhow::{Context, Result};

use super::database::Database;
use crate::models::ChatSession;

const CHAT_SESSIONS_KEY: &str = "xgptChatSessions";
const ACTIVE_CHAT_ID_KEY: &str = "xgptActiveChatId";

/// Device-scoped session snapshot: the full session list plus the active
/// session pointer, stored under two keys.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save_sessions(&self, sessions: &[ChatSession]) -> Result<()> {
        let json = serde_json::to_string(sessions).context("Failed to serialize sessions")?;
        self.db.set_item(CHAT_SESSIONS_KEY, &json).await
    }

    /// Load the stored sessions. Missing or unreadable data yields an empty list.
    pub async fn load_sessions(&self) -> Vec<ChatSession> {
        match self.try_load_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!("Error loading chat sessions from local storage: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_load_sessions(&self) -> Result<Vec<ChatSession>> {
        match self.db.get_item(CHAT_SESSIONS_KEY).await? {
            Some(json) => serde_json::from_str(&json).context("Stored sessions are malformed"),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save_active_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.db.set_item(ACTIVE_CHAT_ID_KEY, id).await,
            None => self.db.remove_item(ACTIVE_CHAT_ID_KEY).await,
        }
    }

    pub async fn load_active_id(&self) -> Option<String> {
        match self.db.get_item(ACTIVE_CHAT_ID_KEY).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Error loading active chat id from local storage: {:#}", e);
                None
            }
        }
    }
}
