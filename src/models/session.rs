use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub last_active: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

impl ChatSession {
    /// Start a session from the message that opened it.
    pub fn start(first: Message, system_instruction: &str) -> Self {
        Self {
            id: new_session_id(),
            title: title_from_input(&first.text),
            messages: vec![first],
            last_active: Utc::now(),
            system_instruction: Some(system_instruction.to_string()),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }
}

pub fn new_session_id() -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}-session", Utc::now().timestamp_millis(), &nonce[..6])
}

/// First 30 characters of the input, with an ellipsis when truncated.
pub fn title_from_input(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Most recently active first. The sort is stable so ties keep their order.
pub fn sort_by_recency(sessions: &mut [ChatSession]) {
    sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active));
}
