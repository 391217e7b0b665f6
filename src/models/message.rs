use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{GREETING_ID, GREETING_TEXT, UNAVAILABLE_ID, UNAVAILABLE_TEXT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Sender::User),
            "bot" => Some(Sender::Bot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub streaming: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(new_message_id("user"), text, Sender::User)
    }

    pub fn bot(id: String, text: impl Into<String>) -> Self {
        Self::new(id, text, Sender::Bot)
    }

    /// An empty assistant message that receives streamed fragments.
    pub fn placeholder(id: String) -> Self {
        Self {
            streaming: true,
            ..Self::new(id, String::new(), Sender::Bot)
        }
    }

    pub fn error(id: String, text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(id, text, Sender::Bot)
        }
    }

    pub fn greeting() -> Self {
        Self::bot(GREETING_ID.to_string(), GREETING_TEXT)
    }

    pub fn unavailable_notice() -> Self {
        Self::error(UNAVAILABLE_ID.to_string(), UNAVAILABLE_TEXT)
    }

    fn new(id: String, text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
            is_error: false,
            streaming: false,
        }
    }

    pub fn is_greeting(&self) -> bool {
        self.id == GREETING_ID || self.id == UNAVAILABLE_ID
    }
}

/// Millisecond-based id with a role suffix, e.g. `1718000000000-user`.
pub fn new_message_id(suffix: &str) -> String {
    format!("{}-{}", unique_millis(), suffix)
}

pub fn new_error_id(prefix: &str) -> String {
    format!("{}-{}", prefix, unique_millis())
}

fn unique_millis() -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", Utc::now().timestamp_millis(), &nonce[..6])
}
