use std::fmt;
use std::sync::Arc;

use crate::config::DEFAULT_SYSTEM_INSTRUCTION;
use crate::models::{ChatSession, Message};
use crate::providers::{AiProvider, ChatMessage, ChatRequest, Role};

/// Whether a generative backend can be reached at all.
#[derive(Clone)]
pub enum Availability {
    Configured {
        provider: Arc<dyn AiProvider>,
        api_key: String,
        model: String,
    },
    Unavailable {
        reason: String,
    },
}

impl fmt::Debug for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Configured {
                provider, model, ..
            } => f
                .debug_struct("Configured")
                .field("provider", &provider.name())
                .field("model", model)
                .finish(),
            Availability::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Live conversational context: everything needed to send the next prompt.
#[derive(Clone)]
pub struct ChatContext {
    provider: Arc<dyn AiProvider>,
    api_key: String,
    model: String,
    system_instruction: String,
    history: Vec<ChatMessage>,
}

impl ChatContext {
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    #[cfg(test)]
    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn provider(&self) -> Arc<dyn AiProvider> {
        self.provider.clone()
    }

    /// Request replaying the history followed by `prompt` as a user turn.
    pub fn request(&self, prompt: &str) -> ChatRequest {
        let mut messages = self.history.clone();
        messages.push(ChatMessage {
            role: Role::User,
            content: prompt.to_string(),
        });
        ChatRequest {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            messages,
            system_prompt: Some(self.system_instruction.clone()),
        }
    }
}

impl fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatContext")
            .field("model", &self.model)
            .field("history", &self.history.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum ContextState {
    Idle,
    Ready {
        session_id: Option<String>,
        context: ChatContext,
    },
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub enum ContextEvent<'a> {
    /// The active session changed; `None` is a fresh chat.
    SelectSession(Option<&'a ChatSession>),
    /// The active session's persisted history changed.
    HistoryChanged(&'a ChatSession),
}

/// Replayable turns: error messages, the greeting and empty replies never reach the model.
pub fn history_from(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !m.is_error && !m.is_greeting() && !m.streaming)
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| ChatMessage {
            role: m.sender.into(),
            content: m.text.clone(),
        })
        .collect()
}

#[derive(Debug)]
pub struct ConversationEngine {
    availability: Availability,
    state: ContextState,
}

impl ConversationEngine {
    pub fn configured(provider: Arc<dyn AiProvider>, api_key: String, model: String) -> Self {
        Self {
            availability: Availability::Configured {
                provider,
                api_key,
                model,
            },
            state: ContextState::Idle,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            state: ContextState::Error(reason.clone()),
            availability: Availability::Unavailable { reason },
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.availability, Availability::Configured { .. })
    }

    #[cfg(test)]
    pub fn state(&self) -> &ContextState {
        &self.state
    }

    pub fn context(&self) -> Option<&ChatContext> {
        match &self.state {
            ContextState::Ready { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn handle(&mut self, event: ContextEvent<'_>) {
        self.state = match event {
            ContextEvent::SelectSession(session) => self.ready_for(session, None),
            ContextEvent::HistoryChanged(session) => self.ready_for(Some(session), None),
        };
    }

    /// The live context for `active`, rebuilt when missing or built for another session.
    pub fn ensure_context(&mut self, active: Option<&ChatSession>) -> Option<ChatContext> {
        let active_id = active.map(|s| s.id.as_str());
        let current = matches!(
            &self.state,
            ContextState::Ready { session_id, .. } if session_id.as_deref() == active_id
        );
        if !current {
            self.state = self.ready_for(active, None);
        }
        self.context().cloned()
    }

    /// Context replaying only the first `upto` messages of `session`.
    ///
    /// Becomes the live context, so the next `HistoryChanged` replaces it.
    pub fn rewind(&mut self, session: &ChatSession, upto: usize) -> Option<ChatContext> {
        self.state = self.ready_for(Some(session), Some(upto));
        self.context().cloned()
    }

    fn ready_for(&self, session: Option<&ChatSession>, upto: Option<usize>) -> ContextState {
        let Availability::Configured {
            provider,
            api_key,
            model,
        } = &self.availability
        else {
            return self.state.clone();
        };

        let history = session
            .map(|s| {
                let end = upto.unwrap_or(s.messages.len()).min(s.messages.len());
                history_from(&s.messages[..end])
            })
            .unwrap_or_default();
        let system_instruction = session
            .and_then(|s| s.system_instruction.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        ContextState::Ready {
            session_id: session.map(|s| s.id.clone()),
            context: ChatContext {
                provider: provider.clone(),
                api_key: api_key.clone(),
                model: model.clone(),
                system_instruction,
                history,
            },
        }
    }
}
