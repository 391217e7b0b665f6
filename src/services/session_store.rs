use crate::models::session::sort_by_recency;
use crate::models::ChatSession;

/// In-memory sessions plus the active pointer, loading flag and banner text.
///
/// Every mutation leaves `sessions` sorted by `last_active`, newest first.
#[derive(Debug, Default, Clone)]
pub struct SessionStore {
    sessions: Vec<ChatSession>,
    active_id: Option<String>,
    is_loading: bool,
    error: Option<String>,
}

impl SessionStore {
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Point at `id`. Unknown ids leave no session active.
    pub fn set_active(&mut self, id: Option<&str>) {
        self.active_id = id
            .filter(|id| self.sessions.iter().any(|s| s.id == *id))
            .map(str::to_string);
    }

    pub fn insert(&mut self, session: ChatSession) {
        self.sessions.push(session);
        sort_by_recency(&mut self.sessions);
    }

    /// Apply `f` to session `id`, then restore recency order.
    pub fn update<R>(&mut self, id: &str, f: impl FnOnce(&mut ChatSession) -> R) -> Option<R> {
        let session = self.sessions.iter_mut().find(|s| s.id == id)?;
        let result = f(session);
        sort_by_recency(&mut self.sessions);
        Some(result)
    }

    /// Replace the whole list, e.g. after an identity change.
    pub fn replace(&mut self, mut sessions: Vec<ChatSession>, active_id: Option<&str>) {
        sort_by_recency(&mut sessions);
        self.sessions = sessions;
        self.set_active(active_id);
    }

    /// Drop session `id`, deactivating it if it was active.
    pub fn remove(&mut self, id: &str) -> Option<ChatSession> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        Some(self.sessions.remove(index))
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.active_id = None;
    }
}
