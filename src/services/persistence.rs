use std::sync::Arc;

use super::firestore::DocumentStore;
use super::local_store::LocalStore;
use super::session_store::SessionStore;
use crate::models::{ChatSession, User};

pub const REMOTE_LOAD_FAILED: &str =
    "Failed to load your chats from the cloud. Using local data if available.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

/// Remote writes need both a signed-in user and a configured document store.
pub fn select_backend(has_user: bool, remote_available: bool) -> BackendKind {
    if has_user && remote_available {
        BackendKind::Remote
    } else {
        BackendKind::Local
    }
}

/// The kind of store mutation that may need persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTrigger {
    SessionCreated,
    UserMessage,
    BotMessage,
    Fragment,
    StreamFinalized,
    StreamFailed,
    RegenerateStarted,
    ActiveChanged,
    SessionDeleted,
    AllCleared,
}

impl WriteTrigger {
    fn writes_remote(self) -> bool {
        matches!(
            self,
            WriteTrigger::SessionCreated
                | WriteTrigger::UserMessage
                | WriteTrigger::StreamFinalized
                | WriteTrigger::StreamFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    SaveSnapshot {
        sessions: Vec<ChatSession>,
        active_id: Option<String>,
    },
    Upsert {
        uid: String,
        session: ChatSession,
    },
    Delete {
        uid: String,
        session_id: String,
    },
    DeleteAll {
        uid: String,
    },
}

/// Result of loading sessions after an identity change.
#[derive(Debug, Clone, Default)]
pub struct LoadedSessions {
    pub sessions: Vec<ChatSession>,
    pub active_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Default)]
pub struct Persistence {
    local: Option<LocalStore>,
    remote: Option<Arc<dyn DocumentStore>>,
}

impl Persistence {
    pub fn new(local: Option<LocalStore>, remote: Option<Arc<dyn DocumentStore>>) -> Self {
        Self { local, remote }
    }

    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    pub fn backend_for(&self, user: Option<&User>) -> BackendKind {
        select_backend(user.is_some(), self.remote_available())
    }

    /// Operations needed after `trigger` changed `session_id` in `store`.
    ///
    /// Remote writes are per document; local writes rewrite the whole snapshot.
    pub fn plan(
        &self,
        trigger: WriteTrigger,
        session_id: Option<&str>,
        store: &SessionStore,
        user: Option<&User>,
    ) -> Vec<PersistOp> {
        match (self.backend_for(user), user) {
            (BackendKind::Remote, Some(user)) => {
                let uid = user.uid.clone();
                match (trigger, session_id) {
                    (WriteTrigger::AllCleared, _) => vec![PersistOp::DeleteAll { uid }],
                    (WriteTrigger::SessionDeleted, Some(id)) => vec![PersistOp::Delete {
                        uid,
                        session_id: id.to_string(),
                    }],
                    (trigger, Some(id)) if trigger.writes_remote() => store
                        .get(id)
                        .map(|session| PersistOp::Upsert {
                            uid,
                            session: session.clone(),
                        })
                        .into_iter()
                        .collect(),
                    _ => Vec::new(),
                }
            }
            _ => {
                if trigger == WriteTrigger::Fragment {
                    return Vec::new();
                }
                vec![PersistOp::SaveSnapshot {
                    sessions: store.sessions().to_vec(),
                    active_id: store.active_id().map(str::to_string),
                }]
            }
        }
    }

    /// Perform `ops`. Failures are logged and never returned.
    pub async fn apply(&self, ops: Vec<PersistOp>) {
        for op in ops {
            match op {
                PersistOp::SaveSnapshot {
                    sessions,
                    active_id,
                } => {
                    let Some(local) = &self.local else {
                        tracing::debug!("No local store, snapshot dropped");
                        continue;
                    };
                    if let Err(e) = local.save_sessions(&sessions).await {
                        tracing::error!("Error saving chat sessions locally: {:#}", e);
                    }
                    if let Err(e) = local.save_active_id(active_id.as_deref()).await {
                        tracing::error!("Error saving active chat id locally: {:#}", e);
                    }
                }
                PersistOp::Upsert { uid, session } => {
                    let Some(remote) = &self.remote else {
                        continue;
                    };
                    if let Err(e) = remote.upsert_session(&uid, &session).await {
                        tracing::error!("Error saving chat session {} to cloud: {}", session.id, e);
                    }
                }
                PersistOp::Delete { uid, session_id } => {
                    let Some(remote) = &self.remote else {
                        continue;
                    };
                    if let Err(e) = remote.delete_session(&uid, &session_id).await {
                        tracing::error!("Error deleting chat session {} from cloud: {}", session_id, e);
                    }
                }
                PersistOp::DeleteAll { uid } => {
                    let Some(remote) = &self.remote else {
                        continue;
                    };
                    if let Err(e) = remote.delete_all(&uid).await {
                        tracing::error!("Error clearing chats from cloud: {}", e);
                    }
                }
            }
        }
    }

    /// Sessions to show for `user`: the cloud list when signed in, else the local snapshot.
    pub async fn load_for(&self, user: Option<&User>) -> LoadedSessions {
        if let (BackendKind::Remote, Some(user), Some(remote)) =
            (self.backend_for(user), user, &self.remote)
        {
            match remote.list_sessions(&user.uid).await {
                Ok(sessions) => {
                    tracing::info!("Loaded {} chats from the cloud", sessions.len());
                    let active_id = sessions.first().map(|s| s.id.clone());
                    return LoadedSessions {
                        sessions,
                        active_id,
                        error: None,
                    };
                }
                Err(e) => {
                    tracing::error!("Error loading chat sessions from cloud: {}", e);
                    let mut loaded = self.load_local().await;
                    loaded.error = Some(REMOTE_LOAD_FAILED.to_string());
                    return loaded;
                }
            }
        }
        self.load_local().await
    }

    async fn load_local(&self) -> LoadedSessions {
        let Some(local) = &self.local else {
            return LoadedSessions::default();
        };
        LoadedSessions {
            sessions: local.load_sessions().await,
            active_id: local.load_active_id().await,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::services::database::Database;
    use crate::services::firestore::tests::MemoryStore;

    fn user() -> User {
        User {
            uid: "uid-1".to_string(),
            display_name: Some("Ada".to_string()),
            email: None,
            photo_url: None,
        }
    }

    fn store_with_session() -> (SessionStore, String) {
        let mut store = SessionStore::default();
        let session = ChatSession::start(Message::user("hello"), "sys");
        let id = session.id.clone();
        store.insert(session);
        store.set_active(Some(&id));
        (store, id)
    }

    fn local() -> LocalStore {
        LocalStore::new(Database::new_in_memory().unwrap())
    }

    const ALL_TRIGGERS: [WriteTrigger; 10] = [
        WriteTrigger::SessionCreated,
        WriteTrigger::UserMessage,
        WriteTrigger::BotMessage,
        WriteTrigger::Fragment,
        WriteTrigger::StreamFinalized,
        WriteTrigger::StreamFailed,
        WriteTrigger::RegenerateStarted,
        WriteTrigger::ActiveChanged,
        WriteTrigger::SessionDeleted,
        WriteTrigger::AllCleared,
    ];

    #[test]
    fn test_select_backend_truth_table() {
        assert_eq!(select_backend(false, false), BackendKind::Local);
        assert_eq!(select_backend(false, true), BackendKind::Local);
        assert_eq!(select_backend(true, false), BackendKind::Local);
        assert_eq!(select_backend(true, true), BackendKind::Remote);
    }

    #[test]
    fn test_local_plan_snapshots_every_non_fragment_trigger() {
        let persistence = Persistence::new(Some(local()), None);
        let (store, id) = store_with_session();
        for trigger in ALL_TRIGGERS {
            let ops = persistence.plan(trigger, Some(&id), &store, Some(&user()));
            if trigger == WriteTrigger::Fragment {
                assert!(ops.is_empty());
            } else {
                assert!(matches!(
                    ops.as_slice(),
                    [PersistOp::SaveSnapshot { active_id: Some(a), sessions }]
                        if *a == id && sessions.len() == 1
                ));
            }
        }
    }

    #[test]
    fn test_remote_plan_is_per_action() {
        let persistence = Persistence::new(Some(local()), Some(Arc::new(MemoryStore::default())));
        let (store, id) = store_with_session();
        for trigger in ALL_TRIGGERS {
            let ops = persistence.plan(trigger, Some(&id), &store, Some(&user()));
            match trigger {
                WriteTrigger::SessionDeleted => assert!(matches!(
                    ops.as_slice(),
                    [PersistOp::Delete { uid, session_id }] if uid == "uid-1" && *session_id == id
                )),
                WriteTrigger::AllCleared => assert!(matches!(
                    ops.as_slice(),
                    [PersistOp::DeleteAll { uid }] if uid == "uid-1"
                )),
                t if t.writes_remote() => assert!(matches!(
                    ops.as_slice(),
                    [PersistOp::Upsert { uid, session }] if uid == "uid-1" && session.id == id
                )),
                _ => assert!(ops.is_empty(), "{:?} should not write", trigger),
            }
        }
        assert!(persistence
            .plan(WriteTrigger::BotMessage, Some(&id), &store, Some(&user()))
            .is_empty());
    }

    #[tokio::test]
    async fn test_apply_writes_local_snapshot() {
        let local = local();
        let persistence = Persistence::new(Some(local.clone()), None);
        let (store, id) = store_with_session();
        let ops = persistence.plan(WriteTrigger::UserMessage, Some(&id), &store, None);
        persistence.apply(ops).await;

        let loaded = persistence.load_for(None).await;
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.active_id.as_deref(), Some(id.as_str()));
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn test_remote_round_trip_activates_most_recent() {
        let remote = Arc::new(MemoryStore::default());
        let persistence = Persistence::new(Some(local()), Some(remote.clone()));
        let (store, id) = store_with_session();
        let ops = persistence.plan(WriteTrigger::SessionCreated, Some(&id), &store, Some(&user()));
        persistence.apply(ops).await;

        assert_eq!(remote.stored("uid-1").len(), 1);
        let loaded = persistence.load_for(Some(&user())).await;
        assert_eq!(loaded.active_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_remote_delete_and_clear() {
        let remote = Arc::new(MemoryStore::default());
        let persistence = Persistence::new(None, Some(remote.clone()));
        let (store, id) = store_with_session();
        let mut other = ChatSession::start(Message::user("second"), "sys");
        other.id = "other".to_string();

        persistence
            .apply(persistence.plan(WriteTrigger::SessionCreated, Some(&id), &store, Some(&user())))
            .await;
        persistence
            .apply(vec![PersistOp::Upsert {
                uid: "uid-1".to_string(),
                session: other,
            }])
            .await;
        assert_eq!(remote.stored("uid-1").len(), 2);

        persistence
            .apply(persistence.plan(WriteTrigger::SessionDeleted, Some(&id), &store, Some(&user())))
            .await;
        let left = remote.stored("uid-1");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "other");

        persistence
            .apply(persistence.plan(WriteTrigger::AllCleared, None, &store, Some(&user())))
            .await;
        assert!(remote.stored("uid-1").is_empty());
    }

    #[tokio::test]
    async fn test_failed_remote_load_falls_back_to_local() {
        let local = local();
        let (store, _) = store_with_session();
        local.save_sessions(store.sessions()).await.unwrap();

        let persistence = Persistence::new(Some(local), Some(Arc::new(MemoryStore::failing())));
        let loaded = persistence.load_for(Some(&user())).await;
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.error.as_deref(), Some(REMOTE_LOAD_FAILED));
    }

    #[tokio::test]
    async fn test_missing_backends_are_harmless() {
        let persistence = Persistence::default();
        let (store, id) = store_with_session();
        let ops = persistence.plan(WriteTrigger::StreamFinalized, Some(&id), &store, None);
        persistence.apply(ops).await;
        assert!(persistence.load_for(None).await.sessions.is_empty());
    }
}
