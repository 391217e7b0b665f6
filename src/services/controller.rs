use tokio_util::sync::CancellationToken;

use super::chat::{StreamJob, StreamUpdate};
use super::engine::{ChatContext, ContextEvent, ConversationEngine};
use super::moderation::{moderate, ReplySelector};
use super::persistence::{LoadedSessions, PersistOp, Persistence, WriteTrigger};
use super::session_store::SessionStore;
use crate::config::DEFAULT_SYSTEM_INSTRUCTION;
use crate::models::message::{new_error_id, new_message_id};
use crate::models::{ChatSession, Message, Sender, User};

const INVALID_KEY_MARKER: &str = "API_KEY_INVALID";

#[derive(Debug)]
pub enum SendOutcome {
    /// Blank input, or a stream is already running.
    Ignored,
    /// No conversation context could be built; nothing was appended.
    Unavailable,
    /// A canned reply was appended instead of calling the model.
    Moderated,
    Dispatched(StreamJob),
}

#[derive(Debug)]
pub enum RegenerateOutcome {
    Rejected,
    Dispatched(StreamJob),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Send,
    Regenerate,
}

#[derive(Debug)]
struct InFlight {
    session_id: String,
    placeholder_id: String,
    kind: JobKind,
    cancel: CancellationToken,
}

/// Text shown inline and in the banner when a stream fails.
fn failure_text(kind: JobKind, cause: &str) -> String {
    match kind {
        JobKind::Send if cause.is_empty() => {
            "Sorry, I encountered an error. Please try again.".to_string()
        }
        JobKind::Send if cause.contains(INVALID_KEY_MARKER) => {
            "AI API Key is invalid. Please check configuration.".to_string()
        }
        JobKind::Send => format!("Error from AI: {}", cause),
        JobKind::Regenerate if cause.is_empty() => {
            "Sorry, failed to regenerate. Please try again.".to_string()
        }
        JobKind::Regenerate => format!("Error during regeneration: {}", cause),
    }
}

/// Whether the message at `index` gets a regenerate action.
pub fn can_regenerate(messages: &[Message], index: usize) -> bool {
    let Some(message) = messages.get(index) else {
        return false;
    };
    index > 0
        && message.sender == Sender::Bot
        && !message.is_error
        && !message.streaming
        && !message.is_greeting()
        && messages[index - 1].sender == Sender::User
}

/// Orchestrates sessions, the conversation engine, moderation and persistence.
///
/// All methods are synchronous. Storage writes accumulate and are drained
/// with [`ChatController::take_writes`].
pub struct ChatController {
    store: SessionStore,
    engine: ConversationEngine,
    persistence: Persistence,
    user: Option<User>,
    in_flight: Option<InFlight>,
    pending: Vec<PersistOp>,
    /// Set between an identity change and the arrival of the matching sessions.
    reloading: bool,
}

impl ChatController {
    pub fn new(engine: ConversationEngine, persistence: Persistence) -> Self {
        Self {
            store: SessionStore::default(),
            engine,
            persistence,
            user: None,
            in_flight: None,
            pending: Vec::new(),
            reloading: false,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    /// No mutation may run: a stream is in flight or the list is being replaced.
    fn busy(&self) -> bool {
        self.store.is_loading() || self.reloading
    }

    pub fn error(&self) -> Option<&str> {
        self.store.error()
    }

    pub fn take_writes(&mut self) -> Vec<PersistOp> {
        std::mem::take(&mut self.pending)
    }

    fn record(&mut self, trigger: WriteTrigger, session_id: Option<&str>) {
        let ops = self
            .persistence
            .plan(trigger, session_id, &self.store, self.user.as_ref());
        self.pending.extend(ops);
    }

    fn sync_context(&mut self) {
        self.engine
            .handle(ContextEvent::SelectSession(self.store.active()));
    }

    fn history_changed(&mut self, session_id: &str) {
        if let Some(session) = self.store.get(session_id) {
            self.engine.handle(ContextEvent::HistoryChanged(session));
        }
    }

    /// Messages to render: the active transcript or the greeting.
    pub fn visible_messages(&self) -> Vec<Message> {
        let mut messages = match self.store.active() {
            Some(session) => session.messages.clone(),
            None => vec![Message::greeting()],
        };
        if !self.engine.is_available() {
            messages.push(Message::unavailable_notice());
        }
        messages
    }

    pub fn start_new_session(&mut self) {
        if self.busy() {
            return;
        }
        self.store.set_active(None);
        self.store.clear_error();
        self.sync_context();
        self.record(WriteTrigger::ActiveChanged, None);
    }

    pub fn select_session(&mut self, id: &str) {
        if self.busy() {
            return;
        }
        self.store.set_active(Some(id));
        self.store.clear_error();
        self.sync_context();
        let active = self.store.active_id().map(str::to_string);
        self.record(WriteTrigger::ActiveChanged, active.as_deref());
    }

    pub fn dismiss_error(&mut self) {
        self.store.clear_error();
    }

    pub fn delete_session(&mut self, id: &str) {
        if self.busy() {
            return;
        }
        let was_active = self.store.active_id() == Some(id);
        if self.store.remove(id).is_none() {
            return;
        }
        if was_active {
            self.sync_context();
        }
        self.record(WriteTrigger::SessionDeleted, Some(id));
    }

    pub fn clear_sessions(&mut self) {
        if self.busy() {
            return;
        }
        self.store.clear();
        self.store.clear_error();
        self.sync_context();
        self.record(WriteTrigger::AllCleared, None);
    }

    pub fn send_message(&mut self, text: &str, selector: &mut dyn ReplySelector) -> SendOutcome {
        if text.trim().is_empty() || self.busy() {
            return SendOutcome::Ignored;
        }

        let Some(context) = self.engine.ensure_context(self.store.active()) else {
            tracing::error!("Chat session could not be initialized for sending message");
            return SendOutcome::Unavailable;
        };
        self.store.clear_error();

        let user_message = Message::user(text);
        let session_id = match self.store.active_id().map(str::to_string) {
            Some(id) => {
                self.store.update(&id, |s| {
                    s.messages.push(user_message);
                    s.touch();
                });
                self.record(WriteTrigger::UserMessage, Some(&id));
                id
            }
            None => {
                let session = ChatSession::start(user_message, DEFAULT_SYSTEM_INSTRUCTION);
                let id = session.id.clone();
                self.store.insert(session);
                self.store.set_active(Some(&id));
                self.record(WriteTrigger::SessionCreated, Some(&id));
                id
            }
        };

        if let Some(verdict) = moderate(text, selector) {
            tracing::info!("Message moderated ({:?})", verdict.kind);
            let reply = Message::bot(new_message_id(verdict.kind.id_suffix()), verdict.reply);
            self.store.update(&session_id, |s| {
                s.messages.push(reply);
                s.touch();
            });
            self.record(WriteTrigger::BotMessage, Some(&session_id));
            self.history_changed(&session_id);
            return SendOutcome::Moderated;
        }

        let placeholder_id = new_message_id("bot-streaming");
        self.store.update(&session_id, |s| {
            s.messages.push(Message::placeholder(placeholder_id.clone()));
            s.touch();
        });
        self.record(WriteTrigger::BotMessage, Some(&session_id));

        SendOutcome::Dispatched(self.dispatch(
            JobKind::Send,
            session_id,
            placeholder_id,
            text.to_string(),
            context,
        ))
    }

    pub fn regenerate(&mut self, message_id: &str) -> RegenerateOutcome {
        if self.busy() {
            return RegenerateOutcome::Rejected;
        }
        let Some(session) = self.store.active() else {
            return RegenerateOutcome::Rejected;
        };
        let session_id = session.id.clone();

        let index = match session.position(message_id) {
            Some(index)
                if index >= 1
                    && session.messages[index].sender == Sender::Bot
                    && session.messages[index - 1].sender == Sender::User =>
            {
                index
            }
            _ => {
                tracing::warn!("Cannot regenerate {}, conditions not met", message_id);
                return RegenerateOutcome::Rejected;
            }
        };
        let prompt = session.messages[index - 1].text.clone();

        let Some(context) = self.engine.rewind(session, index - 1) else {
            tracing::warn!("Conversation engine unavailable, regenerate skipped");
            return RegenerateOutcome::Rejected;
        };
        self.store.clear_error();

        let placeholder_id = new_message_id("bot-regenerated");
        self.store.update(&session_id, |s| {
            s.messages.truncate(index);
            s.messages.push(Message::placeholder(placeholder_id.clone()));
            s.touch();
        });
        self.record(WriteTrigger::RegenerateStarted, Some(&session_id));

        RegenerateOutcome::Dispatched(self.dispatch(
            JobKind::Regenerate,
            session_id,
            placeholder_id,
            prompt,
            context,
        ))
    }

    fn dispatch(
        &mut self,
        kind: JobKind,
        session_id: String,
        placeholder_id: String,
        prompt: String,
        context: ChatContext,
    ) -> StreamJob {
        let cancel = CancellationToken::new();
        self.store.set_loading(true);
        self.in_flight = Some(InFlight {
            session_id: session_id.clone(),
            placeholder_id: placeholder_id.clone(),
            kind,
            cancel: cancel.clone(),
        });
        StreamJob {
            session_id,
            placeholder_id,
            prompt,
            context,
            cancel,
        }
    }

    /// Apply streamed progress. Returns `false` for updates of a stale job.
    pub fn apply_stream_update(&mut self, update: StreamUpdate) -> bool {
        let kind = match &self.in_flight {
            Some(flight)
                if flight.placeholder_id == update.message_id()
                    && flight.session_id == update.session_id() =>
            {
                flight.kind
            }
            _ => {
                tracing::debug!("Dropping update for stale stream {}", update.message_id());
                return false;
            }
        };

        match update {
            StreamUpdate::Fragment {
                session_id,
                message_id,
                text,
            } => {
                self.store.update(&session_id, |s| {
                    if let Some(m) = s.message_mut(&message_id) {
                        m.text.push_str(&text);
                    }
                });
                self.record(WriteTrigger::Fragment, Some(&session_id));
            }
            StreamUpdate::Finished {
                session_id,
                message_id,
            } => {
                self.finish_job();
                self.store.update(&session_id, |s| {
                    if let Some(m) = s.message_mut(&message_id) {
                        m.streaming = false;
                    }
                    s.touch();
                });
                self.record(WriteTrigger::StreamFinalized, Some(&session_id));
                self.history_changed(&session_id);
            }
            StreamUpdate::Failed {
                session_id,
                message_id,
                error,
            } => {
                self.finish_job();
                let text = failure_text(kind, &error);
                let error_id = match kind {
                    JobKind::Send => new_error_id("error"),
                    JobKind::Regenerate => new_error_id("error-regen"),
                };
                let error_message = Message::error(error_id, text.clone());
                self.store.update(&session_id, |s| {
                    s.messages.retain(|m| m.id != message_id);
                    s.messages.push(error_message);
                    s.touch();
                });
                self.store.set_error(text);
                self.record(WriteTrigger::StreamFailed, Some(&session_id));
                self.history_changed(&session_id);
            }
        }
        true
    }

    fn finish_job(&mut self) {
        self.in_flight = None;
        self.store.set_loading(false);
    }

    /// Abandon the running stream, if any. Its later updates are dropped.
    pub fn cancel_stream(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            tracing::debug!("Cancelling stream {}", flight.placeholder_id);
            flight.cancel.cancel();
        }
        self.store.set_loading(false);
    }

    /// Forget the signed-in user and the sessions loaded for them.
    ///
    /// Everything stays ignored until [`ChatController::apply_loaded_sessions`]
    /// delivers the local sessions, so no snapshot of the emptied list is written.
    pub fn sign_out_requested(&mut self) {
        self.cancel_stream();
        self.reloading = true;
        self.user = None;
        self.store.clear();
        self.store.clear_error();
        self.sync_context();
    }

    pub fn set_user(&mut self, user: Option<User>) {
        if user.is_some() {
            self.store.clear_error();
        }
        self.user = user;
    }

    /// Replace the in-memory list after an identity change or at startup.
    pub fn apply_loaded_sessions(&mut self, loaded: LoadedSessions) {
        self.cancel_stream();
        self.reloading = false;
        self.store.replace(loaded.sessions, loaded.active_id.as_deref());
        if let Some(error) = loaded.error {
            self.store.set_error(error);
        }
        self.sync_context();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::providers::{AiProvider, ProviderError};
    use crate::services::chat::run_streaming;
    use crate::services::chat::tests::ScriptedProvider;
    use crate::services::moderation::tests::FixedSelector;
    use crate::services::moderation::{ADMONISHMENTS, REFUSALS};

    fn controller_with(provider: Arc<dyn AiProvider>) -> ChatController {
        let engine = ConversationEngine::configured(provider, "key".into(), "model".into());
        ChatController::new(engine, Persistence::default())
    }

    fn controller() -> ChatController {
        controller_with(Arc::new(ScriptedProvider::tokens(&["Hi"])))
    }

    fn dispatched(outcome: SendOutcome) -> StreamJob {
        match outcome {
            SendOutcome::Dispatched(job) => job,
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    fn active_messages(c: &ChatController) -> Vec<Message> {
        c.store().active().map(|s| s.messages.clone()).unwrap_or_default()
    }

    async fn run(c: &mut ChatController, job: StreamJob) {
        let mut updates = Vec::new();
        run_streaming(job, |u| updates.push(u)).await;
        for update in updates {
            assert!(c.apply_stream_update(update));
        }
    }

    fn assert_sorted(c: &ChatController) {
        let sessions = c.store().sessions();
        assert!(sessions
            .windows(2)
            .all(|w| w[0].last_active >= w[1].last_active));
    }

    #[test]
    fn test_blank_send_is_a_no_op() {
        let mut c = controller();
        assert!(matches!(
            c.send_message("   \n\t", &mut FixedSelector(0)),
            SendOutcome::Ignored
        ));
        assert!(c.store().sessions().is_empty());
        assert!(c.take_writes().is_empty());
    }

    #[test]
    fn test_first_send_creates_session_and_placeholder() {
        let mut c = controller();
        let job = dispatched(c.send_message("What is the meaning of life, really?", &mut FixedSelector(0)));

        let session = c.store().active().unwrap();
        assert_eq!(session.id, job.session_id);
        assert_eq!(session.title, "What is the meaning of life, r...");
        assert_eq!(session.system_instruction.as_deref(), Some(DEFAULT_SYSTEM_INSTRUCTION));
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[1].streaming);
        assert_eq!(session.messages[1].id, job.placeholder_id);
        assert!(c.is_loading());
        assert_eq!(job.prompt, "What is the meaning of life, really?");
    }

    #[test]
    fn test_send_while_loading_is_dropped() {
        let mut c = controller();
        let _job = dispatched(c.send_message("first", &mut FixedSelector(0)));
        let before = active_messages(&c);
        assert!(matches!(
            c.send_message("second", &mut FixedSelector(0)),
            SendOutcome::Ignored
        ));
        assert_eq!(active_messages(&c), before);
    }

    #[tokio::test]
    async fn test_successful_stream_concatenates_fragments() {
        let mut c = controller_with(Arc::new(ScriptedProvider::tokens(&["Hel", "lo", " there"])));
        let job = dispatched(c.send_message("hey", &mut FixedSelector(0)));
        run(&mut c, job).await;

        let messages = active_messages(&c);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text, "Hello there");
        assert!(!messages[1].streaming);
        assert!(!c.is_loading());
        assert!(c.error().is_none());
    }

    #[tokio::test]
    async fn test_failed_stream_replaces_placeholder_with_error() {
        let provider = ScriptedProvider::failing(|| {
            ProviderError::AuthError("API_KEY_INVALID: API key not valid".to_string())
        });
        let mut c = controller_with(Arc::new(provider));
        let job = dispatched(c.send_message("hey", &mut FixedSelector(0)));
        run(&mut c, job).await;

        let messages = active_messages(&c);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert!(messages[1].is_error);
        assert!(messages[1].id.starts_with("error-"));
        assert_eq!(
            messages[1].text,
            "AI API Key is invalid. Please check configuration."
        );
        assert_eq!(c.error(), Some(messages[1].text.as_str()));
        assert!(!c.is_loading());
    }

    #[test]
    fn test_failure_texts() {
        assert_eq!(
            failure_text(JobKind::Send, "Network error: timed out"),
            "Error from AI: Network error: timed out"
        );
        assert_eq!(
            failure_text(JobKind::Send, ""),
            "Sorry, I encountered an error. Please try again."
        );
        assert_eq!(
            failure_text(JobKind::Regenerate, "boom"),
            "Error during regeneration: boom"
        );
        assert_eq!(
            failure_text(JobKind::Regenerate, ""),
            "Sorry, failed to regenerate. Please try again."
        );
    }

    #[test]
    fn test_sensitive_input_gets_refusal() {
        let mut c = controller();
        assert!(matches!(
            c.send_message("Tell me about Annu", &mut FixedSelector(2)),
            SendOutcome::Moderated
        ));
        let messages = active_messages(&c);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].sender, Sender::Bot);
        assert_eq!(messages[1].text, REFUSALS[2]);
        assert!(messages[1].id.ends_with("-bot-refusal"));
        assert!(!c.is_loading());
    }

    #[test]
    fn test_standalone_and_gets_refusal() {
        let mut c = controller();
        assert!(matches!(
            c.send_message("cats and dogs", &mut FixedSelector(0)),
            SendOutcome::Moderated
        ));
        assert!(REFUSALS.contains(&active_messages(&c)[1].text.as_str()));
    }

    #[test]
    fn test_profanity_gets_admonishment() {
        let mut c = controller();
        assert!(matches!(
            c.send_message("you IDIOT", &mut FixedSelector(3)),
            SendOutcome::Moderated
        ));
        let messages = active_messages(&c);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text, ADMONISHMENTS[3]);
    }

    #[test]
    fn test_unavailable_engine_appends_nothing() {
        let engine = ConversationEngine::unavailable("API key not configured");
        let mut c = ChatController::new(engine, Persistence::default());
        assert!(matches!(
            c.send_message("hello", &mut FixedSelector(0)),
            SendOutcome::Unavailable
        ));
        assert!(c.store().sessions().is_empty());

        let visible = c.visible_messages();
        assert_eq!(visible.len(), 2);
        assert!(visible[0].is_greeting());
        assert!(visible[1].is_error);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_tail() {
        let mut c = controller_with(Arc::new(ScriptedProvider::tokens(&["second"])));
        let job = dispatched(c.send_message("q1", &mut FixedSelector(0)));
        run(&mut c, job).await;
        let job = dispatched(c.send_message("q2", &mut FixedSelector(0)));
        run(&mut c, job).await;

        let messages = active_messages(&c);
        assert_eq!(messages.len(), 4);
        let target = messages[1].id.clone();

        let job = match c.regenerate(&target) {
            RegenerateOutcome::Dispatched(job) => job,
            RegenerateOutcome::Rejected => panic!("regenerate rejected"),
        };
        assert_eq!(job.prompt, "q1");
        assert!(job.context.history().is_empty());
        assert_eq!(active_messages(&c).len(), 2);

        run(&mut c, job).await;
        let messages = active_messages(&c);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "q1");
        assert_eq!(messages[1].text, "second");
        assert!(messages[1].id.ends_with("-bot-regenerated"));
        assert!(!messages[1].streaming);
    }

    #[tokio::test]
    async fn test_regenerate_failure_leaves_prompt_and_error() {
        let mut c = controller_with(Arc::new(ScriptedProvider::tokens(&["ok"])));
        let job = dispatched(c.send_message("q1", &mut FixedSelector(0)));
        run(&mut c, job).await;
        let target = active_messages(&c)[1].id.clone();

        let job = match c.regenerate(&target) {
            RegenerateOutcome::Dispatched(job) => job,
            RegenerateOutcome::Rejected => panic!("regenerate rejected"),
        };
        assert!(c.apply_stream_update(StreamUpdate::Failed {
            session_id: job.session_id.clone(),
            message_id: job.placeholder_id.clone(),
            error: "quota".to_string(),
        }));

        let messages = active_messages(&c);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text, "Error during regeneration: quota");
        assert!(messages[1].id.starts_with("error-regen-"));
    }

    #[tokio::test]
    async fn test_regenerate_rejects_invalid_targets() {
        let mut c = controller();
        let job = dispatched(c.send_message("q1", &mut FixedSelector(0)));
        run(&mut c, job).await;
        let before = active_messages(&c);

        // index 0 is a user message
        assert!(matches!(c.regenerate(&before[0].id), RegenerateOutcome::Rejected));
        assert!(matches!(c.regenerate("missing"), RegenerateOutcome::Rejected));
        assert_eq!(active_messages(&c), before);

        // a bot message preceded by another bot message
        assert!(matches!(
            c.send_message("stupid", &mut FixedSelector(0)),
            SendOutcome::Moderated
        ));
        let session_id = c.store().active_id().unwrap().to_string();
        let extra = Message::bot("extra-bot".to_string(), "extra");
        c.store.update(&session_id, |s| s.messages.push(extra));
        let before = active_messages(&c);
        assert!(matches!(c.regenerate("extra-bot"), RegenerateOutcome::Rejected));
        assert_eq!(active_messages(&c), before);
    }

    #[test]
    fn test_stale_updates_are_dropped() {
        let mut c = controller();
        let job = dispatched(c.send_message("q1", &mut FixedSelector(0)));
        assert!(!c.apply_stream_update(StreamUpdate::Fragment {
            session_id: job.session_id.clone(),
            message_id: "someone-else".to_string(),
            text: "x".to_string(),
        }));

        c.sign_out_requested();
        assert!(job.cancel.is_cancelled());
        assert!(!c.apply_stream_update(StreamUpdate::Finished {
            session_id: job.session_id,
            message_id: job.placeholder_id,
        }));
        assert!(c.store().sessions().is_empty());
        assert!(!c.is_loading());
    }

    #[test]
    fn test_selection_ignored_while_loading() {
        let mut c = controller();
        c.apply_loaded_sessions(LoadedSessions {
            sessions: vec![ChatSession::start(Message::user("old"), "sys")],
            active_id: None,
            error: None,
        });
        let old_id = c.store().sessions()[0].id.clone();

        let _job = dispatched(c.send_message("new", &mut FixedSelector(0)));
        let streaming_id = c.store().active_id().unwrap().to_string();
        c.select_session(&old_id);
        c.start_new_session();
        assert_eq!(c.store().active_id(), Some(streaming_id.as_str()));
    }

    #[test]
    fn test_new_chat_and_select() {
        let mut c = controller();
        assert!(matches!(
            c.send_message("idiot", &mut FixedSelector(0)),
            SendOutcome::Moderated
        ));
        let id = c.store().active_id().unwrap().to_string();

        c.start_new_session();
        assert!(c.store().active_id().is_none());
        let visible = c.visible_messages();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_greeting());

        c.select_session(&id);
        assert_eq!(c.visible_messages().len(), 2);
        c.select_session("unknown");
        assert!(c.store().active_id().is_none());
    }

    #[test]
    fn test_delete_and_clear_sessions() {
        let mut c = controller();
        for prompt in ["idiot", "stupid"] {
            c.start_new_session();
            c.send_message(prompt, &mut FixedSelector(0));
        }
        let active = c.store().active_id().unwrap().to_string();
        c.take_writes();

        c.delete_session(&active);
        assert_eq!(c.store().sessions().len(), 1);
        assert!(c.store().active_id().is_none());
        assert!(matches!(
            c.take_writes().as_slice(),
            [PersistOp::SaveSnapshot { sessions, active_id: None }] if sessions.len() == 1
        ));

        c.delete_session("unknown");
        assert!(c.take_writes().is_empty());

        c.clear_sessions();
        assert!(c.store().sessions().is_empty());
        assert_eq!(c.visible_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_keeps_device_history() {
        use crate::services::database::Database;
        use crate::services::local_store::LocalStore;

        let local = LocalStore::new(Database::new_in_memory().unwrap());
        let saved = vec![
            ChatSession::start(Message::user("first"), "sys"),
            ChatSession::start(Message::user("second"), "sys"),
        ];
        local.save_sessions(&saved).await.unwrap();

        let persistence = Persistence::new(Some(local), None);
        let engine = ConversationEngine::configured(
            Arc::new(ScriptedProvider::tokens(&["Hi"])),
            "key".into(),
            "model".into(),
        );
        let mut c = ChatController::new(engine, persistence.clone());
        c.set_user(Some(User {
            uid: "uid-1".to_string(),
            display_name: Some("Ada".to_string()),
            email: None,
            photo_url: None,
        }));
        c.apply_loaded_sessions(persistence.load_for(None).await);
        assert_eq!(c.store().sessions().len(), 2);

        c.sign_out_requested();
        assert!(c.is_reloading());
        assert!(matches!(
            c.send_message("idiot", &mut FixedSelector(0)),
            SendOutcome::Ignored
        ));
        c.start_new_session();
        c.clear_sessions();
        assert!(c.take_writes().is_empty());

        let reloaded = persistence.load_for(None).await;
        assert_eq!(reloaded.sessions.len(), 2);
        c.apply_loaded_sessions(reloaded);
        assert!(!c.is_reloading());
        assert!(matches!(
            c.send_message("idiot", &mut FixedSelector(0)),
            SendOutcome::Moderated
        ));
        persistence.apply(c.take_writes()).await;
        assert_eq!(persistence.load_for(None).await.sessions.len(), 3);
    }

    #[tokio::test]
    async fn test_sessions_stay_sorted() {
        let mut c = controller_with(Arc::new(ScriptedProvider::tokens(&["a"])));
        for prompt in ["one", "two", "three"] {
            c.start_new_session();
            let job = dispatched(c.send_message(prompt, &mut FixedSelector(0)));
            assert_sorted(&c);
            run(&mut c, job).await;
            assert_sorted(&c);
        }
        let oldest = c.store().sessions()[2].id.clone();
        c.select_session(&oldest);
        let job = dispatched(c.send_message("again", &mut FixedSelector(0)));
        assert_eq!(c.store().sessions()[0].id, oldest);
        run(&mut c, job).await;
        assert_sorted(&c);
    }

    #[tokio::test]
    async fn test_message_order_is_append_only() {
        let mut c = controller_with(Arc::new(ScriptedProvider::tokens(&["r"])));
        let mut seen: Vec<String> = Vec::new();
        for prompt in ["a", "b", "c"] {
            let job = dispatched(c.send_message(prompt, &mut FixedSelector(0)));
            run(&mut c, job).await;
            let ids: Vec<String> = active_messages(&c).into_iter().map(|m| m.id).collect();
            assert_eq!(&ids[..seen.len()], seen.as_slice());
            seen = ids;
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_can_regenerate_rules() {
        let messages = vec![
            Message::greeting(),
            Message::user("q"),
            Message::bot("b".to_string(), "a"),
            Message::error("e".to_string(), "boom"),
            Message::user("q2"),
            Message::placeholder("p".to_string()),
        ];
        assert!(!can_regenerate(&messages, 0));
        assert!(!can_regenerate(&messages, 1));
        assert!(can_regenerate(&messages, 2));
        assert!(!can_regenerate(&messages, 3));
        assert!(!can_regenerate(&messages, 5));
        assert!(!can_regenerate(&messages, 9));
    }

    #[test]
    fn test_loaded_sessions_surface_banner_and_activate() {
        let mut c = controller();
        let session = ChatSession::start(Message::user("cloud"), "sys");
        let id = session.id.clone();
        c.apply_loaded_sessions(LoadedSessions {
            sessions: vec![session],
            active_id: Some(id.clone()),
            error: Some(crate::services::persistence::REMOTE_LOAD_FAILED.to_string()),
        });
        assert_eq!(c.store().active_id(), Some(id.as_str()));
        assert!(c.error().is_some());
        c.dismiss_error();
        assert!(c.error().is_none());
    }
}
