use std::sync::Arc;

use adw::prelude::*;
use relm4::prelude::*;
use tokio::sync::mpsc;

use crate::config::{self, AppConfig};
use crate::models::User;
use crate::providers::gemini::GeminiProvider;
use crate::services::chat::{run_streaming, StreamJob, StreamUpdate};
use crate::services::engine::ConversationEngine;
use crate::services::firestore::{DocumentStore, FirestoreStore};
use crate::services::identity::{FirebaseIdentity, IdentityProvider};
use crate::services::keyring::Secret;
use crate::services::local_store::LocalStore;
use crate::services::moderation::RandomSelector;
use crate::services::persistence::{LoadedSessions, PersistOp, Persistence};
use crate::services::{ChatController, Database, KeyringService, RegenerateOutcome, SendOutcome};
use crate::ui::chat_view::{ChatView, ChatViewMsg, ChatViewOutput};
use crate::ui::header::{Header, HeaderMsg, HeaderOutput};
use crate::ui::sidebar::{SessionSummary, Sidebar, SidebarMsg, SidebarOutput};

pub struct App {
    controller: ChatController,
    identity: Option<Arc<dyn IdentityProvider>>,
    writes: mpsc::UnboundedSender<Vec<PersistOp>>,
    initialized: bool,
    header: Controller<Header>,
    sidebar: Controller<Sidebar>,
    chat_view: Controller<ChatView>,
    split_view: adw::OverlaySplitView,
    banner: adw::Banner,
}

#[derive(Debug)]
pub enum AppMsg {
    SendMessage(String),
    RegenerateMessage(String),
    NewChat,
    SessionSelected(String),
    DeleteSession(String),
    ClearAllSessions,
    ToggleSidebar,
    SidebarShown(bool),
    DismissError,
    SignIn,
    SignOut,
}

#[derive(Debug)]
pub enum AppCmd {
    /// Sessions for `user`, loaded at startup or after an identity change.
    SessionsLoaded {
        user: Option<User>,
        loaded: LoadedSessions,
    },
    SignInFailed(String),
    Stream(StreamUpdate),
}

/// Services that can be opened before the window is shown.
struct Services {
    engine: ConversationEngine,
    persistence: Persistence,
    identity: Option<Arc<dyn IdentityProvider>>,
}

#[relm4::component(pub, async)]
impl AsyncComponent for App {
    type Init = ();
    type Input = AppMsg;
    type Output = ();
    type CommandOutput = AppCmd;

    view! {
        adw::ApplicationWindow {
            set_title: Some(config::APP_NAME),
            set_default_width: 1000,
            set_default_height: 720,
            set_width_request: 360,
            set_height_request: 480,

            #[local_ref]
            toolbar -> adw::ToolbarView {},
        }
    }

    async fn init(
        _init: Self::Init,
        root: Self::Root,
        sender: AsyncComponentSender<Self>,
    ) -> AsyncComponentParts<Self> {
        let header = Header::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                HeaderOutput::ToggleSidebar => AppMsg::ToggleSidebar,
                HeaderOutput::NewChat => AppMsg::NewChat,
            });

        let sidebar = Sidebar::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                SidebarOutput::SessionSelected(id) => AppMsg::SessionSelected(id),
                SidebarOutput::DeleteSession(id) => AppMsg::DeleteSession(id),
                SidebarOutput::ClearAll => AppMsg::ClearAllSessions,
                SidebarOutput::SignIn => AppMsg::SignIn,
                SidebarOutput::SignOut => AppMsg::SignOut,
            });

        let chat_view = ChatView::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                ChatViewOutput::SendMessage(text) => AppMsg::SendMessage(text),
                ChatViewOutput::RegenerateMessage(msg_id) => AppMsg::RegenerateMessage(msg_id),
            });

        let services = Self::open_services(AppConfig::from_env()).await;
        let persistence = services.persistence.clone();
        let identity = services.identity.clone();

        // Storage writes run one batch at a time, in the order they were planned
        let (writes, mut pending) = mpsc::unbounded_channel::<Vec<PersistOp>>();
        let writer = persistence.clone();
        sender.command(move |_, _| {
            Box::pin(async move {
                while let Some(ops) = pending.recv().await {
                    writer.apply(ops).await;
                }
            })
        });

        let banner = adw::Banner::new("");
        banner.set_button_label(Some("Dismiss"));
        let sender_dismiss = sender.input_sender().clone();
        banner.connect_button_clicked(move |_| {
            let _ = sender_dismiss.send(AppMsg::DismissError);
        });

        let split_view = adw::OverlaySplitView::new();
        split_view.set_hexpand(true);
        split_view.set_vexpand(true);
        split_view.set_min_sidebar_width(240.0);
        split_view.set_max_sidebar_width(300.0);
        split_view.set_sidebar(Some(sidebar.widget()));
        split_view.set_content(Some(chat_view.widget()));
        header.emit(HeaderMsg::SetSidebarVisible(split_view.shows_sidebar()));

        let toolbar = adw::ToolbarView::new();
        toolbar.add_top_bar(header.widget());
        toolbar.add_top_bar(&banner);
        toolbar.set_content(Some(&split_view));

        let model = App {
            controller: ChatController::new(services.engine, services.persistence),
            identity: services.identity,
            writes,
            initialized: false,
            header,
            sidebar,
            chat_view,
            split_view: split_view.clone(),
            banner: banner.clone(),
        };

        let widgets = view_output!();

        let sender_shown = sender.input_sender().clone();
        split_view.connect_show_sidebar_notify(move |view| {
            let _ = sender_shown.send(AppMsg::SidebarShown(view.shows_sidebar()));
        });

        let breakpoint = adw::Breakpoint::new(
            adw::BreakpointCondition::parse("max-width: 720px")
                .expect("Invalid breakpoint condition"),
        );
        breakpoint.add_setter(&split_view, "collapsed", Some(&true.to_value()));
        root.add_breakpoint(breakpoint);

        let app = relm4::main_adw_application();
        let sender_new = sender.input_sender().clone();
        let new_chat_action = gio::SimpleAction::new("new-chat", None);
        new_chat_action.connect_activate(move |_, _| {
            let _ = sender_new.send(AppMsg::NewChat);
        });
        app.add_action(&new_chat_action);
        app.set_accels_for_action("app.new-chat", &["<Control>n"]);

        // Restore the previous sign-in, then load the matching sessions
        sender.command(move |out, _| {
            Box::pin(async move {
                let user = match &identity {
                    Some(identity) => match identity.restore().await {
                        Ok(user) => user,
                        Err(e) => {
                            tracing::warn!("Could not restore sign-in: {}", e);
                            None
                        }
                    },
                    None => None,
                };
                let loaded = persistence.load_for(user.as_ref()).await;
                let _ = out.send(AppCmd::SessionsLoaded { user, loaded });
            })
        });

        model.refresh();
        AsyncComponentParts { model, widgets }
    }

    async fn update(
        &mut self,
        msg: Self::Input,
        sender: AsyncComponentSender<Self>,
        _root: &Self::Root,
    ) {
        match msg {
            AppMsg::SendMessage(text) => {
                if !self.initialized {
                    return;
                }
                match self.controller.send_message(&text, &mut RandomSelector) {
                    SendOutcome::Dispatched(job) => self.dispatch(job, &sender),
                    SendOutcome::Unavailable => {
                        tracing::warn!("Message not sent, AI service is unavailable");
                    }
                    SendOutcome::Ignored | SendOutcome::Moderated => {}
                }
            }
            AppMsg::RegenerateMessage(message_id) => {
                match self.controller.regenerate(&message_id) {
                    RegenerateOutcome::Dispatched(job) => self.dispatch(job, &sender),
                    RegenerateOutcome::Rejected => {}
                }
            }
            AppMsg::NewChat => {
                self.controller.start_new_session();
                self.close_sidebar_if_collapsed();
            }
            AppMsg::SessionSelected(id) => {
                self.controller.select_session(&id);
                self.close_sidebar_if_collapsed();
            }
            AppMsg::DeleteSession(id) => {
                self.controller.delete_session(&id);
            }
            AppMsg::ClearAllSessions => {
                self.controller.clear_sessions();
            }
            AppMsg::ToggleSidebar => {
                self.split_view
                    .set_show_sidebar(!self.split_view.shows_sidebar());
            }
            AppMsg::SidebarShown(shown) => {
                self.header.emit(HeaderMsg::SetSidebarVisible(shown));
            }
            AppMsg::DismissError => {
                self.controller.dismiss_error();
            }
            AppMsg::SignIn => {
                let Some(identity) = self.identity.clone() else {
                    tracing::warn!("Sign-in requested but cloud sync is not configured");
                    return;
                };
                let persistence = self.controller.persistence().clone();
                sender.command(move |out, _| {
                    Box::pin(async move {
                        match identity.sign_in().await {
                            Ok(user) => {
                                let loaded = persistence.load_for(Some(&user)).await;
                                let _ = out.send(AppCmd::SessionsLoaded {
                                    user: Some(user),
                                    loaded,
                                });
                            }
                            Err(e) => {
                                let _ = out.send(AppCmd::SignInFailed(e.to_string()));
                            }
                        }
                    })
                });
            }
            AppMsg::SignOut => {
                self.controller.sign_out_requested();
                let identity = self.identity.clone();
                let persistence = self.controller.persistence().clone();
                sender.command(move |out, _| {
                    Box::pin(async move {
                        if let Some(identity) = identity {
                            if let Err(e) = identity.sign_out().await {
                                tracing::error!("Sign-out failed: {}", e);
                            }
                        }
                        let loaded = persistence.load_for(None).await;
                        let _ = out.send(AppCmd::SessionsLoaded { user: None, loaded });
                    })
                });
            }
        }
        self.flush_writes();
        self.refresh();
    }

    async fn update_cmd(
        &mut self,
        msg: Self::CommandOutput,
        _sender: AsyncComponentSender<Self>,
        _root: &Self::Root,
    ) {
        match msg {
            AppCmd::SessionsLoaded { user, loaded } => {
                tracing::info!(
                    "Loaded {} chats for {}",
                    loaded.sessions.len(),
                    user.as_ref().map(User::label).unwrap_or("local profile")
                );
                self.controller.set_user(user);
                self.controller.apply_loaded_sessions(loaded);
                self.initialized = true;
            }
            AppCmd::SignInFailed(error) => {
                tracing::error!("Sign-in failed: {}", error);
            }
            AppCmd::Stream(update) => {
                if !self.controller.apply_stream_update(update) {
                    return;
                }
            }
        }
        self.flush_writes();
        self.refresh();
    }
}

impl App {
    async fn open_services(config: AppConfig) -> Services {
        let database = match Database::new().await {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::error!("Local storage unavailable, chats will not be saved: {:#}", e);
                None
            }
        };

        let keyring = match KeyringService::new().await {
            Ok(keyring) => Some(keyring),
            Err(e) => {
                tracing::warn!("Keyring unavailable: {:#}", e);
                None
            }
        };

        let api_key = match (config.api_key, &keyring) {
            (Some(key), _) => Some(key),
            (None, Some(keyring)) => match keyring.retrieve(Secret::GeminiApiKey).await {
                Ok(key) => key,
                Err(e) => {
                    tracing::error!("Failed to read API key from keyring: {:#}", e);
                    None
                }
            },
            (None, None) => None,
        };

        let engine = match api_key {
            Some(key) => {
                tracing::info!("Using model {}", config.model);
                ConversationEngine::configured(Arc::new(GeminiProvider::new()), key, config.model)
            }
            None => {
                tracing::error!("AI API Key not configured, AI features are disabled");
                ConversationEngine::unavailable("API key not configured")
            }
        };

        let (identity, remote) = match config.firebase {
            Some(firebase) => {
                let identity: Arc<dyn IdentityProvider> =
                    Arc::new(FirebaseIdentity::new(
                        firebase.api_key,
                        config.google_oauth,
                        keyring,
                    ));
                let remote: Arc<dyn DocumentStore> =
                    Arc::new(FirestoreStore::new(firebase.project_id, identity.clone()));
                (Some(identity), Some(remote))
            }
            None => (None, None),
        };

        Services {
            engine,
            persistence: Persistence::new(database.map(LocalStore::new), remote),
            identity,
        }
    }

    fn dispatch(&self, job: StreamJob, sender: &AsyncComponentSender<Self>) {
        sender.command(move |out, _| {
            Box::pin(async move {
                run_streaming(job, |update| {
                    let _ = out.send(AppCmd::Stream(update));
                })
                .await;
            })
        });
    }

    fn flush_writes(&mut self) {
        let ops = self.controller.take_writes();
        if ops.is_empty() {
            return;
        }
        if self.writes.send(ops).is_err() {
            tracing::error!("Storage writer stopped, changes were not saved");
        }
    }

    fn close_sidebar_if_collapsed(&self) {
        if self.split_view.is_collapsed() {
            self.split_view.set_show_sidebar(false);
        }
    }

    /// Push controller state to the child components.
    fn refresh(&self) {
        let store = self.controller.store();

        let sessions = store.sessions().iter().map(SessionSummary::from).collect();
        self.sidebar.emit(SidebarMsg::SetSessions {
            sessions,
            active_id: store.active_id().map(str::to_string),
        });
        self.sidebar.emit(SidebarMsg::SetUser {
            label: self.controller.user().map(|u| u.label().to_string()),
            auth_available: self.identity.is_some(),
        });

        self.chat_view.emit(ChatViewMsg::Sync {
            messages: self.controller.visible_messages(),
            loading: self.controller.is_loading()
                || self.controller.is_reloading()
                || !self.initialized,
        });

        match self.controller.error() {
            Some(error) => {
                self.banner.set_title(error);
                self.banner.set_revealed(true);
            }
            None => self.banner.set_revealed(false),
        }
    }
}
