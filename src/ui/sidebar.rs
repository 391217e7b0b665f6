use adw::prelude::*;
use relm4::factory::FactoryVecDeque;
use relm4::prelude::*;

use crate::config;
use crate::models::ChatSession;

const UNTITLED: &str = "Untitled Chat";

/// What the sidebar needs to know about one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
}

impl From<&ChatSession> for SessionSummary {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
        }
    }
}

// --- SessionRow factory component ---

#[derive(Debug)]
pub struct SessionRow {
    pub summary: SessionSummary,
}

#[relm4::factory(pub)]
impl FactoryComponent for SessionRow {
    type Init = SessionSummary;
    type Input = ();
    type Output = ();
    type CommandOutput = ();
    type ParentWidget = gtk::ListBox;

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Horizontal,
            set_spacing: 8,
            set_margin_all: 6,

            gtk::Image {
                set_icon_name: Some("chat-bubble-text-symbolic"),
                add_css_class: "dim-label",
            },

            gtk::Label {
                set_label: if self.summary.title.is_empty() {
                    UNTITLED
                } else {
                    self.summary.title.as_str()
                },
                set_halign: gtk::Align::Start,
                set_hexpand: true,
                set_ellipsize: gtk::pango::EllipsizeMode::End,
                set_max_width_chars: 30,
                set_tooltip_text: Some(self.summary.title.as_str()),
            },
        }
    }

    fn init_model(summary: Self::Init, _index: &DynamicIndex, _sender: FactorySender<Self>) -> Self {
        Self { summary }
    }
}

// --- Sidebar component ---

pub struct Sidebar {
    sessions: FactoryVecDeque<SessionRow>,
    active_id: Option<String>,
    user_label: Option<String>,
    auth_available: bool,
}

#[derive(Debug)]
pub enum SidebarMsg {
    SetSessions {
        sessions: Vec<SessionSummary>,
        active_id: Option<String>,
    },
    SetUser {
        label: Option<String>,
        auth_available: bool,
    },
    RowActivated(usize),
    RequestDelete(usize),
    RequestClearAll,
    SignIn,
    SignOut,
}

#[derive(Debug)]
pub enum SidebarOutput {
    SessionSelected(String),
    DeleteSession(String),
    ClearAll,
    SignIn,
    SignOut,
}

#[relm4::component(pub)]
impl Component for Sidebar {
    type Init = ();
    type Input = SidebarMsg;
    type Output = SidebarOutput;
    type CommandOutput = ();

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Vertical,
            set_spacing: 0,
            set_width_request: 260,
            add_css_class: "sidebar",

            gtk::Box {
                set_orientation: gtk::Orientation::Horizontal,
                set_margin_start: 12,
                set_margin_end: 6,
                set_margin_top: 12,
                set_margin_bottom: 4,

                gtk::Label {
                    set_label: "Recent Chats",
                    set_halign: gtk::Align::Start,
                    set_hexpand: true,
                    add_css_class: "heading",
                },

                gtk::Button {
                    set_icon_name: "user-trash-symbolic",
                    set_tooltip_text: Some("Clear All Chats"),
                    add_css_class: "flat",
                    #[watch]
                    set_sensitive: !model.sessions.is_empty(),
                    connect_clicked => SidebarMsg::RequestClearAll,
                },
            },

            gtk::ScrolledWindow {
                set_hscrollbar_policy: gtk::PolicyType::Never,
                set_vexpand: true,

                gtk::Box {
                    set_orientation: gtk::Orientation::Vertical,

                    #[local_ref]
                    session_list -> gtk::ListBox {
                        set_selection_mode: gtk::SelectionMode::Single,
                        add_css_class: "navigation-sidebar",
                    },

                    gtk::Label {
                        set_label: "No recent chats.",
                        set_margin_top: 12,
                        add_css_class: "dim-label",
                        #[watch]
                        set_visible: model.sessions.is_empty(),
                    },
                },
            },

            gtk::Separator {
                set_orientation: gtk::Orientation::Horizontal,
            },

            // Account footer
            gtk::Box {
                set_orientation: gtk::Orientation::Vertical,
                set_spacing: 6,
                set_margin_all: 12,

                gtk::Box {
                    set_orientation: gtk::Orientation::Horizontal,
                    set_spacing: 8,
                    #[watch]
                    set_visible: model.user_label.is_some(),

                    gtk::Image {
                        set_icon_name: Some("avatar-default-symbolic"),
                    },
                    gtk::Label {
                        set_halign: gtk::Align::Start,
                        set_hexpand: true,
                        set_ellipsize: gtk::pango::EllipsizeMode::End,
                        #[watch]
                        set_label: model.user_label.as_deref().unwrap_or_default(),
                    },
                    gtk::Button {
                        set_label: "Sign Out",
                        add_css_class: "flat",
                        connect_clicked => SidebarMsg::SignOut,
                    },
                },

                gtk::Button {
                    set_label: "Join with Google",
                    add_css_class: "suggested-action",
                    add_css_class: "pill",
                    #[watch]
                    set_visible: model.user_label.is_none() && model.auth_available,
                    connect_clicked => SidebarMsg::SignIn,
                },

                gtk::Label {
                    set_label: &format!("{} v{}", config::APP_NAME, config::VERSION),
                    add_css_class: "dim-label",
                    add_css_class: "caption",
                },
            },
        }
    }

    fn init(
        _init: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let sessions = FactoryVecDeque::builder()
            .launch(gtk::ListBox::default())
            .detach();

        let model = Self {
            sessions,
            active_id: None,
            user_label: None,
            auth_available: false,
        };

        let session_list = model.sessions.widget();
        let widgets = view_output!();

        let sender_clone = sender.clone();
        model
            .sessions
            .widget()
            .connect_row_activated(move |_, row| {
                sender_clone.input(SidebarMsg::RowActivated(row.index() as usize));
            });

        // Right-click offers deletion
        let gesture = gtk::GestureClick::new();
        gesture.set_button(3);
        let list = model.sessions.widget().clone();
        let sender_rc = sender.clone();
        gesture.connect_released(move |_, _, _x, y| {
            if let Some(row) = list.row_at_y(y as i32) {
                sender_rc.input(SidebarMsg::RequestDelete(row.index() as usize));
            }
        });
        model.sessions.widget().add_controller(gesture);

        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, root: &Self::Root) {
        match msg {
            SidebarMsg::SetSessions {
                sessions,
                active_id,
            } => {
                let unchanged = self.sessions.len() == sessions.len()
                    && self
                        .sessions
                        .iter()
                        .zip(&sessions)
                        .all(|(row, s)| row.summary == *s);
                if !unchanged {
                    let mut guard = self.sessions.guard();
                    guard.clear();
                    for summary in sessions {
                        guard.push_back(summary);
                    }
                }
                self.active_id = active_id;
                self.highlight_active();
            }
            SidebarMsg::SetUser {
                label,
                auth_available,
            } => {
                self.user_label = label;
                self.auth_available = auth_available;
            }
            SidebarMsg::RowActivated(index) => {
                if let Some(row) = self.sessions.get(index) {
                    let _ = sender.output(SidebarOutput::SessionSelected(row.summary.id.clone()));
                }
            }
            SidebarMsg::RequestDelete(index) => {
                let Some(row) = self.sessions.get(index) else {
                    return;
                };
                let id = row.summary.id.clone();
                let title = if row.summary.title.is_empty() {
                    UNTITLED.to_string()
                } else {
                    row.summary.title.clone()
                };
                let output = sender.output_sender().clone();
                confirm(
                    root,
                    "Delete Chat?",
                    &format!("\"{}\" will be permanently deleted.", title),
                    move || {
                        let _ = output.send(SidebarOutput::DeleteSession(id.clone()));
                    },
                );
            }
            SidebarMsg::RequestClearAll => {
                let output = sender.output_sender().clone();
                confirm(
                    root,
                    "Clear All Chats?",
                    "Every chat in this list will be permanently deleted.",
                    move || {
                        let _ = output.send(SidebarOutput::ClearAll);
                    },
                );
            }
            SidebarMsg::SignIn => {
                let _ = sender.output(SidebarOutput::SignIn);
            }
            SidebarMsg::SignOut => {
                let _ = sender.output(SidebarOutput::SignOut);
            }
        }
    }
}

impl Sidebar {
    fn highlight_active(&self) {
        let list = self.sessions.widget();
        let index = self.active_id.as_deref().and_then(|id| {
            self.sessions
                .iter()
                .position(|row| row.summary.id == id)
        });
        match index.and_then(|i| list.row_at_index(i as i32)) {
            Some(row) => list.select_row(Some(&row)),
            None => list.unselect_all(),
        }
    }
}

/// Ask before a destructive action; `on_confirm` runs only on "Delete".
fn confirm(root: &gtk::Box, heading: &str, body: &str, on_confirm: impl Fn() + 'static) {
    let dialog = adw::AlertDialog::builder()
        .heading(heading)
        .body(body)
        .build();
    dialog.add_response("cancel", "Cancel");
    dialog.add_response("delete", "Delete");
    dialog.set_response_appearance("delete", adw::ResponseAppearance::Destructive);
    dialog.set_default_response(Some("cancel"));
    dialog.set_close_response("cancel");
    dialog.connect_response(None, move |_dialog, response| {
        if response == "delete" {
            on_confirm();
        }
    });

    if let Some(window) = root.root().and_then(|r| r.downcast::<gtk::Window>().ok()) {
        dialog.present(Some(&window));
    }
}
