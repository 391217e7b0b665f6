use gtk::prelude::*;
use relm4::factory::FactoryVecDeque;
use relm4::prelude::*;

use crate::models::Message;
use crate::services::controller::can_regenerate;
use crate::ui::input_area::{InputArea, InputAreaMsg, InputAreaOutput};
use crate::ui::message_widget::{
    MessageWidget, MessageWidgetInit, MessageWidgetMsg, MessageWidgetOutput,
};

pub struct ChatView {
    messages: FactoryVecDeque<MessageWidget>,
    input_area: Controller<InputArea>,
    loading: bool,
    awaiting_first_fragment: bool,
    scrolled_window: gtk::ScrolledWindow,
}

#[derive(Debug)]
pub enum ChatViewMsg {
    /// Render the given transcript, reusing widgets whose ids still match.
    Sync {
        messages: Vec<Message>,
        loading: bool,
    },
    ScrollToBottom,
    UserSendMessage(String),
    // Forwarded from MessageWidget
    ForwardRegenerate(String), // message_id
    CopyToClipboard(String),
}

#[derive(Debug)]
pub enum ChatViewOutput {
    SendMessage(String),
    RegenerateMessage(String), // message_id
}

#[relm4::component(pub)]
impl Component for ChatView {
    type Init = ();
    type Input = ChatViewMsg;
    type Output = ChatViewOutput;
    type CommandOutput = ();

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Vertical,
            set_vexpand: true,

            #[local_ref]
            scrolled_window -> gtk::ScrolledWindow {
                set_vexpand: true,
                set_hscrollbar_policy: gtk::PolicyType::Never,

                gtk::Box {
                    set_orientation: gtk::Orientation::Vertical,
                    set_spacing: 0,
                    set_margin_top: 8,
                    set_margin_bottom: 8,
                    set_margin_start: 16,
                    set_margin_end: 16,

                    #[local_ref]
                    message_list -> gtk::Box {
                        set_orientation: gtk::Orientation::Vertical,
                        set_spacing: 0,
                    },

                    // Typing indicator
                    gtk::Box {
                        set_orientation: gtk::Orientation::Horizontal,
                        set_halign: gtk::Align::Start,
                        set_margin_start: 12,
                        set_margin_top: 4,
                        set_spacing: 8,
                        #[watch]
                        set_visible: model.loading && model.awaiting_first_fragment,

                        gtk::Spinner {
                            #[watch]
                            set_spinning: model.loading && model.awaiting_first_fragment,
                        },
                        gtk::Label {
                            set_label: "Thinking...",
                            add_css_class: "dim-label",
                        },
                    },
                },
            },

            gtk::Separator {
                set_orientation: gtk::Orientation::Horizontal,
            },

            model.input_area.widget().clone(),
        }
    }

    fn init(
        _init: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let messages = FactoryVecDeque::builder()
            .launch(gtk::Box::default())
            .forward(sender.input_sender(), |output| match output {
                MessageWidgetOutput::Regenerate(msg_id) => ChatViewMsg::ForwardRegenerate(msg_id),
                MessageWidgetOutput::Copy(text) => ChatViewMsg::CopyToClipboard(text),
            });

        let input_area = InputArea::builder()
            .launch(())
            .forward(sender.input_sender(), |output| match output {
                InputAreaOutput::SendMessage(text) => ChatViewMsg::UserSendMessage(text),
            });

        let scrolled_window = gtk::ScrolledWindow::new();

        let model = Self {
            messages,
            input_area,
            loading: false,
            awaiting_first_fragment: false,
            scrolled_window: scrolled_window.clone(),
        };

        let message_list = model.messages.widget();
        let widgets = view_output!();

        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, _root: &Self::Root) {
        match msg {
            ChatViewMsg::Sync { messages, loading } => {
                self.loading = loading;
                self.awaiting_first_fragment = messages
                    .last()
                    .is_some_and(|m| m.streaming && m.text.is_empty());
                self.input_area.emit(InputAreaMsg::SetSending(loading));
                if self.reconcile(messages) {
                    sender.input(ChatViewMsg::ScrollToBottom);
                }
            }
            ChatViewMsg::ScrollToBottom => {
                let adj = self.scrolled_window.vadjustment();
                glib::idle_add_local_once(move || {
                    adj.set_value(adj.upper());
                });
            }
            ChatViewMsg::UserSendMessage(text) => {
                let _ = sender.output(ChatViewOutput::SendMessage(text));
            }
            ChatViewMsg::ForwardRegenerate(msg_id) => {
                let _ = sender.output(ChatViewOutput::RegenerateMessage(msg_id));
            }
            ChatViewMsg::CopyToClipboard(content) => {
                if let Some(display) = gtk::gdk::Display::default() {
                    display.clipboard().set_text(&content);
                }
            }
        }
    }
}

impl ChatView {
    /// Bring the factory in line with `messages`. Returns whether anything changed.
    fn reconcile(&mut self, messages: Vec<Message>) -> bool {
        let flags: Vec<bool> = (0..messages.len())
            .map(|i| can_regenerate(&messages, i))
            .collect();

        let mut guard = self.messages.guard();
        let common = guard
            .iter()
            .zip(messages.iter())
            .take_while(|(widget, message)| widget.message.id == message.id)
            .count();

        let mut changed = false;
        for (i, (message, flag)) in messages.iter().zip(&flags).enumerate().take(common) {
            let stale = guard
                .get(i)
                .is_some_and(|w| w.message != *message || w.can_regenerate != *flag);
            if stale {
                guard.send(i, MessageWidgetMsg::Update(message.clone(), *flag));
                changed = true;
            }
        }

        while guard.len() > common {
            guard.pop_back();
            changed = true;
        }

        for (message, flag) in messages.into_iter().zip(flags).skip(common) {
            guard.push_back(MessageWidgetInit {
                message,
                can_regenerate: flag,
            });
            changed = true;
        }

        changed
    }
}
