use std::time::Duration;

use chrono::Local;
use gtk::prelude::*;
use relm4::prelude::*;

use crate::models::{Message, Sender};

const COPY_FEEDBACK: Duration = Duration::from_secs(2);

pub struct MessageWidgetInit {
    pub message: Message,
    pub can_regenerate: bool,
}

pub struct MessageWidget {
    pub message: Message,
    pub can_regenerate: bool,
    bubble: gtk::Box,
    text_label: gtk::Label,
    time_label: gtk::Label,
    action_bar: gtk::Box,
    copy_btn: gtk::Button,
    regen_btn: gtk::Button,
    message_row: gtk::Box,
    hovered: bool,
}

#[derive(Debug)]
pub enum MessageWidgetMsg {
    /// Replace the rendered message, e.g. when a fragment arrives.
    Update(Message, bool),
    RequestCopy,
    CopyFeedbackElapsed,
    SetHovered(bool),
}

#[derive(Debug)]
pub enum MessageWidgetOutput {
    Regenerate(String), // message_id
    Copy(String),       // text
}

#[relm4::factory(pub)]
impl FactoryComponent for MessageWidget {
    type Init = MessageWidgetInit;
    type Input = MessageWidgetMsg;
    type Output = MessageWidgetOutput;
    type CommandOutput = ();
    type ParentWidget = gtk::Box;

    view! {
        gtk::Box {
            set_orientation: gtk::Orientation::Vertical,
            set_spacing: 0,
        }
    }

    fn init_model(init: Self::Init, _index: &DynamicIndex, _sender: FactorySender<Self>) -> Self {
        let bubble = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(4)
            .build();

        let text_label = gtk::Label::builder()
            .halign(gtk::Align::Start)
            .xalign(0.0)
            .wrap(true)
            .wrap_mode(gtk::pango::WrapMode::WordChar)
            .selectable(true)
            .margin_start(8)
            .margin_end(8)
            .margin_top(4)
            .build();

        let time_label = gtk::Label::builder()
            .halign(gtk::Align::End)
            .margin_start(8)
            .margin_end(8)
            .margin_bottom(4)
            .build();
        time_label.add_css_class("caption");
        time_label.add_css_class("dim-label");
        time_label.add_css_class("message-timestamp");

        let action_bar = gtk::Box::builder()
            .orientation(gtk::Orientation::Horizontal)
            .spacing(4)
            .halign(gtk::Align::Start)
            .margin_top(2)
            .visible(false)
            .build();
        action_bar.add_css_class("message-actions");

        let copy_btn = gtk::Button::builder()
            .icon_name("edit-copy-symbolic")
            .tooltip_text("Copy")
            .build();
        copy_btn.add_css_class("flat");
        copy_btn.add_css_class("circular");

        let regen_btn = gtk::Button::builder()
            .icon_name("view-refresh-symbolic")
            .tooltip_text("Regenerate")
            .build();
        regen_btn.add_css_class("flat");
        regen_btn.add_css_class("circular");

        let is_user = init.message.sender == Sender::User;
        let message_row = gtk::Box::builder()
            .orientation(gtk::Orientation::Vertical)
            .spacing(0)
            .margin_top(4)
            .margin_bottom(4)
            .margin_start(12)
            .margin_end(12)
            .halign(if is_user {
                gtk::Align::End
            } else {
                gtk::Align::Start
            })
            .build();

        Self {
            message: init.message,
            can_regenerate: init.can_regenerate,
            bubble,
            text_label,
            time_label,
            action_bar,
            copy_btn,
            regen_btn,
            message_row,
            hovered: false,
        }
    }

    fn init_widgets(
        &mut self,
        _index: &DynamicIndex,
        root: Self::Root,
        _returned_widget: &<Self::ParentWidget as relm4::factory::FactoryView>::ReturnedWidget,
        sender: FactorySender<Self>,
    ) -> Self::Widgets {
        self.bubble.add_css_class("card");
        self.bubble.append(&self.text_label);
        self.bubble.append(&self.time_label);

        let sender_copy = sender.input_sender().clone();
        self.copy_btn.connect_clicked(move |_| {
            sender_copy.send(MessageWidgetMsg::RequestCopy).unwrap();
        });
        self.action_bar.append(&self.copy_btn);

        let msg_id = self.message.id.clone();
        let sender_regen = sender.output_sender().clone();
        self.regen_btn.connect_clicked(move |_| {
            let _ = sender_regen.send(MessageWidgetOutput::Regenerate(msg_id.clone()));
        });
        self.action_bar.append(&self.regen_btn);

        self.message_row.append(&self.bubble);
        self.message_row.append(&self.action_bar);

        // Actions appear while the pointer is over the message
        let motion = gtk::EventControllerMotion::new();
        let sender_enter = sender.input_sender().clone();
        motion.connect_enter(move |_, _, _| {
            sender_enter.send(MessageWidgetMsg::SetHovered(true)).unwrap();
        });
        let sender_leave = sender.input_sender().clone();
        motion.connect_leave(move |_| {
            sender_leave.send(MessageWidgetMsg::SetHovered(false)).unwrap();
        });
        self.message_row.add_controller(motion);

        root.append(&self.message_row);
        self.render();

        let widgets = view_output!();
        widgets
    }

    fn update(&mut self, msg: Self::Input, sender: FactorySender<Self>) {
        match msg {
            MessageWidgetMsg::Update(message, can_regenerate) => {
                self.message = message;
                self.can_regenerate = can_regenerate;
                self.render();
            }
            MessageWidgetMsg::RequestCopy => {
                let _ = sender.output(MessageWidgetOutput::Copy(self.message.text.clone()));
                self.copy_btn.set_icon_name("object-select-symbolic");
                self.copy_btn.set_tooltip_text(Some("Copied!"));
                let sender_reset = sender.input_sender().clone();
                glib::timeout_add_local_once(COPY_FEEDBACK, move || {
                    let _ = sender_reset.send(MessageWidgetMsg::CopyFeedbackElapsed);
                });
            }
            MessageWidgetMsg::CopyFeedbackElapsed => {
                self.copy_btn.set_icon_name("edit-copy-symbolic");
                self.copy_btn.set_tooltip_text(Some("Copy"));
            }
            MessageWidgetMsg::SetHovered(hovered) => {
                self.hovered = hovered;
                self.action_bar.set_visible(hovered && self.has_actions());
            }
        }
    }
}

impl MessageWidget {
    /// Copy and regenerate are offered on finished, non-error bot replies.
    fn has_actions(&self) -> bool {
        self.message.sender == Sender::Bot && !self.message.is_error && !self.message.streaming
    }

    fn render(&self) {
        let message = &self.message;

        for class in ["message-bubble-user", "message-bubble-bot", "message-bubble-error"] {
            self.bubble.remove_css_class(class);
        }
        let class = match (message.sender, message.is_error) {
            (_, true) => "message-bubble-error",
            (Sender::User, false) => "message-bubble-user",
            (Sender::Bot, false) => "message-bubble-bot",
        };
        self.bubble.add_css_class(class);

        self.text_label.set_label(&message.text);
        self.time_label.set_label(
            &message
                .timestamp
                .with_timezone(&Local)
                .format("%H:%M")
                .to_string(),
        );

        // An empty placeholder stays hidden until its first fragment
        self.message_row
            .set_visible(!(message.streaming && message.text.is_empty()));

        self.regen_btn.set_visible(self.can_regenerate);
        self.action_bar
            .set_visible(self.hovered && self.has_actions());
    }
}
