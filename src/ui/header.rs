use adw::prelude::*;
use relm4::prelude::*;

use crate::config;

pub struct Header {
    sidebar_visible: bool,
}

#[derive(Debug)]
pub enum HeaderMsg {
    SetSidebarVisible(bool),
    ToggleSidebar,
    NewChat,
}

#[derive(Debug)]
pub enum HeaderOutput {
    ToggleSidebar,
    NewChat,
}

#[relm4::component(pub)]
impl Component for Header {
    type Init = ();
    type Input = HeaderMsg;
    type Output = HeaderOutput;
    type CommandOutput = ();

    view! {
        adw::HeaderBar {
            pack_start = &gtk::ToggleButton {
                set_icon_name: "sidebar-show-symbolic",
                set_tooltip_text: Some("Toggle Sidebar"),
                #[watch]
                #[block_signal(toggle_handler)]
                set_active: model.sidebar_visible,
                connect_toggled[sender] => move |_| {
                    sender.input(HeaderMsg::ToggleSidebar);
                } @toggle_handler,
            },

            #[wrap(Some)]
            set_title_widget = &adw::WindowTitle {
                set_title: config::APP_NAME,
            },

            pack_end = &gtk::Button {
                set_tooltip_text: Some("New Chat"),
                #[wrap(Some)]
                set_child = &adw::ButtonContent {
                    set_icon_name: "list-add-symbolic",
                    set_label: "New",
                },
                connect_clicked => HeaderMsg::NewChat,
            },
        }
    }

    fn init(
        _init: Self::Init,
        root: Self::Root,
        sender: ComponentSender<Self>,
    ) -> ComponentParts<Self> {
        let model = Self {
            sidebar_visible: false,
        };
        let widgets = view_output!();
        ComponentParts { model, widgets }
    }

    fn update(&mut self, msg: Self::Input, sender: ComponentSender<Self>, _root: &Self::Root) {
        match msg {
            HeaderMsg::SetSidebarVisible(visible) => {
                self.sidebar_visible = visible;
            }
            HeaderMsg::ToggleSidebar => {
                let _ = sender.output(HeaderOutput::ToggleSidebar);
            }
            HeaderMsg::NewChat => {
                let _ = sender.output(HeaderOutput::NewChat);
            }
        }
    }
}
