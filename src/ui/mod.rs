pub mod chat_view;
pub mod header;
pub mod input_area;
pub mod message_widget;
pub mod sidebar;
