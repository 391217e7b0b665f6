pub mod message;
pub mod session;
pub mod user;

pub use message::{Message, Sender};
pub use session::ChatSession;
pub use user::User;
