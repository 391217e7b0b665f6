pub mod chat;
pub mod controller;
pub mod database;
pub mod engine;
pub mod firestore;
pub mod identity;
pub mod keyring;
pub mod local_store;
pub mod moderation;
pub mod oauth;
pub mod persistence;
pub mod session_store;

pub use controller::{ChatController, RegenerateOutcome, SendOutcome};
pub use database::Database;
pub use keyring::KeyringService;
