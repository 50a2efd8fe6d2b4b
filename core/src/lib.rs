/// MixChat core - direct-messaging session
///
/// Identity from the session store, message history over HTTP, a per-user
/// streaming connection, optional translation of outbound drafts, and the
/// conversation controller that merges all of it into one ordered sequence.

pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod history;
pub mod identity;
pub mod message;
pub mod realtime;
pub mod session_store;
pub mod translation;

pub use config::Config;
pub use controller::{
    ChatContext, ConversationController, ConversationEvent, ConversationHealth, ConversationState,
};
pub use error::{ChatError, Result};
pub use identity::Identity;
pub use message::{Draft, Message};
