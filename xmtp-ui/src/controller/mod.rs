//! UI-facing controllers: thin state-gated wrappers over a [`Bridge`] and
//! the session stores.
//!
//! Operations that are illegal in the current state are exposed as `None`
//! rather than as calls that fail, so a UI cannot issue them; the worker
//! remains the authoritative gate either way.
//!
//! [`Bridge`]: crate::bridge::Bridge

mod client;
mod conversation;
mod fetch;
mod previews;
mod streams;

pub use client::ClientController;
pub use conversation::{ConversationController, ConversationOptions};
pub use fetch::{
    FetchConversationsController, FetchMessagesController, FetchPeerOnNetworkController,
};
pub use previews::PreviewsController;
pub use streams::{
    ConversationStreamController, ConversationsStreamController, MessageStreamController,
};
