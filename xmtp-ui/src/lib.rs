#![doc = include_str!("../README.md")]

pub mod bridge;
pub mod burner;
pub mod controller;
pub mod error;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod state;
pub mod store;
pub mod testkit;
pub mod types;

mod worker;

// Re-export core public API at crate root.
pub use bridge::{Bridge, ListenerId};
pub use controller::{
    ClientController, ConversationController, ConversationOptions, ConversationStreamController,
    ConversationsStreamController, FetchConversationsController, FetchMessagesController,
    FetchPeerOnNetworkController, MessageStreamController, PreviewsController,
};
pub use error::{Error, Result};
pub use service::{EventSource, SourceHandle, XmtpService};
pub use session::{Binding, Session, Stores};
pub use state::{AsyncState, StateId, WireState};
pub use store::{Store, SubscriberId};
pub use types::{
    ClientHandle, ClientOptions, Conversation, ConversationContext, Env, ListMessagesOptions,
    Message, Preview, SortDirection, Wallet, conversation_key, preview_key,
};
