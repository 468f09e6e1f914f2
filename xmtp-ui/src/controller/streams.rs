//! Stream lifecycle controllers: global all-messages, conversations, and
//! per-conversation message streams.
//!
//! All three share the same shape: `start` is available from `idle`, `stop`
//! and `listen` only while live. `listen` may be called repeatedly — every
//! registered handler sees every inbound item.

use std::fmt;
use std::future::Future;

use crate::bridge::{Bridge, ListenerId};
use crate::error::{Error, Result};
use crate::session::Stores;
use crate::state::AsyncState;
use crate::types::{Conversation, Message, conversation_key};

macro_rules! stream_state_accessors {
    () => {
        /// Whether the stream has not been started.
        #[must_use]
        pub fn is_idle(&self) -> bool {
            self.state().is_idle()
        }

        /// Whether a start is in flight.
        #[must_use]
        pub fn is_pending(&self) -> bool {
            self.state().is_pending()
        }

        /// Whether the stream is live.
        #[must_use]
        pub fn is_success(&self) -> bool {
            self.state().is_success()
        }

        /// Whether the last operation failed.
        #[must_use]
        pub fn is_error(&self) -> bool {
            self.state().is_error()
        }

        /// The preserved error, when in the error state.
        #[must_use]
        pub fn error(&self) -> Option<Error> {
            self.state().error().cloned()
        }
    };
}

/// Controller for the global all-messages stream of one identity.
pub struct MessageStreamController {
    bridge: Bridge,
    stores: Stores,
    address: String,
}

impl fmt::Debug for MessageStreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStreamController")
            .field("address", &self.address)
            .field("state", &self.state().id())
            .finish_non_exhaustive()
    }
}

impl MessageStreamController {
    pub(crate) fn new(bridge: Bridge, stores: Stores, address: String) -> Self {
        Self {
            bridge,
            stores,
            address,
        }
    }

    /// Current stream lifecycle state.
    #[must_use]
    pub fn state(&self) -> AsyncState<()> {
        self.stores.all_messages_stream.get(&self.address)
    }

    stream_state_accessors!();

    /// The start operation — available only from `idle`.
    pub fn start(&self) -> Option<impl Future<Output = Result<bool>> + Send + '_> {
        self.is_idle()
            .then(|| async move { self.bridge.start_streaming_all_messages().await })
    }

    /// The stop operation — available only while live.
    pub fn stop(&self) -> Option<impl Future<Output = Result<()>> + Send + '_> {
        self.is_success()
            .then(|| async move { self.bridge.stop_streaming_all_messages().await })
    }

    /// Register a message handler — available only while live.
    pub fn listen<F>(&self, handler: F) -> Option<impl Future<Output = Result<ListenerId>> + Send + '_>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.is_success().then(move || async move {
            self.bridge.listen_to_streaming_all_messages(handler).await
        })
    }
}

/// Controller for the new-conversations stream of one identity.
pub struct ConversationsStreamController {
    bridge: Bridge,
    stores: Stores,
    address: String,
}

impl fmt::Debug for ConversationsStreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationsStreamController")
            .field("address", &self.address)
            .field("state", &self.state().id())
            .finish_non_exhaustive()
    }
}

impl ConversationsStreamController {
    pub(crate) fn new(bridge: Bridge, stores: Stores, address: String) -> Self {
        Self {
            bridge,
            stores,
            address,
        }
    }

    /// Current stream lifecycle state.
    #[must_use]
    pub fn state(&self) -> AsyncState<()> {
        self.stores.conversations_stream.get(&self.address)
    }

    stream_state_accessors!();

    /// The start operation — available only from `idle`.
    pub fn start(&self) -> Option<impl Future<Output = Result<bool>> + Send + '_> {
        self.is_idle()
            .then(|| async move { self.bridge.start_streaming_conversations().await })
    }

    /// The stop operation — available only while live.
    pub fn stop(&self) -> Option<impl Future<Output = Result<()>> + Send + '_> {
        self.is_success()
            .then(|| async move { self.bridge.stop_streaming_conversations().await })
    }

    /// Register a conversation handler — available only while live.
    pub fn listen<F>(&self, handler: F) -> Option<impl Future<Output = Result<ListenerId>> + Send + '_>
    where
        F: Fn(Conversation) + Send + Sync + 'static,
    {
        self.is_success().then(move || async move {
            self.bridge
                .listen_to_streaming_conversations(handler)
                .await
        })
    }
}

/// Controller for a single conversation's message stream.
pub struct ConversationStreamController {
    bridge: Bridge,
    stores: Stores,
    address: String,
    conversation: Conversation,
}

impl fmt::Debug for ConversationStreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationStreamController")
            .field("address", &self.address)
            .field("conversation", &conversation_key(&self.conversation))
            .field("state", &self.state().id())
            .finish_non_exhaustive()
    }
}

impl ConversationStreamController {
    pub(crate) fn new(
        bridge: Bridge,
        stores: Stores,
        address: String,
        conversation: Conversation,
    ) -> Self {
        Self {
            bridge,
            stores,
            address,
            conversation,
        }
    }

    fn key(&self) -> String {
        format!(
            "{}-{}",
            self.address,
            conversation_key(&self.conversation)
        )
    }

    /// Current stream lifecycle state.
    #[must_use]
    pub fn state(&self) -> AsyncState<()> {
        self.stores.conversation_streams.get(&self.key())
    }

    stream_state_accessors!();

    /// The start operation — available only from `idle`.
    pub fn start(&self) -> Option<impl Future<Output = Result<bool>> + Send + '_> {
        self.is_idle().then(|| async move {
            self.bridge
                .start_streaming_messages(&self.conversation)
                .await
        })
    }

    /// The stop operation — available only while live.
    pub fn stop(&self) -> Option<impl Future<Output = Result<()>> + Send + '_> {
        self.is_success().then(|| async move {
            self.bridge
                .stop_streaming_messages(&self.conversation)
                .await
        })
    }

    /// Register a message handler — available only while live.
    pub fn listen<F>(&self, handler: F) -> Option<impl Future<Output = Result<ListenerId>> + Send + '_>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.is_success().then(move || async move {
            self.bridge
                .listen_to_streaming_messages(&self.conversation, handler)
                .await
        })
    }
}
