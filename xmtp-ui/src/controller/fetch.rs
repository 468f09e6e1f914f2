//! Fetch controllers: no durable resource, each call runs
//! idle → pending → success/error around a single remote operation.
//!
//! History and conversation fetchers keep their results in a controller-
//! private store; the peer-on-network controller shares the session-wide
//! store so composite controllers observe the same answer.

use std::fmt;

use crate::bridge::Bridge;
use crate::error::{Error, Result};
use crate::state::AsyncState;
use crate::store::Store;
use crate::types::{
    Conversation, Env, ListMessagesOptions, Message, conversation_key,
};

/// Fetches pages of message history for conversations of one identity.
pub struct FetchMessagesController {
    bridge: Bridge,
    store: Store<Vec<Message>>,
    address: String,
}

impl fmt::Debug for FetchMessagesController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchMessagesController")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl FetchMessagesController {
    pub(crate) fn new(bridge: Bridge, address: String) -> Self {
        Self {
            bridge,
            store: Store::new(),
            address,
        }
    }

    fn key(&self, conversation: &Conversation) -> String {
        format!("{}-{}", self.address, conversation_key(conversation))
    }

    /// Fetch state for one conversation.
    #[must_use]
    pub fn state(&self, conversation: &Conversation) -> AsyncState<Vec<Message>> {
        self.store.get(&self.key(conversation))
    }

    /// The last fetched page for one conversation; empty when none.
    #[must_use]
    pub fn messages(&self, conversation: &Conversation) -> Vec<Message> {
        self.state(conversation).data().cloned().unwrap_or_default()
    }

    /// The preserved error for one conversation's last fetch.
    #[must_use]
    pub fn error(&self, conversation: &Conversation) -> Option<Error> {
        self.state(conversation).error().cloned()
    }

    /// Fetch a page, driving the per-conversation state through
    /// pending → success/error.
    pub async fn fetch(
        &self,
        conversation: &Conversation,
        opts: &ListMessagesOptions,
    ) -> Result<Vec<Message>> {
        let key = self.key(conversation);
        self.store.update(&key, |_| AsyncState::Pending);
        match self.bridge.fetch_messages(conversation, opts).await {
            Ok(page) => {
                let stored = page.clone();
                self.store.update(&key, move |_| AsyncState::Success(stored));
                Ok(page)
            }
            Err(e) => {
                let stored = e.clone();
                self.store.update(&key, move |_| AsyncState::Error(stored));
                Err(e)
            }
        }
    }
}

/// Fetches the full conversation list of one identity.
pub struct FetchConversationsController {
    bridge: Bridge,
    store: Store<Vec<Conversation>>,
    address: String,
}

impl fmt::Debug for FetchConversationsController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchConversationsController")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl FetchConversationsController {
    pub(crate) fn new(bridge: Bridge, address: String) -> Self {
        Self {
            bridge,
            store: Store::new(),
            address,
        }
    }

    /// Current fetch state.
    #[must_use]
    pub fn state(&self) -> AsyncState<Vec<Conversation>> {
        self.store.get(&self.address)
    }

    /// The last fetched conversation list; empty when none.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().data().cloned().unwrap_or_default()
    }

    /// The preserved error of the last fetch.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.state().error().cloned()
    }

    /// Fetch the conversation list. The protocol has no pagination here;
    /// paging, if needed, is the caller's concern.
    pub async fn fetch(&self) -> Result<Vec<Conversation>> {
        self.store.update(&self.address, |_| AsyncState::Pending);
        match self.bridge.fetch_conversations().await {
            Ok(conversations) => {
                let stored = conversations.clone();
                self.store
                    .update(&self.address, move |_| AsyncState::Success(stored));
                Ok(conversations)
            }
            Err(e) => {
                let stored = e.clone();
                self.store
                    .update(&self.address, move |_| AsyncState::Error(stored));
                Err(e)
            }
        }
    }
}

/// Checks protocol-level reachability of peer addresses.
///
/// Results are keyed by `env-peer` in the shared session store, so a
/// composite controller asking about the same peer sees the same answer.
pub struct FetchPeerOnNetworkController {
    bridge: Bridge,
    store: Store<bool>,
    env: Env,
}

impl fmt::Debug for FetchPeerOnNetworkController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchPeerOnNetworkController")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl FetchPeerOnNetworkController {
    pub(crate) fn new(bridge: Bridge, store: Store<bool>, env: Env) -> Self {
        Self { bridge, store, env }
    }

    fn key(&self, peer_address: &str) -> String {
        format!("{}-{}", self.env.as_str(), peer_address)
    }

    /// Reachability state for one peer.
    #[must_use]
    pub fn state(&self, peer_address: &str) -> AsyncState<bool> {
        self.store.get(&self.key(peer_address))
    }

    /// The last known answer for one peer, if any.
    #[must_use]
    pub fn is_on_network(&self, peer_address: &str) -> Option<bool> {
        self.state(peer_address).data().copied()
    }

    /// Check a peer, driving its state through pending → success/error.
    pub async fn fetch(&self, peer_address: &str) -> Result<bool> {
        let key = self.key(peer_address);
        self.store.update(&key, |_| AsyncState::Pending);
        match self.bridge.fetch_peer_on_network(peer_address).await {
            Ok(reachable) => {
                self.store
                    .update(&key, move |_| AsyncState::Success(reachable));
                Ok(reachable)
            }
            Err(e) => {
                let stored = e.clone();
                self.store.update(&key, move |_| AsyncState::Error(stored));
                Err(e)
            }
        }
    }
}
