//! Deterministic in-memory protocol service for tests and demos.
//!
//! A [`Network`] is a shared registry of registered addresses, conversation
//! lists, and a message log, with fan-out to live stream taps. Each client
//! gets its own [`InMemoryService`]; messages sent by one client are
//! delivered to both parties' matching streams, rewritten to each side's
//! perspective (your conversation names the *other* participant as peer).
//!
//! Timestamps come from a monotonic per-network counter, so message order
//! is deterministic and strictly increasing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha3::{Digest as _, Keccak256};

use crate::error::{Error, Result};
use crate::service::{EventSource, SourceHandle, XmtpService, random_id};
use crate::types::{
    ClientHandle, ClientOptions, Conversation, ConversationContext, ListMessagesOptions, Message,
    SortDirection, Wallet, conversation_key,
};

struct MessageTap {
    owner: String,
    /// Canonical conversation key, or `None` for an all-messages tap.
    filter: Option<String>,
    handle: SourceHandle<Message>,
}

struct ConversationTap {
    owner: String,
    handle: SourceHandle<Conversation>,
}

#[derive(Default)]
struct NetworkState {
    registered: HashSet<String>,
    /// Per-owner conversation lists, each from the owner's perspective.
    conversations: HashMap<String, Vec<Conversation>>,
    /// Canonical conversation key → sender-perspective messages.
    log: HashMap<String, Vec<Message>>,
    message_taps: Vec<MessageTap>,
    conversation_taps: Vec<ConversationTap>,
    clock: i64,
}

/// A shared in-memory messaging network.
#[derive(Clone, Default)]
pub struct Network {
    state: Arc<Mutex<NetworkState>>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("network lock");
        f.debug_struct("Network")
            .field("registered", &state.registered.len())
            .field("conversations", &state.log.len())
            .finish_non_exhaustive()
    }
}

impl Network {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A service backed by this network, for one client.
    #[must_use]
    pub fn service(&self) -> InMemoryService {
        InMemoryService {
            network: self.clone(),
            client: None,
        }
    }

    /// Re-emit an already delivered message to live streams, simulating a
    /// network-level redelivery. The message log is unchanged.
    pub fn redeliver(&self, message_id: &str) {
        let mut state = self.state.lock().expect("network lock");
        let found = state
            .log
            .values()
            .flatten()
            .find(|m| m.id == message_id)
            .cloned();
        if let Some(message) = found {
            fan_out(&mut state, &message);
        }
    }
}

/// Canonical key for the conversation between two addresses with an
/// optional context id: unordered pair plus the id.
fn canonical_key(a: &str, b: &str, context: Option<&ConversationContext>) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let ctx = context.map_or("", |c| c.conversation_id.as_str());
    format!("{lo}|{hi}|{ctx}")
}

/// Rewrite a sender-perspective message for `owner`'s point of view.
fn from_perspective(owner: &str, stored: &Message) -> Message {
    if stored.sender_address == owner {
        stored.clone()
    } else {
        let mut message = stored.clone();
        message.conversation.peer_address = stored.sender_address.clone();
        message
    }
}

/// Deliver a message to every live tap belonging to either participant.
fn fan_out(state: &mut NetworkState, stored: &Message) {
    let sender = stored.sender_address.as_str();
    let recipient = stored.conversation.peer_address.as_str();
    let key = canonical_key(sender, recipient, stored.conversation.context.as_ref());
    state.message_taps.retain(|tap| !tap.handle.is_closed());
    for tap in &state.message_taps {
        if tap.owner != sender && tap.owner != recipient {
            continue;
        }
        if tap.filter.as_ref().is_some_and(|filter| *filter != key) {
            continue;
        }
        let _ = tap.handle.emit(from_perspective(&tap.owner, stored));
    }
}

/// Record a conversation in `owner`'s list, announcing it to the owner's
/// conversation streams when it is new.
fn ensure_conversation(state: &mut NetworkState, owner: &str, conversation: &Conversation) {
    let list = state.conversations.entry(owner.to_owned()).or_default();
    let key = conversation_key(conversation);
    if list.iter().any(|c| conversation_key(c) == key) {
        return;
    }
    list.push(conversation.clone());
    state.conversation_taps.retain(|tap| !tap.handle.is_closed());
    for tap in &state.conversation_taps {
        if tap.owner == owner {
            let _ = tap.handle.emit(conversation.clone());
        }
    }
}

/// Derive a pseudo address from override key material.
fn derive_address(seed: &str) -> String {
    let hash = Keccak256::digest(seed.as_bytes());
    format!("0x{}", hex::encode(&hash[12..]))
}

/// One client's view of a [`Network`].
pub struct InMemoryService {
    network: Network,
    client: Option<ClientHandle>,
}

impl fmt::Debug for InMemoryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryService")
            .field("client", &self.client.as_ref().map(|c| &c.address))
            .finish_non_exhaustive()
    }
}

impl InMemoryService {
    fn me(&self) -> Result<String> {
        self.client
            .as_ref()
            .map(|c| c.address.clone())
            .ok_or(Error::ClientNotFound)
    }
}

#[async_trait]
impl XmtpService for InMemoryService {
    async fn start_client(
        &mut self,
        wallet: Option<Arc<dyn Wallet>>,
        opts: &ClientOptions,
    ) -> Result<ClientHandle> {
        if self.client.is_some() {
            return Err(Error::ClientAlreadyExists);
        }
        let (address, export) = match wallet {
            Some(wallet) => {
                let address = wallet.get_address().await?;
                // Exercise the signer the way identity creation would.
                let signature = wallet.sign_message("XMTP : Create Identity").await?;
                let digest = Keccak256::digest(signature.as_bytes());
                (address, hex::encode(digest))
            }
            None => {
                let Some(seed) = opts.private_key_override.clone() else {
                    return Err(Error::BadArguments(
                        "either a wallet or a private key override is required".into(),
                    ));
                };
                (derive_address(&seed), seed)
            }
        };
        let handle = ClientHandle {
            address: address.clone(),
            env: opts.env,
            export: Some(export),
        };
        self.network
            .state
            .lock()
            .expect("network lock")
            .registered
            .insert(address.to_lowercase());
        self.client = Some(handle.clone());
        Ok(handle)
    }

    async fn stop_client(&mut self) -> Result<bool> {
        if self.client.take().is_none() {
            return Err(Error::ClientNotFound);
        }
        Ok(true)
    }

    async fn fetch_client(&mut self, include_export: bool) -> Result<ClientHandle> {
        let mut handle = self.client.clone().ok_or(Error::ClientNotFound)?;
        if !include_export {
            handle.export = None;
        }
        Ok(handle)
    }

    async fn fetch_conversations(&mut self) -> Result<Vec<Conversation>> {
        let me = self.me()?;
        Ok(self
            .network
            .state
            .lock()
            .expect("network lock")
            .conversations
            .get(&me)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_messages(
        &mut self,
        conversation: &Conversation,
        opts: &ListMessagesOptions,
    ) -> Result<Vec<Message>> {
        let me = self.me()?;
        let key = canonical_key(
            &me,
            &conversation.peer_address,
            conversation.context.as_ref(),
        );
        let mut messages: Vec<Message> = self
            .network
            .state
            .lock()
            .expect("network lock")
            .log
            .get(&key)
            .map(|log| log.iter().map(|m| from_perspective(&me, m)).collect())
            .unwrap_or_default();

        if let Some(start) = opts.start_time {
            messages.retain(|m| m.sent >= start);
        }
        if let Some(end) = opts.end_time {
            messages.retain(|m| m.sent <= end);
        }
        match opts.direction.unwrap_or_default() {
            SortDirection::Ascending => messages.sort_by_key(|m| m.sent),
            SortDirection::Descending => messages.sort_by_key(|m| std::cmp::Reverse(m.sent)),
        }
        if let Some(limit) = opts.limit {
            messages.truncate(limit);
        }
        Ok(messages)
    }

    async fn fetch_peer_on_network(&mut self, peer_address: &str) -> Result<bool> {
        self.me()?;
        Ok(self
            .network
            .state
            .lock()
            .expect("network lock")
            .registered
            .contains(&peer_address.to_lowercase()))
    }

    async fn send_message(
        &mut self,
        conversation: &Conversation,
        content: serde_json::Value,
    ) -> Result<Message> {
        let me = self.me()?;
        let id = random_id()?;
        let mut state = self.network.state.lock().expect("network lock");
        if !state
            .registered
            .contains(&conversation.peer_address.to_lowercase())
        {
            return Err(Error::Service("peer is not on the network".into()));
        }
        state.clock += 1;
        let message = Message {
            id,
            conversation: conversation.clone(),
            sender_address: me.clone(),
            sent: state.clock,
            content,
        };

        ensure_conversation(&mut state, &me, conversation);
        let peer_view = Conversation {
            peer_address: me.clone(),
            context: conversation.context.clone(),
        };
        ensure_conversation(&mut state, &conversation.peer_address, &peer_view);

        let key = canonical_key(
            &me,
            &conversation.peer_address,
            conversation.context.as_ref(),
        );
        state.log.entry(key).or_default().push(message.clone());
        fan_out(&mut state, &message);
        Ok(message)
    }

    async fn stream_messages(
        &mut self,
        conversation: &Conversation,
    ) -> Result<EventSource<Message>> {
        let me = self.me()?;
        let key = canonical_key(
            &me,
            &conversation.peer_address,
            conversation.context.as_ref(),
        );
        let (handle, source) = EventSource::channel();
        self.network
            .state
            .lock()
            .expect("network lock")
            .message_taps
            .push(MessageTap {
                owner: me,
                filter: Some(key),
                handle,
            });
        Ok(source)
    }

    async fn stream_conversations(&mut self) -> Result<EventSource<Conversation>> {
        let me = self.me()?;
        let (handle, source) = EventSource::channel();
        self.network
            .state
            .lock()
            .expect("network lock")
            .conversation_taps
            .push(ConversationTap { owner: me, handle });
        Ok(source)
    }

    async fn stream_all_messages(&mut self) -> Result<EventSource<Message>> {
        let me = self.me()?;
        let (handle, source) = EventSource::channel();
        self.network
            .state
            .lock()
            .expect("network lock")
            .message_taps
            .push(MessageTap {
                owner: me,
                filter: None,
                handle,
            });
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Env;

    fn opts_with_key(seed: &str) -> ClientOptions {
        ClientOptions {
            env: Env::Production,
            private_key_override: Some(seed.into()),
        }
    }

    async fn started(network: &Network, seed: &str) -> (InMemoryService, String) {
        let mut service = network.service();
        let handle = service
            .start_client(None, &opts_with_key(seed))
            .await
            .expect("start");
        (service, handle.address)
    }

    #[tokio::test]
    async fn registration_makes_a_peer_reachable() {
        let network = Network::new();
        let (mut alice, _) = started(&network, "alice").await;
        let (_bob, bob_address) = started(&network, "bob").await;

        assert!(alice.fetch_peer_on_network(&bob_address).await.expect("check"));
        assert!(!alice.fetch_peer_on_network("0xdead").await.expect("check"));
    }

    #[tokio::test]
    async fn duplicate_client_start_is_rejected() {
        let network = Network::new();
        let (mut alice, _) = started(&network, "alice").await;
        let again = alice.start_client(None, &opts_with_key("alice")).await;
        assert_eq!(again, Err(Error::ClientAlreadyExists));
    }

    #[tokio::test]
    async fn send_delivers_to_both_parties_streams() {
        let network = Network::new();
        let (mut alice, alice_address) = started(&network, "alice").await;
        let (mut bob, bob_address) = started(&network, "bob").await;

        let mut alice_stream = alice.stream_all_messages().await.expect("stream");
        let mut bob_stream = bob.stream_all_messages().await.expect("stream");

        let conversation = Conversation::with_peer(bob_address.clone());
        let sent = alice
            .send_message(&conversation, serde_json::json!("hi bob"))
            .await
            .expect("send");

        let to_bob = bob_stream.next().await.expect("delivered");
        assert_eq!(to_bob.id, sent.id);
        assert_eq!(to_bob.sender_address, alice_address);
        // Bob's perspective names Alice as the peer.
        assert_eq!(to_bob.conversation.peer_address, alice_address);

        let echo = alice_stream.next().await.expect("echo");
        assert_eq!(echo.conversation.peer_address, bob_address);
    }

    #[tokio::test]
    async fn both_parties_learn_the_conversation() {
        let network = Network::new();
        let (mut alice, alice_address) = started(&network, "alice").await;
        let (mut bob, bob_address) = started(&network, "bob").await;

        alice
            .send_message(
                &Conversation::with_peer(bob_address.clone()),
                serde_json::json!("hello"),
            )
            .await
            .expect("send");

        let alices = alice.fetch_conversations().await.expect("list");
        assert_eq!(alices[0].peer_address, bob_address);
        let bobs = bob.fetch_conversations().await.expect("list");
        assert_eq!(bobs[0].peer_address, alice_address);
    }

    #[tokio::test]
    async fn fetch_messages_respects_order_limit_and_cursor() {
        let network = Network::new();
        let (mut alice, _) = started(&network, "alice").await;
        let (_bob, bob_address) = started(&network, "bob").await;
        let conversation = Conversation::with_peer(bob_address);

        for text in ["one", "two", "three"] {
            alice
                .send_message(&conversation, serde_json::json!(text))
                .await
                .expect("send");
        }

        let descending = alice
            .fetch_messages(&conversation, &ListMessagesOptions::default())
            .await
            .expect("fetch");
        assert_eq!(descending.len(), 3);
        assert!(descending[0].sent > descending[2].sent);

        let page = alice
            .fetch_messages(
                &conversation,
                &ListMessagesOptions {
                    limit: Some(1),
                    direction: Some(SortDirection::Descending),
                    ..Default::default()
                },
            )
            .await
            .expect("fetch");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, serde_json::json!("three"));

        let older = alice
            .fetch_messages(
                &conversation,
                &ListMessagesOptions {
                    end_time: Some(descending[1].sent),
                    ..Default::default()
                },
            )
            .await
            .expect("fetch");
        assert_eq!(older.len(), 2);
    }

    #[tokio::test]
    async fn redeliver_replays_without_logging_twice() {
        let network = Network::new();
        let (mut alice, _) = started(&network, "alice").await;
        let (mut bob, bob_address) = started(&network, "bob").await;
        let conversation = Conversation::with_peer(bob_address);

        let mut bob_stream = bob.stream_all_messages().await.expect("stream");
        let sent = alice
            .send_message(&conversation, serde_json::json!("hi"))
            .await
            .expect("send");
        assert_eq!(bob_stream.next().await.expect("first").id, sent.id);

        network.redeliver(&sent.id);
        assert_eq!(bob_stream.next().await.expect("replay").id, sent.id);

        let history = alice
            .fetch_messages(&conversation, &ListMessagesOptions::default())
            .await
            .expect("fetch");
        assert_eq!(history.len(), 1);
    }
}
