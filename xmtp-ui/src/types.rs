//! Data model: network environment, client options and handles,
//! conversations, messages, previews, identity keys, and the wallet trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// XMTP network environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    /// Local development node.
    Local,
    /// Shared development environment.
    Dev,
    /// Production environment.
    #[default]
    Production,
}

impl Env {
    /// Stable lowercase name, used in identity keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for starting a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Target network environment.
    pub env: Env,
    /// Hex-encoded exported key material. When set, a client can start
    /// without a wallet.
    pub private_key_override: Option<String>,
}

/// A started client, as visible to UI code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHandle {
    /// The client's wallet address.
    pub address: String,
    /// The environment the client is connected to.
    pub env: Env,
    /// Exportable key material for reuse in a later session.
    pub export: Option<String>,
}

/// Sort direction for message listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Oldest first.
    Ascending,
    /// Newest first.
    #[default]
    Descending,
}

/// Options for fetching a page of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMessagesOptions {
    /// Maximum number of messages to return.
    pub limit: Option<usize>,
    /// Sort direction of the returned page. Defaults to descending.
    pub direction: Option<SortDirection>,
    /// Only messages sent at or after this timestamp (ms).
    pub start_time: Option<i64>,
    /// Only messages sent at or before this timestamp (ms).
    pub end_time: Option<i64>,
}

/// Optional context distinguishing conversations with the same peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Application-chosen conversation identifier.
    pub conversation_id: String,
    /// Application-defined metadata.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A peer-to-peer conversation, identified by peer address plus optional
/// context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// The peer's wallet address.
    pub peer_address: String,
    /// Optional context id + metadata.
    #[serde(default)]
    pub context: Option<ConversationContext>,
}

impl Conversation {
    /// A context-free conversation with the given peer.
    #[must_use]
    pub fn with_peer(peer_address: impl Into<String>) -> Self {
        Self {
            peer_address: peer_address.into(),
            context: None,
        }
    }
}

/// A received or sent message. Immutable once produced by the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol-assigned unique id.
    pub id: String,
    /// The conversation this message belongs to, from the client's
    /// perspective.
    pub conversation: Conversation,
    /// The sender's wallet address.
    pub sender_address: String,
    /// Sent timestamp in milliseconds.
    pub sent: i64,
    /// Opaque decoded content.
    pub content: serde_json::Value,
}

/// A conversation paired with its most recent message, for inbox listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    /// The conversation being previewed.
    pub conversation: Conversation,
    /// Its most recent known message.
    pub preview: Message,
}

/// Identity key of a conversation: peer address plus the optional context
/// id. Two conversations with the same peer and the same (or both-absent)
/// context id are the same logical conversation.
#[must_use]
pub fn conversation_key(conversation: &Conversation) -> String {
    match &conversation.context {
        Some(ctx) => format!("{}-{}", conversation.peer_address, ctx.conversation_id),
        None => format!("{}-", conversation.peer_address),
    }
}

/// Identity key of a preview; previews reconcile per conversation.
#[must_use]
pub fn preview_key(preview: &Preview) -> String {
    conversation_key(&preview.conversation)
}

/// A wallet capable of signing messages. The binding layer never inspects
/// key material; it only needs an address and a signature.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The wallet's address.
    fn address(&self) -> String;

    /// Resolve the wallet's address asynchronously. Defaults to
    /// [`address`](Self::address).
    async fn get_address(&self) -> Result<String> {
        Ok(self.address())
    }

    /// Sign a human-readable message, returning a hex-encoded signature.
    async fn sign_message(&self, message: &str) -> Result<String>;
}
