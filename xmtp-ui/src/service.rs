//! The protocol SDK surface consumed by the worker.
//!
//! The real messaging SDK (conversation creation, encoding, transport,
//! identity) lives behind [`XmtpService`]; the binding layer only depends on
//! this trait. [`crate::testkit`] provides a deterministic in-memory
//! implementation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::{
    ClientHandle, ClientOptions, Conversation, ListMessagesOptions, Message, Wallet,
};

/// Generate a random hex identifier (handler ids, message ids).
pub(crate) fn random_id() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes).map_err(|e| Error::Service(format!("rng: {e}")))?;
    Ok(hex::encode(bytes))
}

/// A real-time event source backed by an internal channel.
///
/// Yields events via [`next`](Self::next) until [`close`](Self::close) is
/// called or every [`SourceHandle`] is dropped. Closing ends any in-flight
/// iteration immediately; buffered events are discarded.
pub struct EventSource<T> {
    rx: mpsc::UnboundedReceiver<T>,
    closed: bool,
}

impl<T> EventSource<T> {
    /// Create a connected producer/consumer pair.
    #[must_use]
    pub fn channel() -> (SourceHandle<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SourceHandle { tx }, Self { rx, closed: false })
    }

    /// The next event, or `None` once the source has ended.
    pub async fn next(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Terminate the source. Subsequent [`next`](Self::next) calls return
    /// `None` and producers observe the closure.
    pub fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }
}

impl<T> Drop for EventSource<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("closed", &self.closed)
            .finish()
    }
}

/// Producer half of an [`EventSource`].
pub struct SourceHandle<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for SourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for SourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> SourceHandle<T> {
    /// Emit an event. Returns `false` once the consumer has closed.
    pub fn emit(&self, event: T) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the consumer side has been closed or dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The opaque remote surface of the messaging protocol SDK.
///
/// One service instance backs one worker (one identity). Every `stream_*`
/// constructor hands back a fresh [`EventSource`]; resource bookkeeping
/// (one live client, one live stream per kind and key) is the worker's
/// responsibility, not the service's.
#[async_trait]
pub trait XmtpService: Send {
    /// Create the protocol client. Fails when neither a wallet nor a key
    /// override can establish an identity.
    async fn start_client(
        &mut self,
        wallet: Option<Arc<dyn Wallet>>,
        opts: &ClientOptions,
    ) -> Result<ClientHandle>;

    /// Tear down the protocol client.
    async fn stop_client(&mut self) -> Result<bool>;

    /// Describe the live client, optionally including exported key material.
    async fn fetch_client(&mut self, include_export: bool) -> Result<ClientHandle>;

    /// All conversations known to the client.
    async fn fetch_conversations(&mut self) -> Result<Vec<Conversation>>;

    /// A page of messages for one conversation, in the requested order.
    async fn fetch_messages(
        &mut self,
        conversation: &Conversation,
        opts: &ListMessagesOptions,
    ) -> Result<Vec<Message>>;

    /// Whether a peer address is reachable on the protocol network.
    async fn fetch_peer_on_network(&mut self, peer_address: &str) -> Result<bool>;

    /// Send a message, returning the network's echo of it.
    async fn send_message(
        &mut self,
        conversation: &Conversation,
        content: serde_json::Value,
    ) -> Result<Message>;

    /// Stream messages for a single conversation.
    async fn stream_messages(&mut self, conversation: &Conversation)
    -> Result<EventSource<Message>>;

    /// Stream newly created conversations.
    async fn stream_conversations(&mut self) -> Result<EventSource<Conversation>>;

    /// Stream all inbound messages across conversations.
    async fn stream_all_messages(&mut self) -> Result<EventSource<Message>>;
}
