//! Per-identity proxy to the worker task.
//!
//! All operations are marshaled as worker requests with oneshot replies; errors
//! thrown on the worker side surface as rejected calls. Callback handlers
//! never cross the boundary: `listen_to_*` registers the closure locally
//! under a generated id and ships only the id — the worker emits
//! `(id, payload)` events back, and the dispatch task invokes the locally
//! held closure.
//!
//! There is deliberately no timeout or retry on any call: a hung service
//! operation leaves the corresponding state `pending` indefinitely. Callers
//! needing deadlines can wrap bridge calls in `tokio::time::timeout`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::service::{XmtpService, random_id};
use crate::session::Stores;
use crate::types::{
    ClientHandle, ClientOptions, Conversation, ListMessagesOptions, Message, Wallet,
};
use crate::worker::{Request, Signal, StoreScope, StreamEvent, Worker};

/// Identifier of a handler registered through a `listen_to_*` call.
pub type ListenerId = String;

/// A locally held stream handler, invoked by the dispatch task.
#[derive(Clone)]
enum Handler {
    Message(Arc<dyn Fn(Message) + Send + Sync>),
    Conversation(Arc<dyn Fn(Conversation) + Send + Sync>),
}

/// Proxy to one identity's worker. Cloning is cheap; every clone talks to
/// the same worker.
#[derive(Clone)]
pub struct Bridge {
    requests: mpsc::UnboundedSender<Request>,
    handlers: Arc<Mutex<HashMap<ListenerId, Handler>>>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("closed", &self.requests.is_closed())
            .finish()
    }
}

impl Bridge {
    /// Spawn a worker around `service` plus the signal-dispatch task that
    /// projects worker store transitions into the UI-side `stores`.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn spawn(address: &str, service: Box<dyn XmtpService>, stores: &Stores) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(Worker::new(address, service, signal_tx).run(request_rx));

        let handlers: Arc<Mutex<HashMap<ListenerId, Handler>>> = Arc::default();
        tokio::spawn(dispatch_signals(
            signal_rx,
            stores.clone(),
            Arc::clone(&handlers),
        ));

        Self {
            requests: request_tx,
            handlers,
        }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(make(reply_tx))
            .map_err(|_| Error::BridgeClosed)?;
        reply_rx.await.map_err(|_| Error::BridgeClosed)?
    }

    /// Start the protocol client for this identity.
    pub async fn start_client(
        &self,
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
    ) -> Result<ClientHandle> {
        self.call(|reply| Request::StartClient {
            wallet,
            opts,
            reply,
        })
        .await
    }

    /// Stop the protocol client, terminating every live stream with it.
    pub async fn stop_client(&self) -> Result<bool> {
        self.call(|reply| Request::StopClient { reply }).await
    }

    /// Describe the live client, optionally with exported key material.
    pub async fn fetch_client(&self, include_export: bool) -> Result<ClientHandle> {
        self.call(|reply| Request::FetchClient {
            include_export,
            reply,
        })
        .await
    }

    /// All conversations known to the client.
    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        self.call(|reply| Request::FetchConversations { reply })
            .await
    }

    /// A page of messages for one conversation.
    pub async fn fetch_messages(
        &self,
        conversation: &Conversation,
        opts: &ListMessagesOptions,
    ) -> Result<Vec<Message>> {
        let conversation = conversation.clone();
        let opts = *opts;
        self.call(|reply| Request::FetchMessages {
            conversation,
            opts,
            reply,
        })
        .await
    }

    /// Whether a peer address is reachable on the protocol network.
    pub async fn fetch_peer_on_network(&self, peer_address: &str) -> Result<bool> {
        let peer_address = peer_address.to_owned();
        self.call(|reply| Request::FetchPeerOnNetwork {
            peer_address,
            reply,
        })
        .await
    }

    /// Send a message into a conversation.
    pub async fn send_message(
        &self,
        conversation: &Conversation,
        content: serde_json::Value,
    ) -> Result<Message> {
        let conversation = conversation.clone();
        self.call(|reply| Request::SendMessage {
            conversation,
            content,
            reply,
        })
        .await
    }

    /// Start streaming one conversation's messages.
    pub async fn start_streaming_messages(&self, conversation: &Conversation) -> Result<bool> {
        let conversation = conversation.clone();
        self.call(|reply| Request::StartStreamingMessages {
            conversation,
            reply,
        })
        .await
    }

    /// Stop a per-conversation message stream.
    pub async fn stop_streaming_messages(&self, conversation: &Conversation) -> Result<()> {
        let conversation = conversation.clone();
        self.call(|reply| Request::StopStreamingMessages {
            conversation,
            reply,
        })
        .await
    }

    /// Register a handler on a live per-conversation stream.
    pub async fn listen_to_streaming_messages(
        &self,
        conversation: &Conversation,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        let id = self.register(Handler::Message(Arc::new(handler)))?;
        let conversation = conversation.clone();
        let handler_id = id.clone();
        let result = self
            .call(|reply| Request::ListenToStreamingMessages {
                conversation,
                handler: handler_id,
                reply,
            })
            .await;
        self.revoke_on_error(&id, result)
    }

    /// Start streaming newly created conversations.
    pub async fn start_streaming_conversations(&self) -> Result<bool> {
        self.call(|reply| Request::StartStreamingConversations { reply })
            .await
    }

    /// Stop the conversations stream.
    pub async fn stop_streaming_conversations(&self) -> Result<()> {
        self.call(|reply| Request::StopStreamingConversations { reply })
            .await
    }

    /// Register a handler on the live conversations stream.
    pub async fn listen_to_streaming_conversations(
        &self,
        handler: impl Fn(Conversation) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        let id = self.register(Handler::Conversation(Arc::new(handler)))?;
        let handler_id = id.clone();
        let result = self
            .call(|reply| Request::ListenToStreamingConversations {
                handler: handler_id,
                reply,
            })
            .await;
        self.revoke_on_error(&id, result)
    }

    /// Start streaming all inbound messages across conversations.
    pub async fn start_streaming_all_messages(&self) -> Result<bool> {
        self.call(|reply| Request::StartStreamingAllMessages { reply })
            .await
    }

    /// Stop the all-messages stream.
    pub async fn stop_streaming_all_messages(&self) -> Result<()> {
        self.call(|reply| Request::StopStreamingAllMessages { reply })
            .await
    }

    /// Register a handler on the live all-messages stream.
    pub async fn listen_to_streaming_all_messages(
        &self,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) -> Result<ListenerId> {
        let id = self.register(Handler::Message(Arc::new(handler)))?;
        let handler_id = id.clone();
        let result = self
            .call(|reply| Request::ListenToStreamingAllMessages {
                handler: handler_id,
                reply,
            })
            .await;
        self.revoke_on_error(&id, result)
    }

    /// Revoke a previously registered handler on both sides of the bridge.
    pub async fn remove_listener(&self, id: &str) -> Result<()> {
        self.handlers
            .lock()
            .expect("bridge handlers lock")
            .remove(id);
        let handler = id.to_owned();
        self.call(|reply| Request::RemoveListener { handler, reply })
            .await
    }

    fn register(&self, handler: Handler) -> Result<ListenerId> {
        let id = random_id()?;
        self.handlers
            .lock()
            .expect("bridge handlers lock")
            .insert(id.clone(), handler);
        Ok(id)
    }

    /// Drop the local handler again when the worker rejected the listen, so
    /// repeated failed `listen` calls cannot grow the registry.
    fn revoke_on_error(&self, id: &str, result: Result<ListenerId>) -> Result<ListenerId> {
        if result.is_err() {
            self.handlers
                .lock()
                .expect("bridge handlers lock")
                .remove(id);
        }
        result
    }
}

/// Apply worker signals: store transitions into the UI-side mirrors, stream
/// events into locally registered handlers.
async fn dispatch_signals(
    mut rx: mpsc::UnboundedReceiver<Signal>,
    stores: Stores,
    handlers: Arc<Mutex<HashMap<ListenerId, Handler>>>,
) {
    while let Some(signal) = rx.recv().await {
        match signal {
            Signal::Store { scope, key, state } => {
                let store = match scope {
                    StoreScope::Client => &stores.client,
                    StoreScope::AllMessagesStream => &stores.all_messages_stream,
                    StoreScope::ConversationsStream => &stores.conversations_stream,
                    StoreScope::ConversationStream => &stores.conversation_streams,
                };
                store.set(&key, state.into_state());
            }
            Signal::Emit { handler, event } => {
                let callback = handlers
                    .lock()
                    .expect("bridge handlers lock")
                    .get(&handler)
                    .cloned();
                match (callback, event) {
                    (Some(Handler::Message(f)), StreamEvent::Message(message)) => f(message),
                    (Some(Handler::Conversation(f)), StreamEvent::Conversation(conversation)) => {
                        f(conversation);
                    }
                    _ => {}
                }
            }
        }
    }
}
