//! Worker task — owns the [`XmtpService`] and all live protocol resources.
//!
//! The bridge sends [`Request`]s; the worker processes them sequentially and
//! answers over per-request reply channels. Lifecycle stores live here and
//! are authoritative: the UI-side stores are pure projections of the
//! [`Signal::Store`] events the worker emits, never locally inferred state.
//! Stream items fan out as [`Signal::Emit`] events carrying handler ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::service::{EventSource, XmtpService};
use crate::state::{AsyncState, StateId, WireState};
use crate::store::Store;
use crate::types::{
    ClientHandle, ClientOptions, Conversation, ListMessagesOptions, Message, Wallet,
    conversation_key,
};

/// Which mirrored store a [`Signal::Store`] event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreScope {
    Client,
    AllMessagesStream,
    ConversationsStream,
    ConversationStream,
}

/// A stream item crossing the bridge.
#[derive(Debug, Clone)]
pub(crate) enum StreamEvent {
    Message(Message),
    Conversation(Conversation),
}

impl From<Message> for StreamEvent {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<Conversation> for StreamEvent {
    fn from(conversation: Conversation) -> Self {
        Self::Conversation(conversation)
    }
}

/// Out-of-band events emitted by the worker toward the bridge.
#[derive(Debug, Clone)]
pub(crate) enum Signal {
    /// A lifecycle store applied a transition; mirror it on the UI side.
    Store {
        scope: StoreScope,
        key: String,
        state: WireState,
    },
    /// A stream item for a registered handler.
    Emit { handler: String, event: StreamEvent },
}

type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests marshaled from the bridge to the worker.
pub(crate) enum Request {
    StartClient {
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
        reply: Reply<ClientHandle>,
    },
    StopClient {
        reply: Reply<bool>,
    },
    FetchClient {
        include_export: bool,
        reply: Reply<ClientHandle>,
    },
    FetchConversations {
        reply: Reply<Vec<Conversation>>,
    },
    FetchMessages {
        conversation: Conversation,
        opts: ListMessagesOptions,
        reply: Reply<Vec<Message>>,
    },
    FetchPeerOnNetwork {
        peer_address: String,
        reply: Reply<bool>,
    },
    SendMessage {
        conversation: Conversation,
        content: serde_json::Value,
        reply: Reply<Message>,
    },
    StartStreamingMessages {
        conversation: Conversation,
        reply: Reply<bool>,
    },
    StopStreamingMessages {
        conversation: Conversation,
        reply: Reply<()>,
    },
    ListenToStreamingMessages {
        conversation: Conversation,
        handler: String,
        reply: Reply<String>,
    },
    StartStreamingConversations {
        reply: Reply<bool>,
    },
    StopStreamingConversations {
        reply: Reply<()>,
    },
    ListenToStreamingConversations {
        handler: String,
        reply: Reply<String>,
    },
    StartStreamingAllMessages {
        reply: Reply<bool>,
    },
    StopStreamingAllMessages {
        reply: Reply<()>,
    },
    ListenToStreamingAllMessages {
        handler: String,
        reply: Reply<String>,
    },
    RemoveListener {
        handler: String,
        reply: Reply<()>,
    },
}

/// A live stream: its registered handler ids and the forwarder task reading
/// the underlying [`EventSource`].
struct LiveStream {
    handlers: Arc<Mutex<Vec<String>>>,
    stop: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

impl LiveStream {
    /// Spawn a forwarder that fans each item out to every registered
    /// handler, in arrival order, until stopped or the source ends.
    ///
    /// The select is biased toward the stop signal: once `stop` fires, items
    /// still buffered in the source are dropped, so handlers are never
    /// invoked after a stop has been acknowledged.
    fn spawn<T>(mut source: EventSource<T>, signal: mpsc::UnboundedSender<Signal>) -> Self
    where
        T: Into<StreamEvent> + Send + 'static,
    {
        let handlers: Arc<Mutex<Vec<String>>> = Arc::default();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let fan_out = Arc::clone(&handlers);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    item = source.next() => {
                        let Some(item) = item else { break };
                        let event: StreamEvent = item.into();
                        let ids = fan_out.lock().expect("stream handlers lock").clone();
                        for handler in ids {
                            if signal
                                .send(Signal::Emit { handler, event: event.clone() })
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
            }
            source.close();
        });
        Self {
            handlers,
            stop: Some(stop_tx),
            _task: task,
        }
    }

    fn add_handler(&self, id: String) {
        self.handlers
            .lock()
            .expect("stream handlers lock")
            .push(id);
    }

    fn remove_handler(&self, id: &str) {
        self.handlers
            .lock()
            .expect("stream handlers lock")
            .retain(|h| h != id);
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Worker state — the service, the live resources, and the authoritative
/// lifecycle stores.
pub(crate) struct Worker {
    address: String,
    service: Box<dyn XmtpService>,
    signal: mpsc::UnboundedSender<Signal>,
    client: Store<()>,
    all_messages: Store<()>,
    conversations: Store<()>,
    conversation_streams: Store<()>,
    live_all_messages: Option<LiveStream>,
    live_conversations: Option<LiveStream>,
    live_conversation_streams: HashMap<String, LiveStream>,
}

/// Build a store whose applied transitions are forwarded across the bridge.
fn mirrored_store(scope: StoreScope, signal: &mpsc::UnboundedSender<Signal>) -> Store<()> {
    let store = Store::new();
    let tx = signal.clone();
    store.subscribe(move |key, wire| {
        let _ = tx.send(Signal::Store {
            scope,
            key: key.to_owned(),
            state: wire.clone(),
        });
    });
    store
}

impl Worker {
    pub(crate) fn new(
        address: &str,
        service: Box<dyn XmtpService>,
        signal: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self {
            address: address.to_owned(),
            client: mirrored_store(StoreScope::Client, &signal),
            all_messages: mirrored_store(StoreScope::AllMessagesStream, &signal),
            conversations: mirrored_store(StoreScope::ConversationsStream, &signal),
            conversation_streams: mirrored_store(StoreScope::ConversationStream, &signal),
            live_all_messages: None,
            live_conversations: None,
            live_conversation_streams: HashMap::new(),
            service,
            signal,
        }
    }

    /// Run the request loop until the bridge drops its sender.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Request>) {
        tracing::debug!(address = %self.address, "worker started");
        while let Some(request) = rx.recv().await {
            self.dispatch(request).await;
        }
        self.shutdown_streams();
        tracing::debug!(address = %self.address, "worker stopped");
    }

    async fn dispatch(&mut self, request: Request) {
        match request {
            Request::StartClient {
                wallet,
                opts,
                reply,
            } => {
                let _ = reply.send(self.start_client(wallet, opts).await);
            }
            Request::StopClient { reply } => {
                let _ = reply.send(self.stop_client().await);
            }
            Request::FetchClient {
                include_export,
                reply,
            } => {
                let _ = reply.send(self.fetch_client(include_export).await);
            }
            Request::FetchConversations { reply } => {
                let _ = reply.send(self.fetch_conversations().await);
            }
            Request::FetchMessages {
                conversation,
                opts,
                reply,
            } => {
                let _ = reply.send(self.fetch_messages(&conversation, &opts).await);
            }
            Request::FetchPeerOnNetwork {
                peer_address,
                reply,
            } => {
                let _ = reply.send(self.fetch_peer_on_network(&peer_address).await);
            }
            Request::SendMessage {
                conversation,
                content,
                reply,
            } => {
                let _ = reply.send(self.send_message(&conversation, content).await);
            }
            Request::StartStreamingMessages {
                conversation,
                reply,
            } => {
                let _ = reply.send(self.start_streaming_messages(&conversation).await);
            }
            Request::StopStreamingMessages {
                conversation,
                reply,
            } => {
                let _ = reply.send(self.stop_streaming_messages(&conversation));
            }
            Request::ListenToStreamingMessages {
                conversation,
                handler,
                reply,
            } => {
                let _ = reply.send(self.listen_to_streaming_messages(&conversation, handler));
            }
            Request::StartStreamingConversations { reply } => {
                let _ = reply.send(self.start_streaming_conversations().await);
            }
            Request::StopStreamingConversations { reply } => {
                let _ = reply.send(self.stop_streaming_conversations());
            }
            Request::ListenToStreamingConversations { handler, reply } => {
                let _ = reply.send(self.listen_to_streaming_conversations(handler));
            }
            Request::StartStreamingAllMessages { reply } => {
                let _ = reply.send(self.start_streaming_all_messages().await);
            }
            Request::StopStreamingAllMessages { reply } => {
                let _ = reply.send(self.stop_streaming_all_messages());
            }
            Request::ListenToStreamingAllMessages { handler, reply } => {
                let _ = reply.send(self.listen_to_streaming_all_messages(handler));
            }
            Request::RemoveListener { handler, reply } => {
                let _ = reply.send(self.remove_listener(&handler));
            }
        }
    }

    /// Client `success` is a precondition of every non-client operation.
    fn require_client(&self) -> Result<()> {
        if self.client.get(&self.address).is_success() {
            Ok(())
        } else {
            Err(Error::ClientNotFound)
        }
    }

    fn stream_key(&self, conversation: &Conversation) -> String {
        format!("{}-{}", self.address, conversation_key(conversation))
    }

    async fn start_client(
        &mut self,
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
    ) -> Result<ClientHandle> {
        match self.client.get(&self.address).id() {
            StateId::Idle | StateId::Error => {}
            _ => return Err(Error::ClientAlreadyExists),
        }
        if wallet.is_none() && opts.private_key_override.is_none() {
            return Err(Error::BadArguments(
                "either a wallet or a private key override is required".into(),
            ));
        }
        self.client.set(&self.address, AsyncState::Pending);
        match self.service.start_client(wallet, &opts).await {
            Ok(handle) => {
                self.client.set(&self.address, AsyncState::Success(()));
                tracing::debug!(address = %self.address, "client started");
                Ok(handle)
            }
            Err(e) => {
                self.client
                    .set(&self.address, AsyncState::Error(e.clone()));
                Err(e)
            }
        }
    }

    async fn stop_client(&mut self) -> Result<bool> {
        self.require_client()?;
        // Live streams cannot outlive the client that produced them.
        self.shutdown_streams();
        let result = self.service.stop_client().await;
        self.client.set(&self.address, AsyncState::Idle);
        tracing::debug!(address = %self.address, "client stopped");
        result
    }

    /// Stop every live stream and reset the stream stores to idle.
    fn shutdown_streams(&mut self) {
        self.live_all_messages.take();
        self.live_conversations.take();
        self.live_conversation_streams.clear();
        for key in self.all_messages.keys() {
            self.all_messages.set(&key, AsyncState::Idle);
        }
        for key in self.conversations.keys() {
            self.conversations.set(&key, AsyncState::Idle);
        }
        for key in self.conversation_streams.keys() {
            self.conversation_streams.set(&key, AsyncState::Idle);
        }
    }

    async fn fetch_client(&mut self, include_export: bool) -> Result<ClientHandle> {
        self.require_client()?;
        self.service.fetch_client(include_export).await
    }

    async fn fetch_conversations(&mut self) -> Result<Vec<Conversation>> {
        self.require_client()?;
        self.service.fetch_conversations().await
    }

    async fn fetch_messages(
        &mut self,
        conversation: &Conversation,
        opts: &ListMessagesOptions,
    ) -> Result<Vec<Message>> {
        self.require_client()?;
        self.service.fetch_messages(conversation, opts).await
    }

    async fn fetch_peer_on_network(&mut self, peer_address: &str) -> Result<bool> {
        self.require_client()?;
        self.service.fetch_peer_on_network(peer_address).await
    }

    async fn send_message(
        &mut self,
        conversation: &Conversation,
        content: serde_json::Value,
    ) -> Result<Message> {
        self.require_client()?;
        self.service.send_message(conversation, content).await
    }

    async fn start_streaming_messages(&mut self, conversation: &Conversation) -> Result<bool> {
        self.require_client()?;
        let key = self.stream_key(conversation);
        if !self.conversation_streams.get(&key).is_idle() {
            return Err(Error::StreamAlreadyExists);
        }
        self.conversation_streams.set(&key, AsyncState::Pending);
        match self.service.stream_messages(conversation).await {
            Ok(source) => {
                let live = LiveStream::spawn(source, self.signal.clone());
                self.live_conversation_streams.insert(key.clone(), live);
                self.conversation_streams.set(&key, AsyncState::Success(()));
                Ok(true)
            }
            Err(e) => {
                self.conversation_streams
                    .set(&key, AsyncState::Error(e.clone()));
                Err(e)
            }
        }
    }

    fn stop_streaming_messages(&mut self, conversation: &Conversation) -> Result<()> {
        let key = self.stream_key(conversation);
        if !self.conversation_streams.get(&key).is_success() {
            return Err(Error::StreamNotFound);
        }
        self.live_conversation_streams.remove(&key);
        self.conversation_streams.set(&key, AsyncState::Idle);
        Ok(())
    }

    fn listen_to_streaming_messages(
        &mut self,
        conversation: &Conversation,
        handler: String,
    ) -> Result<String> {
        let key = self.stream_key(conversation);
        if !self.conversation_streams.get(&key).is_success() {
            return Err(Error::StreamNotFound);
        }
        let live = self
            .live_conversation_streams
            .get(&key)
            .ok_or(Error::StreamNotFound)?;
        live.add_handler(handler.clone());
        Ok(handler)
    }

    async fn start_streaming_conversations(&mut self) -> Result<bool> {
        self.require_client()?;
        if !self.conversations.get(&self.address).is_idle() {
            return Err(Error::StreamAlreadyExists);
        }
        self.conversations.set(&self.address, AsyncState::Pending);
        match self.service.stream_conversations().await {
            Ok(source) => {
                self.live_conversations = Some(LiveStream::spawn(source, self.signal.clone()));
                self.conversations
                    .set(&self.address, AsyncState::Success(()));
                Ok(true)
            }
            Err(e) => {
                self.conversations
                    .set(&self.address, AsyncState::Error(e.clone()));
                Err(e)
            }
        }
    }

    fn stop_streaming_conversations(&mut self) -> Result<()> {
        if !self.conversations.get(&self.address).is_success() {
            return Err(Error::StreamNotFound);
        }
        self.live_conversations.take();
        self.conversations.set(&self.address, AsyncState::Idle);
        Ok(())
    }

    fn listen_to_streaming_conversations(&mut self, handler: String) -> Result<String> {
        if !self.conversations.get(&self.address).is_success() {
            return Err(Error::StreamNotFound);
        }
        let live = self
            .live_conversations
            .as_ref()
            .ok_or(Error::StreamNotFound)?;
        live.add_handler(handler.clone());
        Ok(handler)
    }

    async fn start_streaming_all_messages(&mut self) -> Result<bool> {
        self.require_client()?;
        if !self.all_messages.get(&self.address).is_idle() {
            return Err(Error::StreamAlreadyExists);
        }
        self.all_messages.set(&self.address, AsyncState::Pending);
        match self.service.stream_all_messages().await {
            Ok(source) => {
                self.live_all_messages = Some(LiveStream::spawn(source, self.signal.clone()));
                self.all_messages
                    .set(&self.address, AsyncState::Success(()));
                Ok(true)
            }
            Err(e) => {
                self.all_messages
                    .set(&self.address, AsyncState::Error(e.clone()));
                Err(e)
            }
        }
    }

    fn stop_streaming_all_messages(&mut self) -> Result<()> {
        if !self.all_messages.get(&self.address).is_success() {
            return Err(Error::StreamNotFound);
        }
        self.live_all_messages.take();
        self.all_messages.set(&self.address, AsyncState::Idle);
        Ok(())
    }

    fn listen_to_streaming_all_messages(&mut self, handler: String) -> Result<String> {
        if !self.all_messages.get(&self.address).is_success() {
            return Err(Error::StreamNotFound);
        }
        let live = self
            .live_all_messages
            .as_ref()
            .ok_or(Error::StreamNotFound)?;
        live.add_handler(handler.clone());
        Ok(handler)
    }

    /// Best-effort removal across every live stream.
    fn remove_listener(&mut self, handler: &str) -> Result<()> {
        if let Some(live) = &self.live_all_messages {
            live.remove_handler(handler);
        }
        if let Some(live) = &self.live_conversations {
            live.remove_handler(handler);
        }
        for live in self.live_conversation_streams.values() {
            live.remove_handler(handler);
        }
        Ok(())
    }
}
