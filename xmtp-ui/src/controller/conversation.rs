//! Composite controller for a single conversation.
//!
//! Composes the client lifecycle, the per-conversation stream, history
//! fetching, the peer reachability check, and sending into one contract a
//! UI can drive with minimal plumbing. A background driver task watches the
//! client store and, once the client is live, triggers the initial fetch,
//! auto-starts the stream, and checks the peer — unless the corresponding
//! option disables it.
//!
//! Fetched history, live stream items, and send echoes all pass through
//! [`insert_messages_if_new`], so the visible list never contains duplicate
//! ids regardless of source.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::Bridge;
use crate::controller::ClientController;
use crate::error::{Error, Result};
use crate::reconcile::{insert_messages_if_new, next_page_options};
use crate::session::Stores;
use crate::state::AsyncState;
use crate::store::SubscriberId;
use crate::types::{ClientOptions, Conversation, Message, Wallet, conversation_key};

/// Policy switches for [`ConversationController`].
#[derive(Debug, Clone)]
pub struct ConversationOptions {
    /// Options used when starting the client.
    pub client: ClientOptions,
    /// Fetch initial history once the client is live. Defaults to `true`.
    pub fetch: bool,
    /// Auto-start the conversation stream once the client is live.
    /// Defaults to `true`.
    pub stream: bool,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            client: ClientOptions::default(),
            fetch: true,
            stream: true,
        }
    }
}

/// The composed per-conversation contract: login, fetch, stream, send, and
/// the reconciled message list.
pub struct ConversationController {
    client: ClientController,
    bridge: Bridge,
    stores: Stores,
    address: String,
    conversation: Conversation,
    opts: ConversationOptions,
    in_flight_sends: Arc<AtomicUsize>,
    send_error: Arc<Mutex<Option<Error>>>,
    client_subscription: SubscriberId,
    driver: JoinHandle<()>,
}

impl fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationController")
            .field("address", &self.address)
            .field("conversation", &conversation_key(&self.conversation))
            .finish_non_exhaustive()
    }
}

impl ConversationController {
    pub(crate) fn spawn(
        bridge: Bridge,
        stores: Stores,
        address: String,
        wallet: Option<Arc<dyn Wallet>>,
        conversation: Conversation,
        opts: ConversationOptions,
    ) -> Self {
        let client = ClientController::new(
            bridge.clone(),
            stores.clone(),
            address.clone(),
            wallet,
            opts.client.clone(),
        );

        let (poke_tx, poke_rx) = mpsc::unbounded_channel();
        let client_subscription = stores.client.subscribe({
            let address = address.clone();
            move |key, _| {
                if key == address {
                    let _ = poke_tx.send(());
                }
            }
        });

        let driver = tokio::spawn(drive(
            bridge.clone(),
            stores.clone(),
            address.clone(),
            conversation.clone(),
            opts.clone(),
            poke_rx,
        ));

        Self {
            client,
            bridge,
            stores,
            address,
            conversation,
            opts,
            in_flight_sends: Arc::new(AtomicUsize::new(0)),
            send_error: Arc::new(Mutex::new(None)),
            client_subscription,
            driver,
        }
    }

    fn messages_key(&self) -> String {
        format!(
            "{}-{}",
            self.address,
            conversation_key(&self.conversation)
        )
    }

    fn peer_key(&self) -> String {
        format!(
            "{}-{}",
            self.opts.client.env.as_str(),
            self.conversation.peer_address
        )
    }

    /// The underlying client lifecycle controller.
    #[must_use]
    pub fn client(&self) -> &ClientController {
        &self.client
    }

    /// The conversation this controller is bound to.
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// The reconciled, descending-by-`sent` message list.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages_state().data().cloned().unwrap_or_default()
    }

    /// Full state of the message list.
    #[must_use]
    pub fn messages_state(&self) -> AsyncState<Vec<Message>> {
        self.stores.messages.get(&self.messages_key())
    }

    /// Whether the message list is populated.
    #[must_use]
    pub fn is_messages_success(&self) -> bool {
        self.messages_state().is_success()
    }

    /// Whether a fetch-more is in flight.
    #[must_use]
    pub fn is_messages_fetching(&self) -> bool {
        self.messages_state().is_fetching()
    }

    /// Whether loading the message list failed.
    #[must_use]
    pub fn is_messages_error(&self) -> bool {
        self.messages_state().is_error()
    }

    /// The preserved message list error.
    #[must_use]
    pub fn messages_error(&self) -> Option<Error> {
        self.messages_state().error().cloned()
    }

    /// Lifecycle state of the conversation stream.
    #[must_use]
    pub fn streaming_state(&self) -> AsyncState<()> {
        self.stores.conversation_streams.get(&self.messages_key())
    }

    /// Whether the conversation stream is live.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming_state().is_success()
    }

    /// Reachability state of the peer.
    #[must_use]
    pub fn peer_on_network_state(&self) -> AsyncState<bool> {
        self.stores.peer_on_network.get(&self.peer_key())
    }

    /// Whether the peer is reachable, once known.
    #[must_use]
    pub fn is_peer_on_network(&self) -> Option<bool> {
        self.peer_on_network_state().data().copied()
    }

    /// Whether any send is currently in flight.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.in_flight_sends.load(Ordering::SeqCst) > 0
    }

    /// The error of the most recent failed send, cleared by a later
    /// successful one.
    #[must_use]
    pub fn send_error(&self) -> Option<Error> {
        self.send_error.lock().expect("send error lock").clone()
    }

    /// The fetch-more operation — available only when the list is loaded
    /// and no fetch-more is already in flight.
    ///
    /// Moves the list through success → fetching → success, merging the
    /// next page (cursor at the oldest loaded message) into place.
    pub fn fetch_more(&self) -> Option<impl Future<Output = Result<()>> + Send + '_> {
        self.is_messages_success().then(|| async move {
            let key = self.messages_key();
            let store = &self.stores.messages;
            store.update(&key, |prev| match prev {
                AsyncState::Success(data) => AsyncState::Fetching(data),
                other => other,
            });
            let loaded = store.get(&key).data().cloned().unwrap_or_default();
            match self
                .bridge
                .fetch_messages(&self.conversation, &next_page_options(&loaded))
                .await
            {
                Ok(page) => {
                    store.update(&key, move |prev| match prev {
                        AsyncState::Fetching(data) => {
                            AsyncState::Success(insert_messages_if_new(&data, &page))
                        }
                        other => other,
                    });
                    Ok(())
                }
                Err(e) => {
                    let stored = e.clone();
                    store.update(&key, move |prev| match prev {
                        AsyncState::Fetching(_) => AsyncState::Error(stored),
                        other => other,
                    });
                    Err(e)
                }
            }
        })
    }

    /// The send operation — available only once the peer is confirmed
    /// reachable and the client is live. Sending to an address that has
    /// never used the protocol fails fast instead of attempting I/O.
    ///
    /// The network's echo of the sent message is merged into the visible
    /// list through the same deduplicating reconciliation as everything
    /// else.
    pub fn send(
        &self,
        content: serde_json::Value,
    ) -> Option<impl Future<Output = Result<Message>> + Send + '_> {
        let peer_confirmed = self.is_peer_on_network() == Some(true);
        let client_live = self.client.is_success();
        (peer_confirmed && client_live).then(move || async move {
            self.in_flight_sends.fetch_add(1, Ordering::SeqCst);
            let result = self
                .bridge
                .send_message(&self.conversation, content)
                .await;
            self.in_flight_sends.fetch_sub(1, Ordering::SeqCst);
            match result {
                Ok(sent) => {
                    let key = self.messages_key();
                    let echo = sent.clone();
                    self.stores.messages.update(&key, move |prev| match prev {
                        AsyncState::Success(data) => AsyncState::Success(insert_messages_if_new(
                            &data,
                            std::slice::from_ref(&echo),
                        )),
                        AsyncState::Fetching(data) => AsyncState::Fetching(
                            insert_messages_if_new(&data, std::slice::from_ref(&echo)),
                        ),
                        other => other,
                    });
                    *self.send_error.lock().expect("send error lock") = None;
                    Ok(sent)
                }
                Err(e) => {
                    *self.send_error.lock().expect("send error lock") = Some(e.clone());
                    Err(e)
                }
            }
        })
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.stores.client.unsubscribe(self.client_subscription);
        self.driver.abort();
    }
}

/// Driver loop: re-evaluate the mount policies after every client store
/// transition for this address.
async fn drive(
    bridge: Bridge,
    stores: Stores,
    address: String,
    conversation: Conversation,
    opts: ConversationOptions,
    mut poke: mpsc::UnboundedReceiver<()>,
) {
    loop {
        step(&bridge, &stores, &address, &conversation, &opts).await;
        if poke.recv().await.is_none() {
            break;
        }
        // Coalesce transitions that piled up while stepping.
        while poke.try_recv().is_ok() {}
    }
}

async fn step(
    bridge: &Bridge,
    stores: &Stores,
    address: &str,
    conversation: &Conversation,
    opts: &ConversationOptions,
) {
    if !stores.client.get(address).is_success() {
        return;
    }
    let messages_key = format!("{}-{}", address, conversation_key(conversation));
    let peer_key = format!(
        "{}-{}",
        opts.client.env.as_str(),
        conversation.peer_address
    );

    if opts.fetch && stores.messages.get(&messages_key).is_idle() {
        initial_fetch(bridge, stores, &messages_key, conversation).await;
    }
    if opts.stream && stores.conversation_streams.get(&messages_key).is_idle() {
        start_stream(bridge, stores, &messages_key, conversation).await;
    }
    if stores.peer_on_network.get(&peer_key).is_idle() {
        check_peer(bridge, stores, &peer_key, &conversation.peer_address).await;
    }
}

async fn initial_fetch(
    bridge: &Bridge,
    stores: &Stores,
    messages_key: &str,
    conversation: &Conversation,
) {
    stores.messages.update(messages_key, |_| AsyncState::Pending);
    match bridge
        .fetch_messages(conversation, &next_page_options(&[]))
        .await
    {
        Ok(page) => stores.messages.update(messages_key, move |prev| {
            let existing = prev.data().cloned().unwrap_or_default();
            AsyncState::Success(insert_messages_if_new(&existing, &page))
        }),
        Err(e) => stores
            .messages
            .update(messages_key, move |_| AsyncState::Error(e)),
    }
}

async fn start_stream(
    bridge: &Bridge,
    stores: &Stores,
    messages_key: &str,
    conversation: &Conversation,
) {
    // A rejected start leaves the mirror in error; nothing more to do here.
    if bridge.start_streaming_messages(conversation).await.is_err() {
        return;
    }
    let store = stores.messages.clone();
    let key = messages_key.to_owned();
    let _ = bridge
        .listen_to_streaming_messages(conversation, move |message| {
            store.update(&key, |prev| match prev {
                AsyncState::Error(e) => AsyncState::Error(e),
                prev => {
                    let existing = prev.data().cloned().unwrap_or_default();
                    AsyncState::Success(insert_messages_if_new(
                        &existing,
                        std::slice::from_ref(&message),
                    ))
                }
            });
        })
        .await;
}

async fn check_peer(bridge: &Bridge, stores: &Stores, peer_key: &str, peer_address: &str) {
    stores
        .peer_on_network
        .update(peer_key, |_| AsyncState::Pending);
    match bridge.fetch_peer_on_network(peer_address).await {
        Ok(reachable) => stores
            .peer_on_network
            .update(peer_key, move |_| AsyncState::Success(reachable)),
        Err(e) => stores
            .peer_on_network
            .update(peer_key, move |_| AsyncState::Error(e)),
    }
}
