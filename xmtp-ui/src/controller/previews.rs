//! Composite inbox controller: one preview per conversation, kept fresh by
//! the global all-messages stream.
//!
//! Once the client is live the driver fetches every conversation, loads each
//! one's single most recent message (`limit 1, descending`), and merges the
//! results into the previews store. The all-messages stream is auto-started
//! and every inbound message becomes a preview candidate, replacing the
//! stored one only when strictly newer. The exposed list is always sorted
//! by recency.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::Bridge;
use crate::controller::ClientController;
use crate::error::Error;
use crate::reconcile::{insert_or_update_previews, sort_by_most_recent_preview};
use crate::session::Stores;
use crate::state::AsyncState;
use crate::store::SubscriberId;
use crate::types::{
    ClientOptions, ListMessagesOptions, Message, Preview, SortDirection, Wallet,
};

/// The composed inbox contract: client lifecycle, preview aggregation, and
/// global streaming state.
pub struct PreviewsController {
    client: ClientController,
    stores: Stores,
    address: String,
    client_subscription: SubscriberId,
    driver: JoinHandle<()>,
}

impl fmt::Debug for PreviewsController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewsController")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PreviewsController {
    pub(crate) fn spawn(
        bridge: Bridge,
        stores: Stores,
        address: String,
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
    ) -> Self {
        let client = ClientController::new(
            bridge.clone(),
            stores.clone(),
            address.clone(),
            wallet,
            opts,
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

        let driver = tokio::spawn(drive(bridge, stores.clone(), address.clone(), poke_rx));

        Self {
            client,
            stores,
            address,
            client_subscription,
            driver,
        }
    }

    /// The underlying client lifecycle controller.
    #[must_use]
    pub fn client(&self) -> &ClientController {
        &self.client
    }

    /// Full state of the preview aggregation.
    #[must_use]
    pub fn previews_state(&self) -> AsyncState<Vec<Preview>> {
        self.stores.previews.get(&self.address)
    }

    /// The previews, sorted most recent first; `None` until loaded.
    #[must_use]
    pub fn previews(&self) -> Option<Vec<Preview>> {
        self.previews_state()
            .data()
            .map(|p| sort_by_most_recent_preview(p))
    }

    /// Whether aggregation has not started.
    #[must_use]
    pub fn is_previews_idle(&self) -> bool {
        self.previews_state().is_idle()
    }

    /// Whether the initial aggregation is in flight.
    #[must_use]
    pub fn is_previews_pending(&self) -> bool {
        self.previews_state().is_pending()
    }

    /// Whether the previews are loaded.
    #[must_use]
    pub fn is_previews_success(&self) -> bool {
        self.previews_state().is_success()
    }

    /// Whether aggregation failed.
    #[must_use]
    pub fn is_previews_error(&self) -> bool {
        self.previews_state().is_error()
    }

    /// The preserved aggregation error.
    #[must_use]
    pub fn previews_error(&self) -> Option<Error> {
        self.previews_state().error().cloned()
    }

    /// Lifecycle state of the global all-messages stream.
    #[must_use]
    pub fn streaming_state(&self) -> AsyncState<()> {
        self.stores.all_messages_stream.get(&self.address)
    }

    /// Whether the global stream is live.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming_state().is_success()
    }
}

impl Drop for PreviewsController {
    fn drop(&mut self) {
        self.stores.client.unsubscribe(self.client_subscription);
        self.driver.abort();
    }
}

async fn drive(
    bridge: Bridge,
    stores: Stores,
    address: String,
    mut poke: mpsc::UnboundedReceiver<()>,
) {
    loop {
        step(&bridge, &stores, &address).await;
        if poke.recv().await.is_none() {
            break;
        }
        while poke.try_recv().is_ok() {}
    }
}

async fn step(bridge: &Bridge, stores: &Stores, address: &str) {
    if !stores.client.get(address).is_success() {
        return;
    }
    if stores.previews.get(address).is_idle() {
        initial_previews(bridge, stores, address).await;
    }
    if stores.all_messages_stream.get(address).is_idle() {
        start_stream(bridge, stores, address).await;
    }
}

/// Fetch every conversation's most recent message and seed the previews.
async fn initial_previews(bridge: &Bridge, stores: &Stores, address: &str) {
    stores.previews.update(address, |prev| {
        if prev.is_idle() {
            AsyncState::Pending
        } else {
            prev
        }
    });

    let conversations = match bridge.fetch_conversations().await {
        Ok(conversations) => conversations,
        Err(e) => {
            stores
                .previews
                .update(address, move |_| AsyncState::Error(e));
            return;
        }
    };

    let most_recent = ListMessagesOptions {
        limit: Some(1),
        direction: Some(SortDirection::Descending),
        ..Default::default()
    };
    let mut fetched = Vec::new();
    for conversation in conversations {
        match bridge.fetch_messages(&conversation, &most_recent).await {
            Ok(page) => {
                // Conversations without a message yet have no preview.
                if let Some(preview) = page.into_iter().next() {
                    fetched.push(Preview {
                        conversation,
                        preview,
                    });
                }
            }
            Err(e) => {
                stores
                    .previews
                    .update(address, move |_| AsyncState::Error(e));
                return;
            }
        }
    }

    stores.previews.update(address, move |prev| match prev {
        AsyncState::Pending => AsyncState::Success(insert_or_update_previews(&[], &fetched)),
        other => other,
    });
}

/// Auto-start the global all-messages stream; every inbound message becomes
/// a preview candidate for its conversation.
async fn start_stream(bridge: &Bridge, stores: &Stores, address: &str) {
    if bridge.start_streaming_all_messages().await.is_err() {
        return;
    }
    let store = stores.previews.clone();
    let key = address.to_owned();
    let _ = bridge
        .listen_to_streaming_all_messages(move |message: Message| {
            let preview = Preview {
                conversation: message.conversation.clone(),
                preview: message,
            };
            store.update(&key, |prev| match prev {
                AsyncState::Success(data) => AsyncState::Success(insert_or_update_previews(
                    &data,
                    std::slice::from_ref(&preview),
                )),
                other => other,
            });
        })
        .await;
}
