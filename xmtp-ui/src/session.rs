//! Session: the injectable root object owning the stores, the service
//! factory, and one memoized bridge per identity.
//!
//! Nothing in this crate is a process-wide singleton; host applications
//! construct a `Session` at startup (tests construct one per test) and share
//! it, typically behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::bridge::Bridge;
use crate::controller::{
    ClientController, ConversationController, ConversationOptions, ConversationStreamController,
    ConversationsStreamController, FetchConversationsController, FetchMessagesController,
    FetchPeerOnNetworkController, MessageStreamController, PreviewsController,
};
use crate::service::XmtpService;
use crate::store::Store;
use crate::types::{ClientOptions, Conversation, Env, Message, Preview, Wallet};

/// The UI-side keyed stores, one per concern.
///
/// Lifecycle stores (`client`, the three stream stores) are pure projections
/// of worker-emitted transitions. Data stores (`peer_on_network`,
/// `messages`, `previews`) are populated locally by controllers.
#[derive(Clone, Debug, Default)]
pub struct Stores {
    /// Client lifecycle, keyed by address.
    pub client: Store<()>,
    /// Global all-messages stream lifecycle, keyed by address.
    pub all_messages_stream: Store<()>,
    /// Conversations stream lifecycle, keyed by address.
    pub conversations_stream: Store<()>,
    /// Per-conversation stream lifecycle, keyed by `address-conversation`.
    pub conversation_streams: Store<()>,
    /// Peer reachability, keyed by `env-peer`.
    pub peer_on_network: Store<bool>,
    /// Reconciled message lists, keyed by `address-conversation`.
    pub messages: Store<Vec<Message>>,
    /// Inbox previews, keyed by address.
    pub previews: Store<Vec<Preview>>,
}

impl Stores {
    /// Create a fresh, empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Explicit readiness of a controller: required inputs (wallet, address,
/// conversation) may not exist yet, which is distinct from "errored".
#[derive(Debug)]
pub enum Binding<T> {
    /// A required input is absent; no resource exists and nothing was done.
    NotReady,
    /// The controller is usable.
    Ready(T),
}

impl<T> Binding<T> {
    /// Whether the controller is usable.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The controller, if ready.
    #[must_use]
    pub const fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(c) => Some(c),
            Self::NotReady => None,
        }
    }

    /// Consume into the controller, if ready.
    #[must_use]
    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready(c) => Some(c),
            Self::NotReady => None,
        }
    }
}

type ServiceFactory = dyn Fn(&str) -> Box<dyn XmtpService> + Send + Sync;

/// The root object: stores plus one lazily spawned, memoized [`Bridge`] per
/// identity key.
pub struct Session {
    stores: Stores,
    factory: Box<ServiceFactory>,
    bridges: Mutex<HashMap<String, Bridge>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bridges = self.bridges.lock().expect("bridge map lock");
        f.debug_struct("Session")
            .field("bridges", &bridges.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session. `factory` builds the protocol service backing each
    /// identity's worker — the real SDK in production, an in-memory
    /// [`testkit`](crate::testkit) service in tests.
    pub fn new(factory: impl Fn(&str) -> Box<dyn XmtpService> + Send + Sync + 'static) -> Self {
        Self {
            stores: Stores::new(),
            factory: Box::new(factory),
            bridges: Mutex::new(HashMap::new()),
        }
    }

    /// The session's store bundle.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The bridge for `address`, spawning it on first use. `None` when the
    /// identity key is absent, letting callers short-circuit before any
    /// resource exists.
    ///
    /// Memoization is keyed by the address itself: the same address always
    /// reaches the same worker. Must be called within a tokio runtime.
    pub fn bridge(&self, address: Option<&str>) -> Option<Bridge> {
        let address = address?;
        let mut bridges = self.bridges.lock().expect("bridge map lock");
        let bridge = bridges
            .entry(address.to_owned())
            .or_insert_with(|| Bridge::spawn(address, (self.factory)(address), &self.stores));
        Some(bridge.clone())
    }

    /// Client lifecycle controller. Not ready until an address plus either a
    /// wallet or a key override are available.
    pub fn client(
        &self,
        address: Option<&str>,
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
    ) -> Binding<ClientController> {
        let Some(address) = address else {
            return Binding::NotReady;
        };
        if wallet.is_none() && opts.private_key_override.is_none() {
            return Binding::NotReady;
        }
        let Some(bridge) = self.bridge(Some(address)) else {
            return Binding::NotReady;
        };
        Binding::Ready(ClientController::new(
            bridge,
            self.stores.clone(),
            address.to_owned(),
            wallet,
            opts,
        ))
    }

    /// Global all-messages stream controller.
    pub fn message_stream(&self, address: Option<&str>) -> Binding<MessageStreamController> {
        match self.bridge(address) {
            Some(bridge) => Binding::Ready(MessageStreamController::new(
                bridge,
                self.stores.clone(),
                address.unwrap_or_default().to_owned(),
            )),
            None => Binding::NotReady,
        }
    }

    /// New-conversations stream controller.
    pub fn conversations_stream(
        &self,
        address: Option<&str>,
    ) -> Binding<ConversationsStreamController> {
        match self.bridge(address) {
            Some(bridge) => Binding::Ready(ConversationsStreamController::new(
                bridge,
                self.stores.clone(),
                address.unwrap_or_default().to_owned(),
            )),
            None => Binding::NotReady,
        }
    }

    /// Single-conversation message stream controller.
    pub fn conversation_stream(
        &self,
        address: Option<&str>,
        conversation: Option<&Conversation>,
    ) -> Binding<ConversationStreamController> {
        let (Some(address), Some(conversation)) = (address, conversation) else {
            return Binding::NotReady;
        };
        match self.bridge(Some(address)) {
            Some(bridge) => Binding::Ready(ConversationStreamController::new(
                bridge,
                self.stores.clone(),
                address.to_owned(),
                conversation.clone(),
            )),
            None => Binding::NotReady,
        }
    }

    /// One-shot message history fetcher.
    pub fn fetch_messages(&self, address: Option<&str>) -> Binding<FetchMessagesController> {
        match self.bridge(address) {
            Some(bridge) => Binding::Ready(FetchMessagesController::new(
                bridge,
                address.unwrap_or_default().to_owned(),
            )),
            None => Binding::NotReady,
        }
    }

    /// One-shot conversation list fetcher.
    pub fn fetch_conversations(
        &self,
        address: Option<&str>,
    ) -> Binding<FetchConversationsController> {
        match self.bridge(address) {
            Some(bridge) => Binding::Ready(FetchConversationsController::new(
                bridge,
                address.unwrap_or_default().to_owned(),
            )),
            None => Binding::NotReady,
        }
    }

    /// Peer reachability checker, shared with the composite controllers
    /// through the `peer_on_network` store.
    pub fn fetch_peer_on_network(
        &self,
        address: Option<&str>,
        env: Env,
    ) -> Binding<FetchPeerOnNetworkController> {
        match self.bridge(address) {
            Some(bridge) => Binding::Ready(FetchPeerOnNetworkController::new(
                bridge,
                self.stores.peer_on_network.clone(),
                env,
            )),
            None => Binding::NotReady,
        }
    }

    /// Composite controller for one conversation: client lifecycle, history
    /// fetch, live stream, peer check, and send, wired together.
    ///
    /// Must be called within a tokio runtime (it spawns a driver task).
    pub fn conversation(
        &self,
        address: Option<&str>,
        wallet: Option<Arc<dyn Wallet>>,
        conversation: Option<&Conversation>,
        opts: ConversationOptions,
    ) -> Binding<ConversationController> {
        let (Some(address), Some(conversation)) = (address, conversation) else {
            return Binding::NotReady;
        };
        let Some(bridge) = self.bridge(Some(address)) else {
            return Binding::NotReady;
        };
        Binding::Ready(ConversationController::spawn(
            bridge,
            self.stores.clone(),
            address.to_owned(),
            wallet,
            conversation.clone(),
            opts,
        ))
    }

    /// Composite inbox controller: one preview per conversation, kept fresh
    /// by the global all-messages stream and sorted by recency.
    ///
    /// Must be called within a tokio runtime (it spawns a driver task).
    pub fn previews(
        &self,
        address: Option<&str>,
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
    ) -> Binding<PreviewsController> {
        let Some(address) = address else {
            return Binding::NotReady;
        };
        let Some(bridge) = self.bridge(Some(address)) else {
            return Binding::NotReady;
        };
        Binding::Ready(PreviewsController::spawn(
            bridge,
            self.stores.clone(),
            address.to_owned(),
            wallet,
            opts,
        ))
    }
}
