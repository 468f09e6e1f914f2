//! Client lifecycle controller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::error::{Error, Result};
use crate::session::Stores;
use crate::state::{AsyncState, StateId};
use crate::types::{ClientHandle, ClientOptions, Wallet};

/// Drives the client state machine for one identity:
/// idle → pending → success/error, with `start` and `stop` gated on the
/// current state.
pub struct ClientController {
    bridge: Bridge,
    stores: Stores,
    address: String,
    wallet: Option<Arc<dyn Wallet>>,
    opts: ClientOptions,
}

impl fmt::Debug for ClientController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientController")
            .field("address", &self.address)
            .field("state", &self.state().id())
            .finish_non_exhaustive()
    }
}

impl ClientController {
    pub(crate) fn new(
        bridge: Bridge,
        stores: Stores,
        address: String,
        wallet: Option<Arc<dyn Wallet>>,
        opts: ClientOptions,
    ) -> Self {
        Self {
            bridge,
            stores,
            address,
            wallet,
            opts,
        }
    }

    /// The identity this controller manages.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current client lifecycle state.
    #[must_use]
    pub fn state(&self) -> AsyncState<()> {
        self.stores.client.get(&self.address)
    }

    /// Whether no client exists and none is starting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state().is_idle()
    }

    /// Whether a start is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    /// Whether the client is live.
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

    /// The start operation — available only from `idle` or `error`.
    pub fn start(&self) -> Option<impl Future<Output = Result<ClientHandle>> + Send + '_> {
        matches!(self.state().id(), StateId::Idle | StateId::Error).then(|| async move {
            self.bridge
                .start_client(self.wallet.clone(), self.opts.clone())
                .await
        })
    }

    /// The stop operation — available only while the client is live.
    pub fn stop(&self) -> Option<impl Future<Output = Result<bool>> + Send + '_> {
        self.is_success()
            .then(|| async move { self.bridge.stop_client().await })
    }

    /// Describe the live client, optionally with exported key material.
    pub async fn fetch_client(&self, include_export: bool) -> Result<ClientHandle> {
        self.bridge.fetch_client(include_export).await
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }
}
