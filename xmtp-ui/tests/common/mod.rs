//! Shared helpers for the integration tests.

use std::sync::{Arc, Once};
use std::time::Duration;

use xmtp_ui::burner::BurnerWallet;
use xmtp_ui::testkit::Network;
use xmtp_ui::{Session, Wallet};

/// Install a fmt subscriber once, so `RUST_LOG=debug` surfaces worker and
/// bridge traces when a test misbehaves.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Poll `check` every few milliseconds until it holds, panicking after two
/// seconds. Store mirrors are updated by the bridge's dispatch task, so
/// tests observe them with a small amount of patience.
pub async fn wait_until(label: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {label}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give in-flight signals a moment to land before asserting absence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// A session over a fresh in-memory network, plus the network itself.
pub fn session() -> (Session, Network) {
    init_tracing();
    let network = Network::new();
    let service_network = network.clone();
    let session = Session::new(move |_| Box::new(service_network.service()));
    (session, network)
}

/// A fresh burner wallet and its address.
pub fn wallet() -> (Arc<BurnerWallet>, String) {
    let wallet = Arc::new(BurnerWallet::generate().expect("generate wallet"));
    let address = wallet.address();
    (wallet, address)
}
