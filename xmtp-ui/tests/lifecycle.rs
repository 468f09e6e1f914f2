//! Client and stream lifecycle: legal transitions, duplicate-start
//! rejection, stop cascades, and stream termination.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{session, settle, wait_until, wallet};
use xmtp_ui::{ClientOptions, Conversation, Error, StateId};

#[tokio::test]
async fn client_walks_idle_pending_success() {
    let (session, _network) = session();
    let (wallet, address) = wallet();

    let observed: Arc<Mutex<Vec<StateId>>> = Arc::default();
    let sink = Arc::clone(&observed);
    let watched = address.clone();
    session.stores().client.subscribe(move |key, wire| {
        if key == watched {
            sink.lock().expect("lock").push(wire.id);
        }
    });

    let bridge = session.bridge(Some(&address)).expect("bridge");
    let handle = bridge
        .start_client(Some(wallet), ClientOptions::default())
        .await
        .expect("start");
    assert_eq!(handle.address, address);
    assert!(handle.export.is_some());

    wait_until("client mirror success", || {
        session.stores().client.get(&address).is_success()
    })
    .await;
    assert_eq!(
        *observed.lock().expect("lock"),
        [StateId::Pending, StateId::Success]
    );
}

#[tokio::test]
async fn duplicate_client_start_is_rejected() {
    let (session, _network) = session();
    let (wallet, address) = wallet();
    let bridge = session.bridge(Some(&address)).expect("bridge");

    bridge
        .start_client(Some(wallet.clone()), ClientOptions::default())
        .await
        .expect("first start");
    wait_until("client mirror success", || {
        session.stores().client.get(&address).is_success()
    })
    .await;

    let again = bridge
        .start_client(Some(wallet), ClientOptions::default())
        .await;
    assert_eq!(again.unwrap_err(), Error::ClientAlreadyExists);

    // The live client is untouched.
    assert!(session.stores().client.get(&address).is_success());
    assert!(bridge.fetch_client(false).await.is_ok());
}

#[tokio::test]
async fn start_without_credentials_is_bad_arguments() {
    let (session, _network) = session();
    let bridge = session.bridge(Some("0xkeyless")).expect("bridge");
    let result = bridge.start_client(None, ClientOptions::default()).await;
    assert!(matches!(result, Err(Error::BadArguments(_))));
}

#[tokio::test]
async fn operations_without_a_client_are_rejected() {
    let (session, _network) = session();
    let bridge = session.bridge(Some("0xnobody")).expect("bridge");

    assert_eq!(bridge.stop_client().await.unwrap_err(), Error::ClientNotFound);
    assert_eq!(
        bridge.fetch_conversations().await.unwrap_err(),
        Error::ClientNotFound
    );
    assert_eq!(
        bridge.start_streaming_all_messages().await.unwrap_err(),
        Error::ClientNotFound
    );
}

#[tokio::test]
async fn stream_ops_require_a_prior_start() {
    let (session, _network) = session();
    let (wallet, address) = wallet();
    let bridge = session.bridge(Some(&address)).expect("bridge");
    bridge
        .start_client(Some(wallet), ClientOptions::default())
        .await
        .expect("start");

    assert_eq!(
        bridge.stop_streaming_all_messages().await.unwrap_err(),
        Error::StreamNotFound
    );
    assert_eq!(
        bridge
            .listen_to_streaming_all_messages(|_| {})
            .await
            .unwrap_err(),
        Error::StreamNotFound
    );
}

#[tokio::test]
async fn duplicate_stream_start_is_rejected() {
    let (session, _network) = session();
    let (wallet, address) = wallet();
    let bridge = session.bridge(Some(&address)).expect("bridge");
    bridge
        .start_client(Some(wallet), ClientOptions::default())
        .await
        .expect("start");

    assert!(bridge.start_streaming_all_messages().await.expect("start"));
    assert_eq!(
        bridge.start_streaming_all_messages().await.unwrap_err(),
        Error::StreamAlreadyExists
    );
}

#[tokio::test]
async fn stop_terminates_a_live_stream() {
    let (session, _network) = session();
    let (alice_wallet, alice) = wallet();
    let (bob_wallet, bob) = wallet();

    let alice_bridge = session.bridge(Some(&alice)).expect("bridge");
    alice_bridge
        .start_client(Some(alice_wallet), ClientOptions::default())
        .await
        .expect("alice start");
    let bob_bridge = session.bridge(Some(&bob)).expect("bridge");
    bob_bridge
        .start_client(Some(bob_wallet), ClientOptions::default())
        .await
        .expect("bob start");

    let with_bob = Conversation::with_peer(bob.clone());
    alice_bridge
        .start_streaming_messages(&with_bob)
        .await
        .expect("stream start");

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    alice_bridge
        .listen_to_streaming_messages(&with_bob, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("listen");

    let to_alice = Conversation::with_peer(alice.clone());
    bob_bridge
        .send_message(&to_alice, serde_json::json!("one"))
        .await
        .expect("send");
    wait_until("first delivery", || delivered.load(Ordering::SeqCst) == 1).await;

    alice_bridge
        .stop_streaming_messages(&with_bob)
        .await
        .expect("stream stop");

    // Anything delivered after the stop must never reach the handler.
    bob_bridge
        .send_message(&to_alice, serde_json::json!("two"))
        .await
        .expect("send");
    settle().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stopping_the_client_resets_stream_stores() {
    let (session, _network) = session();
    let (wallet, address) = wallet();
    let bridge = session.bridge(Some(&address)).expect("bridge");
    bridge
        .start_client(Some(wallet), ClientOptions::default())
        .await
        .expect("start");
    bridge
        .start_streaming_all_messages()
        .await
        .expect("stream start");
    wait_until("stream mirror success", || {
        session
            .stores()
            .all_messages_stream
            .get(&address)
            .is_success()
    })
    .await;

    assert!(bridge.stop_client().await.expect("stop"));
    wait_until("client mirror idle", || {
        session.stores().client.get(&address).is_idle()
    })
    .await;
    wait_until("stream mirror idle", || {
        session.stores().all_messages_stream.get(&address).is_idle()
    })
    .await;

    // The whole lifecycle is restartable after a stop.
    assert_eq!(
        bridge.stop_streaming_all_messages().await.unwrap_err(),
        Error::StreamNotFound
    );
}

#[tokio::test]
async fn removed_listener_is_not_invoked() {
    let (session, _network) = session();
    let (alice_wallet, alice) = wallet();
    let (bob_wallet, bob) = wallet();

    let alice_bridge = session.bridge(Some(&alice)).expect("bridge");
    alice_bridge
        .start_client(Some(alice_wallet), ClientOptions::default())
        .await
        .expect("alice start");
    let bob_bridge = session.bridge(Some(&bob)).expect("bridge");
    bob_bridge
        .start_client(Some(bob_wallet), ClientOptions::default())
        .await
        .expect("bob start");

    alice_bridge
        .start_streaming_all_messages()
        .await
        .expect("stream start");

    let kept = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    let kept_counter = Arc::clone(&kept);
    alice_bridge
        .listen_to_streaming_all_messages(move |_| {
            kept_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("listen kept");
    let removed_counter = Arc::clone(&removed);
    let listener = alice_bridge
        .listen_to_streaming_all_messages(move |_| {
            removed_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("listen removed");

    alice_bridge
        .remove_listener(&listener)
        .await
        .expect("remove");

    bob_bridge
        .send_message(
            &Conversation::with_peer(alice.clone()),
            serde_json::json!("ping"),
        )
        .await
        .expect("send");
    wait_until("kept listener fired", || kept.load(Ordering::SeqCst) == 1).await;
    settle().await;
    assert_eq!(removed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn client_controller_gates_operations_by_state() {
    let (session, _network) = session();
    let (wallet, address) = wallet();

    let binding = session.client(Some(&address), Some(wallet), ClientOptions::default());
    let client = binding.into_ready().expect("ready");

    assert!(client.is_idle());
    assert!(client.stop().is_none());

    let start = client.start().expect("startable from idle");
    start.await.expect("start");
    wait_until("client success", || client.is_success()).await;

    assert!(client.start().is_none());
    let stop = client.stop().expect("stoppable from success");
    assert!(stop.await.expect("stop"));
    wait_until("client idle again", || client.is_idle()).await;
}

#[tokio::test]
async fn missing_inputs_yield_not_ready() {
    let (session, _network) = session();
    let (wallet, address) = wallet();

    assert!(
        !session
            .client(None, Some(wallet), ClientOptions::default())
            .is_ready()
    );
    assert!(!session.client(Some(&address), None, ClientOptions::default()).is_ready());
    assert!(session.bridge(None).is_none());
    assert!(!session.conversation_stream(Some(&address), None).is_ready());

    let with_override = ClientOptions {
        private_key_override: Some("aa".repeat(32)),
        ..Default::default()
    };
    assert!(session.client(Some(&address), None, with_override).is_ready());
}
