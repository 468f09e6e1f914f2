//! End-to-end scenarios over the in-memory network: two-wallet delivery,
//! fetch/stream reconciliation, gated sending, and inbox previews.

mod common;

use std::sync::{Arc, Mutex};

use common::{session, settle, wait_until, wallet};
use xmtp_ui::{
    ClientOptions, Conversation, ConversationOptions, Message, Wallet,
};

/// Start a plain bridge-level client for a wallet, waiting for the mirror.
async fn start_client(
    session: &xmtp_ui::Session,
    wallet: &Arc<xmtp_ui::burner::BurnerWallet>,
) -> xmtp_ui::Bridge {
    let address = Wallet::address(wallet.as_ref());
    let bridge = session.bridge(Some(&address)).expect("bridge");
    bridge
        .start_client(Some(wallet.clone()), ClientOptions::default())
        .await
        .expect("start client");
    wait_until("client mirror success", || {
        session.stores().client.get(&address).is_success()
    })
    .await;
    bridge
}

#[tokio::test]
async fn listener_receives_exactly_one_message_from_peer() {
    let (session, _network) = session();
    let (alice_wallet, alice) = wallet();
    let (bob_wallet, bob) = wallet();

    // Wallet A: client idle -> pending -> success, then a live stream.
    let client = session
        .client(
            Some(&alice),
            Some(alice_wallet.clone()),
            ClientOptions::default(),
        )
        .into_ready()
        .expect("client binding");
    client.start().expect("startable").await.expect("start");
    wait_until("alice client success", || client.is_success()).await;

    let stream = session
        .message_stream(Some(&alice))
        .into_ready()
        .expect("stream binding");
    stream.start().expect("startable").await.expect("stream start");
    wait_until("alice stream success", || stream.is_success()).await;

    let received: Arc<Mutex<Vec<Message>>> = Arc::default();
    let sink = Arc::clone(&received);
    stream
        .listen(move |message| sink.lock().expect("lock").push(message))
        .expect("listenable")
        .await
        .expect("listen");

    // Wallet B sends one message to A.
    let bob_bridge = start_client(&session, &bob_wallet).await;
    bob_bridge
        .send_message(
            &Conversation::with_peer(alice.clone()),
            serde_json::json!("hello alice"),
        )
        .await
        .expect("send");

    wait_until("delivery", || received.lock().expect("lock").len() == 1).await;
    settle().await;

    let received = received.lock().expect("lock");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].sender_address, bob);
    assert_eq!(received[0].content, serde_json::json!("hello alice"));
}

#[tokio::test]
async fn fetched_history_and_stream_redelivery_reconcile() {
    let (session, network) = session();
    let (alice_wallet, alice) = wallet();
    let (bob_wallet, _bob) = wallet();

    // Register Alice so Bob can reach her, then seed two messages.
    let _alice_bridge = start_client(&session, &alice_wallet).await;
    let bob_bridge = start_client(&session, &bob_wallet).await;
    let to_alice = Conversation::with_peer(alice.clone());
    let m1 = bob_bridge
        .send_message(&to_alice, serde_json::json!("m1"))
        .await
        .expect("send m1");
    let m2 = bob_bridge
        .send_message(&to_alice, serde_json::json!("m2"))
        .await
        .expect("send m2");

    // Alice's composite controller fetches history and starts streaming.
    let bob_address = m1.sender_address.clone();
    let with_bob = Conversation::with_peer(bob_address);
    let controller = session
        .conversation(
            Some(&alice),
            Some(alice_wallet.clone()),
            Some(&with_bob),
            ConversationOptions::default(),
        )
        .into_ready()
        .expect("conversation binding");

    wait_until("history fetched", || controller.messages().len() == 2).await;
    wait_until("stream live", || controller.is_streaming()).await;

    // A network-level redelivery of m2 followed by a genuinely new message.
    network.redeliver(&m2.id);
    let m3 = bob_bridge
        .send_message(&to_alice, serde_json::json!("m3"))
        .await
        .expect("send m3");

    wait_until("m3 merged", || controller.messages().len() == 3).await;
    settle().await;

    let messages = controller.messages();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, [m3.id.as_str(), m2.id.as_str(), m1.id.as_str()]);
    assert!(messages.windows(2).all(|w| w[0].sent > w[1].sent));
}

#[tokio::test]
async fn send_is_gated_on_peer_reachability() {
    let (session, _network) = session();
    let (alice_wallet, alice) = wallet();
    let (bob_wallet, bob) = wallet();

    let _bob_bridge = start_client(&session, &bob_wallet).await;

    let with_bob = Conversation::with_peer(bob.clone());
    let controller = session
        .conversation(
            Some(&alice),
            Some(alice_wallet.clone()),
            Some(&with_bob),
            ConversationOptions::default(),
        )
        .into_ready()
        .expect("conversation binding");

    // Client not live yet: nothing to send with.
    assert!(controller.send(serde_json::json!("too early")).is_none());

    controller
        .client()
        .start()
        .expect("startable")
        .await
        .expect("start");
    wait_until("peer confirmed", || {
        controller.is_peer_on_network() == Some(true)
    })
    .await;

    let sent = controller
        .send(serde_json::json!("hi bob"))
        .expect("sendable")
        .await
        .expect("send");
    assert_eq!(sent.sender_address, alice);

    // The echo lands in the visible list exactly once.
    wait_until("echo merged", || !controller.messages().is_empty()).await;
    settle().await;
    let matching = controller
        .messages()
        .iter()
        .filter(|m| m.id == sent.id)
        .count();
    assert_eq!(matching, 1);
    assert!(!controller.is_sending());
    assert!(controller.send_error().is_none());
}

#[tokio::test]
async fn unreachable_peer_disables_send() {
    let (session, _network) = session();
    let (alice_wallet, alice) = wallet();

    // Peer never started a client, so the network has never seen them.
    let with_ghost = Conversation::with_peer("0x00000000000000000000000000000000000000gg");
    let controller = session
        .conversation(
            Some(&alice),
            Some(alice_wallet.clone()),
            Some(&with_ghost),
            ConversationOptions::default(),
        )
        .into_ready()
        .expect("conversation binding");

    controller
        .client()
        .start()
        .expect("startable")
        .await
        .expect("start");
    wait_until("peer check resolved", || {
        controller.is_peer_on_network().is_some()
    })
    .await;

    assert_eq!(controller.is_peer_on_network(), Some(false));
    assert!(controller.send(serde_json::json!("void")).is_none());
}

#[tokio::test]
async fn previews_track_most_recent_message_per_conversation() {
    let (session, network) = session();
    let (alice_wallet, alice) = wallet();
    let (bob_wallet, bob) = wallet();
    let (carol_wallet, carol) = wallet();

    let _alice_bridge = start_client(&session, &alice_wallet).await;
    let bob_bridge = start_client(&session, &bob_wallet).await;
    let carol_bridge = start_client(&session, &carol_wallet).await;

    let to_alice = Conversation::with_peer(alice.clone());
    bob_bridge
        .send_message(&to_alice, serde_json::json!("from bob, old"))
        .await
        .expect("send");
    bob_bridge
        .send_message(&to_alice, serde_json::json!("from bob, newer"))
        .await
        .expect("send");
    let carol_latest = carol_bridge
        .send_message(&to_alice, serde_json::json!("from carol"))
        .await
        .expect("send");

    let inbox = session
        .previews(
            Some(&alice),
            Some(alice_wallet.clone()),
            ClientOptions::default(),
        )
        .into_ready()
        .expect("previews binding");

    wait_until("previews loaded", || inbox.is_previews_success()).await;
    wait_until("stream live", || inbox.is_streaming()).await;

    let previews = inbox.previews().expect("loaded");
    assert_eq!(previews.len(), 2);
    // Carol's message is the most recent overall.
    assert_eq!(previews[0].conversation.peer_address, carol);
    assert_eq!(previews[0].preview.id, carol_latest.id);
    assert_eq!(previews[1].conversation.peer_address, bob);
    assert_eq!(
        previews[1].preview.content,
        serde_json::json!("from bob, newer")
    );

    // A redelivery of an old message must not regress the preview.
    let bob_preview_sent = previews[1].preview.sent;
    network.redeliver(&previews[1].preview.id);
    settle().await;
    let unchanged = inbox.previews().expect("loaded");
    assert_eq!(unchanged[1].preview.sent, bob_preview_sent);

    // A new message from Bob moves his conversation to the top.
    let bob_newest = bob_bridge
        .send_message(&to_alice, serde_json::json!("from bob, newest"))
        .await
        .expect("send");
    wait_until("preview updated", || {
        inbox
            .previews()
            .is_some_and(|p| p[0].preview.id == bob_newest.id)
    })
    .await;
    let resorted = inbox.previews().expect("loaded");
    assert_eq!(resorted[0].conversation.peer_address, bob);
    assert_eq!(resorted[1].conversation.peer_address, carol);
}
