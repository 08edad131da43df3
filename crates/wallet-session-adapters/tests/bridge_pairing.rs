mod common;

use std::sync::Arc;
use std::time::Duration;

use wallet_session_adapters::{
    BridgeAdapter, BridgeTransport, LoopbackBridge, MemoryChoiceStore, PairingDisplay,
};
use wallet_session_core::{
    BridgeOptions, ChainId, ChoiceStorePort, ConnectionStatus, ProviderAdapter, ProviderKind,
    SessionError,
};

use common::{dev_wallet, rig, settle, RecordingDisplay};

fn options(qrcode: bool) -> BridgeOptions {
    BridgeOptions {
        rpc: [(1, "https://cloudflare-eth.com".to_owned())].into(),
        bridge_url: "https://bridge.walletconnect.org".to_owned(),
        qrcode,
    }
}

#[tokio::test]
async fn approved_pairing_connects_and_shows_then_closes_display() {
    let wallet = dev_wallet(1);
    let setup = rig(
        None,
        LoopbackBridge::with_peer(wallet.clone(), false),
        MemoryChoiceStore::default(),
        Duration::from_secs(5),
    );

    let manager = setup.manager.clone();
    let attempt = tokio::spawn(async move { manager.connect(Some(ProviderKind::Bridge)).await });
    settle(|| !setup.bridge.pending_topics().is_empty()).await;

    let topics = setup.bridge.pending_topics();
    assert_eq!(topics.len(), 1);
    let shown = setup.display.shown();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].starts_with(&format!("wc:{}@1?bridge=", topics[0])));

    assert!(setup.bridge.approve(&topics[0], vec![wallet.address()], 1));
    let session = attempt.await.expect("join").expect("connect");
    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert_eq!(session.address(), Some(wallet.address()));
    assert_eq!(session.provider_kind(), Some(ProviderKind::Bridge));
    assert_eq!(setup.display.closed(), 1);
    assert!(setup.bridge.is_listening(&topics[0]));
    assert_eq!(
        setup.choices.load().expect("load").as_deref(),
        Some("walletconnect")
    );
}

#[tokio::test]
async fn rejected_pairing_is_a_connect_failure() {
    let setup = rig(
        None,
        LoopbackBridge::new(),
        MemoryChoiceStore::default(),
        Duration::from_secs(5),
    );

    let manager = setup.manager.clone();
    let attempt = tokio::spawn(async move { manager.connect(Some(ProviderKind::Bridge)).await });
    settle(|| !setup.bridge.pending_topics().is_empty()).await;
    let topic = setup.bridge.pending_topics().remove(0);
    assert!(setup.bridge.reject(&topic, "user declined"));

    let err = attempt.await.expect("join").expect_err("rejected");
    match err {
        SessionError::ConnectFailure(msg) => assert!(msg.contains("user declined")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(setup.manager.session().status(), ConnectionStatus::Disconnected);
    assert_eq!(setup.display.closed(), 1);
    assert!(setup.bridge.live_topics().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pairing_timeout_is_a_connect_failure() {
    let setup = rig(
        None,
        LoopbackBridge::new(),
        MemoryChoiceStore::default(),
        Duration::from_millis(250),
    );

    let err = setup
        .manager
        .connect(Some(ProviderKind::Bridge))
        .await
        .expect_err("nobody approves");
    match err {
        SessionError::ConnectFailure(msg) => assert!(msg.contains("timed out")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(setup.manager.session().status(), ConnectionStatus::Disconnected);
    assert_eq!(setup.display.closed(), 1);
    assert!(setup.bridge.live_topics().is_empty());
}

#[tokio::test]
async fn abandoning_the_connect_releases_pairing_ui_and_offer() {
    let bridge = LoopbackBridge::new();
    let display = Arc::new(RecordingDisplay::default());
    let adapter = BridgeAdapter::new(
        options(true),
        Arc::new(bridge.clone()),
        display.clone() as Arc<dyn PairingDisplay>,
        Duration::from_secs(60),
    );

    let abandoned = tokio::time::timeout(Duration::from_millis(20), adapter.connect()).await;
    assert!(abandoned.is_err());
    assert_eq!(display.shown().len(), 1);
    assert_eq!(display.closed(), 1);
    assert!(bridge.pending_topics().is_empty());

    // Teardown after abandonment is still clean.
    adapter.disconnect().await.expect("disconnect");
    assert!(bridge.live_topics().is_empty());
}

#[tokio::test]
async fn disconnect_during_pairing_withdraws_the_offer() {
    let setup = rig(
        None,
        LoopbackBridge::new(),
        MemoryChoiceStore::default(),
        Duration::from_secs(60),
    );

    let manager = setup.manager.clone();
    let attempt = tokio::spawn(async move { manager.connect(Some(ProviderKind::Bridge)).await });
    settle(|| !setup.bridge.pending_topics().is_empty()).await;

    let session = setup.manager.disconnect().await;
    assert_eq!(session.status(), ConnectionStatus::Disconnected);

    let err = attempt.await.expect("join").expect_err("withdrawn");
    assert!(matches!(err, SessionError::ConnectFailure(_)));
    assert_eq!(setup.manager.session().status(), ConnectionStatus::Disconnected);
    assert!(setup.bridge.live_topics().is_empty());
    assert_eq!(setup.display.closed(), 1);
}

#[tokio::test]
async fn no_qrcode_means_no_display() {
    let wallet = dev_wallet(1);
    let bridge = LoopbackBridge::with_peer(wallet.clone(), true);
    let display = Arc::new(RecordingDisplay::default());
    let adapter = BridgeAdapter::new(
        options(false),
        Arc::new(bridge.clone()),
        display.clone() as Arc<dyn PairingDisplay>,
        Duration::from_secs(5),
    );

    let identity = adapter.connect().await.expect("auto approved");
    assert_eq!(identity.address, wallet.address());
    assert_eq!(identity.chain_id, ChainId::Known(1));
    assert!(display.shown().is_empty());
    assert_eq!(display.closed(), 0);
}

#[tokio::test]
async fn peer_updates_and_remote_disconnect_reach_the_session() {
    let wallet = dev_wallet(1);
    let setup = rig(
        None,
        LoopbackBridge::with_peer(wallet.clone(), true),
        MemoryChoiceStore::default(),
        Duration::from_secs(5),
    );
    setup
        .manager
        .connect(Some(ProviderKind::Bridge))
        .await
        .expect("connect");
    let topic = setup.bridge.live_topics().remove(0);

    let other: alloy::primitives::Address = "0x2000000000000000000000000000000000000002"
        .parse()
        .expect("address");
    assert!(setup.bridge.session_update(&topic, &[other], 5));
    setup.manager.pump_pending().await;
    let session = setup.manager.session();
    assert_eq!(session.address(), Some(other));
    assert_eq!(session.chain_id(), Some(&ChainId::Known(5)));

    assert!(setup.bridge.remote_disconnect(&topic, 1000, "peer closed"));
    setup.manager.pump_pending().await;
    assert_eq!(setup.manager.session().status(), ConnectionStatus::Disconnected);
    assert!(setup.choices.load().expect("load").is_none());
}

#[tokio::test]
async fn signing_goes_through_the_peer_wallet() {
    let wallet = dev_wallet(1);
    let setup = rig(
        None,
        LoopbackBridge::with_peer(wallet.clone(), true),
        MemoryChoiceStore::default(),
        Duration::from_secs(5),
    );
    setup
        .manager
        .connect(Some(ProviderKind::Bridge))
        .await
        .expect("connect");

    let challenge = setup.manager.sign_login_challenge().await.expect("signed");
    let expected = wallet
        .sign_personal(challenge.message.as_bytes())
        .expect("reference signature");
    assert_eq!(challenge.signature, expected);
}

#[tokio::test]
async fn transport_rejects_requests_on_unknown_topics() {
    let bridge = LoopbackBridge::with_peer(dev_wallet(1), true);
    let err = bridge
        .request("missing", "eth_accounts", serde_json::json!([]))
        .await
        .expect_err("unknown topic");
    assert_eq!(err, wallet_session_adapters::TransportError::Closed);
}
