mod common;

use serde_json::json;
use wallet_session_core::{
    parse_chain_id_str, ChainId, EventReconciler, RawProviderEvent, SessionError, SessionEvent,
};

use common::{address_a, address_b};

fn reconcile(event: &str, payload: serde_json::Value) -> Vec<SessionEvent> {
    EventReconciler.reconcile(&RawProviderEvent::new(event, payload))
}

#[test]
fn hex_chain_value_is_normalized() {
    assert_eq!(
        reconcile("chainChanged", json!("0x5")),
        vec![SessionEvent::ChainChanged(ChainId::Known(5))]
    );
}

#[test]
fn decimal_and_numeric_chain_values_are_normalized() {
    assert_eq!(
        reconcile("chainChanged", json!("137")),
        vec![SessionEvent::ChainChanged(ChainId::Known(137))]
    );
    assert_eq!(
        reconcile("networkChanged", json!(8453)),
        vec![SessionEvent::ChainChanged(ChainId::Known(8453))]
    );
    assert_eq!(
        reconcile("chainChanged", json!({ "chainId": "0x1" })),
        vec![SessionEvent::ChainChanged(ChainId::Known(1))]
    );
}

#[test]
fn unparsable_chain_is_flagged_not_dropped() {
    assert_eq!(
        reconcile("chainChanged", json!("goerli")),
        vec![SessionEvent::ChainChanged(ChainId::Unknown("goerli".to_owned()))]
    );
    assert_eq!(
        reconcile("chainChanged", json!(true)),
        vec![SessionEvent::ChainChanged(ChainId::Unknown("true".to_owned()))]
    );
}

#[test]
fn chain_event_without_value_is_ignored() {
    assert!(reconcile("chainChanged", json!(null)).is_empty());
    assert!(reconcile("chainChanged", json!({})).is_empty());
}

#[test]
fn accounts_payload_shapes() {
    let a = address_a().to_string();
    let b = address_b().to_string();
    assert_eq!(
        reconcile("accountsChanged", json!([a, b])),
        vec![SessionEvent::AccountsChanged(vec![address_a(), address_b()])]
    );
    assert_eq!(
        reconcile("accountsChanged", json!(a)),
        vec![SessionEvent::AccountsChanged(vec![address_a()])]
    );
    assert_eq!(
        reconcile("accountsChanged", json!({ "accounts": [b] })),
        vec![SessionEvent::AccountsChanged(vec![address_b()])]
    );
    assert_eq!(
        reconcile("accountsChanged", json!([])),
        vec![SessionEvent::AccountsChanged(vec![])]
    );
}

#[test]
fn junk_account_entries_are_skipped() {
    let lower = "0x1000000000000000000000000000000000000001";
    assert_eq!(
        reconcile("accountsChanged", json!([42, "not-an-address", lower])),
        vec![SessionEvent::AccountsChanged(vec![address_a()])]
    );
    // Nothing usable must not be mistaken for "no accounts".
    assert!(reconcile("accountsChanged", json!(["nope"])).is_empty());
    assert!(reconcile("accountsChanged", json!(null)).is_empty());
}

#[test]
fn disconnect_shapes_all_map_to_remote_disconnect() {
    assert_eq!(
        reconcile("disconnect", json!([1000, "closed by peer"])),
        vec![SessionEvent::RemoteDisconnect {
            code: Some(1000),
            reason: Some("closed by peer".to_owned()),
        }]
    );
    assert_eq!(
        reconcile("disconnect", json!({ "code": 4900, "message": "offline" })),
        vec![SessionEvent::RemoteDisconnect {
            code: Some(4900),
            reason: Some("offline".to_owned()),
        }]
    );
    assert_eq!(
        reconcile("disconnect", json!(null)),
        vec![SessionEvent::RemoteDisconnect {
            code: None,
            reason: None,
        }]
    );
}

#[test]
fn bridge_session_update_yields_accounts_and_chain() {
    let events = reconcile(
        "session_update",
        json!({ "params": [{ "accounts": [address_b().to_string()], "chainId": 5 }] }),
    );
    assert_eq!(
        events,
        vec![
            SessionEvent::AccountsChanged(vec![address_b()]),
            SessionEvent::ChainChanged(ChainId::Known(5)),
        ]
    );
}

#[test]
fn unknown_events_are_ignored() {
    assert!(reconcile("message", json!({ "type": "eth_subscription" })).is_empty());
}

#[test]
fn configured_chain_ids_parse_from_hex_or_decimal() {
    assert_eq!(parse_chain_id_str("0x89").expect("hex"), 137);
    assert_eq!(parse_chain_id_str(" 10 ").expect("decimal"), 10);
    assert!(matches!(
        parse_chain_id_str("mainnet"),
        Err(SessionError::Unparsable(_))
    ));
}
