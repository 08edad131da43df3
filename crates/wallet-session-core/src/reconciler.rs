use alloy::primitives::Address;
use serde_json::Value;

use crate::domain::ChainId;
use crate::ports::RawProviderEvent;

/// Transition vocabulary the state machine understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    RemoteDisconnect {
        code: Option<i64>,
        reason: Option<String>,
    },
}

/// Turns transport-specific event payloads into [`SessionEvent`]s.
///
/// Never fails: payloads with missing or oddly typed fields produce fewer
/// events, and chain values that do not parse become `ChainId::Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventReconciler;

impl EventReconciler {
    pub fn reconcile(&self, raw: &RawProviderEvent) -> Vec<SessionEvent> {
        match raw.event.as_str() {
            "accountsChanged" => self.accounts(&raw.payload).into_iter().collect(),
            "chainChanged" | "networkChanged" => self.chain(&raw.payload).into_iter().collect(),
            // A late `connect` notification only tells us the chain.
            "connect" => self.chain(&raw.payload).into_iter().collect(),
            "session_update" => {
                let params = session_update_params(&raw.payload);
                let mut events = Vec::with_capacity(2);
                if let Some(accounts) = params.get("accounts") {
                    events.extend(self.accounts(accounts));
                }
                if let Some(chain) = params.get("chainId") {
                    events.extend(self.chain(chain));
                }
                events
            }
            "disconnect" => vec![disconnect_event(&raw.payload)],
            other => {
                tracing::debug!(event = other, "ignoring unrecognized provider event");
                Vec::new()
            }
        }
    }

    fn accounts(&self, payload: &Value) -> Option<SessionEvent> {
        let entries: Vec<&Value> = match payload {
            Value::Array(items) => items.iter().collect(),
            Value::String(_) => vec![payload],
            Value::Object(map) => return map.get("accounts").and_then(|v| self.accounts(v)),
            _ => {
                tracing::warn!(%payload, "accountsChanged payload has no account list");
                return None;
            }
        };
        if entries.is_empty() {
            return Some(SessionEvent::AccountsChanged(Vec::new()));
        }

        let mut accounts = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.as_str().map(|s| s.trim().parse::<Address>()) {
                Some(Ok(address)) => accounts.push(address),
                _ => tracing::warn!(%entry, "skipping unparsable account entry"),
            }
        }
        if accounts.is_empty() {
            tracing::warn!("accountsChanged carried no usable accounts; ignoring");
            return None;
        }
        Some(SessionEvent::AccountsChanged(accounts))
    }

    fn chain(&self, payload: &Value) -> Option<SessionEvent> {
        let raw = match payload {
            Value::Object(map) => map.get("chainId").unwrap_or(&Value::Null),
            other => other,
        };
        let Some(chain_id) = ChainId::normalize(raw) else {
            tracing::warn!(%payload, "chain event without a chain value; ignoring");
            return None;
        };
        if chain_id.is_unknown() {
            tracing::warn!(%raw, "unparsable chain id; keeping raw value");
        }
        Some(SessionEvent::ChainChanged(chain_id))
    }
}

fn session_update_params(payload: &Value) -> &Value {
    // Bridge transports wrap the update as `{ params: [ { accounts, chainId } ] }`.
    payload
        .get("params")
        .and_then(|p| p.get(0))
        .unwrap_or(payload)
}

fn disconnect_event(payload: &Value) -> SessionEvent {
    let (code, reason) = match payload {
        Value::Array(args) => (
            args.first().and_then(Value::as_i64),
            args.get(1).and_then(reason_text),
        ),
        Value::Object(map) => (
            map.get("code").and_then(Value::as_i64),
            map.get("message")
                .or_else(|| map.get("reason"))
                .and_then(reason_text),
        ),
        Value::Number(n) => (n.as_i64(), None),
        Value::String(s) => (None, Some(s.clone())),
        _ => (None, None),
    };
    SessionEvent::RemoteDisconnect { code, reason }
}

fn reason_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}
