use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::{json, Value};

use wallet_session_core::{
    ChainId, ConnectedIdentity, EventSink, ProviderAdapter, ProviderKind, SessionError,
};

use crate::transport::{Eip1193Transport, ListenerId, TransportError};

/// Adapter over a wallet that lives next to the application: a browser
/// extension, a local proxy to one, or the development wallet.
pub struct InjectedAdapter {
    transport: Option<Arc<dyn Eip1193Transport>>,
    // Only the registration made by this adapter; the transport is shared.
    listener: Mutex<Option<ListenerId>>,
}

impl InjectedAdapter {
    pub fn new(transport: Arc<dyn Eip1193Transport>) -> Self {
        Self {
            transport: Some(transport),
            listener: Mutex::new(None),
        }
    }

    /// Adapter for an environment where no wallet was found. Every connect
    /// attempt fails with `NotDetected`.
    pub fn undetected() -> Self {
        Self {
            transport: None,
            listener: Mutex::new(None),
        }
    }

    fn transport(&self) -> Result<&Arc<dyn Eip1193Transport>, SessionError> {
        self.transport
            .as_ref()
            .ok_or_else(|| SessionError::NotDetected("no injected wallet detected".to_owned()))
    }
}

#[async_trait]
impl ProviderAdapter for InjectedAdapter {
    fn name(&self) -> &'static str {
        self.transport.as_ref().map_or("injected", |t| t.label())
    }

    async fn connect(&self) -> Result<ConnectedIdentity, SessionError> {
        let transport = self.transport()?;
        let accounts = transport
            .request("eth_requestAccounts", json!([]))
            .await
            .map_err(TransportError::into_connect_error)?;
        let accounts = parse_accounts(&accounts).map_err(TransportError::into_connect_error)?;
        let address = accounts.first().copied().ok_or_else(|| {
            SessionError::ConnectFailure("wallet authorized no accounts".to_owned())
        })?;
        let chain_raw = transport
            .request("eth_chainId", json!([]))
            .await
            .map_err(TransportError::into_connect_error)?;
        let chain_id = normalize_chain(&chain_raw);
        tracing::debug!(transport = transport.label(), %address, %chain_id, "injected wallet authorized");
        Ok(ConnectedIdentity {
            address,
            chain_id,
            provider_kind: ProviderKind::Injected,
        })
    }

    fn subscribe(&self, sink: EventSink) -> Result<(), SessionError> {
        let transport = self.transport()?;
        let mut listener = self
            .listener
            .lock()
            .map_err(|e| SessionError::Transport(format!("listener lock poisoned: {e}")))?;
        if listener.is_some() {
            return Err(SessionError::Subscription(
                "injected adapter already has an event handler".to_owned(),
            ));
        }
        let id = transport
            .listen(sink)
            .map_err(|e| SessionError::Subscription(e.to_string()))?;
        *listener = Some(id);
        Ok(())
    }

    async fn sign_message(&self, signer: Address, message: &str) -> Result<Bytes, SessionError> {
        let transport = self.transport()?;
        personal_sign(transport.as_ref(), signer, message)
            .await
            .map_err(TransportError::into_signing_error)
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        // The extension keeps its own authorization; only our listener goes.
        let id = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(transport), Some(id)) = (&self.transport, id) {
            transport.unlisten(id);
        }
        Ok(())
    }
}

pub(crate) async fn personal_sign(
    transport: &dyn Eip1193Transport,
    signer: Address,
    message: &str,
) -> Result<Bytes, TransportError> {
    let payload_hex = format!("0x{}", alloy::hex::encode(message.as_bytes()));
    let result = transport
        .request("personal_sign", json!([payload_hex, signer.to_string()]))
        .await?;
    let raw = result.as_str().ok_or_else(|| TransportError::Rpc {
        code: -32603,
        message: "personal_sign must return a hex string".to_owned(),
    })?;
    raw.parse().map_err(|e| TransportError::Rpc {
        code: -32603,
        message: format!("invalid signature hex: {e}"),
    })
}

pub(crate) fn parse_accounts(value: &Value) -> Result<Vec<Address>, TransportError> {
    let arr = value.as_array().ok_or_else(|| TransportError::Rpc {
        code: -32603,
        message: "account list must be an array".to_owned(),
    })?;
    let mut accounts = Vec::with_capacity(arr.len());
    for item in arr {
        let raw = item.as_str().ok_or_else(|| TransportError::Rpc {
            code: -32603,
            message: "account entry must be a string".to_owned(),
        })?;
        let parsed: Address = raw.trim().parse().map_err(|e| TransportError::Rpc {
            code: -32603,
            message: format!("invalid account address {raw:?}: {e}"),
        })?;
        accounts.push(parsed);
    }
    Ok(accounts)
}

pub(crate) fn normalize_chain(value: &Value) -> ChainId {
    match ChainId::normalize(value) {
        Some(chain_id) => {
            if chain_id.is_unknown() {
                tracing::warn!(%value, "wallet reported an unparsable chain id");
            }
            chain_id
        }
        None => {
            tracing::warn!("wallet reported no chain id");
            ChainId::Unknown(value.to_string())
        }
    }
}

/// Talks JSON-RPC over HTTP to a local process that fronts a wallet.
///
/// Plain HTTP has no push channel, so [`Eip1193Transport::listen`] reports
/// `Unsupported` and the session keeps the identity it connected with.
#[derive(Debug, Clone)]
pub struct HttpProxyTransport {
    base_url: String,
    client: reqwest::Client,
    timeout_ms: u64,
    next_id: Arc<AtomicU64>,
}

impl HttpProxyTransport {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build proxy client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            timeout_ms,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Eip1193Transport for HttpProxyTransport {
    fn label(&self) -> &'static str {
        "eip1193-proxy"
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.base_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout_ms)
                } else {
                    TransportError::Http(format!("eip1193 proxy request failed: {e}"))
                }
            })?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("eip1193 proxy json decode failed: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(TransportError::from_rpc_value(err));
        }
        if !status.is_success() {
            return Err(TransportError::Http(format!(
                "eip1193 proxy status {status}: {body}"
            )));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| TransportError::Http("eip1193 proxy missing result".to_owned()))
    }

    fn listen(&self, _sink: EventSink) -> Result<ListenerId, TransportError> {
        Err(TransportError::Unsupported(
            "eip1193 proxy cannot push provider events".to_owned(),
        ))
    }

    fn unlisten(&self, _id: ListenerId) {}
}
