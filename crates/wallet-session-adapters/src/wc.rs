use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use wallet_session_core::{
    BridgeOptions, ConnectedIdentity, EventSink, ProviderAdapter, ProviderKind, RawProviderEvent,
    SessionError,
};

use crate::eip1193::personal_sign;
use crate::transport::{Eip1193Transport, ListenerId, TransportError};

/// A pairing offer waiting for the remote wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub topic: String,
    pub uri: String,
}

/// What the remote wallet agreed to share once it approved the pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedSession {
    pub accounts: Vec<Address>,
    pub chain_id: Value,
}

/// Remote-pairing wallet transport. The wire protocol stays behind this
/// trait; the adapter only sequences pairing, approval and teardown.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn pair(&self, options: &BridgeOptions) -> Result<Pairing, TransportError>;

    async fn await_approval(&self, topic: &str) -> Result<ApprovedSession, TransportError>;

    /// Withdraws a pairing offer that was not approved. Approved sessions are
    /// left to [`BridgeTransport::close`].
    fn abort_pairing(&self, topic: &str);

    async fn request(&self, topic: &str, method: &str, params: Value)
        -> Result<Value, TransportError>;

    fn listen(&self, topic: &str, sink: EventSink) -> Result<(), TransportError>;

    async fn close(&self, topic: &str) -> Result<(), TransportError>;
}

/// Scan-to-pair presentation, e.g. a QR code modal.
pub trait PairingDisplay: Send + Sync {
    fn show(&self, uri: &str);
    fn close(&self);
}

/// Display that only logs the pairing URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPairingDisplay;

impl PairingDisplay for LogPairingDisplay {
    fn show(&self, uri: &str) {
        tracing::info!(%uri, "scan to pair wallet");
    }

    fn close(&self) {
        tracing::debug!("pairing display closed");
    }
}

/// Closes the pairing display and withdraws the offer unless disarmed, so a
/// dropped connect future never leaves the display up.
struct PairingGuard<'a> {
    display: Option<&'a dyn PairingDisplay>,
    transport: &'a dyn BridgeTransport,
    topic: &'a str,
    approved: bool,
}

impl Drop for PairingGuard<'_> {
    fn drop(&mut self) {
        if let Some(display) = self.display {
            display.close();
        }
        if !self.approved {
            self.transport.abort_pairing(self.topic);
        }
    }
}

pub struct BridgeAdapter {
    options: BridgeOptions,
    transport: Arc<dyn BridgeTransport>,
    display: Arc<dyn PairingDisplay>,
    pairing_timeout: Duration,
    topic: Mutex<Option<String>>,
}

impl BridgeAdapter {
    pub fn new(
        options: BridgeOptions,
        transport: Arc<dyn BridgeTransport>,
        display: Arc<dyn PairingDisplay>,
        pairing_timeout: Duration,
    ) -> Self {
        Self {
            options,
            transport,
            display,
            pairing_timeout,
            topic: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> Option<String> {
        self.topic.lock().ok().and_then(|g| g.clone())
    }

    fn set_topic(&self, topic: Option<String>) -> Option<String> {
        match self.topic.lock() {
            Ok(mut g) => std::mem::replace(&mut *g, topic),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), topic),
        }
    }

    fn active_topic(&self) -> Result<String, SessionError> {
        self.topic().ok_or(SessionError::NoActiveSession)
    }
}

#[async_trait]
impl ProviderAdapter for BridgeAdapter {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn connect(&self) -> Result<ConnectedIdentity, SessionError> {
        let pairing = self
            .transport
            .pair(&self.options)
            .await
            .map_err(TransportError::into_connect_error)?;
        // Recorded before awaiting so a disconnect can reach the pending offer.
        self.set_topic(Some(pairing.topic.clone()));

        let mut guard = PairingGuard {
            display: self.options.qrcode.then_some(self.display.as_ref()),
            transport: self.transport.as_ref(),
            topic: &pairing.topic,
            approved: false,
        };
        if let Some(display) = guard.display {
            display.show(&pairing.uri);
        }
        tracing::info!(topic = %pairing.topic, bridge = %self.options.bridge_url, "waiting for wallet to approve pairing");

        let approved = match with_deadline(
            self.pairing_timeout,
            self.transport.await_approval(&pairing.topic),
        )
        .await
        {
            Some(Ok(approved)) => approved,
            Some(Err(e)) => {
                self.set_topic(None);
                return Err(e.into_connect_error());
            }
            None => {
                self.set_topic(None);
                let millis = u64::try_from(self.pairing_timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(TransportError::Timeout(millis).into_connect_error());
            }
        };
        guard.approved = true;
        drop(guard);

        let Some(address) = approved.accounts.first().copied() else {
            self.close_topic().await;
            return Err(SessionError::ConnectFailure(
                "wallet approved pairing without accounts".to_owned(),
            ));
        };
        let chain_id = crate::eip1193::normalize_chain(&approved.chain_id);
        if let Some(rpc) = self.options.rpc_endpoint(&chain_id) {
            tracing::debug!(%chain_id, %rpc, "bridge session will read through configured rpc");
        } else {
            tracing::warn!(%chain_id, "no rpc endpoint configured for bridged chain");
        }
        Ok(ConnectedIdentity {
            address,
            chain_id,
            provider_kind: ProviderKind::Bridge,
        })
    }

    fn subscribe(&self, sink: EventSink) -> Result<(), SessionError> {
        let topic = self.active_topic()?;
        self.transport
            .listen(&topic, sink)
            .map_err(|e| SessionError::Subscription(e.to_string()))
    }

    async fn sign_message(&self, signer: Address, message: &str) -> Result<Bytes, SessionError> {
        let topic = self.active_topic()?;
        let bound = TopicTransport {
            transport: self.transport.as_ref(),
            topic: &topic,
        };
        personal_sign(&bound, signer, message)
            .await
            .map_err(TransportError::into_signing_error)
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.close_topic().await;
        Ok(())
    }
}

impl BridgeAdapter {
    async fn close_topic(&self) {
        let Some(topic) = self.set_topic(None) else {
            return;
        };
        self.transport.abort_pairing(&topic);
        if let Err(e) = self.transport.close(&topic).await {
            tracing::warn!(%topic, error = %e, "bridge session close failed");
        }
    }
}

/// Resolves `fut` unless `limit` passes first.
#[cfg(not(target_arch = "wasm32"))]
async fn with_deadline<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}

/// Resolves `fut` unless `limit` passes first. The browser has no tokio timer,
/// so the deadline is a JS timeout signalled over a oneshot.
#[cfg(target_arch = "wasm32")]
async fn with_deadline<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    let (fired_tx, fired_rx) = tokio::sync::oneshot::channel::<()>();
    let millis = u32::try_from(limit.as_millis()).unwrap_or(u32::MAX);
    wasm_bindgen_futures::spawn_local(async move {
        gloo_timers::future::TimeoutFuture::new(millis).await;
        let _ = fired_tx.send(());
    });
    tokio::select! {
        biased;
        out = fut => Some(out),
        _ = fired_rx => None,
    }
}

/// A bridge session viewed as an EIP-1193 transport.
struct TopicTransport<'a> {
    transport: &'a dyn BridgeTransport,
    topic: &'a str,
}

#[async_trait]
impl<'a> Eip1193Transport for TopicTransport<'a> {
    fn label(&self) -> &'static str {
        "bridge-session"
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.transport.request(self.topic, method, params).await
    }

    fn listen(&self, sink: EventSink) -> Result<ListenerId, TransportError> {
        self.transport.listen(self.topic, sink)?;
        Ok(ListenerId(0))
    }

    // Listeners are scoped to the topic and go when it closes.
    fn unlisten(&self, _id: ListenerId) {}
}

#[derive(Debug, Clone, PartialEq)]
enum PairingState {
    Pending,
    Approved(ApprovedSession),
    Rejected(String),
    Withdrawn,
}

#[derive(Debug)]
struct TopicState {
    status: watch::Sender<PairingState>,
    sink: Option<EventSink>,
}

/// In-process stand-in for a bridge relay and the wallet on the other end.
///
/// The peer side is driven through [`LoopbackBridge::approve`],
/// [`LoopbackBridge::reject`], [`LoopbackBridge::session_update`] and
/// [`LoopbackBridge::remote_disconnect`]. With a peer wallet attached and
/// auto-approval on, pairings are approved as soon as they are offered and
/// requests are answered by that wallet.
#[derive(Clone, Default)]
pub struct LoopbackBridge {
    peer: Option<Arc<dyn Eip1193Transport>>,
    auto_approve: bool,
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
}

impl LoopbackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(peer: Arc<dyn Eip1193Transport>, auto_approve: bool) -> Self {
        Self {
            peer: Some(peer),
            auto_approve,
            topics: Arc::default(),
        }
    }

    pub fn pending_topics(&self) -> Vec<String> {
        self.with_topics(|topics| {
            topics
                .iter()
                .filter(|(_, t)| matches!(*t.status.borrow(), PairingState::Pending))
                .map(|(topic, _)| topic.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn live_topics(&self) -> Vec<String> {
        self.with_topics(|topics| topics.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_listening(&self, topic: &str) -> bool {
        self.with_topics(|topics| topics.get(topic).is_some_and(|t| t.sink.is_some()))
            .unwrap_or(false)
    }

    pub fn approve(&self, topic: &str, accounts: Vec<Address>, chain_id: u64) -> bool {
        self.resolve(
            topic,
            PairingState::Approved(ApprovedSession {
                accounts,
                chain_id: json!(chain_id),
            }),
        )
    }

    pub fn reject(&self, topic: &str, reason: &str) -> bool {
        self.resolve(topic, PairingState::Rejected(reason.to_owned()))
    }

    /// Pushes a peer-side account/chain update into the session.
    pub fn session_update(&self, topic: &str, accounts: &[Address], chain_id: u64) -> bool {
        let payload = json!({
            "params": [{
                "accounts": accounts.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                "chainId": chain_id,
            }]
        });
        self.emit(topic, "session_update", payload)
    }

    /// The peer ends the session. The topic is forgotten.
    pub fn remote_disconnect(&self, topic: &str, code: i64, message: &str) -> bool {
        let delivered = self.emit(
            topic,
            "disconnect",
            json!({ "code": code, "message": message }),
        );
        let _ = self.with_topics(|topics| topics.remove(topic));
        delivered
    }

    fn resolve(&self, topic: &str, state: PairingState) -> bool {
        self.with_topics(|topics| match topics.get(topic) {
            Some(t) if matches!(*t.status.borrow(), PairingState::Pending) => {
                t.status.send_replace(state);
                true
            }
            _ => false,
        })
        .unwrap_or(false)
    }

    fn emit(&self, topic: &str, event: &str, payload: Value) -> bool {
        let sink = self
            .with_topics(|topics| topics.get(topic).and_then(|t| t.sink.clone()))
            .ok()
            .flatten();
        match sink {
            Some(sink) => sink.emit(RawProviderEvent::new(event, payload)),
            None => false,
        }
    }

    fn with_topics<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, TopicState>) -> R,
    ) -> Result<R, TransportError> {
        let mut g = self.topics.lock().map_err(|_| TransportError::Closed)?;
        Ok(f(&mut g))
    }

    async fn auto_approval(&self) -> Option<ApprovedSession> {
        if !self.auto_approve {
            return None;
        }
        let peer = self.peer.as_ref()?;
        let accounts = peer.request("eth_accounts", json!([])).await.ok()?;
        let accounts = crate::eip1193::parse_accounts(&accounts).ok()?;
        let chain_id = peer.request("eth_chainId", json!([])).await.ok()?;
        Some(ApprovedSession { accounts, chain_id })
    }
}

#[async_trait]
impl BridgeTransport for LoopbackBridge {
    async fn pair(&self, options: &BridgeOptions) -> Result<Pairing, TransportError> {
        let topic = uuid::Uuid::new_v4().to_string();
        let key = uuid::Uuid::new_v4().simple().to_string();
        let uri = format!("wc:{topic}@1?bridge={}&key={key}", options.bridge_url);
        let initial = match self.auto_approval().await {
            Some(approved) => PairingState::Approved(approved),
            None => PairingState::Pending,
        };
        let (status, _) = watch::channel(initial);
        self.with_topics(|topics| {
            topics.insert(topic.clone(), TopicState { status, sink: None });
        })?;
        Ok(Pairing { topic, uri })
    }

    async fn await_approval(&self, topic: &str) -> Result<ApprovedSession, TransportError> {
        let mut rx = self
            .with_topics(|topics| topics.get(topic).map(|t| t.status.subscribe()))?
            .ok_or(TransportError::Closed)?;
        let state = rx
            .wait_for(|s| !matches!(s, PairingState::Pending))
            .await
            .map_err(|_| TransportError::Closed)?
            .clone();
        match state {
            PairingState::Approved(approved) => Ok(approved),
            PairingState::Rejected(reason) => Err(TransportError::Rejected(reason)),
            PairingState::Withdrawn | PairingState::Pending => Err(TransportError::Closed),
        }
    }

    fn abort_pairing(&self, topic: &str) {
        let _ = self.with_topics(|topics| {
            let unapproved = topics
                .get(topic)
                .is_some_and(|t| !matches!(*t.status.borrow(), PairingState::Approved(_)));
            if unapproved {
                if let Some(t) = topics.remove(topic) {
                    t.status.send_replace(PairingState::Withdrawn);
                }
                tracing::debug!(%topic, "pairing offer withdrawn");
            }
        });
    }

    async fn request(
        &self,
        topic: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let live = self.with_topics(|topics| topics.contains_key(topic))?;
        if !live {
            return Err(TransportError::Closed);
        }
        match &self.peer {
            Some(peer) => peer.request(method, params).await,
            None => Err(TransportError::Unsupported(format!(
                "no peer wallet to answer {method}"
            ))),
        }
    }

    fn listen(&self, topic: &str, sink: EventSink) -> Result<(), TransportError> {
        self.with_topics(|topics| match topics.get_mut(topic) {
            Some(t) => {
                t.sink = Some(sink);
                Ok(())
            }
            None => Err(TransportError::Closed),
        })?
    }

    async fn close(&self, topic: &str) -> Result<(), TransportError> {
        self.with_topics(|topics| {
            if let Some(t) = topics.remove(topic) {
                t.status.send_replace(PairingState::Withdrawn);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_passes_results_through_and_cuts_off_stalls() {
        let ready = with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(ready, Some(7));

        let stalled = with_deadline(Duration::from_secs(1), std::future::pending::<()>()).await;
        assert_eq!(stalled, None);
    }
}
