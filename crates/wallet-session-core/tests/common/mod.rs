#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use wallet_session_core::{
    AdapterFactory, BridgeOptions, ChainId, ChoiceStorePort, ChooserPort, ClockPort,
    ConnectedIdentity, EventSink, ProviderAdapter, ProviderDescriptor, ProviderKind,
    ProviderRegistry, RawProviderEvent, SessionError, SessionManager,
};

pub fn address_a() -> Address {
    "0x1000000000000000000000000000000000000001"
        .parse()
        .expect("valid address a")
}

pub fn address_b() -> Address {
    "0x2000000000000000000000000000000000000002"
        .parse()
        .expect("valid address b")
}

pub fn identity(address: Address, chain_id: u64, kind: ProviderKind) -> ConnectedIdentity {
    ConnectedIdentity {
        address,
        chain_id: ChainId::Known(chain_id),
        provider_kind: kind,
    }
}

#[derive(Clone)]
pub struct MockBehavior {
    pub connect: Result<ConnectedIdentity, SessionError>,
    pub hold: Option<Arc<Notify>>,
    pub sign: Result<Bytes, SessionError>,
    pub sign_hold: Option<Arc<Notify>>,
    pub fail_disconnect: bool,
}

impl MockBehavior {
    pub fn connects_as(identity: ConnectedIdentity) -> Self {
        Self {
            connect: Ok(identity),
            hold: None,
            sign: Ok(Bytes::from(vec![0x1b; 65])),
            sign_hold: None,
            fail_disconnect: false,
        }
    }

    pub fn fails_with(error: SessionError) -> Self {
        Self {
            connect: Err(error),
            hold: None,
            sign: Err(SessionError::NoActiveSession),
            sign_hold: None,
            fail_disconnect: false,
        }
    }
}

pub struct MockAdapter {
    pub kind: ProviderKind,
    behavior: MockBehavior,
    sink: Mutex<Option<EventSink>>,
    pub disconnects: AtomicUsize,
    pub signed: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let g = self.sink.lock().expect("sink lock");
        match g.as_ref() {
            Some(sink) => sink.emit(RawProviderEvent::new(event, payload)),
            None => false,
        }
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<ConnectedIdentity, SessionError> {
        if let Some(hold) = &self.behavior.hold {
            hold.notified().await;
        }
        self.behavior.connect.clone()
    }

    fn subscribe(&self, sink: EventSink) -> Result<(), SessionError> {
        let mut g = self.sink.lock().expect("sink lock");
        if g.is_some() {
            return Err(SessionError::Subscription("already subscribed".to_owned()));
        }
        *g = Some(sink);
        Ok(())
    }

    async fn sign_message(&self, _signer: Address, message: &str) -> Result<Bytes, SessionError> {
        self.signed.lock().expect("signed lock").push(message.to_owned());
        if let Some(hold) = &self.behavior.sign_hold {
            hold.notified().await;
        }
        self.behavior.sign.clone()
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_disconnect {
            return Err(SessionError::Transport("teardown exploded".to_owned()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockFactory {
    behaviors: Mutex<HashMap<ProviderKind, MockBehavior>>,
    created: Mutex<Vec<Arc<MockAdapter>>>,
}

impl MockFactory {
    pub fn with(self, kind: ProviderKind, behavior: MockBehavior) -> Self {
        self.behaviors
            .lock()
            .expect("behaviors lock")
            .insert(kind, behavior);
        self
    }

    pub fn created(&self) -> Vec<Arc<MockAdapter>> {
        self.created.lock().expect("created lock").clone()
    }

    pub fn last(&self, kind: ProviderKind) -> Arc<MockAdapter> {
        self.created()
            .into_iter()
            .rev()
            .find(|a| a.kind == kind)
            .expect("adapter of kind was created")
    }
}

impl AdapterFactory for MockFactory {
    fn create(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<dyn ProviderAdapter>, SessionError> {
        let behavior = self
            .behaviors
            .lock()
            .expect("behaviors lock")
            .get(&descriptor.kind)
            .cloned()
            .ok_or_else(|| SessionError::NotDetected(descriptor.label.clone()))?;
        let adapter = Arc::new(MockAdapter {
            kind: descriptor.kind,
            behavior,
            sink: Mutex::new(None),
            disconnects: AtomicUsize::new(0),
            signed: Mutex::new(Vec::new()),
        });
        self.created
            .lock()
            .expect("created lock")
            .push(Arc::clone(&adapter));
        Ok(adapter)
    }
}

pub struct MockChooser {
    pick: Option<ProviderKind>,
    pub calls: AtomicUsize,
}

impl MockChooser {
    pub fn picking(pick: Option<ProviderKind>) -> Self {
        Self {
            pick,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChooserPort for MockChooser {
    async fn choose(
        &self,
        _options: &[ProviderDescriptor],
    ) -> Result<Option<ProviderKind>, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pick)
    }
}

#[derive(Default)]
pub struct MemoryChoices {
    value: Mutex<Option<String>>,
}

impl MemoryChoices {
    pub fn holding(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_owned())),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.value.lock().expect("choice lock").clone()
    }
}

impl ChoiceStorePort for MemoryChoices {
    fn load(&self) -> Result<Option<String>, SessionError> {
        Ok(self.current())
    }

    fn save(&self, provider_id: &str) -> Result<(), SessionError> {
        *self.value.lock().expect("choice lock") = Some(provider_id.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.value.lock().expect("choice lock") = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicUsize,
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, SessionError> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) as u64 + 1_739_750_400_000)
    }
}

pub fn descriptors() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::injected("Browser wallet"),
        ProviderDescriptor::bridge(
            "WalletConnect",
            BridgeOptions {
                rpc: [(1, "https://cloudflare-eth.com".to_owned())].into(),
                bridge_url: "https://bridge.walletconnect.org".to_owned(),
                qrcode: true,
            },
        ),
    ]
}

pub struct Harness {
    pub manager: SessionManager,
    pub factory: Arc<MockFactory>,
    pub chooser: Arc<MockChooser>,
    pub choices: Arc<MemoryChoices>,
}

pub fn harness(factory: MockFactory, chooser: MockChooser, choices: MemoryChoices) -> Harness {
    let factory = Arc::new(factory);
    let chooser = Arc::new(chooser);
    let choices = Arc::new(choices);
    let registry = ProviderRegistry::new(
        descriptors(),
        factory.clone(),
        chooser.clone(),
        choices.clone(),
    );
    Harness {
        manager: SessionManager::new(registry, Arc::new(TestClock::default())),
        factory,
        chooser,
        choices,
    }
}

/// Yields until `done` holds or the scheduler has had plenty of turns.
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}
