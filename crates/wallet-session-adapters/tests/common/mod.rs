#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tiny_http::{Response, Server, StatusCode};

use wallet_session_adapters::{
    DefaultAdapterFactory, DevWallet, Eip1193Transport, FixedChooser, LoopbackBridge,
    MemoryChoiceStore, PairingDisplay, SessionAdapterConfig, DEV_WALLET_KEY,
};
use wallet_session_core::{
    ChoiceStorePort, ClockPort, ProviderKind, ProviderRegistry, SessionError, SessionManager,
};

#[derive(Debug, Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl ClockPort for TestClock {
    fn now_ms(&self) -> Result<u64, SessionError> {
        Ok(self.now.fetch_add(1, Ordering::SeqCst) + 1_739_750_400_000)
    }
}

pub fn dev_wallet(chain_id: u64) -> Arc<DevWallet> {
    Arc::new(DevWallet::from_key(DEV_WALLET_KEY, chain_id).expect("dev wallet"))
}

/// Records what the pairing display was asked to do.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub shown: Mutex<Vec<String>>,
    pub closed: AtomicU64,
}

impl RecordingDisplay {
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().expect("shown lock").clone()
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PairingDisplay for RecordingDisplay {
    fn show(&self, uri: &str) {
        self.shown.lock().expect("shown lock").push(uri.to_owned());
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Rig {
    pub manager: SessionManager,
    pub bridge: LoopbackBridge,
    pub display: Arc<RecordingDisplay>,
    pub choices: Arc<MemoryChoiceStore>,
}

/// Session manager over the real adapters with in-process transports.
pub fn rig(
    injected: Option<Arc<dyn Eip1193Transport>>,
    bridge: LoopbackBridge,
    choices: MemoryChoiceStore,
    pairing_timeout: Duration,
) -> Rig {
    let config = SessionAdapterConfig::default();
    let display = Arc::new(RecordingDisplay::default());
    let choices = Arc::new(choices);
    let factory = DefaultAdapterFactory::new(
        injected,
        Arc::new(bridge.clone()),
        display.clone(),
        pairing_timeout,
    );
    let registry = ProviderRegistry::new(
        config.descriptors(),
        Arc::new(factory),
        Arc::new(FixedChooser::new(Some(ProviderKind::Bridge))),
        choices.clone() as Arc<dyn ChoiceStorePort>,
    );
    Rig {
        manager: SessionManager::new(registry, Arc::new(TestClock::default())),
        bridge,
        display,
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

/// JSON-RPC wallet proxy answering from `answers` by method name. Unknown
/// methods get a -32601 error.
pub fn spawn_rpc_proxy(
    answers: Vec<(&'static str, Value)>,
    calls: Arc<Mutex<Vec<String>>>,
) -> (String, thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").expect("start server");
    let addr = format!("http://{}", server.server_addr());

    let join = thread::spawn(move || {
        for _ in 0..16 {
            let mut req = match server.recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            let mut body = String::new();
            let _ = std::io::Read::read_to_string(req.as_reader(), &mut body);
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let method = parsed
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            if let Ok(mut g) = calls.lock() {
                g.push(method.clone());
            }
            let id = parsed.get("id").cloned().unwrap_or(json!(1));

            let (code, payload) = match answers.iter().find(|(m, _)| *m == method) {
                Some((_, answer)) if answer.get("error").is_some() => (
                    200,
                    json!({ "jsonrpc": "2.0", "id": id, "error": answer["error"] }),
                ),
                Some((_, answer)) => (200, json!({ "jsonrpc": "2.0", "id": id, "result": answer })),
                None => (
                    404,
                    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "method not found" } }),
                ),
            };
            let response =
                Response::from_string(payload.to_string()).with_status_code(StatusCode(code));
            let _ = req.respond(response);
        }
    });

    (addr, join)
}

/// Proxy that holds its first request for `delay` before answering.
pub fn spawn_stalled_proxy(delay: Duration) -> (String, thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").expect("start server");
    let addr = format!("http://{}", server.server_addr());

    let join = thread::spawn(move || {
        if let Ok(req) = server.recv() {
            thread::sleep(delay);
            let _ = req.respond(Response::from_string(
                json!({ "jsonrpc": "2.0", "id": 1, "result": [] }).to_string(),
            ));
        }
    });

    (addr, join)
}
