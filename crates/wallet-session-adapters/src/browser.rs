//! `window.ethereum` transport for wasm32 builds.

use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};

use wallet_session_core::{EventSink, RawProviderEvent};

use crate::transport::{Eip1193Transport, ListenerId, TransportError};

const EVENTS: [&str; 3] = ["accountsChanged", "chainChanged", "disconnect"];

type Listener = (ListenerId, &'static str, Closure<dyn FnMut(JsValue)>);

thread_local! {
    // JS callbacks are not Send; wasm32 runs them on the one thread anyway.
    static LISTENERS: RefCell<Vec<Listener>> = RefCell::new(Vec::new());
    static NEXT_LISTENER: Cell<u64> = Cell::new(1);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserTransport;

impl BrowserTransport {
    /// Returns a transport only when the page exposes an injected provider.
    pub fn detect() -> Option<Self> {
        browser_provider().ok().map(|_| BrowserTransport)
    }
}

#[async_trait]
impl Eip1193Transport for BrowserTransport {
    fn label(&self) -> &'static str {
        "window.ethereum"
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        let request = json!({ "method": method, "params": params });
        wasm_bindgen_futures::spawn_local(async move {
            let _ = tx.send(wasm_request(request).await);
        });
        rx.await.map_err(|_| TransportError::Closed)?
    }

    fn listen(&self, sink: EventSink) -> Result<ListenerId, TransportError> {
        let provider = browser_provider()?;
        remove_listeners(&provider, |_| true);
        let on = method(&provider, "on").or_else(|_| method(&provider, "addListener"))?;
        let id = NEXT_LISTENER.with(|next| {
            let id = next.get();
            next.set(id + 1);
            ListenerId(id)
        });
        LISTENERS.with(|cell| {
            let mut listeners = cell.borrow_mut();
            for event in EVENTS {
                let sink = sink.clone();
                let callback = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
                    let payload = serde_wasm_bindgen::from_value(value).unwrap_or(Value::Null);
                    sink.emit(RawProviderEvent::new(event, payload));
                });
                on.call2(
                    &provider,
                    &JsValue::from_str(event),
                    callback.as_ref().unchecked_ref(),
                )
                .map_err(|e| TransportError::Http(format!("register {event} failed: {e:?}")))?;
                listeners.push((id, event, callback));
            }
            Ok(id)
        })
    }

    fn unlisten(&self, id: ListenerId) {
        match browser_provider() {
            Ok(provider) => remove_listeners(&provider, |owner| owner == id),
            Err(_) => LISTENERS.with(|cell| cell.borrow_mut().retain(|(owner, _, _)| *owner != id)),
        }
    }
}

/// Detaches and drops every registered callback owned by a matching id.
fn remove_listeners(provider: &JsValue, matches: impl Fn(ListenerId) -> bool) {
    let off = method(provider, "removeListener").ok();
    LISTENERS.with(|cell| {
        cell.borrow_mut().retain(|(owner, event, callback)| {
            if !matches(*owner) {
                return true;
            }
            if let Some(off) = &off {
                let _ = off.call2(
                    provider,
                    &JsValue::from_str(event),
                    callback.as_ref().unchecked_ref(),
                );
            }
            false
        });
    });
}

async fn wasm_request(request: Value) -> Result<Value, TransportError> {
    let provider = browser_provider()?;
    let request_fn = method(&provider, "request")?;
    let request_js = serde_wasm_bindgen::to_value(&request)
        .map_err(|e| TransportError::Http(format!("failed to encode request: {e}")))?;
    let promise = request_fn
        .call1(&provider, &request_js)
        .map_err(|e| TransportError::Http(format!("provider request dispatch failed: {e:?}")))?
        .dyn_into::<js_sys::Promise>()
        .map_err(|_| TransportError::Http("provider request did not return a Promise".to_owned()))?;
    match wasm_bindgen_futures::JsFuture::from(promise).await {
        Ok(result) => serde_wasm_bindgen::from_value(result)
            .map_err(|e| TransportError::Http(format!("failed to decode response: {e}"))),
        Err(err) => {
            let err: Value = serde_wasm_bindgen::from_value(err).unwrap_or(Value::Null);
            Err(TransportError::from_rpc_value(&err))
        }
    }
}

fn browser_provider() -> Result<JsValue, TransportError> {
    let window = web_sys::window().ok_or(TransportError::Closed)?;
    let provider = js_sys::Reflect::get(&window.into(), &JsValue::from_str("ethereum"))
        .map_err(|e| TransportError::Http(format!("read window.ethereum failed: {e:?}")))?;
    if provider.is_null() || provider.is_undefined() {
        return Err(TransportError::Unsupported("window.ethereum missing".to_owned()));
    }
    Ok(provider)
}

fn method(target: &JsValue, key: &str) -> Result<js_sys::Function, TransportError> {
    js_sys::Reflect::get(target, &JsValue::from_str(key))
        .ok()
        .and_then(|v| v.dyn_into::<js_sys::Function>().ok())
        .ok_or_else(|| TransportError::Unsupported(format!("window.ethereum.{key} is unavailable")))
}
