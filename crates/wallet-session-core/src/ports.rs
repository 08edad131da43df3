use std::sync::Arc;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::{ConnectedIdentity, ProviderDescriptor, ProviderKind};
use crate::error::SessionError;

/// Event exactly as a transport reported it. Payload shape varies per
/// transport; the reconciler is the only place that interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProviderEvent {
    pub event: String,
    pub payload: Value,
}

impl RawProviderEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// A raw event stamped with the session epoch of the adapter that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub epoch: u64,
    pub event: RawProviderEvent,
}

/// Handle an adapter pushes its provider events into. Sinks are cheap to
/// clone and never block.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<QueuedEvent>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<QueuedEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the session manager has gone away.
    pub fn emit(&self, event: RawProviderEvent) -> bool {
        self.tx
            .send(QueuedEvent {
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Uniform contract over one wallet transport.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<ConnectedIdentity, SessionError>;

    /// Registers the single event handler for the lifetime of the adapter.
    fn subscribe(&self, sink: EventSink) -> Result<(), SessionError>;

    async fn sign_message(&self, signer: Address, message: &str) -> Result<Bytes, SessionError>;

    /// Releases listeners and the underlying handle. Callers treat failures as
    /// best-effort and never propagate them.
    async fn disconnect(&self) -> Result<(), SessionError>;
}

pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<dyn ProviderAdapter>, SessionError>;
}

/// Generic wallet chooser UI. `Ok(None)` means the user dismissed it.
#[async_trait]
pub trait ChooserPort: Send + Sync {
    async fn choose(
        &self,
        options: &[ProviderDescriptor],
    ) -> Result<Option<ProviderKind>, SessionError>;
}

/// Durable storage for the last successfully used provider id.
pub trait ChoiceStorePort: Send + Sync {
    fn load(&self) -> Result<Option<String>, SessionError>;
    fn save(&self, provider_id: &str) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

pub trait ClockPort: Send + Sync {
    fn now_ms(&self) -> Result<u64, SessionError>;
}
