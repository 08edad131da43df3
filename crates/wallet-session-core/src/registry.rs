use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;

use crate::domain::{ConnectedIdentity, ProviderDescriptor, ProviderKind};
use crate::error::SessionError;
use crate::ports::{AdapterFactory, ChoiceStorePort, ChooserPort, EventSink, ProviderAdapter};

/// How the caller wants the transport picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Explicit(ProviderKind),
    /// Persisted choice first, falling back to the chooser.
    Auto,
    /// Silent reconnection through the persisted choice only.
    Restore,
}

impl Selection {
    pub fn requested_kind(self) -> Option<ProviderKind> {
        match self {
            Selection::Explicit(kind) => Some(kind),
            Selection::Auto | Selection::Restore => None,
        }
    }
}

/// Resolves which adapter to use and owns the persisted choice.
///
/// Everything is constructor-injected; there is no process-wide modal
/// instance.
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
    factory: Arc<dyn AdapterFactory>,
    chooser: Arc<dyn ChooserPort>,
    choices: Arc<dyn ChoiceStorePort>,
}

impl ProviderRegistry {
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        factory: Arc<dyn AdapterFactory>,
        chooser: Arc<dyn ChooserPort>,
        choices: Arc<dyn ChoiceStorePort>,
    ) -> Self {
        Self {
            descriptors,
            factory,
            chooser,
            choices,
        }
    }

    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, kind: ProviderKind) -> Result<&ProviderDescriptor, SessionError> {
        self.descriptors
            .iter()
            .find(|d| d.kind == kind)
            .ok_or_else(|| SessionError::NotDetected(format!("no {kind} provider configured")))
    }

    pub fn build(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, SessionError> {
        self.factory.create(self.descriptor(kind)?)
    }

    pub fn modal(&self) -> Arc<dyn ProviderAdapter> {
        Arc::new(ModalAdapter::new(
            self.descriptors.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.chooser),
        ))
    }

    /// Last successfully used provider, if one is stored and still known.
    pub fn persisted_choice(&self) -> Option<ProviderKind> {
        let raw = match self.choices.load() {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read persisted wallet choice");
                return None;
            }
        };
        match raw.parse::<ProviderKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!(choice = %raw, error = %e, "ignoring unknown persisted wallet choice");
                None
            }
        }
    }

    pub fn remember(&self, kind: ProviderKind) {
        if let Err(e) = self.choices.save(kind.id()) {
            tracing::warn!(provider = %kind, error = %e, "failed to persist wallet choice");
        }
    }

    pub fn forget(&self) {
        if let Err(e) = self.choices.clear() {
            tracing::warn!(error = %e, "failed to clear persisted wallet choice");
        }
    }

    /// Builds and connects an adapter for `selection`.
    ///
    /// `on_adapter` sees every adapter before its handshake starts and returns
    /// false once the surrounding attempt has been cancelled, which stops any
    /// further fallback.
    pub async fn select_and_connect<F>(
        &self,
        selection: Selection,
        on_adapter: F,
    ) -> Result<(Arc<dyn ProviderAdapter>, ConnectedIdentity), SessionError>
    where
        F: Fn(&Arc<dyn ProviderAdapter>) -> bool + Send + Sync,
    {
        match selection {
            Selection::Explicit(kind) => self.connect_with(self.build(kind)?, &on_adapter).await,
            Selection::Restore => {
                let kind = self.persisted_choice().ok_or_else(|| {
                    SessionError::ConnectFailure("no persisted wallet choice".to_owned())
                })?;
                self.connect_with(self.build(kind)?, &on_adapter).await
            }
            Selection::Auto => {
                if let Some(kind) = self.persisted_choice() {
                    let attempt = match self.build(kind) {
                        Ok(adapter) => self.connect_with(adapter, &on_adapter).await,
                        Err(e) => Err(e),
                    };
                    match attempt {
                        Ok(connected) => return Ok(connected),
                        Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                        Err(e) => tracing::warn!(
                            provider = %kind,
                            error = %e,
                            "cached wallet failed to reconnect; presenting chooser"
                        ),
                    }
                }
                self.connect_with(self.modal(), &on_adapter).await
            }
        }
    }

    async fn connect_with<F>(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
        on_adapter: &F,
    ) -> Result<(Arc<dyn ProviderAdapter>, ConnectedIdentity), SessionError>
    where
        F: Fn(&Arc<dyn ProviderAdapter>) -> bool + Send + Sync,
    {
        if !on_adapter(&adapter) {
            teardown(adapter.as_ref()).await;
            return Err(SessionError::Cancelled);
        }
        match adapter.connect().await {
            Ok(identity) => Ok((adapter, identity)),
            Err(e) => {
                teardown(adapter.as_ref()).await;
                Err(e)
            }
        }
    }
}

/// Best-effort adapter release. Failures are logged and swallowed.
pub(crate) async fn teardown(adapter: &dyn ProviderAdapter) {
    if let Err(e) = adapter.disconnect().await {
        tracing::warn!(adapter = adapter.name(), error = %e, "adapter teardown failed; ignoring");
    }
}

/// Adapter that lets the chooser pick one of the concrete transports and then
/// delegates everything to it.
pub struct ModalAdapter {
    descriptors: Vec<ProviderDescriptor>,
    factory: Arc<dyn AdapterFactory>,
    chooser: Arc<dyn ChooserPort>,
    inner: Mutex<Option<Arc<dyn ProviderAdapter>>>,
}

impl ModalAdapter {
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        factory: Arc<dyn AdapterFactory>,
        chooser: Arc<dyn ChooserPort>,
    ) -> Self {
        Self {
            descriptors,
            factory,
            chooser,
            inner: Mutex::new(None),
        }
    }

    fn inner(&self) -> Result<Option<Arc<dyn ProviderAdapter>>, SessionError> {
        let g = self
            .inner
            .lock()
            .map_err(|e| SessionError::Transport(format!("modal lock poisoned: {e}")))?;
        Ok(g.clone())
    }

    fn active(&self) -> Result<Arc<dyn ProviderAdapter>, SessionError> {
        self.inner()?.ok_or(SessionError::NoActiveSession)
    }
}

#[async_trait]
impl ProviderAdapter for ModalAdapter {
    fn name(&self) -> &'static str {
        "modal"
    }

    async fn connect(&self) -> Result<ConnectedIdentity, SessionError> {
        let kind = self
            .chooser
            .choose(&self.descriptors)
            .await?
            .ok_or_else(|| SessionError::ConnectFailure("wallet chooser dismissed".to_owned()))?;
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.kind == kind)
            .ok_or_else(|| SessionError::NotDetected(format!("chooser picked unknown {kind}")))?;
        let adapter = self.factory.create(descriptor)?;
        {
            let mut g = self
                .inner
                .lock()
                .map_err(|e| SessionError::Transport(format!("modal lock poisoned: {e}")))?;
            *g = Some(Arc::clone(&adapter));
        }
        tracing::info!(provider = %kind, "wallet chooser selected provider");
        adapter.connect().await
    }

    fn subscribe(&self, sink: EventSink) -> Result<(), SessionError> {
        self.active()?.subscribe(sink)
    }

    async fn sign_message(&self, signer: Address, message: &str) -> Result<Bytes, SessionError> {
        self.active()?.sign_message(signer, message).await
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let taken = match self.inner.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(adapter) => adapter.disconnect().await,
            None => Ok(()),
        }
    }
}
