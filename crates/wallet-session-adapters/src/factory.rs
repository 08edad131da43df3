use std::sync::Arc;
use std::time::Duration;

use wallet_session_core::{
    AdapterFactory, ProviderAdapter, ProviderDescriptor, SessionError, TransportConfig,
};

use crate::config::SessionAdapterConfig;
use crate::deterministic::DevWallet;
use crate::eip1193::{HttpProxyTransport, InjectedAdapter};
use crate::transport::Eip1193Transport;
use crate::wc::{BridgeAdapter, BridgeTransport, LogPairingDisplay, LoopbackBridge, PairingDisplay};

/// Builds a fresh adapter per connect attempt from the configured
/// transports.
pub struct DefaultAdapterFactory {
    injected: Option<Arc<dyn Eip1193Transport>>,
    bridge: Arc<dyn BridgeTransport>,
    display: Arc<dyn PairingDisplay>,
    pairing_timeout: Duration,
}

impl DefaultAdapterFactory {
    pub fn new(
        injected: Option<Arc<dyn Eip1193Transport>>,
        bridge: Arc<dyn BridgeTransport>,
        display: Arc<dyn PairingDisplay>,
        pairing_timeout: Duration,
    ) -> Self {
        Self {
            injected,
            bridge,
            display,
            pairing_timeout,
        }
    }

    /// Picks the injected transport in order of preference: development
    /// wallet, HTTP proxy, then the browser provider on wasm32. The bridge
    /// side is an in-process loopback, answered by the development wallet
    /// when one is configured.
    pub fn from_config(config: &SessionAdapterConfig) -> Result<Self, SessionError> {
        let dev_wallet = config
            .dev_wallet_key
            .as_deref()
            .map(|key| DevWallet::from_key(key, config.dev_wallet_chain_id))
            .transpose()?
            .map(Arc::new);

        let injected: Option<Arc<dyn Eip1193Transport>> = match (&dev_wallet, &config.injected_proxy_url) {
            (Some(wallet), _) => Some(Arc::clone(wallet) as Arc<dyn Eip1193Transport>),
            (None, Some(url)) => Some(Arc::new(
                HttpProxyTransport::new(url.clone(), config.request_timeout_ms)
                    .map_err(|e| SessionError::Transport(e.to_string()))?,
            )),
            (None, None) => detect_browser(),
        };
        match &injected {
            Some(t) => tracing::info!(transport = t.label(), "injected wallet transport ready"),
            None => tracing::info!("no injected wallet transport configured"),
        }

        let bridge = match dev_wallet {
            Some(wallet) => LoopbackBridge::with_peer(wallet, true),
            None => LoopbackBridge::new(),
        };

        Ok(Self::new(
            injected,
            Arc::new(bridge),
            Arc::new(LogPairingDisplay),
            Duration::from_millis(config.pairing_timeout_ms),
        ))
    }

    pub fn with_display(mut self, display: Arc<dyn PairingDisplay>) -> Self {
        self.display = display;
        self
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Arc<dyn ProviderAdapter>, SessionError> {
        match &descriptor.transport {
            TransportConfig::Injected => Ok(Arc::new(match &self.injected {
                Some(transport) => InjectedAdapter::new(Arc::clone(transport)),
                None => InjectedAdapter::undetected(),
            })),
            TransportConfig::Bridge(options) => Ok(Arc::new(BridgeAdapter::new(
                options.clone(),
                Arc::clone(&self.bridge),
                Arc::clone(&self.display),
                self.pairing_timeout,
            ))),
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn detect_browser() -> Option<Arc<dyn Eip1193Transport>> {
    crate::browser::BrowserTransport::detect().map(|t| Arc::new(t) as Arc<dyn Eip1193Transport>)
}

#[cfg(not(target_arch = "wasm32"))]
fn detect_browser() -> Option<Arc<dyn Eip1193Transport>> {
    None
}
