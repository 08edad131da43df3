//! Bridge between the console shell and the session workspace crates.
//! This must remain the only shell-facing boundary for wallet operations.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use wallet_session_adapters::{
    DefaultAdapterFactory, FileChoiceStore, PairingDisplay, SessionAdapterConfig,
    SystemClockAdapter,
};
use wallet_session_core::{
    AdapterFactory, ChoiceStorePort, ChooserPort, ClockPort, LoginChallenge, ProviderKind,
    ProviderRegistry, Session, SessionError, SessionManager, SessionView,
};

#[derive(Clone)]
pub struct SessionBridge {
    manager: SessionManager,
}

impl SessionBridge {
    pub fn new(
        config: &SessionAdapterConfig,
        chooser: Arc<dyn ChooserPort>,
        display: Arc<dyn PairingDisplay>,
    ) -> eyre::Result<Self> {
        let factory = DefaultAdapterFactory::from_config(config)?.with_display(display);
        tracing::info!(path = %config.choice_store_path.display(), "persisting wallet choice");
        Ok(Self::with_parts(
            config,
            Arc::new(factory),
            chooser,
            Arc::new(FileChoiceStore::new(&config.choice_store_path)),
            Arc::new(SystemClockAdapter),
        ))
    }

    pub fn with_parts(
        config: &SessionAdapterConfig,
        factory: Arc<dyn AdapterFactory>,
        chooser: Arc<dyn ChooserPort>,
        choices: Arc<dyn ChoiceStorePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let registry = ProviderRegistry::new(config.descriptors(), factory, chooser, choices);
        Self {
            manager: SessionManager::new(registry, clock),
        }
    }

    /// Starts applying provider events in the background.
    pub fn spawn_event_pump(&self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        tokio::spawn(async move { manager.run_events().await })
    }

    pub async fn restore(&self) -> Result<Option<Session>, SessionError> {
        self.manager.restore().await
    }

    pub async fn connect(&self, kind: Option<ProviderKind>) -> Result<Session, SessionError> {
        self.manager.connect(kind).await
    }

    pub async fn disconnect(&self) -> Session {
        self.manager.disconnect().await
    }

    pub async fn sign_login(&self) -> Result<LoginChallenge, SessionError> {
        self.manager.sign_login_challenge().await
    }

    pub fn view(&self) -> SessionView {
        self.manager.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.manager.subscribe()
    }

    pub fn provider_labels(&self) -> Vec<(ProviderKind, String)> {
        self.manager
            .registry()
            .descriptors()
            .iter()
            .map(|d| (d.kind, d.label.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wallet_session_adapters::{FixedChooser, MemoryChoiceStore, DEV_WALLET_KEY};
    use wallet_session_core::ConnectionStatus;

    fn dev_bridge(pick: Option<ProviderKind>) -> SessionBridge {
        let config = SessionAdapterConfig {
            dev_wallet_key: Some(DEV_WALLET_KEY.to_owned()),
            qrcode: false,
            ..SessionAdapterConfig::default()
        };
        let factory = DefaultAdapterFactory::from_config(&config).expect("factory");
        SessionBridge::with_parts(
            &config,
            Arc::new(factory),
            Arc::new(FixedChooser::new(pick)),
            Arc::new(MemoryChoiceStore::default()),
            Arc::new(SystemClockAdapter),
        )
    }

    #[tokio::test]
    async fn connect_sign_disconnect_through_the_bridge() {
        let bridge = dev_bridge(None);
        let session = bridge
            .connect(Some(ProviderKind::Injected))
            .await
            .expect("connect");
        assert_eq!(session.status(), ConnectionStatus::Connected);

        let challenge = bridge.sign_login().await.expect("sign");
        assert_eq!(Some(challenge.address), session.address());
        assert_eq!(challenge.signature.len(), 65);

        let session = bridge.disconnect().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(bridge.view().session, session);
    }

    #[tokio::test]
    async fn dismissed_chooser_shows_erroring() {
        let bridge = dev_bridge(None);
        let err = bridge.connect(None).await.expect_err("dismissed");
        assert!(matches!(err, SessionError::ConnectFailure(_)));
        assert_eq!(bridge.view().display_status(), ConnectionStatus::Erroring);
    }

    #[test]
    fn labels_follow_configured_descriptors() {
        let labels = dev_bridge(None).provider_labels();
        assert_eq!(
            labels,
            vec![
                (ProviderKind::Injected, "Browser wallet".to_owned()),
                (ProviderKind::Bridge, "WalletConnect".to_owned()),
            ]
        );
    }
}
