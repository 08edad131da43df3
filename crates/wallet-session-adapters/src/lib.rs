#[cfg(target_arch = "wasm32")]
pub mod browser;
pub mod choice_store;
pub mod chooser;
pub mod clock;
pub mod config;
pub mod deterministic;
pub mod eip1193;
pub mod factory;
pub mod transport;
pub mod wc;

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserTransport;
#[cfg(target_arch = "wasm32")]
pub use choice_store::LocalStorageChoiceStore;
pub use choice_store::{FileChoiceStore, MemoryChoiceStore};
pub use chooser::FixedChooser;
pub use clock::SystemClockAdapter;
pub use config::SessionAdapterConfig;
pub use deterministic::{DevWallet, DEV_WALLET_KEY};
pub use eip1193::{HttpProxyTransport, InjectedAdapter};
pub use factory::DefaultAdapterFactory;
pub use transport::{Eip1193Transport, ListenerId, TransportError};
pub use wc::{
    ApprovedSession, BridgeAdapter, BridgeTransport, LogPairingDisplay, LoopbackBridge, Pairing,
    PairingDisplay,
};
