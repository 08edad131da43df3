pub mod domain;
pub mod error;
pub mod manager;
pub mod ports;
pub mod reconciler;
pub mod registry;
pub mod signing;
pub mod state_machine;

pub use domain::{
    parse_chain_id_str, BridgeOptions, ChainId, ConnectedIdentity, ConnectionStatus,
    LoginChallenge, ProviderDescriptor, ProviderKind, Session, SessionView, TimestampMs,
    TransportConfig,
};
pub use error::SessionError;
pub use manager::SessionManager;
pub use ports::{
    AdapterFactory, ChoiceStorePort, ChooserPort, ClockPort, EventSink, ProviderAdapter,
    QueuedEvent, RawProviderEvent,
};
pub use reconciler::{EventReconciler, SessionEvent};
pub use registry::{ModalAdapter, ProviderRegistry, Selection};
pub use signing::SigningService;
pub use state_machine::{
    session_transition, AccountsOutcome, ConnectTicket, SessionAction, SessionStateMachine,
    StateTransition,
};
