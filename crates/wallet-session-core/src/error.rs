use thiserror::Error;

use crate::domain::ConnectionStatus;
use crate::state_machine::SessionAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("wallet transport not detected: {0}")]
    NotDetected(String),
    #[error("wallet connect failed: {0}")]
    ConnectFailure(String),
    #[error("a wallet connection is already in progress")]
    AlreadyConnecting,
    #[error("connect attempt cancelled")]
    Cancelled,
    #[error("no active wallet session")]
    NoActiveSession,
    #[error("signing rejected: {0}")]
    SigningRejected(String),
    #[error("unparsable value: {0}")]
    Unparsable(String),
    #[error("illegal session transition: {action:?} from {from:?}")]
    IllegalTransition {
        from: ConnectionStatus,
        action: SessionAction,
    },
    #[error("subscription error: {0}")]
    Subscription(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("transport error: {0}")]
    Transport(String),
}
