use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use wallet_session_core::{EventSink, SessionError};

/// EIP-1193 user rejection.
pub const USER_REJECTED: i64 = 4001;
/// EIP-1193 unauthorized account.
pub const UNAUTHORIZED: i64 = 4100;
/// EIP-1193 unsupported method.
pub const UNSUPPORTED_METHOD: i64 = 4200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("user rejected the request: {0}")]
    Rejected(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Classifies a JSON-RPC error object the way wallets report them.
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            USER_REJECTED => TransportError::Rejected(message),
            UNSUPPORTED_METHOD => TransportError::Unsupported(message),
            code => TransportError::Rpc { code, message },
        }
    }

    pub fn from_rpc_value(err: &Value) -> Self {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| err.to_string());
        Self::from_rpc(code, message)
    }

    pub fn into_connect_error(self) -> SessionError {
        SessionError::ConnectFailure(self.to_string())
    }

    pub fn into_signing_error(self) -> SessionError {
        SessionError::SigningRejected(self.to_string())
    }
}

/// One registration made through [`Eip1193Transport::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The request/subscribe contract of an EIP-1193 provider.
///
/// Implementations deliver `accountsChanged`, `chainChanged` and `disconnect`
/// to the registered sink as soon as the provider calls back.
#[async_trait]
pub trait Eip1193Transport: Send + Sync {
    fn label(&self) -> &'static str;

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Registers the event sink. A later registration replaces earlier ones.
    fn listen(&self, sink: EventSink) -> Result<ListenerId, TransportError>;

    /// Removes the registration `id`. Ids already replaced or removed are
    /// ignored, so a stale owner never tears down a newer listener.
    fn unlisten(&self, id: ListenerId);
}
