use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

/// Transport family behind an adapter. The string id is what gets persisted
/// as the cached provider choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "injected")]
    Injected,
    #[serde(rename = "walletconnect")]
    Bridge,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Injected, ProviderKind::Bridge];

    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::Injected => "injected",
            ProviderKind::Bridge => "walletconnect",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ProviderKind {
    type Err = SessionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "injected" | "metamask" => Ok(ProviderKind::Injected),
            "walletconnect" | "bridge" => Ok(ProviderKind::Bridge),
            other => Err(SessionError::Unparsable(format!(
                "unknown provider kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOptions {
    pub rpc: BTreeMap<u64, String>,
    pub bridge_url: String,
    pub qrcode: bool,
}

impl BridgeOptions {
    pub fn rpc_endpoint(&self, chain_id: &ChainId) -> Option<&str> {
        chain_id
            .as_u64()
            .and_then(|id| self.rpc.get(&id))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    Injected,
    Bridge(BridgeOptions),
}

/// Static description of one selectable transport, loaded once at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub label: String,
    pub transport: TransportConfig,
}

impl ProviderDescriptor {
    pub fn injected(label: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Injected,
            label: label.into(),
            transport: TransportConfig::Injected,
        }
    }

    pub fn bridge(label: impl Into<String>, options: BridgeOptions) -> Self {
        Self {
            kind: ProviderKind::Bridge,
            label: label.into(),
            transport: TransportConfig::Bridge(options),
        }
    }

    pub fn id(&self) -> &'static str {
        self.kind.id()
    }
}

/// Chain identity normalized from whatever the transport reported.
///
/// Values that cannot be read as a number are kept verbatim in `Unknown` so
/// that they stay visible to whoever is debugging the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainId {
    Known(u64),
    Unknown(String),
}

impl ChainId {
    /// Normalizes a raw JSON chain value (number, hex string or decimal string).
    /// Returns `None` only when there is no value at all.
    pub fn normalize(raw: &Value) -> Option<Self> {
        match raw {
            Value::Null => None,
            Value::Number(n) => {
                if let Some(id) = n.as_u64() {
                    return Some(ChainId::Known(id));
                }
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 => {
                        Some(ChainId::Known(f as u64))
                    }
                    _ => Some(ChainId::Unknown(n.to_string())),
                }
            }
            Value::String(s) => Some(
                parse_chain_id_str(s)
                    .map(ChainId::Known)
                    .unwrap_or_else(|_| ChainId::Unknown(s.clone())),
            ),
            other => Some(ChainId::Unknown(other.to_string())),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ChainId::Known(id) => Some(*id),
            ChainId::Unknown(_) => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ChainId::Unknown(_))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainId::Known(id) => write!(f, "{id}"),
            ChainId::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId::Known(id)
    }
}

/// Strict chain id parse: `0x`-prefixed hex or plain decimal.
pub fn parse_chain_id_str(raw: &str) -> Result<u64, SessionError> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
            .map_err(|e| SessionError::Unparsable(format!("invalid hex chain id {raw:?}: {e}")))
    } else {
        trimmed
            .parse()
            .map_err(|e| SessionError::Unparsable(format!("invalid chain id {raw:?}: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Display-only status for a disconnected session that carries a transient
    /// error. The state machine itself never rests here.
    Erroring,
}

/// Authoritative record of the wallet connection.
///
/// Fields are private: `address` and `chain_id` are present exactly when the
/// status is `Connected`, and only the state machine builds values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    status: ConnectionStatus,
    address: Option<Address>,
    chain_id: Option<ChainId>,
    provider_kind: Option<ProviderKind>,
}

impl Session {
    pub(crate) fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            address: None,
            chain_id: None,
            provider_kind: None,
        }
    }

    pub(crate) fn connecting(requested: Option<ProviderKind>) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            address: None,
            chain_id: None,
            provider_kind: requested,
        }
    }

    pub(crate) fn connected(identity: ConnectedIdentity) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            address: Some(identity.address),
            chain_id: Some(identity.chain_id),
            provider_kind: Some(identity.provider_kind),
        }
    }

    pub(crate) fn set_address(&mut self, address: Address) {
        debug_assert_eq!(self.status, ConnectionStatus::Connected);
        self.address = Some(address);
    }

    pub(crate) fn set_chain_id(&mut self, chain_id: ChainId) {
        debug_assert_eq!(self.status, ConnectionStatus::Connected);
        self.chain_id = Some(chain_id);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn chain_id(&self) -> Option<&ChainId> {
        self.chain_id.as_ref()
    }

    pub fn provider_kind(&self) -> Option<ProviderKind> {
        self.provider_kind
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// `(address present) == (chain present) == (status == Connected)`.
    pub fn is_consistent(&self) -> bool {
        let connected = self.is_connected();
        self.address.is_some() == connected && self.chain_id.is_some() == connected
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// What a successful adapter handshake resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedIdentity {
    pub address: Address,
    pub chain_id: ChainId,
    pub provider_kind: ProviderKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginChallenge {
    pub address: Address,
    pub chain_id: ChainId,
    pub message: String,
    pub signature: Bytes,
    pub issued_at_ms: TimestampMs,
}

/// Read-only state published to the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionView {
    pub session: Session,
    pub error: Option<String>,
    pub busy: bool,
}

impl SessionView {
    pub fn display_status(&self) -> ConnectionStatus {
        match self.session.status() {
            ConnectionStatus::Disconnected if self.error.is_some() => ConnectionStatus::Erroring,
            status => status,
        }
    }
}
