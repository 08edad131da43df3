use std::str::FromStr;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use serde_json::{json, Value};

use wallet_session_core::{EventSink, RawProviderEvent, SessionError};

use crate::transport::{Eip1193Transport, ListenerId, TransportError, UNAUTHORIZED};

/// Well-known development key (first account of the usual local dev chains).
pub const DEV_WALLET_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// In-process EIP-1193 wallet backed by a local private key.
///
/// Answers the requests a login flow makes and lets tests and demos push
/// provider events the way a browser extension would.
#[derive(Debug, Clone)]
pub struct DevWallet {
    signer: PrivateKeySigner,
    state: Arc<Mutex<DevWalletState>>,
}

#[derive(Debug)]
struct DevWalletState {
    accounts: Vec<Address>,
    chain_id: u64,
    reject_next: bool,
    next_listener: u64,
    listener: Option<(ListenerId, EventSink)>,
}

impl DevWallet {
    /// Accepts the key with or without the `0x` prefix.
    pub fn from_key(private_key_hex: &str, chain_id: u64) -> Result<Self, SessionError> {
        let raw = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or(private_key_hex.trim());
        let signer = PrivateKeySigner::from_str(raw)
            .map_err(|e| SessionError::ConnectFailure(format!("invalid dev wallet key: {e}")))?;
        let accounts = vec![signer.address()];
        Ok(Self {
            signer,
            state: Arc::new(Mutex::new(DevWalletState {
                accounts,
                chain_id,
                reject_next: false,
                next_listener: 1,
                listener: None,
            })),
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.lock().map(|g| g.chain_id).unwrap_or_default()
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.lock().map(|g| g.accounts.clone()).unwrap_or_default()
    }

    pub fn is_listening(&self) -> bool {
        self.lock().map(|g| g.listener.is_some()).unwrap_or(false)
    }

    /// Makes the next request fail the way a user clicking "reject" does.
    pub fn reject_next_request(&self) -> Result<(), SessionError> {
        self.lock()?.reject_next = true;
        Ok(())
    }

    pub fn debug_inject_accounts_changed(&self, accounts: Vec<Address>) -> Result<bool, SessionError> {
        let payload = json!(accounts.iter().map(|a| a.to_string()).collect::<Vec<_>>());
        let sink = {
            let mut g = self.lock()?;
            g.accounts = accounts;
            g.sink()
        };
        Ok(deliver(sink, "accountsChanged", payload))
    }

    pub fn debug_inject_chain_changed(&self, chain_id: u64) -> Result<bool, SessionError> {
        let sink = {
            let mut g = self.lock()?;
            g.chain_id = chain_id;
            g.sink()
        };
        Ok(deliver(sink, "chainChanged", json!(format!("{chain_id:#x}"))))
    }

    pub fn debug_inject_disconnect(&self, code: i64, message: &str) -> Result<bool, SessionError> {
        let sink = self.lock()?.sink();
        Ok(deliver(
            sink,
            "disconnect",
            json!({ "code": code, "message": message }),
        ))
    }

    /// Signs `message` as EIP-191 personal message with the wallet key.
    pub fn sign_personal(&self, message: &[u8]) -> Result<Bytes, TransportError> {
        let signature = self
            .signer
            .sign_message_sync(message)
            .map_err(|e| TransportError::Rpc {
                code: -32603,
                message: format!("dev wallet signing failed: {e}"),
            })?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DevWalletState>, SessionError> {
        self.state
            .lock()
            .map_err(|e| SessionError::Transport(format!("dev wallet lock poisoned: {e}")))
    }

    fn personal_sign(&self, params: &Value) -> Result<Value, TransportError> {
        let payload = params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("personal_sign expects [message, address]"))?;
        let account: Address = params
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("personal_sign expects [message, address]"))?
            .parse()
            .map_err(|e| invalid_params(&format!("invalid signer address: {e}")))?;
        if account != self.signer.address() {
            return Err(TransportError::Rpc {
                code: UNAUTHORIZED,
                message: format!("account {account} is not managed by this wallet"),
            });
        }
        let message = match payload.strip_prefix("0x") {
            Some(hex) => alloy::hex::decode(hex)
                .map_err(|e| invalid_params(&format!("invalid message hex: {e}")))?,
            None => payload.as_bytes().to_vec(),
        };
        let signature = self.sign_personal(&message)?;
        Ok(json!(signature.to_string()))
    }
}

#[async_trait]
impl Eip1193Transport for DevWallet {
    fn label(&self) -> &'static str {
        "dev-wallet"
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let (accounts, chain_id) = {
            let mut g = self.state.lock().map_err(|_| TransportError::Closed)?;
            if std::mem::take(&mut g.reject_next) {
                return Err(TransportError::Rejected(format!("{method} rejected")));
            }
            (g.accounts.clone(), g.chain_id)
        };
        match method {
            "eth_requestAccounts" | "eth_accounts" => Ok(json!(accounts
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>())),
            "eth_chainId" => Ok(json!(format!("{chain_id:#x}"))),
            "net_version" => Ok(json!(chain_id.to_string())),
            "personal_sign" => self.personal_sign(&params),
            other => Err(TransportError::from_rpc(
                crate::transport::UNSUPPORTED_METHOD,
                format!("dev wallet does not support {other}"),
            )),
        }
    }

    fn listen(&self, sink: EventSink) -> Result<ListenerId, TransportError> {
        let mut g = self.state.lock().map_err(|_| TransportError::Closed)?;
        let id = ListenerId(g.next_listener);
        g.next_listener += 1;
        g.listener = Some((id, sink));
        Ok(id)
    }

    fn unlisten(&self, id: ListenerId) {
        let mut g = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if g.listener.as_ref().is_some_and(|(current, _)| *current == id) {
            g.listener = None;
        }
    }
}

impl DevWalletState {
    fn sink(&self) -> Option<EventSink> {
        self.listener.as_ref().map(|(_, sink)| sink.clone())
    }
}

fn deliver(sink: Option<EventSink>, event: &str, payload: Value) -> bool {
    match sink {
        Some(sink) => sink.emit(RawProviderEvent::new(event, payload)),
        None => {
            tracing::debug!(event, "dev wallet event with no listener");
            false
        }
    }
}

fn invalid_params(message: &str) -> TransportError {
    TransportError::Rpc {
        code: -32602,
        message: message.to_owned(),
    }
}
