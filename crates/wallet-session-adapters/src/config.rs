use std::collections::BTreeMap;
use std::path::PathBuf;

use wallet_session_core::{parse_chain_id_str, BridgeOptions, ProviderDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAdapterConfig {
    /// Chain id to RPC endpoint, used by the bridge transport.
    pub rpc: BTreeMap<u64, String>,
    pub bridge_url: String,
    pub qrcode: bool,
    pub pairing_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub injected_proxy_url: Option<String>,
    pub dev_wallet_key: Option<String>,
    pub dev_wallet_chain_id: u64,
    pub choice_store_path: PathBuf,
}

impl Default for SessionAdapterConfig {
    fn default() -> Self {
        Self {
            rpc: BTreeMap::from([
                (1, "https://cloudflare-eth.com".to_owned()),
                (3, "https://rpc.ankr.com/eth_ropsten".to_owned()),
                (5, "https://rpc.ankr.com/eth_goerli".to_owned()),
            ]),
            bridge_url: "https://bridge.walletconnect.org".to_owned(),
            qrcode: true,
            pairing_timeout_ms: 120_000,
            request_timeout_ms: 15_000,
            injected_proxy_url: None,
            dev_wallet_key: None,
            dev_wallet_chain_id: 1,
            choice_store_path: PathBuf::from("wallet-session-choice.json"),
        }
    }
}

impl SessionAdapterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Malformed values are logged and
    /// the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("WALLET_SESSION_RPC") {
            let parsed = parse_rpc_map(&raw);
            if parsed.is_empty() {
                tracing::warn!(value = %raw, "WALLET_SESSION_RPC has no usable entries; keeping defaults");
            } else {
                cfg.rpc = parsed;
            }
        }
        if let Some(url) = get("WALLET_SESSION_BRIDGE_URL") {
            cfg.bridge_url = url.trim().to_owned();
        }
        if let Some(raw) = get("WALLET_SESSION_QRCODE") {
            match parse_flag(&raw) {
                Some(flag) => cfg.qrcode = flag,
                None => tracing::warn!(value = %raw, "invalid WALLET_SESSION_QRCODE; keeping default"),
            }
        }
        if let Some(raw) = get("WALLET_SESSION_PAIRING_TIMEOUT_MS") {
            match raw.trim().parse() {
                Ok(ms) => cfg.pairing_timeout_ms = ms,
                Err(e) => tracing::warn!(value = %raw, error = %e, "invalid WALLET_SESSION_PAIRING_TIMEOUT_MS"),
            }
        }
        if let Some(raw) = get("WALLET_SESSION_REQUEST_TIMEOUT_MS") {
            match raw.trim().parse() {
                Ok(ms) => cfg.request_timeout_ms = ms,
                Err(e) => tracing::warn!(value = %raw, error = %e, "invalid WALLET_SESSION_REQUEST_TIMEOUT_MS"),
            }
        }
        cfg.injected_proxy_url = get("WALLET_SESSION_INJECTED_PROXY_URL").map(|v| v.trim().to_owned());
        cfg.dev_wallet_key = get("WALLET_SESSION_DEV_KEY").map(|v| v.trim().to_owned());
        if let Some(raw) = get("WALLET_SESSION_DEV_CHAIN_ID") {
            match parse_chain_id_str(&raw) {
                Ok(id) => cfg.dev_wallet_chain_id = id,
                Err(e) => tracing::warn!(value = %raw, error = %e, "invalid WALLET_SESSION_DEV_CHAIN_ID"),
            }
        }
        if let Some(path) = get("WALLET_SESSION_CHOICE_PATH") {
            cfg.choice_store_path = PathBuf::from(path.trim());
        }
        cfg
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            rpc: self.rpc.clone(),
            bridge_url: self.bridge_url.clone(),
            qrcode: self.qrcode,
        }
    }

    /// Selectable transports, in the order the chooser lists them.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        vec![
            ProviderDescriptor::injected("Browser wallet"),
            ProviderDescriptor::bridge("WalletConnect", self.bridge_options()),
        ]
    }
}

/// `1=https://a;5=https://b`. Entries that do not parse are skipped.
pub fn parse_rpc_map(raw: &str) -> BTreeMap<u64, String> {
    let mut out = BTreeMap::new();
    for entry in raw.split([';', ',']).map(str::trim).filter(|e| !e.is_empty()) {
        let Some((chain, url)) = entry.split_once('=') else {
            tracing::warn!(%entry, "rpc entry must look like <chain>=<url>");
            continue;
        };
        let url = url.trim();
        match parse_chain_id_str(chain) {
            Ok(id) if !url.is_empty() => {
                out.insert(id, url.to_owned());
            }
            Ok(_) => tracing::warn!(%entry, "rpc entry has an empty url"),
            Err(e) => tracing::warn!(%entry, error = %e, "rpc entry has an invalid chain id"),
        }
    }
    out
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_map_parsing_skips_bad_entries() {
        let map = parse_rpc_map("1=https://one; 0x5=https://five ;bogus;x=https://nope;10=");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1).map(String::as_str), Some("https://one"));
        assert_eq!(map.get(&5).map(String::as_str), Some("https://five"));
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag("Yes"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
