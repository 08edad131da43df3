use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use wallet_session_core::{ChoiceStorePort, SessionError};

/// On-disk shape of the persisted choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredChoice {
    cached_provider: String,
}

/// Persists the last used provider id as a small JSON file.
#[derive(Debug, Clone)]
pub struct FileChoiceStore {
    path: PathBuf,
}

impl FileChoiceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChoiceStorePort for FileChoiceStore {
    fn load(&self) -> Result<Option<String>, SessionError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::Storage(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let stored: StoredChoice = serde_json::from_str(&raw).map_err(|e| {
            SessionError::Storage(format!("decode {}: {e}", self.path.display()))
        })?;
        Ok(Some(stored.cached_provider))
    }

    fn save(&self, provider_id: &str) -> Result<(), SessionError> {
        let body = serde_json::to_string(&StoredChoice {
            cached_provider: provider_id.to_owned(),
        })
        .map_err(|e| SessionError::Storage(format!("encode choice: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SessionError::Storage(format!("create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(&self.path, body)
            .map_err(|e| SessionError::Storage(format!("write {}: {e}", self.path.display())))
    }

    fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Storage(format!(
                "remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryChoiceStore {
    value: Mutex<Option<String>>,
}

impl MemoryChoiceStore {
    pub fn with_choice(provider_id: &str) -> Self {
        Self {
            value: Mutex::new(Some(provider_id.to_owned())),
        }
    }
}

impl ChoiceStorePort for MemoryChoiceStore {
    fn load(&self) -> Result<Option<String>, SessionError> {
        let g = self
            .value
            .lock()
            .map_err(|e| SessionError::Storage(format!("choice lock poisoned: {e}")))?;
        Ok(g.clone())
    }

    fn save(&self, provider_id: &str) -> Result<(), SessionError> {
        let mut g = self
            .value
            .lock()
            .map_err(|e| SessionError::Storage(format!("choice lock poisoned: {e}")))?;
        *g = Some(provider_id.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        let mut g = self
            .value
            .lock()
            .map_err(|e| SessionError::Storage(format!("choice lock poisoned: {e}")))?;
        *g = None;
        Ok(())
    }
}

/// Browser `localStorage` under the conventional cached-provider key; the
/// value is the JSON-encoded provider id.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone)]
pub struct LocalStorageChoiceStore {
    key: String,
}

#[cfg(target_arch = "wasm32")]
impl Default for LocalStorageChoiceStore {
    fn default() -> Self {
        Self {
            key: "WEB3_CONNECT_CACHED_PROVIDER".to_owned(),
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl LocalStorageChoiceStore {
    fn storage() -> Result<web_sys::Storage, SessionError> {
        let window =
            web_sys::window().ok_or_else(|| SessionError::Storage("missing window".to_owned()))?;
        window
            .local_storage()
            .map_err(|e| SessionError::Storage(format!("localStorage unavailable: {e:?}")))?
            .ok_or_else(|| SessionError::Storage("localStorage unavailable".to_owned()))
    }
}

#[cfg(target_arch = "wasm32")]
impl ChoiceStorePort for LocalStorageChoiceStore {
    fn load(&self) -> Result<Option<String>, SessionError> {
        let raw = Self::storage()?
            .get_item(&self.key)
            .map_err(|e| SessionError::Storage(format!("localStorage read failed: {e:?}")))?;
        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str::<String>(&raw)
                .map(Some)
                .map_err(|e| SessionError::Storage(format!("decode cached provider: {e}"))),
        }
    }

    fn save(&self, provider_id: &str) -> Result<(), SessionError> {
        let body = serde_json::to_string(provider_id)
            .map_err(|e| SessionError::Storage(format!("encode cached provider: {e}")))?;
        Self::storage()?
            .set_item(&self.key, &body)
            .map_err(|e| SessionError::Storage(format!("localStorage write failed: {e:?}")))
    }

    fn clear(&self) -> Result<(), SessionError> {
        Self::storage()?
            .remove_item(&self.key)
            .map_err(|e| SessionError::Storage(format!("localStorage remove failed: {e:?}")))
    }
}
