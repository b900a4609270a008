//! Credential storage for server connection state.
//!
//! Persists the server base URL, API key, and session token behind a
//! platform-transparent trait. The file-backed implementation lives in
//! the platform config directory; an in-memory one backs tests and
//! ephemeral sessions.

use crate::error::CredentialError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Application name used for the config directory.
const APP_NAME: &str = "Yomu";

/// Credential filename inside the config directory.
const CREDENTIALS_FILENAME: &str = "credentials.toml";

/// Storage key for the session JWT.
pub const KEY_TOKEN: &str = "jwt_token";

/// Storage key for the server API key.
pub const KEY_API_KEY: &str = "api_key";

/// Storage key for the server base URL.
pub const KEY_BASE_URL: &str = "base_url";

/// Platform-transparent key/value credential storage.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored value for `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Removes the value stored under `key`, if any.
    fn remove(&self, key: &str) -> Result<(), CredentialError>;
}

/// Convenience helpers shared by all stores.
pub trait CredentialStoreExt: CredentialStore {
    /// Removes every connection credential (logout).
    fn clear_all(&self) -> Result<(), CredentialError> {
        self.remove(KEY_TOKEN)?;
        self.remove(KEY_API_KEY)?;
        self.remove(KEY_BASE_URL)?;
        Ok(())
    }

    /// True once a base URL and API key have been stored.
    fn is_connected(&self) -> bool {
        matches!(self.get(KEY_BASE_URL), Ok(Some(_))) && matches!(self.get(KEY_API_KEY), Ok(Some(_)))
    }
}

impl<T: CredentialStore + ?Sized> CredentialStoreExt for T {}

/// Credential store persisted as a TOML map in the platform config directory.
pub struct FileCredentialStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// Returns the platform-specific credential file path.
    pub fn default_path() -> Result<PathBuf, CredentialError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME).join(CREDENTIALS_FILENAME))
            .ok_or(CredentialError::NoConfigDir)
    }

    /// Opens the store at the default platform location.
    pub fn open() -> Result<Self, CredentialError> {
        Self::open_at(Self::default_path()?)
    }

    /// Opens the store at a specific path, loading existing values.
    pub fn open_at(path: PathBuf) -> Result<Self, CredentialError> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| CredentialError::Parse(e.to_string()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Writes the current map back to disk.
    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(values).map_err(|e| CredentialError::Parse(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        let mut values = self.values.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with a base URL and API key.
    pub fn with_connection(base_url: &str, api_key: &str) -> Self {
        let store = Self::new();
        let mut values = store.values.lock();
        values.insert(KEY_BASE_URL.to_string(), base_url.to_string());
        values.insert(KEY_API_KEY.to_string(), api_key.to_string());
        drop(values);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Parses a server-provided OPDS bootstrap URL into `(base_url, api_key)`.
///
/// The server hands out URLs of the form `https://host[:port]/api/opds/{apiKey}`;
/// both the server address and the key are extracted once at connect time.
pub fn parse_opds_url(raw: &str) -> Result<(String, String), CredentialError> {
    let url = Url::parse(raw).map_err(|e| CredentialError::InvalidOpdsUrl(e.to_string()))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let api_key = match segments.as_slice() {
        ["api", "opds", key] if !key.is_empty() => (*key).to_string(),
        _ => {
            return Err(CredentialError::InvalidOpdsUrl(
                "expected path of the form /api/opds/{apiKey}".to_string(),
            ));
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| CredentialError::InvalidOpdsUrl("missing host".to_string()))?;

    let base_url = match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    };

    Ok((base_url, api_key))
}
