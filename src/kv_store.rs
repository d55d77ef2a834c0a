//! Key/value lookup of certificate and key material by logical name.
//!
//! A logical name such as `ssloffload-wildcard.domain.com` is normalized and
//! suffixed to form the store key:
//!
//! ```text
//! ssloffload-wildcard.domain.com  ──▶  ssloffload_wildcard_domain_com_certificate
//!                                 ──▶  ssloffload_wildcard_domain_com_private
//! ```
//!
//! The bundled backend is a flat TOML table of strings.

use crate::error::{ConfigError, Error, Result};
use crate::identity::normalize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
}

impl KeyValueStore for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        HashMap::get(self, key).map(|value| value.as_bytes().to_vec())
    }
}

/// Store key for `name`: `<normalized>_private` for keys, `<normalized>_certificate`
/// otherwise.
pub fn store_key(name: &str, private: bool) -> String {
    let suffix = if private { "private" } else { "certificate" };
    format!("{}_{}", normalize(name), suffix)
}

/// Fetch the material stored for `name`. An absent entry is a configuration
/// error naming the key that was tried.
pub fn lookup<S: KeyValueStore + ?Sized>(
    store: &S,
    name: &str,
    private: bool,
) -> std::result::Result<Vec<u8>, ConfigError> {
    let key = store_key(name, private);
    debug!(name, key = %key, "key/value lookup");
    match store.get(&key) {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(ConfigError::Lookup {
            key,
            reason: "value is empty".to_string(),
        }),
        None => Err(ConfigError::Lookup {
            key,
            reason: "no such key".to_string(),
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TomlStore {
    values: HashMap<String, String>,
}

impl TomlStore {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&raw).map_err(|reason| {
            Error::Configuration(ConfigError::Lookup {
                key: path.display().to_string(),
                reason,
            })
        })
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let values: HashMap<String, String> = toml::from_str(raw).map_err(|e| e.to_string())?;
        Ok(TomlStore { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for TomlStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.values.get(key).map(|value| value.as_bytes().to_vec())
    }
}
