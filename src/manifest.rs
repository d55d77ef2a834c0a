//! The manifest: declared keys and certificates, loaded from TOML.
//!
//! ```toml
//! [[key]]
//! path = "/etc/pki/tls/private/www.example.com.key"
//! lookup = "www.example.com"
//! mode = "0600"
//!
//! [[certificate]]
//! path = "/etc/pki/tls/certs/www.example.com.pem"
//! lookup = "www.example.com"
//! pkey = "/etc/pki/tls/private/www.example.com.key"
//! cacert = true
//! identity = "www.example.com"
//! ```
//!
//! Declarations are validated and their material parsed here, so every
//! configuration error surfaces before the engine touches a target.

use crate::catalog::IndexedCatalog;
use crate::chain_resolver::CaReference;
use crate::configs::{octal_mode, EngineConfig};
use crate::error::{ConfigError, Result};
use crate::kv_store::{self, KeyValueStore};
use crate::resource::{fix_path, CertificateResource, Ensure, KeyResource, Ownership};
use crate::x509_codec::{parse_certificate, parse_private_key};
use anyhow::Context;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, rename = "key")]
    pub keys: Vec<KeyDeclaration>,
    #[serde(default, rename = "certificate")]
    pub certificates: Vec<CertificateDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyDeclaration {
    pub path: String,
    pub content: Option<String>,
    pub lookup: Option<String>,
    pub password: Option<SecretString>,
    pub owner: Option<String>,
    pub group: Option<String>,
    #[serde(default, deserialize_with = "optional_mode")]
    pub mode: Option<u32>,
    #[serde(default)]
    pub ensure: Ensure,
    pub replace: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateDeclaration {
    pub path: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub lookup: Option<String>,
    pub pkey: Option<String>,
    #[serde(default)]
    pub cacert: CaReference,
    #[serde(default, deserialize_with = "one_or_many")]
    pub identity: Vec<String>,
    pub chain: Option<bool>,
    pub rootca: Option<bool>,
    pub strict: Option<bool>,
    pub expiration: Option<bool>,
    pub validate_chain: Option<bool>,
    pub replace: Option<bool>,
    pub owner: Option<String>,
    pub group: Option<String>,
    #[serde(default, deserialize_with = "optional_mode")]
    pub mode: Option<u32>,
    #[serde(default)]
    pub ensure: Ensure,
}

fn optional_mode<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error> {
    octal_mode(deserializer).map(Some)
}

fn one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(name) => vec![name],
        Raw::Many(names) => names,
    })
}

impl Manifest {
    /// Load a manifest from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let manifest_str = fs::read_to_string(path)
            .context(format!("Failed to read manifest: {}", path.display()))?;
        Self::parse(&manifest_str)
            .context(format!("Failed to parse manifest: {}", path.display()))
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Validate every declaration, fetch and parse its material, and index the
    /// result. Engine defaults fill in flags a certificate does not declare.
    pub fn into_catalog<S: KeyValueStore + ?Sized>(
        self,
        store: &S,
        config: &EngineConfig,
    ) -> Result<IndexedCatalog> {
        let keys = self
            .keys
            .into_iter()
            .map(|decl| decl.into_resource(store, config))
            .collect::<Result<Vec<_>>>()?;

        let declared_keys: HashSet<&Path> = keys.iter().map(|k| k.path.as_path()).collect();
        let certificates = self
            .certificates
            .into_iter()
            .map(|decl| decl.into_resource(store, config, &declared_keys))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            keys = keys.len(),
            certificates = certificates.len(),
            "manifest loaded"
        );
        Ok(IndexedCatalog::new(certificates, keys)?)
    }
}

fn material<S: KeyValueStore + ?Sized>(
    store: &S,
    path: &Path,
    content: Option<String>,
    lookup: Option<String>,
    private: bool,
) -> std::result::Result<Option<Vec<u8>>, ConfigError> {
    match (content, lookup) {
        (Some(_), Some(_)) => Err(ConfigError::InvalidParameter {
            path: path.display().to_string(),
            field: "content",
            reason: "content and lookup are mutually exclusive".to_string(),
        }),
        (Some(content), None) => Ok(Some(content.into_bytes())),
        (None, Some(name)) => kv_store::lookup(store, &name, private).map(Some),
        (None, None) => Ok(None),
    }
}

fn require_content(
    ensure: Ensure,
    content: &Option<Vec<u8>>,
    kind: &'static str,
    path: &Path,
) -> std::result::Result<(), ConfigError> {
    if ensure == Ensure::Present && content.is_none() {
        return Err(ConfigError::MissingContent {
            kind,
            path: path.display().to_string(),
        });
    }
    Ok(())
}

impl KeyDeclaration {
    fn into_resource<S: KeyValueStore + ?Sized>(
        self,
        store: &S,
        config: &EngineConfig,
    ) -> Result<KeyResource> {
        let path = fix_path(&self.path)?;
        let bytes = material(store, &path, self.content, self.lookup, true)?;
        require_content(self.ensure, &bytes, "Sslkey", &path)?;
        let content = bytes
            .map(|bytes| parse_private_key(&bytes, self.password.as_ref()))
            .transpose()?;

        Ok(KeyResource {
            path,
            ensure: self.ensure,
            content,
            password: self.password,
            replace: self.replace.unwrap_or(config.replace),
            ownership: Ownership {
                owner: self.owner,
                group: self.group,
                mode: self.mode,
            },
        })
    }
}

impl CertificateDeclaration {
    fn into_resource<S: KeyValueStore + ?Sized>(
        self,
        store: &S,
        config: &EngineConfig,
        declared_keys: &HashSet<&Path>,
    ) -> Result<CertificateResource> {
        let path = fix_path(&self.path)?;
        let bytes = material(store, &path, self.content, self.lookup, false)?;
        require_content(self.ensure, &bytes, "Sslcertificate", &path)?;
        let content = bytes.map(|bytes| parse_certificate(&bytes)).transpose()?;

        let pkey = self.pkey.as_deref().map(fix_key_path).transpose()?;
        if let Some(pkey) = &pkey {
            if !declared_keys.contains(pkey.as_path()) {
                return Err(ConfigError::MissingKey(pkey.display().to_string()).into());
            }
        }

        if self.identity.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::EmptyIdentity {
                path: path.display().to_string(),
            }
            .into());
        }

        let defaults = config.certificate_options();
        let mut options = defaults;
        options.chain = self.chain.unwrap_or(defaults.chain);
        options.rootca = self.rootca.unwrap_or(defaults.rootca);
        options.strict = self.strict.unwrap_or(defaults.strict);
        options.expiration = self.expiration.unwrap_or(defaults.expiration);
        options.replace = self.replace.unwrap_or(defaults.replace);
        options.validate_chain = self.validate_chain.unwrap_or(defaults.validate_chain);

        Ok(CertificateResource {
            title: self.title.unwrap_or_else(|| path.display().to_string()),
            path,
            ensure: self.ensure,
            content,
            cacert: self.cacert,
            pkey,
            identity: self.identity,
            options,
            ownership: Ownership {
                owner: self.owner,
                group: self.group,
                mode: self.mode,
            },
        })
    }
}

fn fix_key_path(raw: &str) -> std::result::Result<PathBuf, ConfigError> {
    fix_path(raw).map_err(|_| ConfigError::RelativeKeyPath(raw.to_string()))
}
