//! Declared resources: what a certificate or private key file should look like.
//!
//! Resources are built once per run from the manifest and never mutated
//! afterwards. Parsed material lives in them as immutable value objects.

use crate::chain_resolver::CaReference;
use crate::error::ConfigError;
use crate::x509_codec::{Certificate, PrivateKey};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Certificate,
    Key,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Certificate => f.write_str("Sslcertificate"),
            ResourceKind::Key => f.write_str("Sslkey"),
        }
    }
}

/// Owner, group and permission bits to enforce once content is correct.
/// Owner and group are user/group names or numeric ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateOptions {
    /// Write intermediate certificates after the leaf.
    pub chain: bool,
    /// Keep self-issued root certificates in the written chain.
    pub rootca: bool,
    /// Untrusted intermediates are fatal instead of a warning.
    pub strict: bool,
    /// Enforce the validity window.
    pub expiration: bool,
    /// Rewrite existing files that differ from the declaration.
    pub replace: bool,
    /// A failed trust verification is fatal.
    pub validate_chain: bool,
}

impl Default for CertificateOptions {
    fn default() -> Self {
        CertificateOptions {
            chain: true,
            rootca: false,
            strict: true,
            expiration: true,
            replace: true,
            validate_chain: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateResource {
    pub path: PathBuf,
    /// Declared name; defaults to the path.
    pub title: String,
    pub ensure: Ensure,
    pub content: Option<Certificate>,
    pub cacert: CaReference,
    pub pkey: Option<PathBuf>,
    pub identity: Vec<String>,
    pub options: CertificateOptions,
    pub ownership: Ownership,
}

impl CertificateResource {
    pub fn new(path: PathBuf, content: Certificate) -> Self {
        CertificateResource {
            title: path.display().to_string(),
            path,
            ensure: Ensure::Present,
            content: Some(content),
            cacert: CaReference::None,
            pkey: None,
            identity: Vec::new(),
            options: CertificateOptions::default(),
            ownership: Ownership::default(),
        }
    }

    /// The declared certificate, which `ensure = present` requires.
    pub fn certificate(&self) -> Result<&Certificate, ConfigError> {
        self.content.as_ref().ok_or_else(|| ConfigError::MissingContent {
            kind: "Sslcertificate",
            path: self.path.display().to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeyResource {
    pub path: PathBuf,
    pub ensure: Ensure,
    pub content: Option<PrivateKey>,
    pub password: Option<SecretString>,
    pub replace: bool,
    pub ownership: Ownership,
}

impl KeyResource {
    pub fn new(path: PathBuf, content: PrivateKey) -> Self {
        KeyResource {
            path,
            ensure: Ensure::Present,
            content: Some(content),
            password: None,
            replace: true,
            ownership: Ownership::default(),
        }
    }

    pub fn key(&self) -> Result<&PrivateKey, ConfigError> {
        self.content.as_ref().ok_or_else(|| ConfigError::MissingContent {
            kind: "Sslkey",
            path: self.path.display().to_string(),
        })
    }
}

/// Validate and canonicalize a declared path: it must be absolute, repeated
/// and trailing slashes are dropped (the root directory stays `/`).
pub fn fix_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(ConfigError::RelativePath(raw.to_string()));
    }
    let mut fixed = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => fixed.push(part),
            Component::ParentDir => {
                fixed.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(fixed)
}

/// Parse an octal permission string such as `"0644"` or `"600"`.
pub fn parse_mode(raw: &str) -> Result<u32, String> {
    let digits = raw.trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("'{}': {}", raw, e))?;
    if mode > 0o7777 {
        return Err(format!("'{}' is not a permission mode", raw));
    }
    Ok(mode)
}
