use crate::checksum::ChecksumAlgorithm;
use crate::resource::{parse_mode, CertificateOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Manifest of declared keys and certificates.
    pub manifest: Option<PathBuf>,
}

/// Engine-wide defaults. Each certificate may override the flags it declares.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub chain: bool,
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default)]
    pub rootca: bool,
    #[serde(default = "default_true")]
    pub expiration: bool,
    #[serde(default = "default_true")]
    pub replace: bool,
    #[serde(default = "default_min_rsa_bits")]
    pub min_rsa_bits: u32,
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,
    /// Explicit root bundle. Takes precedence over probing.
    #[serde(default)]
    pub root_bundle: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub probe_root_bundle: bool,
    #[serde(default = "default_cert_mode", deserialize_with = "octal_mode")]
    pub cert_mode: u32,
    #[serde(default = "default_key_mode", deserialize_with = "octal_mode")]
    pub key_mode: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain: default_true(),
            strict: default_true(),
            rootca: false,
            expiration: default_true(),
            replace: default_true(),
            min_rsa_bits: default_min_rsa_bits(),
            checksum: ChecksumAlgorithm::default(),
            root_bundle: None,
            probe_root_bundle: default_true(),
            cert_mode: default_cert_mode(),
            key_mode: default_key_mode(),
        }
    }
}

impl EngineConfig {
    /// Per-certificate options before resource overrides are applied.
    pub fn certificate_options(&self) -> CertificateOptions {
        CertificateOptions {
            chain: self.chain,
            rootca: self.rootca,
            strict: self.strict,
            expiration: self.expiration,
            replace: self.replace,
            validate_chain: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// TOML table of `<name>_certificate` / `<name>_private` strings.
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_min_rsa_bits() -> u32 {
    2048
}

fn default_cert_mode() -> u32 {
    0o644
}

fn default_key_mode() -> u32 {
    0o600
}

/// Accept `"0644"` as well as a plain integer.
pub(crate) fn octal_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u32),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse_mode(&text).map_err(serde::de::Error::custom),
        Raw::Number(mode) if mode <= 0o7777 => Ok(mode),
        Raw::Number(mode) => Err(serde::de::Error::custom(format!(
            "{} is not a permission mode",
            mode
        ))),
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (tls-converge.toml)
    pub fn load() -> Result<Self> {
        Self::from_file(Path::new("tls-converge.toml"))
    }
}
