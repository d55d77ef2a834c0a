//! Filesystem basenames and identity names derived from certificates.

use crate::error::ConfigError;
use crate::x509_codec::Certificate;
use std::path::{Path, PathBuf};

pub const DEFAULT_CERT_DIR: &str = "/etc/pki/tls/certs";
pub const DEFAULT_KEY_DIR: &str = "/etc/pki/tls/private";

/// Canonical basename for a certificate file.
///
/// CA certificates (and certificates without a usable CN) use the 8 hex digit
/// subject hash, as `c_rehash` does. Everything else uses the CN with a leading
/// `*` spelled out as `wildcard`.
pub fn basename(cert: &Certificate) -> String {
    match cert.common_name() {
        Some(cn) if !cn.is_empty() && !cert.is_ca() => cn.replacen('*', "wildcard", 1),
        _ => cert.subject_hash_hex(),
    }
}

/// CN followed by subjectAltName DNS entries, de-duplicated, CN first.
pub fn identity_names(cert: &Certificate) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let candidates = cert
        .common_name()
        .into_iter()
        .chain(cert.dns_names().iter().map(String::as_str));
    for name in candidates {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Key/value store lookup key for a logical name.
///
/// `normalize("ssloffload-wildcard.domain.com") == "ssloffload_wildcard_domain_com"`
pub fn normalize(name: &str) -> String {
    name.replacen('*', "wildcard", 1)
        .chars()
        .map(|c| match c {
            '.' | '-' | '\'' | ' ' => '_',
            other => other,
        })
        .collect()
}

/// Whether one of `names` covers `identity`. A `*.` name covers exactly one
/// label below its base domain.
pub fn covers(names: &[String], identity: &str) -> bool {
    if names.iter().any(|n| n == identity) {
        return true;
    }
    let Some((_, parent)) = identity.split_once('.') else {
        return false;
    };
    names
        .iter()
        .filter_map(|n| n.strip_prefix("*."))
        .any(|base| base == parent)
}

/// Fail unless every declared identity is covered by the certificate's names.
pub fn check_identities(
    cert: &Certificate,
    identities: &[String],
    path: &Path,
) -> Result<(), ConfigError> {
    let names = identity_names(cert);
    if identities.iter().all(|identity| covers(&names, identity)) {
        return Ok(());
    }
    Err(ConfigError::IdentityMismatch {
        path: path.display().to_string(),
        names: names.join(", "),
        identities: identities.join(", "),
    })
}

/// `<base>/<basename>.pem`
pub fn cert_path(cert: &Certificate, base: Option<&Path>) -> PathBuf {
    base.unwrap_or(Path::new(DEFAULT_CERT_DIR))
        .join(format!("{}.pem", basename(cert)))
}

/// `<base>/<basename>.key`
pub fn key_path(cert: &Certificate, base: Option<&Path>) -> PathBuf {
    base.unwrap_or(Path::new(DEFAULT_KEY_DIR))
        .join(format!("{}.key", basename(cert)))
}
