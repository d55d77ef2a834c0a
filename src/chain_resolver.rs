//! Resolution of a certificate's CA references into an ordered chain.
//!
//! A certificate names its issuing CA(s) with a [`CaReference`]. Each resolved CA
//! is itself a catalog resource with its own reference, so the chain is walked
//! transitively. The result is flattened depth-first, leaf excluded, with
//! duplicates (by subject hash) pruned and first-seen order kept:
//!
//! ```text
//! leaf ──cacert──▶ CA1 ──cacert──▶ CA2 ──cacert──▶ CA2 (self)
//!
//! resolve_ca_chain(leaf) == [CA1, CA2]
//! ```

use crate::catalog::Catalog;
use crate::error::ConfigError;
use crate::resource::CertificateResource;
use crate::x509_codec::Certificate;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use tracing::debug;

/// Guard against runaway recursion on a malformed catalog.
pub const MAX_CHAIN_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CaReference {
    /// Look the issuer up in the catalog by issuer hash.
    Auto,
    /// No CA is managed for this certificate.
    #[default]
    None,
    /// Certificates named by subject hash, legacy subject hash, path or title.
    Explicit(Vec<String>),
}

impl CaReference {
    pub fn is_none(&self) -> bool {
        matches!(self, CaReference::None)
    }
}

impl<'de> Deserialize<'de> for CaReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => CaReference::Auto,
            Raw::Flag(false) => CaReference::None,
            Raw::One(name) => CaReference::Explicit(vec![name]),
            Raw::Many(names) => CaReference::Explicit(names),
        })
    }
}

/// Resolve the CA chain of `resource`, leaf excluded.
///
/// Any reference that does not resolve is a configuration error naming the
/// missing identifier.
pub fn resolve_ca_chain<C: Catalog + ?Sized>(
    catalog: &C,
    resource: &CertificateResource,
) -> Result<Vec<Certificate>, ConfigError> {
    let leaf = resource.certificate()?;
    let mut seen = HashSet::from([leaf.subject_hash()]);
    let mut chain = Vec::new();
    walk(
        catalog,
        resource,
        leaf,
        &resource.cacert,
        0,
        &mut seen,
        &mut chain,
    )?;
    debug!(
        path = %resource.path.display(),
        depth = chain.len(),
        "resolved CA chain"
    );
    Ok(chain)
}

fn walk<'c, C: Catalog + ?Sized>(
    catalog: &'c C,
    origin: &CertificateResource,
    cert: &Certificate,
    reference: &CaReference,
    depth: usize,
    seen: &mut HashSet<u32>,
    chain: &mut Vec<Certificate>,
) -> Result<(), ConfigError> {
    if depth >= MAX_CHAIN_DEPTH {
        return Err(ConfigError::ChainTooDeep {
            path: origin.path.display().to_string(),
            max: MAX_CHAIN_DEPTH,
        });
    }

    for ca in direct_issuers(catalog, origin, cert, reference)? {
        let ca_cert = ca
            .content
            .as_ref()
            .ok_or_else(|| ConfigError::MissingCertificate {
                path: origin.path.display().to_string(),
                reference: ca.title.clone(),
            })?;
        if !seen.insert(ca_cert.subject_hash()) {
            continue;
        }
        chain.push(ca_cert.clone());
        walk(catalog, origin, ca_cert, &ca.cacert, depth + 1, seen, chain)?;
    }
    Ok(())
}

fn direct_issuers<'c, C: Catalog + ?Sized>(
    catalog: &'c C,
    origin: &CertificateResource,
    cert: &Certificate,
    reference: &CaReference,
) -> Result<Vec<&'c CertificateResource>, ConfigError> {
    match reference {
        CaReference::None => Ok(Vec::new()),
        CaReference::Auto => {
            let hash = cert.issuer_hash_hex();
            catalog
                .find_certificate(&hash)
                .map(|ca| vec![ca])
                .ok_or_else(|| ConfigError::MissingIssuer {
                    path: origin.path.display().to_string(),
                    subject: cert.issuer().to_string(),
                    hash,
                })
        }
        CaReference::Explicit(keys) => keys
            .iter()
            .map(|key| {
                catalog
                    .find_certificate(key)
                    .ok_or_else(|| ConfigError::MissingCertificate {
                        path: origin.path.display().to_string(),
                        reference: key.clone(),
                    })
            })
            .collect(),
    }
}
