//! Trust store validation of a leaf certificate against its CA chain.
//!
//! The candidate CA certificates are loaded into an OpenSSL `X509Store` together
//! with the platform root bundle (when one exists on disk) and the leaf is verified
//! against it. The outcome degrades gracefully when no root bundle is available:
//!
//! | Verification | Built chain | Root bundle | Outcome                              |
//! |--------------|-------------|-------------|--------------------------------------|
//! | ok           | any         | any         | `Trusted`                            |
//! | failed       | > 1         | absent      | `Trusted`                            |
//! | no issuer    | > 1         | present     | `Warning` (lenient) / `Failed` (strict) |
//! | failed       | otherwise   | any         | `Failed`                             |
//!
//! A resource that declares no CA at all, or a self-issued root with nothing
//! above it, is `NotApplicable`.

use crate::error::{Error, ParseError, Result};
use crate::x509_codec::Certificate;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Well-known root bundle locations by distribution family.
pub const ROOT_BUNDLE_CANDIDATES: &[&str] = &[
    "/etc/pki/tls/certs/ca-bundle.crt",   // RedHat family
    "/etc/ssl/certs/ca-certificates.crt", // Debian family, Gentoo, Arch
    "/etc/ssl/ca-bundle.pem",             // SUSE
    "/etc/ssl/cert.pem",                  // Alpine, macOS
];

// X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT
const UNABLE_TO_GET_ISSUER_CERT: i32 = 2;
// X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY
const UNABLE_TO_GET_ISSUER_CERT_LOCALLY: i32 = 20;

/// First existing root bundle among [`ROOT_BUNDLE_CANDIDATES`].
pub fn probe_root_bundle() -> Option<PathBuf> {
    ROOT_BUNDLE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustOutcome {
    Trusted,
    /// Accepted under lenient policy although the chain does not reach a root
    /// from the bundle.
    Warning(String),
    Failed { code: i32, message: String },
    NotApplicable,
}

impl TrustOutcome {
    /// Whether the certificate may be written under this outcome.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, TrustOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub strict: bool,
    pub include_root: bool,
    pub check_time: bool,
    /// False when the resource declares no CA (self-signed or unmanaged CA).
    pub ca_expected: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        ValidationPolicy {
            strict: true,
            include_root: false,
            check_time: true,
            ca_expected: true,
        }
    }
}

/// Verification result plus the chain to present on disk.
#[derive(Debug, Clone)]
pub struct TrustReport {
    pub outcome: TrustOutcome,
    /// Leaf first. Self-issued certificates past the leaf are dropped unless
    /// root inclusion was requested.
    pub chain: Vec<Certificate>,
}

#[derive(Debug, Clone, Default)]
pub struct TrustStoreValidator {
    root_bundle: Option<PathBuf>,
}

impl TrustStoreValidator {
    pub fn new(root_bundle: Option<PathBuf>) -> Self {
        TrustStoreValidator { root_bundle }
    }

    /// The configured root bundle, if it exists on disk.
    pub fn root_bundle(&self) -> Option<&Path> {
        self.root_bundle.as_deref().filter(|path| path.is_file())
    }

    fn load_bundle(path: &Path) -> Result<Vec<X509>> {
        let pem = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        X509::stack_from_pem(&pem).map_err(|e| {
            Error::Parse(ParseError::MalformedCertificate(format!(
                "root bundle {}: {}",
                path.display(),
                e
            )))
        })
    }

    pub fn validate(
        &self,
        leaf: &Certificate,
        candidates: &[Certificate],
        policy: &ValidationPolicy,
    ) -> Result<TrustReport> {
        if candidates.is_empty() && (!policy.ca_expected || leaf.is_self_issued()) {
            return Ok(TrustReport {
                outcome: TrustOutcome::NotApplicable,
                chain: vec![leaf.clone()],
            });
        }

        let mut builder = X509StoreBuilder::new()?;
        for cert in candidates {
            if builder.add_cert(cert.x509().clone()).is_err() {
                debug!(subject = cert.subject(), "skipping duplicate CA certificate");
            }
        }

        let bundle = self.root_bundle();
        if let Some(path) = bundle {
            for root in Self::load_bundle(path)? {
                if let Err(e) = builder.add_cert(root) {
                    debug!(bundle = %path.display(), "skipping root certificate: {}", e);
                }
            }
        }
        if !policy.check_time {
            builder.set_flags(X509VerifyFlags::NO_CHECK_TIME)?;
        }
        let store = builder.build();

        let untrusted: Stack<X509> = Stack::new()?;
        let mut context = X509StoreContext::new()?;
        let (verified, code, message, built) =
            context.init(&store, leaf.x509(), &untrusted, |ctx| {
                let verified = ctx.verify_cert()?;
                let error = ctx.error();
                let built: Vec<X509> = ctx
                    .chain()
                    .map(|chain| chain.iter().map(|c| c.to_owned()).collect())
                    .unwrap_or_default();
                Ok((
                    verified,
                    error.as_raw(),
                    error.error_string().to_string(),
                    built,
                ))
            })?;

        let built = built
            .into_iter()
            .map(Certificate::from_x509)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!(
            leaf = leaf.subject(),
            verified,
            code,
            depth = built.len(),
            "chain verification finished"
        );

        let outcome = if verified {
            TrustOutcome::Trusted
        } else if built.len() > 1 {
            match bundle {
                None => {
                    debug!(
                        leaf = leaf.subject(),
                        "no root bundle available, accepting intermediate chain"
                    );
                    TrustOutcome::Trusted
                }
                Some(path)
                    if code == UNABLE_TO_GET_ISSUER_CERT
                        || code == UNABLE_TO_GET_ISSUER_CERT_LOCALLY =>
                {
                    let casubject = candidates
                        .iter()
                        .map(Certificate::subject)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let reason = format!(
                        "Provided Intermediate CA certificate (subject: {}) are not trusted by any root certificate from CA bundle {}",
                        casubject,
                        path.display()
                    );
                    warn!("{}", reason);
                    if policy.strict {
                        TrustOutcome::Failed {
                            code,
                            message: format!("{} ({})", message, reason),
                        }
                    } else {
                        TrustOutcome::Warning(reason)
                    }
                }
                Some(_) => TrustOutcome::Failed { code, message },
            }
        } else {
            TrustOutcome::Failed { code, message }
        };

        let chain = if built.len() > 1 && outcome.is_accepted() {
            built
        } else {
            std::iter::once(leaf.clone())
                .chain(candidates.iter().cloned())
                .collect()
        };

        Ok(TrustReport {
            outcome,
            chain: presentation_chain(chain, policy.include_root),
        })
    }
}

fn presentation_chain(chain: Vec<Certificate>, include_root: bool) -> Vec<Certificate> {
    if include_root {
        return chain;
    }
    chain
        .into_iter()
        .enumerate()
        .filter(|(position, cert)| *position == 0 || !cert.is_self_issued())
        .map(|(_, cert)| cert)
        .collect()
}
