//! The reconciliation loop: compare declared material with what is on disk and
//! converge the disk towards the declaration.
//!
//! For a certificate the engine:
//!
//! 1. checks the validity window (unless `expiration` is off)
//! 2. checks the referenced private key matches the certificate
//! 3. checks every declared identity is covered by the certificate names
//! 4. resolves the CA chain from the catalog and verifies trust
//! 5. renders the chain to present and fingerprints it
//! 6. reads and fingerprints the current file
//! 7. rewrites the file atomically when the two differ
//! 8. re-reads the file and compares checksums
//! 9. enforces owner, group and mode
//!
//! Keys follow the same shape without the chain steps. Steps 1 to 5 never touch
//! the filesystem, so a declaration that is wrong fails before any I/O.

use crate::catalog::{Catalog, IndexedCatalog};
use crate::chain_resolver::resolve_ca_chain;
use crate::checksum::ChecksumAlgorithm;
use crate::configs::EngineConfig;
use crate::error::{ConfigError, Error, ParseError, Result};
use crate::identity::check_identities;
use crate::resource::{CertificateResource, Ensure, KeyResource, Ownership, ResourceKind};
use crate::storage::TargetFs;
use crate::trust_store::{probe_root_bundle, TrustOutcome, TrustStoreValidator, ValidationPolicy};
use crate::x509_codec::{
    chain_to_pem, parse_certificate_chain, parse_private_key, Certificate, KeyAlgorithm,
    Validity,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// What happened to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Unchanged,
    Created,
    Changed,
    Removed,
    WouldCreate,
    WouldChange,
    WouldRemove,
}

impl Change {
    pub fn is_change(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Change::Unchanged => "in sync",
            Change::Created => "created",
            Change::Changed => "content changed",
            Change::Removed => "removed",
            Change::WouldCreate => "would be created (noop)",
            Change::WouldChange => "would change (noop)",
            Change::WouldRemove => "would be removed (noop)",
        };
        f.write_str(label)
    }
}

/// Why a target is out of sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Missing,
    Unreadable(String),
    PublicKey,
    Serial,
    ChainLength { expected: usize, actual: usize },
    Content,
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Drift::Missing => f.write_str("file is missing"),
            Drift::Unreadable(reason) => write!(f, "current content is unreadable: {}", reason),
            Drift::PublicKey => f.write_str("public key differs"),
            Drift::Serial => f.write_str("serial number differs"),
            Drift::ChainLength { expected, actual } => write!(
                f,
                "chain has {} certificate(s), expected {}",
                actual, expected
            ),
            Drift::Content => f.write_str("content differs"),
        }
    }
}

/// Comparable summary of certificate material, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Checksum of the canonical PEM re-encoding of every certificate.
    pub checksum: String,
    /// Checksum of the leaf public key (RSA modulus or public key DER).
    pub public_key: String,
    pub serial: String,
    pub chain_length: usize,
}

impl Fingerprint {
    fn of_chain(chain: &[Certificate], algorithm: ChecksumAlgorithm) -> Result<(Self, Vec<u8>)> {
        let leaf = chain
            .first()
            .ok_or_else(|| ParseError::Empty("certificate chain".to_string()))?;
        let content = chain_to_pem(chain)?;
        let fingerprint = Fingerprint {
            checksum: algorithm.checksum(&content),
            public_key: algorithm.checksum(leaf.public_key_id().as_bytes()),
            serial: leaf.serial().to_string(),
            chain_length: chain.len(),
        };
        Ok((fingerprint, content))
    }

    /// Compare against what was observed on disk. With `replace` off any
    /// existing file is accepted. Callers pass `None` for an empty file.
    pub fn drift(
        &self,
        current: Option<&std::result::Result<Fingerprint, String>>,
        replace: bool,
    ) -> Option<Drift> {
        let current = match current {
            None => return Some(Drift::Missing),
            Some(_) if !replace => return None,
            Some(Err(reason)) => return Some(Drift::Unreadable(reason.clone())),
            Some(Ok(current)) => current,
        };
        if current.public_key != self.public_key {
            Some(Drift::PublicKey)
        } else if current.serial != self.serial {
            Some(Drift::Serial)
        } else if current.chain_length != self.chain_length {
            Some(Drift::ChainLength {
                expected: self.chain_length,
                actual: current.chain_length,
            })
        } else if current.checksum != self.checksum {
            Some(Drift::Content)
        } else {
            None
        }
    }
}

/// Validated certificate ready to be compared and written.
#[derive(Debug, Clone)]
pub struct DesiredCertificate {
    pub content: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub trust: TrustOutcome,
}

/// Validated key ready to be compared and written.
#[derive(Debug, Clone)]
pub struct DesiredKey {
    pub content: Vec<u8>,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub change: Change,
    /// Checksum of the content written, when a write happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub ownership_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust: Option<TrustOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_length: Option<usize>,
}

impl ResourceReport {
    fn new(kind: ResourceKind, path: &Path, change: Change) -> Self {
        ResourceReport {
            kind,
            path: path.to_path_buf(),
            change,
            checksum: None,
            ownership_changed: false,
            trust: None,
            chain_length: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub error_kind: &'static str,
    pub message: String,
}

/// Result of converging a whole catalog.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<ResourceReport>,
    pub failures: Vec<Failure>,
}

impl RunSummary {
    pub fn changed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.change.is_change() || r.ownership_changed)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ConvergenceEngine<'a, C: Catalog + ?Sized, F: TargetFs> {
    catalog: &'a C,
    fs: F,
    validator: TrustStoreValidator,
    config: EngineConfig,
    noop: bool,
}

impl<'a, C: Catalog + ?Sized, F: TargetFs> ConvergenceEngine<'a, C, F> {
    /// Engine using the configured root bundle, or the first well-known bundle
    /// on this host when probing is enabled.
    pub fn new(catalog: &'a C, fs: F, config: EngineConfig) -> Self {
        let bundle = config
            .root_bundle
            .clone()
            .or_else(|| config.probe_root_bundle.then(probe_root_bundle).flatten());
        match &bundle {
            Some(path) => info!(bundle = %path.display(), "using root CA bundle"),
            None => info!("no root CA bundle, intermediate chains are accepted as trusted"),
        }
        ConvergenceEngine {
            catalog,
            fs,
            validator: TrustStoreValidator::new(bundle),
            config,
            noop: false,
        }
    }

    pub fn with_validator(mut self, validator: TrustStoreValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Report what would change without touching the filesystem.
    pub fn noop(mut self, noop: bool) -> Self {
        self.noop = noop;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a certificate declaration and render what should be on disk.
    pub fn desired_certificate(&self, resource: &CertificateResource) -> Result<DesiredCertificate> {
        let path = resource.path.display().to_string();
        let cert = resource.certificate()?;
        let options = &resource.options;

        if options.expiration {
            match cert.validity()? {
                Validity::Valid => {}
                Validity::NotYetValid(time) => {
                    return Err(ConfigError::NotYetValid { path, time }.into())
                }
                Validity::Expired(time) => return Err(ConfigError::Expired { path, time }.into()),
            }
        }

        if let Some(pkey_path) = &resource.pkey {
            let missing = || ConfigError::MissingKey(pkey_path.display().to_string());
            let key = self
                .catalog
                .find_key(pkey_path)
                .ok_or_else(missing)?
                .content
                .as_ref()
                .ok_or_else(missing)?;
            if !cert.matches_key(key) {
                return Err(ConfigError::KeyMismatch(pkey_path.display().to_string()).into());
            }
        }

        if !resource.identity.is_empty() {
            check_identities(cert, &resource.identity, &resource.path)?;
        }

        let candidates = resolve_ca_chain(self.catalog, resource)?;
        let policy = ValidationPolicy {
            strict: options.strict,
            include_root: options.rootca,
            check_time: options.expiration,
            ca_expected: !resource.cacert.is_none(),
        };
        let report = self.validator.validate(cert, &candidates, &policy)?;
        if let TrustOutcome::Failed { code, message } = &report.outcome {
            if options.validate_chain {
                return Err(Error::Trust {
                    path,
                    issuer: cert.issuer().to_string(),
                    code: *code,
                    message: message.clone(),
                });
            }
            warn!(path = %path, code, "chain verification failed, continuing: {}", message);
        }

        let presented = if options.chain {
            report.chain
        } else {
            vec![cert.clone()]
        };
        let (fingerprint, content) = Fingerprint::of_chain(&presented, self.config.checksum)?;
        Ok(DesiredCertificate {
            content,
            fingerprint,
            trust: report.outcome,
        })
    }

    fn observed_certificate(&self, bytes: &[u8]) -> std::result::Result<Fingerprint, String> {
        let chain = parse_certificate_chain(bytes).map_err(|e| e.to_string())?;
        Fingerprint::of_chain(&chain, self.config.checksum)
            .map(|(fingerprint, _)| fingerprint)
            .map_err(|e| e.to_string())
    }

    pub fn converge_certificate(&self, resource: &CertificateResource) -> Result<ResourceReport> {
        let path = &resource.path;
        if resource.ensure == Ensure::Absent {
            return self.remove(ResourceKind::Certificate, path);
        }

        let desired = self.desired_certificate(resource)?;
        let on_disk = self.fs.read(path)?;
        let current = on_disk
            .as_deref()
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| self.observed_certificate(bytes));
        let drift = desired
            .fingerprint
            .drift(current.as_ref(), resource.options.replace);

        let mut report = ResourceReport::new(ResourceKind::Certificate, path, Change::Unchanged);
        report.trust = Some(desired.trust.clone());
        report.chain_length = Some(desired.fingerprint.chain_length);
        if let Some(reason) = drift {
            info!(path = %path.display(), "certificate out of sync: {}", reason);
            let mode = self.target_mode(path, &resource.ownership, self.config.cert_mode);
            report.change = self.write(path, &desired.content, mode, on_disk.is_some())?;
            if !self.noop {
                report.checksum = Some(desired.fingerprint.checksum.clone());
            }
        } else {
            debug!(path = %path.display(), "certificate in sync");
        }
        report.ownership_changed = self.enforce_ownership(path, &resource.ownership)?;
        Ok(report)
    }

    /// Validate a key declaration and render what should be on disk.
    pub fn desired_key(&self, resource: &KeyResource) -> Result<DesiredKey> {
        let key = resource.key()?;
        if key.algorithm() == KeyAlgorithm::Rsa && key.bits() < self.config.min_rsa_bits {
            return Err(ConfigError::WeakKey {
                path: resource.path.display().to_string(),
                bits: key.bits(),
                min: self.config.min_rsa_bits,
            }
            .into());
        }
        Ok(DesiredKey {
            content: key.to_pem(resource.password.as_ref())?,
            public_key: self.config.checksum.checksum(key.public_key_id().as_bytes()),
        })
    }

    pub fn converge_key(&self, resource: &KeyResource) -> Result<ResourceReport> {
        let path = &resource.path;
        if resource.ensure == Ensure::Absent {
            return self.remove(ResourceKind::Key, path);
        }

        let desired = self.desired_key(resource)?;
        let on_disk = self.fs.read(path)?;
        let drift = match on_disk.as_deref() {
            None => Some(Drift::Missing),
            Some(bytes) if bytes.is_empty() => Some(Drift::Missing),
            Some(_) if !resource.replace => None,
            Some(bytes) => match parse_private_key(bytes, resource.password.as_ref()) {
                Ok(current) => {
                    let current = self.config.checksum.checksum(current.public_key_id().as_bytes());
                    (current != desired.public_key).then_some(Drift::PublicKey)
                }
                Err(e) => Some(Drift::Unreadable(e.to_string())),
            },
        };

        let mut report = ResourceReport::new(ResourceKind::Key, path, Change::Unchanged);
        if let Some(reason) = drift {
            info!(path = %path.display(), "private key out of sync: {}", reason);
            let mode = self.target_mode(path, &resource.ownership, self.config.key_mode);
            report.change = self.write(path, &desired.content, mode, on_disk.is_some())?;
            if !self.noop {
                report.checksum = Some(self.config.checksum.checksum(&desired.content));
            }
        } else {
            debug!(path = %path.display(), "private key in sync");
        }
        report.ownership_changed = self.enforce_ownership(path, &resource.ownership)?;
        Ok(report)
    }

    fn target_mode(&self, path: &Path, ownership: &Ownership, default: u32) -> u32 {
        ownership
            .mode
            .or_else(|| self.fs.mode(path))
            .unwrap_or(default)
    }

    fn write(&self, path: &Path, content: &[u8], mode: u32, exists: bool) -> Result<Change> {
        if self.noop {
            return Ok(if exists {
                Change::WouldChange
            } else {
                Change::WouldCreate
            });
        }

        self.fs.write_atomic(path, content, mode)?;
        let expected = self.config.checksum.checksum(content);
        let written = self.fs.read(path)?.unwrap_or_default();
        let actual = self.config.checksum.checksum(&written);
        if actual != expected {
            return Err(Error::Integrity {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }
        Ok(if exists {
            Change::Changed
        } else {
            Change::Created
        })
    }

    fn remove(&self, kind: ResourceKind, path: &Path) -> Result<ResourceReport> {
        let exists = self.fs.read(path)?.is_some();
        let change = match (exists, self.noop) {
            (false, _) => Change::Unchanged,
            (true, true) => Change::WouldRemove,
            (true, false) => {
                self.fs.remove(path)?;
                info!(path = %path.display(), "removed");
                Change::Removed
            }
        };
        Ok(ResourceReport::new(kind, path, change))
    }

    fn enforce_ownership(&self, path: &Path, ownership: &Ownership) -> Result<bool> {
        if self.noop || *ownership == Ownership::default() {
            return Ok(false);
        }
        if self.fs.mode(path).is_none() {
            return Ok(false);
        }
        self.fs.apply_ownership(path, ownership)
    }
}

impl<F: TargetFs> ConvergenceEngine<'_, IndexedCatalog, F> {
    /// Converge every key, then every certificate, in declaration order. A
    /// failure stops only the resource it belongs to.
    pub fn converge_all(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        let keys = self
            .catalog
            .keys()
            .iter()
            .map(|key| (ResourceKind::Key, &key.path, self.converge_key(key)));
        let certificates = self.catalog.certificates().iter().map(|cert| {
            (
                ResourceKind::Certificate,
                &cert.path,
                self.converge_certificate(cert),
            )
        });

        for (kind, path, result) in keys.chain(certificates) {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    error!(kind = %kind, path = %path.display(), error_kind = e.kind(), "{}", e);
                    summary.failures.push(Failure {
                        kind,
                        path: path.clone(),
                        error_kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }
        summary
    }
}
