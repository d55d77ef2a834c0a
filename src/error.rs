//! Error taxonomy for reconciliation.
//!
//! Every failure surfaced by the library falls into one of five kinds:
//!
//! - [`Error::Parse`]: malformed certificate or key bytes
//! - [`Error::Configuration`]: the declared state itself is wrong (missing reference,
//!   relative path, weak key, identity mismatch, key/certificate mismatch)
//! - [`Error::Trust`]: the CA chain does not verify under strict policy
//! - [`Error::Io`]: filesystem failures, always carrying the failing path
//! - [`Error::Integrity`]: what landed on disk is not what was written
//!
//! None of them are retried by the library.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Certificate {path} is not valid due to invalid CA (issuer: {issuer}): {message} (code {code})")]
    Trust {
        path: String,
        issuer: String,
        code: i32,
        message: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Integrity check failed for {}: wrote {expected}, found {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("OpenSSL error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Short stable label used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse(_) => "parse",
            Error::Configuration(_) => "configuration",
            Error::Trust { .. } => "trust",
            Error::Io { .. } => "io",
            Error::Integrity { .. } => "integrity",
            Error::Crypto(_) => "crypto",
        }
    }
}

/// Malformed certificate or key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Can not create X509 Certificate object ({0})")]
    MalformedCertificate(String),

    #[error("Can not read private key content ({0})")]
    MalformedKey(String),

    #[error("Private key is encrypted and no password was provided")]
    PasswordRequired,

    #[error("Can not decrypt private key with the provided password")]
    WrongPassword,

    #[error("Provided key is not a private key")]
    NotPrivateKey,

    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No certificate found in {0}")]
    Empty(String),
}

/// Problems with the declared state. Always fatal for the affected resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("File paths must be fully qualified, not '{0}'")]
    RelativePath(String),

    #[error("Pkey parameter must be fully qualified path to private key, not '{0}'")]
    RelativeKeyPath(String),

    #[error("Path {0} is managed by more than one resource")]
    DuplicatePath(String),

    #[error(":content property is mandatory for {kind} resource {path}")]
    MissingContent { kind: &'static str, path: String },

    #[error(
        "{path}: you must define Sslcertificate resource with subject {subject} (issuer hash {hash})"
    )]
    MissingIssuer {
        path: String,
        subject: String,
        hash: String,
    },

    #[error("{path}: you must define resource Sslcertificate with title or path {reference}")]
    MissingCertificate { path: String, reference: String },

    #[error("You must define resource Sslkey[{0}]")]
    MissingKey(String),

    #[error("CA chain of {path} exceeds maximum depth {max}")]
    ChainTooDeep { path: String, max: usize },

    #[error("Provided key {path} is too weak (key size is {bits}, minimum is {min})")]
    WeakKey { path: String, bits: u32, min: u32 },

    #[error("Certificate public key does not match private key {0}")]
    KeyMismatch(String),

    #[error("Certificate {path} names ({names}) do not match provided identities ({identities})")]
    IdentityMismatch {
        path: String,
        names: String,
        identities: String,
    },

    #[error("Domain name for {path} must be non-empty string")]
    EmptyIdentity { path: String },

    #[error("Certificate {path} is not yet valid (Not Before is {time})")]
    NotYetValid { path: String, time: String },

    #[error("Certificate {path} has expired (Not After is {time})")]
    Expired { path: String, time: String },

    #[error("Invalid {field} for {path}: {reason}")]
    InvalidParameter {
        path: String,
        field: &'static str,
        reason: String,
    },

    #[error("Key/value lookup for '{key}' failed: {reason}")]
    Lookup { key: String, reason: String },
}
