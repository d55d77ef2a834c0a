//! tls-converge - Convergent X.509 certificate and private key management
//!
//! Declares the certificates and private keys a host should have on disk, and
//! converges the filesystem towards that declaration. Every run is idempotent:
//! a file that already holds the declared material is never rewritten.
//!
//! # Overview
//!
//! A declaration passes through four stages before anything is written:
//!
//! ```text
//! manifest (TOML) ──▶ catalog ──▶ chain resolver ──▶ trust store ──▶ convergence engine ──▶ disk
//!        │               │              │                 │                   │
//!   key/value store   lookup by     CA references     OpenSSL verify     fingerprint, compare,
//!   for material      hash/path     walked, dedup     + root bundle      atomic write, verify
//! ```
//!
//! - **Validation first**: expiry, key/certificate match, identity coverage and
//!   chain trust are all checked before the target file is touched
//! - **Content-aware sync**: on-disk content is compared by public key, serial,
//!   chain length and a checksum of its canonical PEM re-encoding
//! - **Atomic writes**: temporary file, fsync, rename, then a read-back checksum
//! - **Trust policy**: intermediates are verified against the platform root bundle;
//!   lenient mode downgrades an untrusted intermediate to a warning
//!
//! # Quick Start
//!
//! ```bash
//! cargo build --release
//! ./target/release/tls-converge --config /etc/tls-converge/tls-converge.toml --noop
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use tls_converge::configs::EngineConfig;
//! use tls_converge::convergence::ConvergenceEngine;
//! use tls_converge::kv_store::TomlStore;
//! use tls_converge::manifest::Manifest;
//! use tls_converge::storage::PosixFs;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::default();
//!     let store = TomlStore::from_file(Path::new("/etc/tls-converge/store.toml"))?;
//!     let catalog = Manifest::from_file(Path::new("/etc/tls-converge/manifest.toml"))?
//!         .into_catalog(&store, &config)?;
//!
//!     let summary = ConvergenceEngine::new(&catalog, PosixFs, config).converge_all();
//!     for report in &summary.reports {
//!         println!("{} {}", report.path.display(), report.change);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! ## [`x509_codec`]
//!
//! Certificate and private key parsing, subject hashes (modern and legacy), the
//! RSA modulus, the basicConstraints CA flag and key serialization.
//!
//! ```no_run
//! use tls_converge::x509_codec::parse_certificate;
//!
//! let cert = parse_certificate(&std::fs::read("/etc/pki/tls/certs/f1453246.pem")?)?;
//! assert_eq!(cert.subject_hash_hex(), "f1453246");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## [`identity`]
//!
//! Canonical file basenames (`www.example.com`, `wildcard.example.com`, or the
//! subject hash for CAs), identity names and key/value store key normalization.
//!
//! ## [`trust_store`]
//!
//! Verification of a leaf against its candidate CA certificates and the platform
//! root bundle, producing the chain to present on disk.
//!
//! ## [`catalog`] and [`chain_resolver`]
//!
//! Lookup of declared certificates by subject hash, legacy subject hash, path or
//! title, and transitive resolution of CA references into an ordered chain.
//!
//! ## [`convergence`]
//!
//! The engine. Produces one [`convergence::ResourceReport`] per target, or a typed
//! [`error::Error`] naming the failing resource.
//!
//! # Error Handling
//!
//! Library operations return [`error::Result`]. Each error falls into one kind:
//! parse, configuration, trust, io or integrity.
//!
//! ```no_run
//! use tls_converge::error::{ConfigError, Error};
//! # fn run() -> tls_converge::error::Result<()> { Ok(()) }
//!
//! match run() {
//!     Err(Error::Configuration(ConfigError::KeyMismatch(key))) => {
//!         eprintln!("certificate does not match {}", key)
//!     }
//!     Err(e) => eprintln!("{} error: {}", e.kind(), e),
//!     Ok(()) => {}
//! }
//! ```

pub mod catalog;
pub mod chain_resolver;
pub mod checksum;
pub mod configs;
pub mod convergence;
pub mod error;
pub mod identity;
pub mod kv_store;
pub mod manifest;
pub mod resource;
pub mod storage;
pub mod trust_store;
pub mod x509_codec;

#[cfg(test)]
mod pki_generator;
