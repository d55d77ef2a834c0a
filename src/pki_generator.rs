//! Throwaway certificate hierarchies for tests.
//!
//! Builds root CAs, intermediates and leaf certificates with `openssl`, including
//! deliberately broken material (expired, not yet valid, weak keys). Shared by
//! unit tests and the integration tests under `tests/`.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Name, X509};
use std::time::{SystemTime, UNIX_EPOCH};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE_DEFAULT: u32 = 2048;
const DAY: i64 = 24 * 60 * 60;

/// A key and the certificate issued for it.
#[derive(Clone)]
pub struct Issued {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl Issued {
    pub fn cert_pem(&self) -> Vec<u8> {
        self.cert.to_pem().expect("certificate PEM")
    }

    pub fn key_pem(&self) -> Vec<u8> {
        self.key
            .rsa()
            .and_then(|rsa| rsa.private_key_to_pem())
            .expect("key PEM")
    }
}

#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub common_name: Option<String>,
    pub organization: String,
    pub dns_names: Vec<String>,
    pub ca: bool,
    /// Validity window relative to now, in days.
    pub not_before_days: i64,
    pub not_after_days: i64,
    pub key_bits: u32,
}

impl CertificateRequest {
    pub fn leaf(common_name: &str) -> Self {
        CertificateRequest {
            common_name: Some(common_name.to_string()),
            organization: "Example Org".to_string(),
            dns_names: Vec::new(),
            ca: false,
            not_before_days: -1,
            not_after_days: 365,
            key_bits: RSA_KEY_SIZE_DEFAULT,
        }
    }

    pub fn ca(common_name: &str) -> Self {
        CertificateRequest {
            ca: true,
            not_after_days: 3650,
            ..CertificateRequest::leaf(common_name)
        }
    }

    pub fn without_common_name(mut self) -> Self {
        self.common_name = None;
        self
    }

    pub fn dns(mut self, names: &[&str]) -> Self {
        self.dns_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn validity(mut self, not_before_days: i64, not_after_days: i64) -> Self {
        self.not_before_days = not_before_days;
        self.not_after_days = not_after_days;
        self
    }

    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }
}

#[derive(Default)]
pub struct Pki;

impl Pki {
    pub fn new() -> Self {
        Pki
    }

    pub fn root(&self, common_name: &str) -> Result<Issued> {
        self.issue(CertificateRequest::ca(common_name), None)
    }

    pub fn intermediate(&self, common_name: &str, issuer: &Issued) -> Result<Issued> {
        self.issue(CertificateRequest::ca(common_name), Some(issuer))
    }

    pub fn leaf(&self, common_name: &str, issuer: &Issued) -> Result<Issued> {
        self.issue(
            CertificateRequest::leaf(common_name).dns(&[common_name]),
            Some(issuer),
        )
    }

    /// Issue a certificate for a fresh RSA key. Without an issuer the
    /// certificate is self-signed.
    pub fn issue(&self, request: CertificateRequest, issuer: Option<&Issued>) -> Result<Issued> {
        let rsa = Rsa::generate(request.key_bits)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;
        let key = PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;
        let cert = build_certificate(&request, &key, issuer)?;
        Ok(Issued { key, cert })
    }

    pub fn self_signed_ec(&self, request: CertificateRequest) -> Result<(PKey<Private>, X509)> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;
        let cert = build_certificate(&request, &key, None)?;
        Ok((key, cert))
    }
}

fn build_name(request: &CertificateRequest) -> Result<X509Name> {
    let mut name_builder = X509Name::builder()?;
    name_builder
        .append_entry_by_nid(Nid::ORGANIZATIONNAME, &request.organization)
        .map_err(|e| anyhow!("Failed to set organization: {}", e))?;
    if let Some(cn) = &request.common_name {
        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, cn)
            .map_err(|e| anyhow!("Failed to set CN: {}", e))?;
    }
    Ok(name_builder.build())
}

fn offset_time(days: i64) -> Result<Asn1Time> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
    Ok(Asn1Time::from_unix(now + days * DAY)?)
}

fn build_certificate(
    request: &CertificateRequest,
    key: &PKey<Private>,
    issuer: Option<&Issued>,
) -> Result<X509> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let asn1_serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&asn1_serial)?;

    let name = build_name(request)?;
    builder.set_subject_name(&name)?;
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name())?,
        None => builder.set_issuer_name(&name)?,
    }

    let not_before = offset_time(request.not_before_days)?;
    let not_after = offset_time(request.not_after_days)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(key)?;

    if request.ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .digital_signature()
                .build()?,
        )?;
    } else {
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
    }

    if !request.dns_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in &request.dns_names {
            san.dns(dns);
        }
        let context = builder.x509v3_context(issuer.map(|i| i.cert.as_ref()), None);
        let extension = san.build(&context)?;
        builder.append_extension(extension)?;
    }

    let signing_key = issuer.map(|i| &i.key).unwrap_or(key);
    builder
        .sign(signing_key, MessageDigest::sha256())
        .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
    Ok(builder.build())
}
