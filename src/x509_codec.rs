//! X.509 certificate and private key codec.
//!
//! Parses PEM or DER material into immutable value objects and derives everything
//! the rest of the crate keys on: OpenSSL-compatible subject hashes (modern and
//! legacy), the RSA modulus used as a content fingerprint, the basicConstraints
//! CA flag and the DNS names a certificate asserts.
//!
//! All functions are pure. Malformed input is always reported as a
//! [`ParseError`] so callers can decide whether the field is optional.
//!
//! # Example
//!
//! ```no_run
//! use tls_converge::x509_codec::parse_certificate;
//!
//! let pem = std::fs::read("/etc/pki/tls/certs/www.example.com.pem")?;
//! let cert = parse_certificate(&pem)?;
//! println!("{} -> {}", cert.subject(), cert.subject_hash_hex());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::ParseError;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::ec::EcKey;
use openssl::error::ErrorStack;
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::{X509NameRef, X509};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// A parsed X.509 certificate with its derived identifiers.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
    der: Vec<u8>,
    subject: String,
    issuer: String,
    common_name: Option<String>,
    dns_names: Vec<String>,
    serial: String,
    subject_hash: u32,
    legacy_subject_hash: u32,
    issuer_hash: u32,
    legacy_issuer_hash: u32,
    public_key_id: String,
    is_ca: bool,
}

impl Certificate {
    pub fn from_x509(x509: X509) -> Result<Self, ParseError> {
        let der = x509.to_der().map_err(malformed_cert)?;
        let (_, parsed) = X509Certificate::from_der(&der)
            .map_err(|e| ParseError::MalformedCertificate(e.to_string()))?;

        let is_ca = parsed
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false);

        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = parsed.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_string());
                }
            }
        }

        let common_name = x509
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string());

        let serial = x509
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|s| s.to_string()))
            .map_err(malformed_cert)?;

        Ok(Certificate {
            subject: name_oneline(x509.subject_name()),
            issuer: name_oneline(x509.issuer_name()),
            common_name,
            dns_names,
            serial,
            subject_hash: x509.subject_name_hash(),
            legacy_subject_hash: legacy_name_hash(x509.subject_name()).map_err(malformed_cert)?,
            issuer_hash: x509.issuer_name_hash(),
            legacy_issuer_hash: legacy_name_hash(x509.issuer_name()).map_err(malformed_cert)?,
            public_key_id: public_key_id(&x509).map_err(malformed_cert)?,
            is_ca,
            der,
            x509,
        })
    }

    pub fn x509(&self) -> &X509 {
        &self.x509
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> Result<Vec<u8>, ParseError> {
        self.x509.to_pem().map_err(malformed_cert)
    }

    /// Subject in OpenSSL one-line form, e.g. `/C=DE/O=Example/CN=www.example.com`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// DNS entries of the subjectAltName extension, in certificate order.
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Serial number as uppercase hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn subject_hash(&self) -> u32 {
        self.subject_hash
    }

    pub fn legacy_subject_hash(&self) -> u32 {
        self.legacy_subject_hash
    }

    pub fn issuer_hash(&self) -> u32 {
        self.issuer_hash
    }

    pub fn legacy_issuer_hash(&self) -> u32 {
        self.legacy_issuer_hash
    }

    pub fn subject_hash_hex(&self) -> String {
        format!("{:08x}", self.subject_hash)
    }

    pub fn legacy_subject_hash_hex(&self) -> String {
        format!("{:08x}", self.legacy_subject_hash)
    }

    pub fn issuer_hash_hex(&self) -> String {
        format!("{:08x}", self.issuer_hash)
    }

    /// True iff basicConstraints is present and asserts CA:TRUE.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Subject equals issuer.
    pub fn is_self_issued(&self) -> bool {
        self.x509
            .subject_name()
            .try_cmp(self.x509.issuer_name())
            .map(|ord| ord.is_eq())
            .unwrap_or(false)
    }

    /// RSA modulus as uppercase hex, `None` for non-RSA keys.
    pub fn modulus(&self) -> Option<String> {
        self.x509
            .public_key()
            .ok()
            .and_then(|key| key.rsa().ok())
            .and_then(|rsa| rsa.n().to_hex_str().ok().map(|s| s.to_string()))
    }

    /// Content fingerprint source for the public key: the RSA modulus, or the
    /// hex encoded public key DER for other algorithms.
    pub fn public_key_id(&self) -> &str {
        &self.public_key_id
    }

    pub fn not_before(&self) -> &Asn1TimeRef {
        self.x509.not_before()
    }

    pub fn not_after(&self) -> &Asn1TimeRef {
        self.x509.not_after()
    }

    /// Check the validity window against the current time.
    pub fn validity(&self) -> Result<Validity, ParseError> {
        let now = Asn1Time::days_from_now(0).map_err(malformed_cert)?;
        Ok(self.validity_at(&now))
    }

    pub fn validity_at(&self, now: &Asn1TimeRef) -> Validity {
        if self.not_before() > now {
            Validity::NotYetValid(format!("notBefore={}", self.not_before()))
        } else if self.not_after() < now {
            Validity::Expired(format!("notAfter={}", self.not_after()))
        } else {
            Validity::Valid
        }
    }

    /// Whether `key` is the private half of this certificate's public key.
    pub fn matches_key(&self, key: &PrivateKey) -> bool {
        self.x509
            .public_key()
            .map(|public| public.public_eq(key.pkey()))
            .unwrap_or(false)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("subject_hash", &self.subject_hash_hex())
            .field("is_ca", &self.is_ca)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    NotYetValid(String),
    Expired(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => f.write_str("RSA"),
            KeyAlgorithm::Ec => f.write_str("EC"),
        }
    }
}

/// A parsed private key.
#[derive(Clone)]
pub struct PrivateKey {
    pkey: PKey<Private>,
    algorithm: KeyAlgorithm,
    bits: u32,
    public_key_id: String,
}

impl PrivateKey {
    fn from_pkey(pkey: PKey<Private>) -> Result<Self, ParseError> {
        let algorithm = match pkey.id() {
            Id::RSA => KeyAlgorithm::Rsa,
            Id::EC => KeyAlgorithm::Ec,
            other => return Err(ParseError::UnsupportedAlgorithm(format!("{:?}", other))),
        };
        let public_key_id = match algorithm {
            KeyAlgorithm::Rsa => pkey
                .rsa()
                .and_then(|rsa| rsa.n().to_hex_str().map(|s| s.to_string())),
            KeyAlgorithm::Ec => pkey.public_key_to_der().map(hex::encode_upper),
        }
        .map_err(malformed_key)?;

        Ok(PrivateKey {
            bits: pkey.bits(),
            algorithm,
            public_key_id,
            pkey,
        })
    }

    pub fn pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// RSA modulus as uppercase hex, `None` for EC keys.
    pub fn modulus(&self) -> Option<&str> {
        match self.algorithm {
            KeyAlgorithm::Rsa => Some(&self.public_key_id),
            KeyAlgorithm::Ec => None,
        }
    }

    pub fn public_key_id(&self) -> &str {
        &self.public_key_id
    }

    /// Serialize to PEM.
    ///
    /// Unencrypted RSA keys are written as PKCS#1, unencrypted EC keys as SEC1.
    /// With a password the key is written as PKCS#8 under AES-256-CBC.
    pub fn to_pem(&self, password: Option<&SecretString>) -> Result<Vec<u8>, ParseError> {
        let pem = match (password, self.algorithm) {
            (Some(password), _) => self.pkey.private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                password.expose_secret().as_bytes(),
            ),
            (None, KeyAlgorithm::Rsa) => self.pkey.rsa().and_then(|rsa| rsa.private_key_to_pem()),
            (None, KeyAlgorithm::Ec) => self
                .pkey
                .ec_key()
                .and_then(|ec| ec.private_key_to_pem()),
        };
        pem.map_err(malformed_key)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn is_pem(bytes: &[u8]) -> bool {
    bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER)
}

fn malformed_cert(e: ErrorStack) -> ParseError {
    ParseError::MalformedCertificate(e.to_string())
}

fn malformed_key(e: ErrorStack) -> ParseError {
    ParseError::MalformedKey(e.to_string())
}

/// Parse a single certificate from PEM or DER. For PEM input the first
/// certificate is returned.
pub fn parse_certificate(bytes: &[u8]) -> Result<Certificate, ParseError> {
    let x509 = if is_pem(bytes) {
        X509::from_pem(bytes)
    } else {
        X509::from_der(bytes)
    }
    .map_err(malformed_cert)?;
    Certificate::from_x509(x509)
}

/// Parse every certificate of a PEM bundle, in file order.
pub fn parse_certificate_chain(bytes: &[u8]) -> Result<Vec<Certificate>, ParseError> {
    if !is_pem(bytes) {
        return parse_certificate(bytes).map(|cert| vec![cert]);
    }
    let stack = X509::stack_from_pem(bytes).map_err(malformed_cert)?;
    if stack.is_empty() {
        return Err(ParseError::Empty("PEM bundle".to_string()));
    }
    stack.into_iter().map(Certificate::from_x509).collect()
}

/// Serialize certificates as concatenated PEM blocks.
pub fn chain_to_pem(chain: &[Certificate]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    for cert in chain {
        out.extend_from_slice(&cert.to_pem()?);
    }
    Ok(out)
}

fn fill_password(buf: &mut [u8], password: Option<&SecretString>) -> Result<usize, ErrorStack> {
    let Some(password) = password else {
        return Ok(0);
    };
    let bytes = password.expose_secret().as_bytes();
    if bytes.len() > buf.len() {
        return Err(ErrorStack::get());
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Parse a private key, trying RSA first and EC second.
///
/// A key that needed a password and could not be decrypted is reported as
/// [`ParseError::PasswordRequired`] or [`ParseError::WrongPassword`], distinct
/// from [`ParseError::MalformedKey`].
pub fn parse_private_key(
    bytes: &[u8],
    password: Option<&SecretString>,
) -> Result<PrivateKey, ParseError> {
    if !is_pem(bytes) {
        let pkey = Rsa::private_key_from_der(bytes)
            .and_then(PKey::from_rsa)
            .or_else(|_| EcKey::private_key_from_der(bytes).and_then(PKey::from_ec_key))
            .map_err(malformed_key)?;
        return PrivateKey::from_pkey(pkey);
    }

    let mut asked = false;
    let rsa = Rsa::private_key_from_pem_callback(bytes, |buf| {
        asked = true;
        fill_password(buf, password)
    });
    let rsa_error = match rsa.and_then(PKey::from_rsa) {
        Ok(pkey) => return PrivateKey::from_pkey(pkey),
        Err(e) => e,
    };

    let ec = EcKey::private_key_from_pem_callback(bytes, |buf| {
        asked = true;
        fill_password(buf, password)
    });
    if let Ok(pkey) = ec.and_then(PKey::from_ec_key) {
        return PrivateKey::from_pkey(pkey);
    }

    if asked {
        return Err(match password {
            None => ParseError::PasswordRequired,
            Some(_) => ParseError::WrongPassword,
        });
    }
    if PKey::public_key_from_pem(bytes).is_ok() {
        return Err(ParseError::NotPrivateKey);
    }
    Err(malformed_key(rsa_error))
}

/// Modern OpenSSL subject hash (`X509_NAME_hash`).
pub fn subject_hash(cert: &Certificate) -> u32 {
    cert.subject_hash()
}

/// Legacy OpenSSL subject hash (`X509_NAME_hash_old`).
pub fn legacy_subject_hash(cert: &Certificate) -> u32 {
    cert.legacy_subject_hash()
}

/// RSA modulus of a certificate as uppercase hex.
pub fn modulus(cert: &Certificate) -> Option<String> {
    cert.modulus()
}

pub fn is_ca(cert: &Certificate) -> bool {
    cert.is_ca()
}

// MD5 over the DER encoded name, first four bytes read little-endian.
fn legacy_name_hash(name: &X509NameRef) -> Result<u32, ErrorStack> {
    let der = name.to_der()?;
    let md = hash(MessageDigest::md5(), &der)?;
    Ok(u32::from_le_bytes([md[0], md[1], md[2], md[3]]))
}

fn name_oneline(name: &X509NameRef) -> String {
    let mut out = String::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name().unwrap_or("UNDEF");
        let value = entry
            .data()
            .as_utf8()
            .map(|v| v.to_string())
            .unwrap_or_else(|_| hex::encode(entry.data().as_slice()));
        out.push('/');
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
    }
    out
}

fn public_key_id(x509: &X509) -> Result<String, ErrorStack> {
    let key = x509.public_key()?;
    match key.rsa() {
        Ok(rsa) => Ok(rsa.n().to_hex_str()?.to_string()),
        Err(_) => Ok(hex::encode_upper(key.public_key_to_der()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki_generator::{CertificateRequest, Pki};

    const WWW_DOMAIN_COM: &[u8] = include_bytes!("../tests/fixtures/www.domain.com.pem");
    const WWW_DOMAIN_COM_KEY: &[u8] = include_bytes!("../tests/fixtures/www.domain.com.key");
    const INTERMEDIATE: &[u8] = include_bytes!("../tests/fixtures/intermediate.pem");

    #[test]
    fn test_subject_hashes_match_openssl() {
        let cert = parse_certificate(WWW_DOMAIN_COM).unwrap();
        assert_eq!(cert.subject_hash_hex(), "c07dba14");
        assert_eq!(cert.legacy_subject_hash_hex(), "ee3cd8bd");
        assert_eq!(cert.issuer_hash_hex(), "f1453246");

        let ca = parse_certificate(INTERMEDIATE).unwrap();
        assert_eq!(ca.subject_hash_hex(), "f1453246");
        assert_eq!(format!("{:08x}", legacy_subject_hash(&ca)), "e77affec");
        assert_eq!(ca.issuer_hash_hex(), "a4144c98");
    }

    #[test]
    fn test_fixture_fields() {
        let cert = parse_certificate(WWW_DOMAIN_COM).unwrap();
        assert_eq!(cert.common_name(), Some("www.domain.com"));
        assert_eq!(cert.dns_names(), ["domain.com".to_string()]);
        assert_eq!(cert.serial(), "01");
        assert!(!is_ca(&cert));
        assert!(cert.subject().ends_with("/CN=www.domain.com"));
        assert!(modulus(&cert)
            .unwrap()
            .starts_with("C56716683F44E8E78DA062CA51E5EBB35A50182275D422DFCE6D8F8A9F625F3EC3EBB1E3"));
        assert!(matches!(cert.validity().unwrap(), Validity::Expired(_)));

        assert!(parse_certificate(INTERMEDIATE).unwrap().is_ca());
    }

    #[test]
    fn test_fixture_key_matches_certificate() {
        let cert = parse_certificate(WWW_DOMAIN_COM).unwrap();
        let key = parse_private_key(WWW_DOMAIN_COM_KEY, None).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Rsa);
        assert_eq!(key.bits(), 2048);
        assert_eq!(key.modulus().map(str::to_string), cert.modulus());
        assert!(cert.matches_key(&key));
    }

    #[test]
    fn test_pem_round_trip_is_identical() {
        let cert = parse_certificate(WWW_DOMAIN_COM).unwrap();
        let again = parse_certificate(&cert.to_pem().unwrap()).unwrap();
        assert_eq!(cert, again);
        assert_eq!(cert.subject(), again.subject());
        assert_eq!(cert.serial(), again.serial());

        let from_der = parse_certificate(cert.der()).unwrap();
        assert_eq!(cert, from_der);
    }

    #[test]
    fn test_malformed_certificate_is_typed_error() {
        let err = parse_certificate(b"-----BEGIN CERTIFICATE-----\nnope\n-----END CERTIFICATE-----\n")
            .unwrap_err();
        assert!(matches!(err, ParseError::MalformedCertificate(_)));
        assert!(parse_certificate(b"\x30\x03\x02\x01").is_err());
    }

    #[test]
    fn test_chain_parsing_keeps_order() {
        let mut bundle = WWW_DOMAIN_COM.to_vec();
        bundle.extend_from_slice(INTERMEDIATE);
        let chain = parse_certificate_chain(&bundle).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].subject_hash_hex(), "c07dba14");
        assert_eq!(chain[1].subject_hash_hex(), "f1453246");

        let pem = chain_to_pem(&chain).unwrap();
        assert_eq!(parse_certificate_chain(&pem).unwrap(), chain);
    }

    #[test]
    fn test_encrypted_key_password_errors() {
        let key = parse_private_key(WWW_DOMAIN_COM_KEY, None).unwrap();
        let password = SecretString::new("s3cret".to_string());
        let encrypted = key.to_pem(Some(&password)).unwrap();

        let decrypted = parse_private_key(&encrypted, Some(&password)).unwrap();
        assert_eq!(decrypted.modulus(), key.modulus());

        assert_eq!(
            parse_private_key(&encrypted, None).unwrap_err(),
            ParseError::PasswordRequired
        );
        let wrong = SecretString::new("wrong".to_string());
        assert_eq!(
            parse_private_key(&encrypted, Some(&wrong)).unwrap_err(),
            ParseError::WrongPassword
        );
    }

    #[test]
    fn test_public_key_is_rejected() {
        let key = parse_private_key(WWW_DOMAIN_COM_KEY, None).unwrap();
        let public = key.pkey().public_key_to_pem().unwrap();
        assert_eq!(
            parse_private_key(&public, None).unwrap_err(),
            ParseError::NotPrivateKey
        );
        assert!(matches!(
            parse_private_key(b"garbage", None).unwrap_err(),
            ParseError::MalformedKey(_)
        ));
    }

    #[test]
    fn test_ec_key_falls_back_after_rsa() {
        let pki = Pki::new();
        let (key, cert) = pki
            .self_signed_ec(CertificateRequest::leaf("ec.example.com"))
            .unwrap();
        let pem = key.private_key_to_pem_pkcs8().unwrap();
        let parsed = parse_private_key(&pem, None).unwrap();
        assert_eq!(parsed.algorithm(), KeyAlgorithm::Ec);
        assert!(parsed.modulus().is_none());

        let cert = Certificate::from_x509(cert).unwrap();
        assert!(cert.matches_key(&parsed));
        assert!(cert.modulus().is_none());
        assert_eq!(cert.public_key_id(), parsed.public_key_id());
    }

    #[test]
    fn test_generated_ca_flag_and_self_issued() {
        let pki = Pki::new();
        let root = pki.root("Test Root CA").unwrap();
        let cert = Certificate::from_x509(root.cert.clone()).unwrap();
        assert!(cert.is_ca());
        assert!(cert.is_self_issued());
        assert_eq!(cert.subject_hash(), cert.issuer_hash());
        assert_eq!(cert.validity().unwrap(), Validity::Valid);
    }
}
