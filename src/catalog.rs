//! Lookup of declared resources.
//!
//! The catalog is built once per run. Certificates are found by any of their
//! keys, with this precedence: subject hash, legacy subject hash, target path,
//! title. When several resources share a hash the first declared one wins.

use crate::error::ConfigError;
use crate::resource::{CertificateResource, KeyResource};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub trait Catalog {
    fn find_certificate(&self, key: &str) -> Option<&CertificateResource>;
    fn find_key(&self, path: &Path) -> Option<&KeyResource>;
}

#[derive(Debug, Default)]
pub struct IndexedCatalog {
    certificates: Vec<CertificateResource>,
    keys: Vec<KeyResource>,
    by_subject_hash: HashMap<String, usize>,
    by_legacy_hash: HashMap<String, usize>,
    by_path: HashMap<String, usize>,
    by_title: HashMap<String, usize>,
    keys_by_path: HashMap<PathBuf, usize>,
}

impl IndexedCatalog {
    /// Index the declared resources. Two resources targeting the same path is a
    /// configuration error, whatever their kind.
    pub fn new(
        certificates: Vec<CertificateResource>,
        keys: Vec<KeyResource>,
    ) -> Result<Self, ConfigError> {
        let mut targets = HashSet::new();
        let paths = certificates
            .iter()
            .map(|c| &c.path)
            .chain(keys.iter().map(|k| &k.path));
        for path in paths {
            if !targets.insert(path.clone()) {
                return Err(ConfigError::DuplicatePath(path.display().to_string()));
            }
        }

        let mut catalog = IndexedCatalog::default();
        for (index, cert) in certificates.iter().enumerate() {
            if let Some(content) = &cert.content {
                first_wins(&mut catalog.by_subject_hash, content.subject_hash_hex(), index);
                first_wins(
                    &mut catalog.by_legacy_hash,
                    content.legacy_subject_hash_hex(),
                    index,
                );
            }
            first_wins(&mut catalog.by_path, cert.path.display().to_string(), index);
            first_wins(&mut catalog.by_title, cert.title.clone(), index);
        }
        catalog.keys_by_path = keys
            .iter()
            .enumerate()
            .map(|(index, key)| (key.path.clone(), index))
            .collect();
        catalog.certificates = certificates;
        catalog.keys = keys;
        Ok(catalog)
    }

    /// Certificates in declaration order.
    pub fn certificates(&self) -> &[CertificateResource] {
        &self.certificates
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> &[KeyResource] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.keys.is_empty()
    }
}

fn first_wins(index: &mut HashMap<String, usize>, key: String, position: usize) {
    if let Entry::Vacant(slot) = index.entry(key) {
        slot.insert(position);
    }
}

impl Catalog for IndexedCatalog {
    fn find_certificate(&self, key: &str) -> Option<&CertificateResource> {
        [
            &self.by_subject_hash,
            &self.by_legacy_hash,
            &self.by_path,
            &self.by_title,
        ]
        .iter()
        .find_map(|index| index.get(key))
        .map(|&position| &self.certificates[position])
    }

    fn find_key(&self, path: &Path) -> Option<&KeyResource> {
        self.keys_by_path
            .get(path)
            .map(|&position| &self.keys[position])
    }
}
