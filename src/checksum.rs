//! Content checksums in `{algo}hexdigest` form.

use serde::Deserialize;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Digest `data` and label it with the algorithm, e.g. `{sha256}ab12...`.
    pub fn checksum(&self, data: &[u8]) -> String {
        let digest = match self {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            ChecksumAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
            ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
        };
        format!("{{{}}}{}", self.name(), digest)
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
