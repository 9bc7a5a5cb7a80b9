//! Digest primitives shared by chunk hashing and the combining step.
//!
//! Both levels of the composite digest must use the same algorithm, otherwise
//! manifests written by earlier runs stop matching.

use sha1::Digest as _;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// SHA-1, the format of existing `.sha1` manifests.
    #[default]
    Sha1,
    Blake3,
}

impl DigestAlgorithm {
    /// Raw digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Blake3 => 32,
        }
    }

    /// Length of the lower-case hex encoding stored in manifests.
    pub fn hex_len(self) -> usize {
        self.digest_len() * 2
    }

    /// Name of the per-directory manifest file for this algorithm. Scans with
    /// this algorithm never report it as a trackable entry.
    pub fn manifest_name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => ".sha1",
            DigestAlgorithm::Blake3 => ".blake3",
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            DigestAlgorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut h = self.hasher();
        h.update(data);
        h.finalize()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Blake3 => "blake3",
        })
    }
}

/// Incremental hasher over either supported algorithm.
pub enum Hasher {
    Sha1(sha1::Sha1),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}
