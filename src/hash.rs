// src/hash.rs

//! Checksums and artifact verification
//!
//! Package indexes and lock files describe artifacts with `algorithm:digest`
//! pairs. This module computes those digests and checks downloaded files
//! against them:
//! - **SHA-2 family** (sha224, sha256, sha384, sha512)
//! - **MD5**, still published by some indexes
//!
//! An expected set is a disjunction: a file passes when any supported entry
//! matches. Entries using an algorithm we cannot compute are skipped with a
//! warning.

use crate::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum HashAlgorithm {
    Md5,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha224" | "sha-224" => Ok(Self::Sha224),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha384" | "sha-384" => Ok(Self::Sha384),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    UnknownAlgorithm(String),
    /// Specifier is not of the form `algorithm:digest`
    InvalidSpecifier(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidSpecifier(s) => write!(
                f,
                "Not a valid hash specifier: '{}' (expected 'algorithm:digest')",
                s
            ),
        }
    }
}

impl std::error::Error for HashError {}

/// An expected or computed digest
///
/// The algorithm is kept as a free-form name so that entries we cannot
/// compute still survive parsing; both parts are stored lowercase, which
/// makes equality ignore the case of the hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChecksumInfo {
    algorithm: String,
    hexdigest: String,
}

impl ChecksumInfo {
    pub fn new(algorithm: impl AsRef<str>, hexdigest: impl AsRef<str>) -> Self {
        Self {
            algorithm: algorithm.as_ref().to_lowercase(),
            hexdigest: hexdigest.as_ref().to_lowercase(),
        }
    }

    /// Parse an `algorithm:digest` specifier
    pub fn parse(spec: &str) -> std::result::Result<Self, HashError> {
        match spec.split_once(':') {
            Some((algorithm, digest)) if !algorithm.is_empty() && !digest.is_empty() => {
                Ok(Self::new(algorithm, digest))
            }
            _ => Err(HashError::InvalidSpecifier(spec.to_string())),
        }
    }

    #[inline]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    #[inline]
    pub fn hexdigest(&self) -> &str {
        &self.hexdigest
    }

    /// The algorithm, if it is one we can compute
    pub fn supported_algorithm(&self) -> Option<HashAlgorithm> {
        self.algorithm.parse().ok()
    }
}

impl fmt::Display for ChecksumInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hexdigest)
    }
}

impl FromStr for ChecksumInfo {
    type Err = HashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Hasher that can compute digests using any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha224 => HasherState::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => HasherState::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(hasher) => hasher.update(data),
            HasherState::Sha224(hasher) => hasher.update(data),
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Sha384(hasher) => hasher.update(data),
            HasherState::Sha512(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the digest
    pub fn finalize(self) -> ChecksumInfo {
        let value = match self.state {
            HasherState::Md5(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha224(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha384(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha512(hasher) => format!("{:x}", hasher.finalize()),
        };
        ChecksumInfo::new(self.algorithm.name(), value)
    }

    /// Get the algorithm being used
    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> ChecksumInfo {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute several digests of a reader in a single pass
pub fn hash_reader<R: Read>(
    algorithms: &[HashAlgorithm],
    reader: &mut R,
) -> io::Result<Vec<ChecksumInfo>> {
    let mut hashers: Vec<Hasher> = algorithms.iter().map(|a| Hasher::new(*a)).collect();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        for hasher in &mut hashers {
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hashers.into_iter().map(Hasher::finalize).collect())
}

/// SHA-256 of a byte slice as a hex string
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).hexdigest
}

// =============================================================================
// Verification functions
// =============================================================================

/// Check that a file matches at least one of the expected checksums
///
/// Only the algorithms present in `expected` are computed. The file is left
/// untouched; see [`must_match_any_checksum`] for the purging variant.
pub fn verify_any(path: &Path, expected: &BTreeSet<ChecksumInfo>) -> Result<()> {
    let artifact = artifact_name(path);

    let algorithms: BTreeSet<HashAlgorithm> = expected
        .iter()
        .filter_map(|checksum| match checksum.supported_algorithm() {
            Some(algorithm) => Some(algorithm),
            None => {
                warn!(
                    "{}: {} checksums are not supported, skipping {}",
                    artifact,
                    checksum.algorithm(),
                    checksum
                );
                None
            }
        })
        .collect();

    if algorithms.is_empty() {
        return Err(Error::ChecksumMismatch {
            artifact,
            expected: join_checksums(expected),
            actual: "<no supported algorithm>".to_string(),
        });
    }

    let algorithms: Vec<HashAlgorithm> = algorithms.into_iter().collect();
    let mut file = std::fs::File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    let computed = hash_reader(&algorithms, &mut file)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;

    for actual in &computed {
        if expected.contains(actual) {
            debug!("{}: {} checksum matches", artifact, actual.algorithm());
            return Ok(());
        }
    }

    for actual in &computed {
        warn!(
            "{}: {} checksum does not match (got: {})",
            artifact,
            actual.algorithm(),
            actual.hexdigest()
        );
    }

    Err(Error::ChecksumMismatch {
        artifact,
        expected: join_checksums(expected),
        actual: join_checksums(computed.iter()),
    })
}

/// Verify a downloaded artifact, deleting it when nothing matches
///
/// A file that failed verification never stays in the cache, so a later
/// partial re-run cannot mistake it for a valid artifact.
pub fn must_match_any_checksum(path: &Path, expected: &BTreeSet<ChecksumInfo>) -> Result<()> {
    if let Err(e) = verify_any(path, expected) {
        if path.exists() {
            debug!("Removing unverified artifact {}", path.display());
            let _ = std::fs::remove_file(path);
        }
        return Err(e);
    }
    Ok(())
}

fn artifact_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn join_checksums<'a>(checksums: impl IntoIterator<Item = &'a ChecksumInfo>) -> String {
    checksums
        .into_iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
