// src/hash.rs

//! Checksum handling for fetched source archives
//!
//! Formulas declare archive checksums as `"<algorithm>:<hex>"`. Only
//! SHA-256 is accepted; the digest is streamed so large tarballs are never
//! held in memory.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
}

impl HashAlgorithm {
    /// Length of the hex digest
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(Error::ParseError(format!(
                "Unsupported checksum algorithm: {} (supported: sha256)",
                s
            ))),
        }
    }
}

/// A declared checksum: algorithm plus lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl Checksum {
    /// Parse a checksum in `algorithm:hex` form
    pub fn parse(s: &str) -> Result<Self> {
        let (algorithm, value) = s
            .split_once(':')
            .ok_or_else(|| Error::ParseError(format!("Invalid checksum format: {}", s)))?;

        let algorithm: HashAlgorithm = algorithm.parse()?;
        let value = value.to_lowercase();

        if value.len() != algorithm.hex_len() {
            return Err(Error::ParseError(format!(
                "Invalid {} checksum length: expected {}, got {}",
                algorithm,
                algorithm.hex_len(),
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::ParseError(format!("Invalid hex in checksum: {}", value)));
        }

        Ok(Self { algorithm, value })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Hash everything readable from `reader`
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify that a file matches a declared checksum
///
/// Returns `ChecksumMismatch` when the digests differ.
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<()> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;

    let actual = match expected.algorithm {
        HashAlgorithm::Sha256 => sha256_reader(&mut file)?,
    };

    if actual == expected.value {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: expected.value.clone(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_checksum_parse() {
        let checksum = Checksum::parse(&format!("sha256:{}", HELLO_WORLD.to_uppercase())).unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha256);
        assert_eq!(checksum.value, HELLO_WORLD);
        assert_eq!(checksum.to_string(), format!("sha256:{}", HELLO_WORLD));
    }

    #[test]
    fn test_checksum_parse_rejects_bad_input() {
        assert!(Checksum::parse("invalid").is_err());
        assert!(Checksum::parse("md5:abc123").is_err());
        assert!(Checksum::parse("sha256:abc123").is_err());
        assert!(Checksum::parse(&format!("sha256:{}", "z".repeat(64))).is_err());
    }

    #[test]
    fn test_verify_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let good = Checksum::parse(&format!("sha256:{}", HELLO_WORLD)).unwrap();
        assert!(verify_file(file.path(), &good).is_ok());

        let bad = Checksum::parse(&format!("sha256:{}", "0".repeat(64))).unwrap();
        match verify_file(file.path(), &bad) {
            Err(Error::ChecksumMismatch { actual, .. }) => assert_eq!(actual, HELLO_WORLD),
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }
}
