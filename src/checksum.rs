//! Content checksums carried in the `sum` header.
//!
//! A digest renders as `<flag>,<value>`, where the flag names the algorithm
//! so that consumers can pick the matching verifier.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use sha2::{Digest as _, Sha512};

/// A computed content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    flag: char,
    value: String,
}

impl Digest {
    pub fn new(flag: char, value: impl Into<String>) -> Self {
        Self {
            flag,
            value: value.into(),
        }
    }

    /// Algorithm flag (`s` for SHA-512, `0` for the zero checksum).
    pub fn flag(&self) -> char {
        self.flag
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.flag, self.value)
    }
}

/// Error parsing a `<flag>,<value>` digest string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed digest '{0}'")]
pub struct ParseDigestError(pub String);

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (flag, value) = s
            .split_once(',')
            .ok_or_else(|| ParseDigestError(s.to_string()))?;
        let mut chars = flag.chars();
        match (chars.next(), chars.next()) {
            (Some(flag), None) if !value.is_empty() => Ok(Digest::new(flag, value)),
            _ => Err(ParseDigestError(s.to_string())),
        }
    }
}

/// Pluggable checksum capability.
///
/// Implementations must be deterministic over the given bytes.
pub trait Checksum: Send + Sync {
    /// Algorithm flag written in front of the digest value.
    fn flag(&self) -> char;

    /// Digest value for the given bytes.
    fn compute_sum(&self, bytes: &[u8]) -> String;

    fn digest(&self, bytes: &[u8]) -> Digest {
        Digest::new(self.flag(), self.compute_sum(bytes))
    }
}

/// SHA-512 over the full content, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha512Checksum;

impl Checksum for Sha512Checksum {
    fn flag(&self) -> char {
        's'
    }

    fn compute_sum(&self, bytes: &[u8]) -> String {
        hex::encode(Sha512::digest(bytes))
    }
}

/// Placeholder checksum for producers that do not want consumers to verify content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroChecksum;

impl Checksum for ZeroChecksum {
    fn flag(&self) -> char {
        '0'
    }

    fn compute_sum(&self, _bytes: &[u8]) -> String {
        "0".to_string()
    }
}

/// Checksum algorithm selection in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    #[default]
    Sha512,
    Zero,
}

impl ChecksumKind {
    pub fn build(self) -> Box<dyn Checksum> {
        match self {
            ChecksumKind::Sha512 => Box::new(Sha512Checksum),
            ChecksumKind::Zero => Box::new(ZeroChecksum),
        }
    }
}
