//! Hashing utilities for content-addressed storage and verification.
//!
//! This module provides:
//! - `Fingerprint`: a full 256-bit SHA-256 hash
//! - `Digest`: a fingerprint plus the byte length it covers
//! - `Hashable`: stable hashing of serializable values (rule inputs)
//! - `hash_bytes()`: raw content hashing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

/// Error produced when serializing a value for hashing.
pub type HashError = serde_json::Error;

/// A 256-bit SHA-256 content hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
  /// Parse a 64-character lowercase or uppercase hex string.
  pub fn from_hex(s: &str) -> Result<Self, FingerprintParseError> {
    let bytes = hex::decode(s).map_err(|e| FingerprintParseError(format!("{s}: {e}")))?;
    let array: [u8; 32] = bytes
      .try_into()
      .map_err(|_| FingerprintParseError(format!("{s}: expected 32 bytes")))?;
    Ok(Self(array))
  }

  /// Lowercase hex rendering.
  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

impl fmt::Debug for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Fingerprint({})", self.to_hex())
  }
}

impl Serialize for Fingerprint {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for Fingerprint {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
  }
}

/// Error parsing a fingerprint or digest from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint: {0}")]
pub struct FingerprintParseError(pub String);

/// Identifies an immutable blob or a serialized directory tree.
///
/// Two digests with equal fingerprints are treated as identical content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest {
  pub fingerprint: Fingerprint,
  pub size: u64,
}

impl Digest {
  pub fn new(fingerprint: Fingerprint, size: u64) -> Self {
    Self { fingerprint, size }
  }

  /// Build a digest from a hex fingerprint and a size, as found in config files.
  pub fn from_hex(hex: &str, size: u64) -> Result<Self, FingerprintParseError> {
    Ok(Self::new(Fingerprint::from_hex(hex)?, size))
  }
}

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.fingerprint, self.size)
  }
}

impl fmt::Debug for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Digest({}/{})", self.fingerprint, self.size)
  }
}

impl FromStr for Digest {
  type Err = FingerprintParseError;

  /// Parses the `<hex>/<size>` form produced by `Display`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (hex, size) = s
      .split_once('/')
      .ok_or_else(|| FingerprintParseError(format!("{s}: expected <hex>/<size>")))?;
    let size = size
      .parse::<u64>()
      .map_err(|e| FingerprintParseError(format!("{s}: {e}")))?;
    Digest::from_hex(hex, size)
  }
}

/// Stable hashing of any serializable value.
///
/// The value is serialized to JSON and the SHA-256 of that text is returned.
/// Map-like inputs should use ordered collections so the serialization is
/// deterministic.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<Fingerprint, HashError> {
    let serialized = serde_json::to_vec(self)?;
    Ok(hash_bytes(&serialized).fingerprint)
  }
}

impl<T: Serialize + ?Sized> Hashable for T {}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Digest {
  let mut hasher = Sha256::new();
  hasher.update(data);
  Digest::new(Fingerprint(hasher.finalize().into()), data.len() as u64)
}
