//! Content fingerprints for declared and applied resources.

use serde::{Deserialize, Deserializer, Serialize};

use crate::resource::Attributes;

/// Errors that can occur when validating a [`Digest`].
#[derive(thiserror::Error, Debug)]
pub enum DigestError {
    /// The hex string is not exactly 64 characters long.
    #[error("Invalid digest length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),

    /// The string contains characters outside `[0-9a-fA-F]`.
    #[error("Invalid digest: contains non-hex characters in '{0}'")]
    NonHex(String),
}

/// A validated content digest (64 hex characters).
///
/// The engine never interprets digest bytes; equality is the only operation
/// that matters. Two revisions with equal digests carry the same content,
/// and a runtime instance whose observed digest differs from what the
/// engine applied has been modified externally. Validation at construction
/// and deserialization keeps malformed hex from propagating through the
/// system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Create a new `Digest`, validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::InvalidLength`] if the string is not 64
    /// characters, or [`DigestError::NonHex`] if it contains non-hex
    /// characters.
    pub fn new(s: impl Into<String>) -> Result<Self, DigestError> {
        let s = s.into();
        if s.len() != 64 {
            return Err(DigestError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NonHex(s));
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Compute the BLAKE3 digest of raw content bytes.
    pub fn of_bytes(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hash.to_hex().to_string())
    }

    /// Compute the digest of an attribute payload.
    ///
    /// The payload is rendered as JSON before hashing. `BTreeMap` keys and
    /// `serde_json` object keys are both sorted, so the rendered form is
    /// canonical and the digest is stable across re-declarations of the
    /// same content.
    ///
    /// # Panics
    ///
    /// Panics if the attribute map fails to render as JSON; a string-keyed
    /// map of `serde_json::Value` always renders.
    pub fn of_attributes(attributes: &Attributes) -> Self {
        let canonical = serde_json::to_string(attributes)
            .expect("string-keyed attribute map renders as JSON");
        Self::of_bytes(canonical.as_bytes())
    }

    /// Get the digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
