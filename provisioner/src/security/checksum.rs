//! Validated expected-checksum values.
//!
//! Accepts `sha256:<hex>`, `sha512:<hex>`, or bare hex whose length selects
//! the algorithm. Hex is normalised to lowercase.

use super::digest::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Returned when a checksum string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid checksum: {reason}")]
pub struct InvalidChecksum {
    /// Why the value was rejected.
    pub reason: String,
}

/// A caller-supplied digest an artifact must hash to.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::security::{DigestAlgorithm, ExpectedChecksum};
///
/// let hex = "A".repeat(64);
/// let checksum: ExpectedChecksum = hex.as_str().try_into().unwrap();
/// assert_eq!(checksum.algorithm(), DigestAlgorithm::Sha256);
/// assert_eq!(checksum.hex(), "a".repeat(64));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExpectedChecksum {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl ExpectedChecksum {
    /// Validate `hex` as a digest for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidChecksum`] when the length is wrong or a character
    /// is not hexadecimal.
    pub fn new(algorithm: DigestAlgorithm, hex: &str) -> Result<Self, InvalidChecksum> {
        let hex = hex.trim();
        if hex.len() != algorithm.hex_len() {
            return Err(InvalidChecksum {
                reason: format!(
                    "expected {} hex characters for {algorithm}, got {}",
                    algorithm.hex_len(),
                    hex.len()
                ),
            });
        }
        if let Some(bad) = hex.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(InvalidChecksum {
                reason: format!("non-hex character '{bad}'"),
            });
        }
        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// The digest algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// The lowercase hex digest.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl TryFrom<&str> for ExpectedChecksum {
    type Error = InvalidChecksum;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        if let Some((prefix, hex)) = value.split_once(':') {
            let algorithm = match prefix.to_ascii_lowercase().as_str() {
                "sha256" => DigestAlgorithm::Sha256,
                "sha512" => DigestAlgorithm::Sha512,
                other => {
                    return Err(InvalidChecksum {
                        reason: format!("unknown algorithm '{other}'"),
                    });
                }
            };
            return Self::new(algorithm, hex);
        }
        let algorithm = if value.len() == DigestAlgorithm::Sha512.hex_len() {
            DigestAlgorithm::Sha512
        } else {
            DigestAlgorithm::Sha256
        };
        Self::new(algorithm, value)
    }
}

impl TryFrom<String> for ExpectedChecksum {
    type Error = InvalidChecksum;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<ExpectedChecksum> for String {
    fn from(value: ExpectedChecksum) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ExpectedChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}
