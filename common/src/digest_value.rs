//! Digest value newtype for manifest comparison.
//!
//! Holds a lowercase hexadecimal digest whose length matches the declared
//! algorithm. Manifests may publish upper-case hex or base64; both are
//! normalised on construction.

use crate::algorithm::DigestAlgorithm;
use crate::error::{Result, ValidationError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated digest tagged with the algorithm that produced it.
///
/// # Examples
///
/// ```
/// use dist_integrity_common::algorithm::DigestAlgorithm;
/// use dist_integrity_common::digest_value::DigestValue;
///
/// let hex = "AB".repeat(32);
/// let digest = DigestValue::from_hex(DigestAlgorithm::Sha256, &hex).unwrap();
/// assert_eq!(digest.as_str(), "ab".repeat(32));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigestValue {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl DigestValue {
    /// Parse a hex digest, accepting either case.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDigest`] when the value has the wrong
    /// length for `algorithm` or contains non-hex characters.
    pub fn from_hex(algorithm: DigestAlgorithm, value: &str) -> Result<Self> {
        let hex = value.to_ascii_lowercase();
        validate_hex(algorithm, &hex)?;
        Ok(Self { algorithm, hex })
    }

    /// Decode a base64 digest.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDigest`] when the value is not valid
    /// base64 or decodes to the wrong number of bytes.
    pub fn from_base64(algorithm: DigestAlgorithm, value: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|err| invalid(algorithm, format!("not valid base64: {err}")))?;
        if bytes.len() != algorithm.output_len() {
            return Err(invalid(
                algorithm,
                format!(
                    "expected {} bytes, base64 decoded to {}",
                    algorithm.output_len(),
                    bytes.len()
                ),
            ));
        }
        Ok(Self::from_bytes(algorithm, &bytes))
    }

    /// Wrap raw digest output. The caller guarantees `bytes` came from
    /// `algorithm`.
    #[must_use]
    pub fn from_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> Self {
        let hex = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        Self { algorithm, hex }
    }

    /// Return the algorithm the digest belongs to.
    #[must_use]
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Return the digest as a lowercase hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Consume the wrapper and return the inner hex string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.hex
    }
}

impl AsRef<str> for DigestValue {
    fn as_ref(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for DigestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

fn invalid(algorithm: DigestAlgorithm, reason: String) -> ValidationError {
    ValidationError::InvalidDigest {
        algorithm: algorithm.to_string(),
        reason,
    }
}

fn validate_hex(algorithm: DigestAlgorithm, value: &str) -> Result<()> {
    let expected = algorithm.hex_len();
    if value.len() != expected {
        return Err(invalid(
            algorithm,
            format!("expected {expected} hex characters, got {}", value.len()),
        ));
    }
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(invalid(algorithm, format!("non-hex character '{bad}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn accepts_and_lowercases_uppercase_hex() {
        let digest = DigestValue::from_hex(DigestAlgorithm::Md5, &"AF".repeat(16))
            .expect("valid md5");
        assert_eq!(digest.as_str(), "af".repeat(16));
    }

    #[rstest]
    #[case(DigestAlgorithm::Sha256, "abc123")]
    #[case(DigestAlgorithm::Sha512, &"a".repeat(64))]
    #[case(DigestAlgorithm::Sha1, &"g".repeat(40))]
    fn rejects_malformed_hex(#[case] algorithm: DigestAlgorithm, #[case] value: &str) {
        let err = DigestValue::from_hex(algorithm, value).expect_err("should be rejected");
        assert!(matches!(err, ValidationError::InvalidDigest { .. }));
    }

    #[test]
    fn decodes_base64_to_hex() {
        let bytes = [0x01u8; 32];
        let encoded = STANDARD.encode(bytes);
        let digest =
            DigestValue::from_base64(DigestAlgorithm::Sha256, &encoded).expect("valid base64");
        assert_eq!(digest.as_str(), "01".repeat(32));
    }

    #[test]
    fn rejects_base64_of_wrong_length() {
        let encoded = STANDARD.encode([0x01u8; 20]);
        let err = DigestValue::from_base64(DigestAlgorithm::Sha256, &encoded)
            .expect_err("wrong length");
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn from_bytes_renders_zero_padded_hex() {
        let digest = DigestValue::from_bytes(DigestAlgorithm::Md5, &[0x0a; 16]);
        assert_eq!(digest.as_str(), "0a".repeat(16));
    }

    #[test]
    fn from_bytes_keeps_byte_order_and_case() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xff;
        bytes[1] = 0x10;
        bytes[19] = 0xab;
        let digest = DigestValue::from_bytes(DigestAlgorithm::Sha1, &bytes);
        assert!(digest.as_str().starts_with("ff10"));
        assert!(digest.as_str().ends_with("00ab"));
        assert_eq!(digest.as_str().len(), 40);
        assert!(DigestValue::from_hex(DigestAlgorithm::Sha1, digest.as_str()).is_ok());
    }
}
