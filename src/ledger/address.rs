//! Ledger addresses
//!
//! Parsing, EIP-55 checksumming and byte-wise (case-insensitive) comparison.

use ethereum_types::H160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::error::EscrowError;

/// A 20-byte ledger address.
///
/// Equality is on the raw bytes, so two spellings of the same address that differ
/// only in letter case compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(H160);

impl Address {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(H160::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Parses a `0x`-prefixed, 40 hex character address.
    ///
    /// All-lowercase and all-uppercase spellings are accepted as-is. Mixed case must
    /// carry a valid EIP-55 checksum.
    pub fn parse(input: &str) -> Result<Self, EscrowError> {
        let trimmed = input.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| EscrowError::InvalidAddress(format!("'{}' is missing the 0x prefix", input)))?;

        if hex_part.len() != 40 {
            return Err(EscrowError::InvalidAddress(format!(
                "'{}' must have 40 hex characters, got {}",
                input,
                hex_part.len()
            )));
        }

        let bytes = hex::decode(hex_part)
            .map_err(|_| EscrowError::InvalidAddress(format!("'{}' is not valid hex", input)))?;
        let address = Self(H160::from_slice(&bytes));

        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *hex_part {
            return Err(EscrowError::InvalidAddress(format!("'{}' has an invalid checksum", input)));
        }

        Ok(address)
    }

    /// Returns `true` if `input` parses as an address.
    pub fn is_valid(input: &str) -> bool {
        Self::parse(input).is_ok()
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0.as_bytes());
        let hash = Keccak256::digest(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Lowercase hex encoding, as sent over JSON-RPC.
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl FromStr for Address {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vector from EIP-55
    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_checksum_matches_eip55_vector() {
        let address = Address::parse(&CHECKSUMMED.to_lowercase()).unwrap();
        assert_eq!(address.to_checksum(), CHECKSUMMED);
    }

    #[test]
    fn test_case_insensitive_equality() {
        let lower = Address::parse(&CHECKSUMMED.to_lowercase()).unwrap();
        let upper = Address::parse(&format!("0x{}", CHECKSUMMED[2..].to_uppercase())).unwrap();
        let mixed = Address::parse(CHECKSUMMED).unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower, mixed);
    }

    #[test]
    fn test_rejects_bad_checksum() {
        // Flip the case of one checksummed letter
        let broken = CHECKSUMMED.replacen("aAeb", "aaeb", 1);
        assert!(matches!(Address::parse(&broken), Err(EscrowError::InvalidAddress(_))));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(!Address::is_valid(""));
        assert!(!Address::is_valid("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(!Address::is_valid("0x1234"));
        assert!(!Address::is_valid("0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
    }
}
