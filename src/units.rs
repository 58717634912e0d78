//! Native value units
//!
//! Amounts are held as integer subunits (`U256`, 10^18 subunits per native unit)
//! and converted to and from decimal strings without ever touching floating point.

use ethereum_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::EscrowError;

/// Number of subunit decimals in one native unit.
pub const NATIVE_DECIMALS: u32 = 18;

/// An amount of the ledger's native currency, stored in subunits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NativeAmount(U256);

impl NativeAmount {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn from_subunits(subunits: U256) -> Self {
        Self(subunits)
    }

    pub fn subunits(&self) -> U256 {
        self.0
    }

    /// Parses a decimal amount in native units (e.g. "1.5").
    pub fn parse(amount: &str) -> Result<Self, EscrowError> {
        parse_scaled(amount, NATIVE_DECIMALS).map(Self)
    }

    /// Parses a JSON-RPC hex quantity (e.g. "0xde0b6b3a7640000").
    pub fn from_hex_quantity(quantity: &str) -> Result<Self, EscrowError> {
        let digits = quantity.strip_prefix("0x").unwrap_or(quantity);
        if digits.is_empty() {
            return Ok(Self::zero());
        }
        U256::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| EscrowError::InvalidAmount(format!("Invalid hex quantity: {}", quantity)))
    }

    /// Formats as a JSON-RPC hex quantity (no leading zeros, "0x0" for zero).
    pub fn to_hex_quantity(&self) -> String {
        format!("0x{:x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for NativeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_scaled(self.0, NATIVE_DECIMALS))
    }
}

impl FromStr for NativeAmount {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for NativeAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NativeAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parses a non-negative decimal string into an integer scaled by 10^`decimals`.
///
/// Rejects signs, exponents, and more fractional digits than `decimals`.
pub fn parse_scaled(amount: &str, decimals: u32) -> Result<U256, EscrowError> {
    let trimmed = amount.trim();
    let invalid = || EscrowError::InvalidAmount(format!("'{}' is not a valid decimal amount", amount));

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (trimmed, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac_part.len() > decimals as usize {
        return Err(EscrowError::InvalidAmount(format!(
            "'{}' has more than {} decimal places",
            amount, decimals
        )));
    }

    let padded = format!("{}{:0<width$}", int_part, frac_part, width = decimals as usize);
    let mut value = U256::zero();
    for digit in padded.bytes() {
        value = value
            .checked_mul(U256::from(10u8))
            .and_then(|v| v.checked_add(U256::from(digit - b'0')))
            .ok_or_else(|| EscrowError::InvalidAmount(format!("'{}' overflows 256 bits", amount)))?;
    }
    Ok(value)
}

/// Formats an integer scaled by 10^`decimals` as a decimal string.
///
/// Trailing fractional zeros are trimmed but one fractional digit is always kept ("1.0").
pub fn format_scaled(value: U256, decimals: u32) -> String {
    let unit = U256::exp10(decimals as usize);
    let int_part = value / unit;
    let frac_part = value % unit;
    let frac = format!("{:0>width$}", frac_part.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{}.0", int_part)
    } else {
        format!("{}.{}", int_part, frac)
    }
}
