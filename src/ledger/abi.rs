//! Minimal contract ABI support
//!
//! Only the static word types the escrow and property-token contracts use:
//! `uint256` arguments, and `address` or `uint256` return words.

use ethereum_types::U256;
use sha3::{Digest, Keccak256};

use super::address::Address;
use super::LedgerError;

/// A single ABI-encodable argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiArg {
    Uint(U256),
}

/// A contract method invocation: canonical signature plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Canonical signature, e.g. `"ownerOf(uint256)"`
    pub signature: &'static str,
    pub args: Vec<AbiArg>,
}

impl ContractCall {
    pub fn new(signature: &'static str) -> Self {
        Self { signature, args: Vec::new() }
    }

    pub fn with_arg(mut self, arg: AbiArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Human-readable method name (signature without the argument list).
    pub fn method_name(&self) -> &'static str {
        self.signature.split('(').next().unwrap_or(self.signature)
    }

    /// ABI-encodes selector + arguments as hex calldata.
    pub fn encode(&self) -> String {
        let mut calldata = Vec::with_capacity(4 + 32 * self.args.len());
        calldata.extend_from_slice(&selector(self.signature));
        for arg in &self.args {
            match arg {
                AbiArg::Uint(value) => {
                    let mut word = [0u8; 32];
                    value.to_big_endian(&mut word);
                    calldata.extend_from_slice(&word);
                }
            }
        }
        format!("0x{}", hex::encode(calldata))
    }
}

/// First four bytes of keccak256(signature).
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Decodes hex return data into raw bytes.
pub fn decode_hex_data(data: &str) -> Result<Vec<u8>, LedgerError> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).map_err(|e| LedgerError::Decode(format!("Invalid hex return data: {}", e)))
}

fn first_word(data: &[u8]) -> Result<&[u8], LedgerError> {
    if data.is_empty() {
        return Err(LedgerError::Decode("no contract code at address (empty return data)".to_string()));
    }
    data.get(..32).ok_or_else(|| {
        LedgerError::Decode(format!("return data too short: {} bytes, expected 32", data.len()))
    })
}

/// Decodes the first return word as `uint256`.
pub fn decode_uint(data: &[u8]) -> Result<U256, LedgerError> {
    Ok(U256::from_big_endian(first_word(data)?))
}

/// Decodes the first return word as `address`. The 12 padding bytes must be zero.
pub fn decode_address(data: &[u8]) -> Result<Address, LedgerError> {
    let word = first_word(data)?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("address word has non-zero padding".to_string()));
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address::from_bytes(bytes))
}
