//! Remote Ledger Adapter
//!
//! The seam between the escrow core and the value-transfer network. Every method
//! suspends; none of them retry. `EvmLedgerClient` implements it over JSON-RPC.

pub mod abi;
pub mod address;
pub mod evm_client;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

use crate::units::NativeAmount;

pub use abi::{AbiArg, ContractCall};
pub use address::Address;
pub use evm_client::EvmLedgerClient;

/// Failures reported by a ledger adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON-RPC error: {message} (code: {code})")]
    Rpc { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("No account connected")]
    NotConnected,

    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Handle for a submitted, not yet confirmed, state-changing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    pub tx_hash: String,
    /// Contract the call targets
    pub to: Address,
    /// Method name, for logging
    pub method: String,
    pub submitted_at: DateTime<Utc>,
}

/// Confirmation that a state-changing call was durably accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: Option<u64>,
}

/// Interface to the external ledger and its deployed contracts.
pub trait LedgerAdapter: Send + Sync + 'static {
    /// Selects the identity this client acts as.
    fn connect(&self) -> impl Future<Output = Result<Address, LedgerError>> + Send;

    /// Account selected by the last successful `connect`, if any.
    fn connected_account(&self) -> Option<Address>;

    /// Read-only contract call; returns raw ABI return data.
    fn read_call(
        &self,
        contract: &Address,
        call: &ContractCall,
    ) -> impl Future<Output = Result<Vec<u8>, LedgerError>> + Send;

    /// Fire phase of a state-changing call. Returns as soon as the network accepts it.
    fn submit_call(
        &self,
        contract: &Address,
        call: &ContractCall,
        value: Option<NativeAmount>,
    ) -> impl Future<Output = Result<PendingTx, LedgerError>> + Send;

    /// Confirm phase. May take an unbounded amount of time.
    fn wait_for_confirmation(
        &self,
        pending: &PendingTx,
    ) -> impl Future<Output = Result<TxReceipt, LedgerError>> + Send;

    /// Native balance held by `address`.
    fn balance_of(&self, address: &Address) -> impl Future<Output = Result<NativeAmount, LedgerError>> + Send;
}
