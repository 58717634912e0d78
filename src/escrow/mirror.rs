//! Escrow Mirror
//!
//! Assembles an `EscrowSnapshot` from a fixed, ordered set of reads against one
//! contract instance. A refresh is a pure query: it either yields a complete new
//! snapshot or fails as a whole, so a caller's previous snapshot is never
//! partially overwritten.

use ethereum_types::U256;
use std::sync::Arc;
use tracing::{debug, info};

use super::{methods, EscrowRoles, EscrowSnapshot, LifecycleState};
use crate::error::EscrowError;
use crate::ledger::abi::{decode_address, decode_uint};
use crate::ledger::{Address, ContractCall, LedgerAdapter, LedgerError};
use crate::units::NativeAmount;

pub struct EscrowMirror<L: LedgerAdapter> {
    ledger: Arc<L>,
}

impl<L: LedgerAdapter> EscrowMirror<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Validates `contract_address` and refreshes it.
    ///
    /// # Returns
    ///
    /// * `Ok(EscrowSnapshot)` - Fresh snapshot
    /// * `Err(EscrowError::InvalidAddress)` - Malformed address; no network call was made
    /// * `Err(EscrowError::ReadFailure)` - Any individual read failed
    pub async fn refresh(&self, contract_address: &str) -> Result<EscrowSnapshot, EscrowError> {
        let address = Address::parse(contract_address)?;
        self.refresh_address(&address).await
    }

    /// Refreshes an already-parsed contract address.
    pub async fn refresh_address(&self, contract: &Address) -> Result<EscrowSnapshot, EscrowError> {
        debug!("Refreshing escrow {}", contract);

        let price = self.read_uint(contract, methods::price()).await?;
        let ordinal = self.read_uint(contract, methods::get_state()).await?;
        let buyer = self.read_address(contract, methods::buyer()).await?;
        let buyer_solicitor = self.read_address(contract, methods::buyer_solicitor()).await?;
        let seller = self.read_address(contract, methods::seller()).await?;
        let held_balance = self
            .ledger
            .balance_of(contract)
            .await
            .map_err(|e| read_failure(contract, "balance", e))?;

        let lifecycle_state = ordinal_to_state(ordinal)?;

        let snapshot = EscrowSnapshot {
            contract_address: *contract,
            price_native: NativeAmount::from_subunits(price),
            lifecycle_state,
            roles: EscrowRoles {
                buyer,
                buyer_solicitor,
                seller,
            },
            held_balance,
        };

        info!(
            "Escrow {}: state={}, price={}, balance={}",
            contract, snapshot.lifecycle_state, snapshot.price_native, snapshot.held_balance
        );
        Ok(snapshot)
    }

    async fn read_uint(&self, contract: &Address, call: ContractCall) -> Result<U256, EscrowError> {
        let data = self
            .ledger
            .read_call(contract, &call)
            .await
            .map_err(|e| read_failure(contract, call.method_name(), e))?;
        decode_uint(&data).map_err(|e| read_failure(contract, call.method_name(), e))
    }

    async fn read_address(&self, contract: &Address, call: ContractCall) -> Result<Address, EscrowError> {
        let data = self
            .ledger
            .read_call(contract, &call)
            .await
            .map_err(|e| read_failure(contract, call.method_name(), e))?;
        decode_address(&data).map_err(|e| read_failure(contract, call.method_name(), e))
    }
}

/// Unknown ordinals fail closed rather than defaulting to the first state.
fn ordinal_to_state(ordinal: U256) -> Result<LifecycleState, EscrowError> {
    if ordinal > U256::from(u64::MAX) {
        return Err(EscrowError::ReadFailure(format!("Unrecognized lifecycle ordinal {}", ordinal)));
    }
    LifecycleState::from_ordinal(ordinal.as_u64())
        .ok_or_else(|| EscrowError::ReadFailure(format!("Unrecognized lifecycle ordinal {}", ordinal)))
}

fn read_failure(contract: &Address, what: &str, error: LedgerError) -> EscrowError {
    EscrowError::ReadFailure(format!("{} read on {} failed: {}", what, contract, error))
}
