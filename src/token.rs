//! Property Token
//!
//! Read-only lookups on the property-token (ERC-721) contract that escrows hold
//! the deed token of.

use ethereum_types::U256;
use std::sync::Arc;
use tracing::debug;

use crate::error::EscrowError;
use crate::ledger::abi::decode_address;
use crate::ledger::{AbiArg, Address, ContractCall, LedgerAdapter, LedgerError};

pub struct PropertyTokenClient<L: LedgerAdapter> {
    ledger: Arc<L>,
    contract: Address,
}

impl<L: LedgerAdapter> PropertyTokenClient<L> {
    pub fn new(ledger: Arc<L>, contract: Address) -> Self {
        Self { ledger, contract }
    }

    /// Current owner of `token_id`. While a sale is pending this is the escrow itself.
    pub async fn owner_of(&self, token_id: U256) -> Result<Address, EscrowError> {
        let call = ContractCall::new("ownerOf(uint256)").with_arg(AbiArg::Uint(token_id));
        let failed = |e: LedgerError| EscrowError::ReadFailure(format!("ownerOf({}) on {} failed: {}", token_id, self.contract, e));
        debug!("ownerOf({}) on {}", token_id, self.contract);

        let data = self.ledger.read_call(&self.contract, &call).await.map_err(failed)?;
        decode_address(&data).map_err(failed)
    }
}
