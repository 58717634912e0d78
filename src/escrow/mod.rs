//! Escrow state model
//!
//! The client's local picture of one deployed escrow instance, plus the contract
//! methods the client reads and calls on it.

pub mod guard;
pub mod mirror;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::{Address, ContractCall};
use crate::units::NativeAmount;

pub use guard::RoleGuard;
pub use mirror::EscrowMirror;

/// Remote escrow lifecycle.
///
/// The contract reports it as an integer ordinal. The order below is the wire
/// encoding and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    AwaitingPayment,
    AwaitingVerification,
    Complete,
    Refunded,
}

impl LifecycleState {
    /// Maps a remote ordinal to a state; unknown ordinals yield `None`.
    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        match ordinal {
            0 => Some(LifecycleState::AwaitingPayment),
            1 => Some(LifecycleState::AwaitingVerification),
            2 => Some(LifecycleState::Complete),
            3 => Some(LifecycleState::Refunded),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u64 {
        match self {
            LifecycleState::AwaitingPayment => 0,
            LifecycleState::AwaitingVerification => 1,
            LifecycleState::Complete => 2,
            LifecycleState::Refunded => 3,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::AwaitingPayment => "AWAITING_PAYMENT",
            LifecycleState::AwaitingVerification => "AWAITING_VERIFICATION",
            LifecycleState::Complete => "COMPLETE",
            LifecycleState::Refunded => "REFUNDED",
        };
        write!(f, "{}", label)
    }
}

/// Parties to one escrow. Fixed for the life of the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRoles {
    pub buyer: Address,
    pub buyer_solicitor: Address,
    pub seller: Address,
}

/// Point-in-time copy of one escrow instance's remote state.
///
/// Only ever replaced whole; never edited field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub contract_address: Address,
    /// Sale price in native units
    pub price_native: NativeAmount,
    pub lifecycle_state: LifecycleState,
    pub roles: EscrowRoles,
    /// Native balance held by the contract account, read independently of the price
    pub held_balance: NativeAmount,
}

/// PropertyEscrow contract methods
pub mod methods {
    use super::ContractCall;

    pub fn price() -> ContractCall {
        ContractCall::new("price()")
    }

    pub fn get_state() -> ContractCall {
        ContractCall::new("getState()")
    }

    pub fn buyer() -> ContractCall {
        ContractCall::new("buyer()")
    }

    pub fn buyer_solicitor() -> ContractCall {
        ContractCall::new("buyerSolicitor()")
    }

    pub fn seller() -> ContractCall {
        ContractCall::new("seller()")
    }

    /// Payable
    pub fn deposit() -> ContractCall {
        ContractCall::new("deposit()")
    }

    pub fn verify_and_complete() -> ContractCall {
        ContractCall::new("verifyAndComplete()")
    }
}
