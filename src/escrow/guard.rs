//! Role Guard
//!
//! Decides whether the connected identity may perform an escrow action in the
//! snapshot's current lifecycle state. Role is checked before state, so a caller
//! without the role is told "not authorized" whatever state the escrow is in.

use super::{EscrowSnapshot, LifecycleState};
use crate::error::DenialReason;
use crate::ledger::Address;
use crate::service::orchestrator::EscrowAction;

pub struct RoleGuard;

impl RoleGuard {
    /// Authorizes `action` for `account` against `snapshot`.
    ///
    /// Addresses compare on their bytes, so checksummed and lowercase spellings match.
    pub fn authorize(action: EscrowAction, account: &Address, snapshot: &EscrowSnapshot) -> Result<(), DenialReason> {
        let (required_role, required_state) = Self::requirements(action, snapshot);

        if *account != required_role {
            return Err(DenialReason::NotAuthorized);
        }
        if snapshot.lifecycle_state != required_state {
            return Err(DenialReason::WrongState);
        }
        Ok(())
    }

    fn requirements(action: EscrowAction, snapshot: &EscrowSnapshot) -> (Address, LifecycleState) {
        match action {
            // The buyer's solicitor pays in; the buyer never deposits directly.
            EscrowAction::Deposit => (snapshot.roles.buyer_solicitor, LifecycleState::AwaitingPayment),
            EscrowAction::VerifyAndComplete => {
                (snapshot.roles.buyer_solicitor, LifecycleState::AwaitingVerification)
            }
        }
    }
}
