//! Transaction Orchestrator
//!
//! Drives one state-changing escrow action through a fixed state machine:
//!
//! ```text
//! Idle -> Validating -> Submitted -> Confirming -> Confirmed
//!             |             |             |
//!             +-------------+-------------+----> Failed
//! ```
//!
//! The session's snapshot is only touched after confirmation, by exactly one mirror
//! refresh. Success is reported after that refresh, never before. Nothing here
//! retries: a repeated `deposit` after an ambiguous failure could pay twice.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::EscrowError;
use crate::escrow::{methods, EscrowMirror, EscrowSnapshot, RoleGuard};
use crate::ledger::{ContractCall, LedgerAdapter, TxReceipt};
use crate::session::{PendingStatus, Session};
use crate::units::NativeAmount;

/// State-changing actions this client can take on an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowAction {
    /// Pay the sale price into the escrow
    Deposit,
    /// Confirm checks passed and release property and funds
    VerifyAndComplete,
}

impl EscrowAction {
    pub fn call(&self) -> ContractCall {
        match self {
            EscrowAction::Deposit => methods::deposit(),
            EscrowAction::VerifyAndComplete => methods::verify_and_complete(),
        }
    }

    /// Value attached to the call. A deposit carries exactly the snapshot's price.
    pub fn attached_value(&self, snapshot: &EscrowSnapshot) -> Option<NativeAmount> {
        match self {
            EscrowAction::Deposit => Some(snapshot.price_native),
            EscrowAction::VerifyAndComplete => None,
        }
    }
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowAction::Deposit => write!(f, "deposit"),
            EscrowAction::VerifyAndComplete => write!(f, "verifyAndComplete"),
        }
    }
}

/// Phase of one orchestrated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPhase {
    Idle,
    Validating,
    Submitted,
    Confirming,
    Confirmed,
    Failed,
}

/// Inputs that move an action between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    Begin,
    Authorized,
    Denied,
    Accepted,
    Rejected,
    Receipt,
    Reverted,
}

impl TxPhase {
    /// Transition table. `None` means the event is not valid in this phase.
    pub fn next(self, event: TxEvent) -> Option<TxPhase> {
        use TxEvent as E;
        use TxPhase as P;
        match (self, event) {
            (P::Idle, E::Begin) => Some(P::Validating),
            (P::Validating, E::Authorized) => Some(P::Submitted),
            (P::Validating, E::Denied) => Some(P::Failed),
            (P::Submitted, E::Accepted) => Some(P::Confirming),
            (P::Submitted, E::Rejected) => Some(P::Failed),
            (P::Confirming, E::Receipt) => Some(P::Confirmed),
            (P::Confirming, E::Reverted) => Some(P::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TxPhase::Confirmed | TxPhase::Failed)
    }
}

/// What the post-confirmation refresh produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    /// The session now holds this snapshot
    Fresh(EscrowSnapshot),
    /// The refresh failed; the session's snapshot predates the transaction
    Stale(EscrowError),
    /// The refresh succeeded but the session had moved on (ended or switched escrow)
    Discarded,
}

/// Result of a confirmed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub action: EscrowAction,
    pub receipt: TxReceipt,
    pub refresh: RefreshStatus,
    /// Phases passed through, in order
    pub phases: Vec<TxPhase>,
}

impl TxOutcome {
    /// `true` if the session's snapshot does not yet reflect this transaction.
    pub fn mirror_is_stale(&self) -> bool {
        !matches!(self.refresh, RefreshStatus::Fresh(_))
    }
}

/// One action's walk through the phase table
struct TxRun {
    action: EscrowAction,
    phases: Vec<TxPhase>,
}

impl TxRun {
    fn begin(action: EscrowAction) -> Self {
        let mut run = Self {
            action,
            phases: vec![TxPhase::Idle],
        };
        run.advance(TxEvent::Begin);
        run
    }

    fn phase(&self) -> TxPhase {
        self.phases.last().copied().unwrap_or(TxPhase::Idle)
    }

    fn advance(&mut self, event: TxEvent) {
        let from = self.phase();
        let to = match from.next(event) {
            Some(next) => next,
            None => {
                error!("{}: invalid event {:?} in phase {:?}", self.action, event, from);
                TxPhase::Failed
            }
        };
        self.phases.push(to);
        if to.is_terminal() {
            debug!("{} finished after {:?}", self.action, self.phases);
        }
    }
}

pub struct TransactionOrchestrator<L: LedgerAdapter> {
    ledger: Arc<L>,
    mirror: Arc<EscrowMirror<L>>,
}

impl<L: LedgerAdapter> TransactionOrchestrator<L> {
    pub fn new(ledger: Arc<L>, mirror: Arc<EscrowMirror<L>>) -> Self {
        Self { ledger, mirror }
    }

    /// Validates, submits and confirms `action` against the session's escrow.
    ///
    /// # Returns
    ///
    /// * `Ok(TxOutcome)` - Confirmed; check `refresh` for whether the mirror caught up
    /// * `Err(EscrowError::Busy)` - Another action is in flight; nothing was sent
    /// * `Err(EscrowError::NotLoaded)` - No escrow loaded
    /// * `Err(EscrowError::Denied)` - Role or state precondition failed; nothing was sent
    /// * `Err(EscrowError::TxError)` - Submission or confirmation failed; snapshot untouched
    ///
    /// Dropping the returned future part-way frees the action slot and unmutes polling.
    pub async fn submit(&self, action: EscrowAction, session: &Session) -> Result<TxOutcome, EscrowError> {
        let slot = session.reserve_action(action).await?;
        let mut run = TxRun::begin(action);
        let contract = slot.snapshot.contract_address;

        if let Err(reason) = RoleGuard::authorize(action, &session.account(), &slot.snapshot) {
            run.advance(TxEvent::Denied);
            slot.release(PendingStatus::Failed);
            warn!("{} on {} denied for {}: {}", action, contract, session.account(), reason);
            return Err(EscrowError::Denied(reason));
        }
        run.advance(TxEvent::Authorized);

        let value = action.attached_value(&slot.snapshot);
        let pending = match self.ledger.submit_call(&contract, &action.call(), value).await {
            Ok(pending) => pending,
            Err(e) => {
                run.advance(TxEvent::Rejected);
                slot.release(PendingStatus::Failed);
                error!("{} on {} rejected: {}", action, contract, e);
                return Err(EscrowError::TxError(e.to_string()));
            }
        };
        slot.record_submission(&pending.tx_hash);
        run.advance(TxEvent::Accepted);

        let receipt = match self.ledger.wait_for_confirmation(&pending).await {
            Ok(receipt) => receipt,
            Err(e) => {
                run.advance(TxEvent::Reverted);
                slot.release(PendingStatus::Failed);
                error!("{} on {} failed to confirm: {}", action, contract, e);
                return Err(EscrowError::TxError(e.to_string()));
            }
        };
        run.advance(TxEvent::Receipt);

        let tx_refresh = session.begin_transaction_refresh(&slot).await;
        let refresh = match self.mirror.refresh_address(&contract).await {
            Ok(snapshot) => {
                if session.apply_snapshot(tx_refresh.ticket(), snapshot.clone()).await {
                    RefreshStatus::Fresh(snapshot)
                } else {
                    RefreshStatus::Discarded
                }
            }
            Err(e) => {
                warn!("{} confirmed but escrow {} could not be refreshed: {}", action, contract, e);
                RefreshStatus::Stale(e)
            }
        };
        drop(tx_refresh);
        slot.release(PendingStatus::Confirmed);

        info!("{} on {} confirmed: {}", action, contract, receipt.tx_hash);
        Ok(TxOutcome {
            action,
            receipt,
            refresh,
            phases: run.phases,
        })
    }
}
