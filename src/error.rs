//! Error types
//!
//! Every failure an escrow session can see. None of them poison the session:
//! after any single error the caller can keep using it.

use std::fmt;
use thiserror::Error;

/// Why the Role Guard refused an action.
///
/// The two reasons drive different user-facing messages and must stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Connected account does not hold the role the action requires
    NotAuthorized,
    /// Escrow is not in the lifecycle state the action requires
    WrongState,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::NotAuthorized => write!(f, "not authorized"),
            DenialReason::WrongState => write!(f, "wrong state"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Malformed contract or account address. Local, never retried.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A remote read failed (network, or no contract at the address).
    #[error("Read failure: {0}")]
    ReadFailure(String),

    /// Role or lifecycle precondition failed.
    #[error("Denied: {0}")]
    Denied(DenialReason),

    /// Another state-changing action is still in flight for this session.
    #[error("Busy: another action is already in flight")]
    Busy,

    /// Submission or confirmation failed remotely. Message is the adapter's, verbatim.
    #[error("Transaction error: {0}")]
    TxError(String),

    /// Price feed failed. Advisory only.
    #[error("Rate unavailable: {0}")]
    RateUnavailable(String),

    /// An escrow action was requested before any escrow was loaded.
    #[error("No escrow loaded in this session")]
    NotLoaded,

    /// No identity has been selected on the ledger yet.
    #[error("No connected account")]
    NotConnected,

    /// Malformed decimal amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

impl EscrowError {
    /// Returns the denial reason if this is a `Denied` error.
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            EscrowError::Denied(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
