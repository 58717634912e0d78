//! Escrow Client Library
//!
//! Tracks and drives a property-sale escrow whose authoritative state lives in a
//! deployed contract. The client never owns that state: it mirrors it, gates each
//! action on role and lifecycle preconditions, submits state-changing calls through
//! a two-phase submit/confirm protocol, and keeps the mirror fresh by polling.

pub mod client;
pub mod config;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod price_feed;
pub mod service;
pub mod session;
pub mod token;
pub mod units;

// Re-export public types for convenience
pub use client::EscrowClient;
pub use config::{ClientConfig, LedgerConfig, PriceFeedConfig, PriceFeedKind, ServiceConfig, TokenConfig};
pub use error::{DenialReason, EscrowError};
pub use escrow::{EscrowMirror, EscrowRoles, EscrowSnapshot, LifecycleState, RoleGuard};
pub use ledger::{Address, EvmLedgerClient, LedgerAdapter, LedgerError, PendingTx, TxReceipt};
pub use price_feed::{Conversion, CurrencyConverter, PriceFeedClient, SpotRate};
pub use service::orchestrator::{EscrowAction, RefreshStatus, TransactionOrchestrator, TxOutcome, TxPhase};
pub use service::poller::PollingSynchronizer;
pub use session::{PendingAction, PendingStatus, Session};
pub use token::PropertyTokenClient;
pub use units::NativeAmount;
