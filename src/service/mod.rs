//! Services
//!
//! Long-running behavior on top of a session: orchestrated transactions and the
//! periodic poll loop.

pub mod orchestrator;
pub mod poller;

pub use orchestrator::{EscrowAction, RefreshStatus, TransactionOrchestrator, TxOutcome, TxPhase};
pub use poller::PollingSynchronizer;
