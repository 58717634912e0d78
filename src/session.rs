//! Session
//!
//! Ties one connected identity to at most one escrow snapshot, the in-flight
//! action slot and the poll loop handle. All snapshot changes go through
//! `apply_snapshot`, which replaces the whole snapshot in one step and only if the
//! refresh that produced it is still current.
//!
//! Staleness is tracked with two counters:
//! - `generation` moves when a different escrow is loaded or the session ends.
//!   Results issued under an older generation are dropped.
//! - every refresh takes a start sequence number, and a result is applied only if
//!   it started after the snapshot currently held. The latest-started read wins, so
//!   a slow concurrent read can never clobber a fresher one.
//!
//! Poll ticks are also skipped outright while a transaction-triggered refresh is
//! running, and a poll result that lands during one is dropped.
//!
//! The action slot and the transaction refresh are held through guards
//! (`ActionSlot`, `TxRefresh`) that release on drop, so an abandoned `submit`
//! future never leaves the session busy or its poller muted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::EscrowError;
use crate::escrow::EscrowSnapshot;
use crate::ledger::Address;
use crate::service::orchestrator::EscrowAction;

/// Progress of the session's in-flight action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// Transient record of one in-flight state-changing call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub kind: EscrowAction,
    pub submitted_at: DateTime<Utc>,
    pub status: PendingStatus,
    /// Set once the ledger has accepted the submission
    pub tx_hash: Option<String>,
}

/// Where a refresh result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSource {
    Load,
    Transaction,
    Poll,
}

/// Issued when a refresh starts; presented back to `apply_snapshot` with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    pub source: RefreshSource,
    pub contract: Address,
    generation: u64,
    seq: u64,
}

/// Reservation of the session's single action slot. Dropping it frees the slot,
/// recording the action as failed unless `release` said otherwise.
#[derive(Debug)]
pub struct ActionSlot<'a> {
    session: &'a Session,
    pub kind: EscrowAction,
    pub snapshot: EscrowSnapshot,
    generation: u64,
    outcome: PendingStatus,
}

impl ActionSlot<'_> {
    /// Records the transaction hash of the in-flight action.
    pub fn record_submission(&self, tx_hash: &str) {
        if let Some(pending) = self.session.pending_slot().as_mut() {
            pending.tx_hash = Some(tx_hash.to_string());
        }
    }

    /// Finishes the action with `status` and frees the slot.
    pub fn release(mut self, status: PendingStatus) {
        self.outcome = status;
    }
}

impl Drop for ActionSlot<'_> {
    fn drop(&mut self) {
        if let Some(mut pending) = self.session.pending_slot().take() {
            pending.status = self.outcome;
            debug!("Action {:?} finished: {:?}", pending.kind, pending.status);
        }
    }
}

/// A running transaction-triggered refresh. Poll ticks stay muted until its
/// result is applied or it is dropped.
#[derive(Debug)]
pub struct TxRefresh<'a> {
    session: &'a Session,
    ticket: RefreshTicket,
}

impl TxRefresh<'_> {
    pub fn ticket(&self) -> RefreshTicket {
        self.ticket
    }
}

impl Drop for TxRefresh<'_> {
    fn drop(&mut self) {
        self.session.tx_refresh_active.store(false, Ordering::SeqCst);
    }
}

/// Owns a spawned poll loop; aborting on drop means a torn-down session can
/// never be touched by a leftover timer.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
struct SessionState {
    snapshot: Option<EscrowSnapshot>,
    /// Generation whose results are currently accepted
    generation: u64,
    /// Last generation handed out; generations are never reused
    latest_generation: u64,
    /// Generation under which the held snapshot was applied
    shown_generation: u64,
    /// Start sequence of the most recently issued ticket
    issued_seq: u64,
    /// Start sequence of the ticket whose snapshot is currently held
    applied_seq: u64,
    auto_refresh_enabled: bool,
    ended: bool,
}

impl SessionState {
    fn next_generation(&mut self) {
        self.latest_generation += 1;
        self.generation = self.latest_generation;
    }

    fn issue(&mut self, source: RefreshSource, contract: Address) -> RefreshTicket {
        self.issued_seq += 1;
        RefreshTicket {
            source,
            contract,
            generation: self.generation,
            seq: self.issued_seq,
        }
    }
}

/// One connected identity's view of one escrow
#[derive(Debug)]
pub struct Session {
    account: Address,
    state: RwLock<SessionState>,
    pending: Mutex<Option<PendingAction>>,
    tx_refresh_active: AtomicBool,
    poll_handle: Mutex<Option<PollHandle>>,
    /// Set once by `end`; no poll loop can be installed afterwards
    closed: AtomicBool,
    /// Publishes every applied snapshot
    updates: watch::Sender<Option<EscrowSnapshot>>,
}

impl Session {
    /// Creates a session for a freshly connected account.
    pub fn new(account: Address, auto_refresh_enabled: bool) -> Self {
        Self {
            account,
            state: RwLock::new(SessionState {
                snapshot: None,
                generation: 0,
                latest_generation: 0,
                shown_generation: 0,
                issued_seq: 0,
                applied_seq: 0,
                auto_refresh_enabled,
                ended: false,
            }),
            pending: Mutex::new(None),
            tx_refresh_active: AtomicBool::new(false),
            poll_handle: Mutex::new(None),
            closed: AtomicBool::new(false),
            updates: watch::channel(None).0,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub async fn snapshot(&self) -> Option<EscrowSnapshot> {
        self.state.read().await.snapshot.clone()
    }

    pub async fn pending_action(&self) -> Option<PendingAction> {
        self.pending_slot().clone()
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<PendingAction>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn auto_refresh_enabled(&self) -> bool {
        self.state.read().await.auto_refresh_enabled
    }

    pub async fn set_auto_refresh_enabled(&self, enabled: bool) {
        self.state.write().await.auto_refresh_enabled = enabled;
    }

    pub async fn is_ended(&self) -> bool {
        self.state.read().await.ended
    }

    /// Receiver that sees each snapshot as it is applied.
    pub fn subscribe(&self) -> watch::Receiver<Option<EscrowSnapshot>> {
        self.updates.subscribe()
    }

    // ------------------------------------------------------------------------
    // Refresh tickets
    // ------------------------------------------------------------------------

    /// Starts loading `contract`. Loading a different escrow than the one shown
    /// invalidates every older in-flight result for this session until the load
    /// either lands or is abandoned.
    pub async fn begin_load(&self, contract: Address) -> Result<RefreshTicket, EscrowError> {
        let mut state = self.state.write().await;
        if state.ended {
            return Err(EscrowError::NotConnected);
        }
        let switching = state.snapshot.as_ref().map(|s| s.contract_address) != Some(contract);
        if switching {
            state.next_generation();
        }
        Ok(state.issue(RefreshSource::Load, contract))
    }

    /// Gives up on a load whose read failed.
    ///
    /// If it was the latest switch to another escrow, results for the escrow still
    /// shown become current again.
    pub async fn abandon_load(&self, ticket: RefreshTicket) {
        let mut state = self.state.write().await;
        if state.ended || ticket.source != RefreshSource::Load || ticket.generation != state.generation {
            return;
        }
        if state.generation != state.shown_generation {
            debug!("Load of {} abandoned; keeping the escrow shown", ticket.contract);
            state.generation = state.shown_generation;
        }
    }

    /// Starts the single refresh that follows a confirmed transaction.
    ///
    /// Poll ticks that start while it is active are skipped, and any poll already
    /// in flight is outranked by it.
    pub async fn begin_transaction_refresh(&self, slot: &ActionSlot<'_>) -> TxRefresh<'_> {
        let mut state = self.state.write().await;
        self.tx_refresh_active.store(true, Ordering::SeqCst);
        let mut ticket = state.issue(RefreshSource::Transaction, slot.snapshot.contract_address);
        ticket.generation = slot.generation;
        TxRefresh { session: self, ticket }
    }

    /// Starts a poll tick refresh, or returns `None` when the tick must be skipped.
    pub async fn begin_poll_refresh(&self) -> Option<RefreshTicket> {
        let mut state = self.state.write().await;
        if state.ended {
            return None;
        }
        if self.tx_refresh_active.load(Ordering::SeqCst) {
            debug!("Skipping poll tick: transaction refresh in progress");
            return None;
        }
        let contract = state.snapshot.as_ref()?.contract_address;
        Some(state.issue(RefreshSource::Poll, contract))
    }

    /// The only way a snapshot enters the session.
    ///
    /// Replaces the whole snapshot atomically. Returns `false` (and changes nothing
    /// beyond clearing a finished transaction refresh) when the ticket is stale.
    pub async fn apply_snapshot(&self, ticket: RefreshTicket, snapshot: EscrowSnapshot) -> bool {
        let mut state = self.state.write().await;

        if ticket.source == RefreshSource::Transaction {
            self.tx_refresh_active.store(false, Ordering::SeqCst);
        }

        let shown_contract = state.snapshot.as_ref().map(|s| s.contract_address);
        let current = !state.ended
            && ticket.generation == state.generation
            && snapshot.contract_address == ticket.contract
            && (ticket.source == RefreshSource::Load || shown_contract == Some(ticket.contract))
            && ticket.seq > state.applied_seq
            && !(ticket.source == RefreshSource::Poll && self.tx_refresh_active.load(Ordering::SeqCst));

        if !current {
            debug!("Discarding stale {:?} refresh for {}", ticket.source, ticket.contract);
            return false;
        }

        state.applied_seq = ticket.seq;
        state.shown_generation = ticket.generation;
        state.snapshot = Some(snapshot.clone());
        self.updates.send_replace(Some(snapshot));
        true
    }

    // ------------------------------------------------------------------------
    // Action slot
    // ------------------------------------------------------------------------

    /// Reserves the session's only action slot.
    ///
    /// # Returns
    ///
    /// * `Ok(ActionSlot)` - Slot reserved; carries the snapshot the action was validated against
    /// * `Err(EscrowError::Busy)` - Another action is in flight
    /// * `Err(EscrowError::NotLoaded)` - No escrow loaded
    pub async fn reserve_action(&self, kind: EscrowAction) -> Result<ActionSlot<'_>, EscrowError> {
        let state = self.state.read().await;
        if state.ended {
            return Err(EscrowError::NotConnected);
        }
        let mut pending = self.pending_slot();
        if pending.is_some() {
            return Err(EscrowError::Busy);
        }
        let snapshot = state.snapshot.clone().ok_or(EscrowError::NotLoaded)?;

        *pending = Some(PendingAction {
            kind,
            submitted_at: Utc::now(),
            status: PendingStatus::Submitted,
            tx_hash: None,
        });

        Ok(ActionSlot {
            session: self,
            kind,
            snapshot,
            generation: state.generation,
            outcome: PendingStatus::Failed,
        })
    }

    // ------------------------------------------------------------------------
    // Polling and teardown
    // ------------------------------------------------------------------------

    /// Stores a poll handle unless one is already running or the session has ended.
    /// Returns `true` if stored.
    pub fn install_poll_handle(&self, handle: PollHandle) -> bool {
        let mut slot = self.poll_handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if slot.as_ref().map(PollHandle::is_running).unwrap_or(false) {
            return false;
        }
        *slot = Some(handle);
        true
    }

    /// Returns `true` if a poll loop is currently running for this session.
    pub fn is_polling(&self) -> bool {
        self.poll_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(PollHandle::is_running)
            .unwrap_or(false)
    }

    /// Stops the poll loop if one is running. Returns `true` if one was stopped.
    pub fn stop_polling(&self) -> bool {
        let handle = self
            .poll_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match handle {
            Some(handle) => {
                let was_running = handle.is_running();
                drop(handle);
                was_running
            }
            None => false,
        }
    }

    /// Tears the session down: stops polling and invalidates every in-flight result.
    pub async fn end(&self) {
        {
            let _slot = self.poll_handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.closed.store(true, Ordering::SeqCst);
        }
        self.stop_polling();
        let mut state = self.state.write().await;
        if !state.ended {
            state.ended = true;
            state.next_generation();
            info!("Session for {} ended", self.account);
        }
    }
}
