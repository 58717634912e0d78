//! Polling Synchronizer
//!
//! Periodically refreshes the session's escrow so changes made by other parties
//! show up without user action. Failures are logged and the loop keeps going.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::escrow::EscrowMirror;
use crate::ledger::LedgerAdapter;
use crate::session::{PollHandle, Session};

pub struct PollingSynchronizer<L: LedgerAdapter> {
    mirror: Arc<EscrowMirror<L>>,
}

impl<L: LedgerAdapter> PollingSynchronizer<L> {
    pub fn new(mirror: Arc<EscrowMirror<L>>) -> Self {
        Self { mirror }
    }

    /// Starts polling `session` every `interval`. Idempotent.
    ///
    /// The loop only holds a weak reference to the session, so it also exits on
    /// its own once the session is dropped.
    ///
    /// # Returns
    ///
    /// `true` if a new loop was started, `false` if one was already running
    pub fn start(&self, session: &Arc<Session>, interval: Duration) -> bool {
        if session.is_polling() {
            debug!("Poll loop already running for {}", session.account());
            return false;
        }

        let mirror = self.mirror.clone();
        let weak = Arc::downgrade(session);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !poll_once(&mirror, &weak).await {
                    break;
                }
            }
        });

        // Losing a start race drops the new handle, which aborts the new task.
        let started = session.install_poll_handle(PollHandle::new(task));
        if started {
            info!("Polling started for {} (interval: {:?})", session.account(), interval);
        }
        started
    }

    /// Stops polling. A no-op when no loop is running.
    pub fn stop(&self, session: &Session) {
        if session.stop_polling() {
            info!("Polling stopped for {}", session.account());
        }
    }

    /// Runs one poll tick against `session` immediately.
    pub async fn tick(&self, session: &Arc<Session>) {
        poll_once(&self.mirror, &Arc::downgrade(session)).await;
    }
}

/// One poll tick. Returns `false` once the session is gone and the loop should exit.
async fn poll_once<L: LedgerAdapter>(mirror: &EscrowMirror<L>, session: &Weak<Session>) -> bool {
    let Some(session) = session.upgrade() else {
        return false;
    };
    if session.is_ended().await {
        return false;
    }

    let Some(ticket) = session.begin_poll_refresh().await else {
        return true;
    };

    match mirror.refresh_address(&ticket.contract).await {
        Ok(snapshot) => {
            if session.apply_snapshot(ticket, snapshot).await {
                debug!("Poll refreshed {}", ticket.contract);
            }
        }
        Err(e) => {
            warn!("Poll refresh of {} failed: {}", ticket.contract, e);
        }
    }
    true
}
