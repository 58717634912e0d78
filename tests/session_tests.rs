//! Unit tests for session snapshot staleness rules

use escrow_client::{EscrowAction, EscrowError, LifecycleState, PendingStatus, Session};

#[path = "helpers.rs"]
mod test_helpers;
use test_helpers::{addr, create_default_snapshot, DUMMY_ESCROW_ADDR, DUMMY_OTHER_ESCROW_ADDR, DUMMY_SOLICITOR_ADDR};

fn session() -> Session {
    Session::new(addr(DUMMY_SOLICITOR_ADDR), true)
}

fn other_snapshot(state: LifecycleState) -> escrow_client::EscrowSnapshot {
    escrow_client::EscrowSnapshot {
        contract_address: addr(DUMMY_OTHER_ESCROW_ADDR),
        ..create_default_snapshot(state)
    }
}

/// What is tested: A load result is applied and published to subscribers
/// Why: apply_snapshot is the only way state enters a session
#[tokio::test]
async fn test_load_applies_and_publishes() {
    let session = session();
    let updates = session.subscribe();
    assert_eq!(session.snapshot().await, None);

    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    let snapshot = create_default_snapshot(LifecycleState::AwaitingPayment);
    assert!(session.apply_snapshot(ticket, snapshot.clone()).await);

    assert_eq!(session.snapshot().await, Some(snapshot.clone()));
    assert_eq!(*updates.borrow(), Some(snapshot));
}

/// What is tested: Switching to another escrow discards the old escrow's in-flight load
/// Why: A slow read of the previous escrow must not replace the one now shown
#[tokio::test]
async fn test_switching_escrow_discards_old_result() {
    let session = session();
    let first = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    let second = session.begin_load(addr(DUMMY_OTHER_ESCROW_ADDR)).await.unwrap();

    assert!(
        session
            .apply_snapshot(second, other_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert!(
        !session
            .apply_snapshot(first, create_default_snapshot(LifecycleState::Complete))
            .await
    );
    assert_eq!(
        session.snapshot().await.unwrap().contract_address,
        addr(DUMMY_OTHER_ESCROW_ADDR)
    );
}

/// What is tested: Of two overlapping reloads of the same escrow, the later-started one wins
/// Why: The earlier read may have observed older remote state
#[tokio::test]
async fn test_latest_started_refresh_wins() {
    let session = session();
    let older = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    let newer = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();

    assert!(
        session
            .apply_snapshot(newer, create_default_snapshot(LifecycleState::AwaitingVerification))
            .await
    );
    assert!(
        !session
            .apply_snapshot(older, create_default_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert_eq!(
        session.snapshot().await.unwrap().lifecycle_state,
        LifecycleState::AwaitingVerification
    );
}

/// What is tested: A result whose contract differs from its ticket is rejected
/// Why: Snapshots are only ever applied to the escrow they were read from
#[tokio::test]
async fn test_mismatched_contract_rejected() {
    let session = session();
    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    assert!(
        !session
            .apply_snapshot(ticket, other_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert_eq!(session.snapshot().await, None);
}

/// What is tested: Poll ticks need a loaded escrow and are skipped during a transaction refresh
/// Why: Only the transaction's refresh may land right after a confirmation
#[tokio::test]
async fn test_poll_ticket_rules() {
    let session = session();
    assert!(session.begin_poll_refresh().await.is_none());

    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session
        .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
        .await;

    let poll = session.begin_poll_refresh().await.unwrap();
    assert_eq!(poll.contract, addr(DUMMY_ESCROW_ADDR));

    let slot = session.reserve_action(EscrowAction::Deposit).await.unwrap();
    let tx = session.begin_transaction_refresh(&slot).await;
    assert!(session.begin_poll_refresh().await.is_none());

    // The in-flight poll lands during the transaction refresh and is dropped
    assert!(
        !session
            .apply_snapshot(poll, create_default_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert!(
        session
            .apply_snapshot(tx.ticket(), create_default_snapshot(LifecycleState::AwaitingVerification))
            .await
    );
    drop(tx);
    slot.release(PendingStatus::Confirmed);

    assert!(session.begin_poll_refresh().await.is_some());
}

/// What is tested: The action slot admits one action at a time
/// Why: A second state-changing call must be rejected while one is pending
#[tokio::test]
async fn test_action_slot() {
    let session = session();
    assert_eq!(
        session.reserve_action(EscrowAction::Deposit).await.unwrap_err(),
        EscrowError::NotLoaded
    );

    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session
        .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
        .await;

    let slot = session.reserve_action(EscrowAction::Deposit).await.unwrap();
    assert_eq!(slot.kind, EscrowAction::Deposit);
    assert_eq!(
        session.reserve_action(EscrowAction::VerifyAndComplete).await.unwrap_err(),
        EscrowError::Busy
    );

    slot.record_submission("0xabc");
    let pending = session.pending_action().await.unwrap();
    assert_eq!(pending.status, PendingStatus::Submitted);
    assert_eq!(pending.tx_hash.as_deref(), Some("0xabc"));

    slot.release(PendingStatus::Failed);
    assert_eq!(session.pending_action().await, None);
    assert!(session.reserve_action(EscrowAction::Deposit).await.is_ok());
}

/// What is tested: Dropping an unreleased slot or transaction refresh frees them
/// Why: An abandoned action must leave the session usable and polling live
#[tokio::test]
async fn test_dropped_guards_release() {
    let session = session();
    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session
        .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
        .await;

    {
        let slot = session.reserve_action(EscrowAction::Deposit).await.unwrap();
        let _tx = session.begin_transaction_refresh(&slot).await;
        assert!(session.begin_poll_refresh().await.is_none());
    }

    assert_eq!(session.pending_action().await, None);
    assert!(session.begin_poll_refresh().await.is_some());
    assert!(session.reserve_action(EscrowAction::VerifyAndComplete).await.is_ok());
}

/// What is tested: Abandoning a failed switch restores the shown escrow's in-flight results
/// Why: A bad load of another escrow must not throw away a refresh of the one still shown
#[tokio::test]
async fn test_abandoned_switch_keeps_shown_escrow_current() {
    let session = session();
    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session
        .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
        .await;

    let slot = session.reserve_action(EscrowAction::Deposit).await.unwrap();
    let poll = session.begin_poll_refresh().await.unwrap();

    let switch = session.begin_load(addr(DUMMY_OTHER_ESCROW_ADDR)).await.unwrap();
    session.abandon_load(switch).await;

    let tx = session.begin_transaction_refresh(&slot).await;
    assert!(
        session
            .apply_snapshot(tx.ticket(), create_default_snapshot(LifecycleState::AwaitingVerification))
            .await
    );
    drop(tx);
    // Older than the applied transaction refresh, so still dropped
    assert!(
        !session
            .apply_snapshot(poll, create_default_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert_eq!(
        session.snapshot().await.unwrap().lifecycle_state,
        LifecycleState::AwaitingVerification
    );
}

/// What is tested: Abandoning a superseded switch does not revive older results
/// Why: Only the latest requested load decides what the session accepts
#[tokio::test]
async fn test_abandoning_superseded_load_is_noop() {
    let session = session();
    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session
        .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
        .await;

    let first = session.begin_load(addr(DUMMY_OTHER_ESCROW_ADDR)).await.unwrap();
    let latest = session.begin_load(addr(DUMMY_OTHER_ESCROW_ADDR)).await.unwrap();
    session.abandon_load(first).await;

    assert!(
        session
            .apply_snapshot(latest, other_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert_eq!(
        session.snapshot().await.unwrap().contract_address,
        addr(DUMMY_OTHER_ESCROW_ADDR)
    );
}

/// What is tested: An ended session rejects new work and drops in-flight results
/// Why: Nothing may mutate a torn-down session
#[tokio::test]
async fn test_end_invalidates_everything() {
    let session = session();
    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session.end().await;
    session.end().await;

    assert!(session.is_ended().await);
    assert!(
        !session
            .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert_eq!(
        session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap_err(),
        EscrowError::NotConnected
    );
    assert!(session.begin_poll_refresh().await.is_none());
}

/// What is tested: A poll of the old escrow started during a switch cannot replace the new one
/// Why: Only a load may change which escrow the session shows
#[tokio::test]
async fn test_poll_of_old_escrow_after_switch_discarded() {
    let session = session();
    let ticket = session.begin_load(addr(DUMMY_ESCROW_ADDR)).await.unwrap();
    session
        .apply_snapshot(ticket, create_default_snapshot(LifecycleState::AwaitingPayment))
        .await;

    let switch = session.begin_load(addr(DUMMY_OTHER_ESCROW_ADDR)).await.unwrap();
    let poll = session.begin_poll_refresh().await.unwrap();
    assert_eq!(poll.contract, addr(DUMMY_ESCROW_ADDR));

    assert!(
        session
            .apply_snapshot(switch, other_snapshot(LifecycleState::AwaitingPayment))
            .await
    );
    assert!(
        !session
            .apply_snapshot(poll, create_default_snapshot(LifecycleState::Complete))
            .await
    );
    assert_eq!(
        session.snapshot().await.unwrap().contract_address,
        addr(DUMMY_OTHER_ESCROW_ADDR)
    );
}
