//! Integration tests for the job workflow against in-memory collaborators.

mod common;

use assert_matches::assert_matches;
use cobra_console::error::ConsoleError;
use cobra_console::state::SlotRelease;
use cobra_core::batch::{DebtorBatch, MAX_MESSAGES, MAX_RECORDS};
use cobra_core::dispatch::{ConnectionState, ResultLocation};
use cobra_core::error::CoreError;
use cobra_core::job::{JobState, Tone};
use cobra_core::poller::{JobProgressPoller, PollOutcome};
use cobra_core::validation::ValidationCursor;
use common::{
    batch, debtor_phone, operator_account, other_account, row, TestEnv, OPERATOR_PHONE,
};

const BOTH: SlotRelease = SlotRelease {
    lock_released: true,
    queue_removed: true,
};

// ---------------------------------------------------------------------------
// Test: full job lifecycle releases the slot exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_completes_and_releases_once() {
    let env = TestEnv::new(2);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 3)).await;
    assert_eq!(env.workflow.reachable_rows(&ctx).len(), 2);

    let admission = env.workflow.request_admission(&ctx).await.unwrap();
    assert!(admission.allowed);

    let started = env.workflow.start_job(&mut ctx, Tone::Formal).await.unwrap();
    assert_eq!(started.targets, 2);
    assert_eq!(started.expected, 2);
    assert_eq!(started.location, ResultLocation::for_account(&account));
    assert_eq!(ctx.held_lock, Some(account.clone()));
    assert!(!env.hub.lock_status(&account).await.available);

    let staged = env.store.staged();
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].1.len(), 2);
    let dispatch = &env.automation.dispatches()[0];
    assert_eq!(dispatch.total_targets, 2);
    assert_eq!(dispatch.tone, Tone::Formal);
    assert_eq!(dispatch.sender, account);

    env.store.script(vec![Ok(1), Ok(2)]);
    let first = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_eq!(first.outcome, PollOutcome::Pending { received: 1, expected: 2 });
    assert_eq!(first.progress_percent, 50);
    assert_eq!(first.release, None);

    let second = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_eq!(second.outcome, PollOutcome::Completed { received: 2 });
    assert_eq!(second.release, Some(BOTH));
    assert!(ctx.held_lock.is_none());
    assert!(env.hub.lock_status(&account).await.available);
    assert_eq!(env.hub.queue_counts().await, (0, 0));

    for _ in 0..3 {
        let again = env.workflow.poll_job(&mut ctx).await.unwrap();
        assert_eq!(again.outcome, PollOutcome::Inactive);
        assert_eq!(again.release, None);
    }
    assert_eq!(env.store.fetches(), 2);
}

#[tokio::test]
async fn seven_then_ten_results() {
    let env = TestEnv::new(10);
    let mut ctx = env.prepared(batch("march.xlsx", 10)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();

    env.store.script(vec![Ok(7), Ok(10)]);
    let first = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_eq!(ctx.ticket.state(), JobState::Polling);
    assert_eq!(first.release, None);

    let second = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_eq!(ctx.ticket.state(), JobState::Done);
    assert_eq!(second.release, Some(BOTH));
}

#[tokio::test]
async fn review_list_is_sorted_by_name() {
    let env = TestEnv::new(3);
    let mut ctx = env.prepared(batch("march.xlsx", 3)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![Ok(3)]);
    env.workflow.poll_job(&mut ctx).await.unwrap();

    let names: Vec<_> = env
        .workflow
        .review(&ctx)
        .into_iter()
        .map(|m| m.recipient_name)
        .collect();
    assert_eq!(names, vec!["Client 001", "Client 002", "Client 003"]);
}

// ---------------------------------------------------------------------------
// Test: every failure after the lock releases it
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_failure_releases_slot() {
    let env = TestEnv::new(2);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    *env.automation.dispatch_error.lock().unwrap() =
        Some(CoreError::Transport("automation returned HTTP 502".into()));

    let err = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap_err();

    assert_matches!(err, ConsoleError::Dispatch(_));
    assert!(ctx.held_lock.is_none());
    assert_eq!(ctx.ticket.state(), JobState::Idle);
    assert!(env.hub.lock_status(&account).await.available);
    assert!(!env.hub.is_admitted(&account).await);
}

#[tokio::test]
async fn staging_failure_releases_slot() {
    let env = TestEnv::new(2);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    *env.store.stage_error.lock().unwrap() = Some(CoreError::Transport("store down".into()));

    let err = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap_err();

    assert_matches!(err, ConsoleError::Staging(_));
    assert!(env.automation.dispatches().is_empty());
    assert!(env.hub.lock_status(&account).await.available);
    assert_eq!(env.hub.queue_counts().await, (0, 0));
}

#[tokio::test]
async fn no_reachable_number_releases_slot() {
    let env = TestEnv::new(0);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 4)).await;

    let err = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap_err();

    assert_matches!(err, ConsoleError::NoReachableNumbers);
    assert!(ctx.held_lock.is_none());
    assert!(env.hub.lock_status(&account).await.available);
    assert_eq!(env.hub.queue_counts().await, (0, 0));
    assert!(env.store.staged().is_empty());
}

#[tokio::test]
async fn abandon_mid_poll_releases_once() {
    let env = TestEnv::new(2);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![Ok(1)]);
    env.workflow.poll_job(&mut ctx).await.unwrap();

    assert_eq!(env.workflow.abandon(&mut ctx).await, BOTH);
    assert_eq!(ctx.ticket.state(), JobState::Abandoned);
    assert!(env.hub.lock_status(&account).await.available);

    assert!(!env.workflow.abandon(&mut ctx).await.freed_anything());
    let after = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_eq!(after.outcome, PollOutcome::Inactive);
}

#[tokio::test]
async fn give_up_releases_slot() {
    let env = TestEnv::with_poller(
        2,
        JobProgressPoller {
            max_wait: Some(std::time::Duration::from_secs(600)),
            ..JobProgressPoller::default()
        },
    );
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();

    env.clock.advance_secs(601);
    let report = env.workflow.poll_job(&mut ctx).await.unwrap();

    assert_eq!(report.outcome, PollOutcome::GaveUp { received: 0, expected: 2 });
    assert_eq!(report.release, Some(BOTH));
    assert!(env.hub.lock_status(&account).await.available);
}

// ---------------------------------------------------------------------------
// Test: rejections before any lock leave nothing behind
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_batch_rejected_before_lock() {
    let env = TestEnv::new(0);
    let mut ctx = env.session();
    env.workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap();

    let big = batch("big.xlsx", MAX_RECORDS as u32 + 1);
    let err = env.workflow.load_batch(&mut ctx, big).unwrap_err();

    assert_matches!(err, ConsoleError::Core(CoreError::Capacity(_)));
    assert!(ctx.batch.is_none());
    assert_eq!(env.hub.queue_counts().await, (0, 0));
}

#[tokio::test]
async fn disconnected_account_is_refused() {
    let env = TestEnv::new(1);
    *env.gateway.state.lock().unwrap() = ConnectionState::Connecting;
    let mut ctx = env.session();

    let err = env
        .workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ConsoleError::NotConnected {
            state: ConnectionState::Connecting,
            ..
        }
    );
    assert!(ctx.account.is_none());
}

#[tokio::test]
async fn short_operator_phone_is_invalid() {
    let env = TestEnv::new(1);
    let mut ctx = env.session();
    let err = env
        .workflow
        .check_connection(&mut ctx, "99999-0000")
        .await
        .unwrap_err();
    assert_matches!(err, ConsoleError::Core(CoreError::Validation(_)));
}

#[tokio::test]
async fn start_before_validation_finishes() {
    let env = TestEnv::new(6);
    let mut ctx = env.session();
    env.workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap();
    env.workflow
        .load_batch(&mut ctx, batch("march.xlsx", 6))
        .unwrap();
    env.workflow.validate_step(&mut ctx).await.unwrap();

    let err = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap_err();

    assert_matches!(err, ConsoleError::ValidationPending { progress_percent: 83 });
    assert_eq!(env.hub.queue_counts().await, (0, 0));
}

#[tokio::test]
async fn full_queue_blocks_start() {
    let env = TestEnv::new(1);
    for n in 1..=3 {
        assert!(env.hub.admit(&other_account(n)).await.allowed);
    }
    let mut ctx = env.prepared(batch("march.xlsx", 1)).await;

    let err = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap_err();

    assert_matches!(
        err,
        ConsoleError::NotAdmitted {
            position: 1,
            queue_size: 4
        }
    );
    assert!(env.hub.lock_status(&operator_account()).await.available);
}

#[tokio::test]
async fn second_session_on_same_account_conflicts() {
    let env = TestEnv::new(1);
    let mut first = env.prepared(batch("march.xlsx", 1)).await;
    let mut second = env.prepared(batch("march.xlsx", 1)).await;
    env.workflow.start_job(&mut first, Tone::default()).await.unwrap();

    let err = env.workflow.start_job(&mut second, Tone::default()).await.unwrap_err();

    assert_matches!(err, ConsoleError::Core(CoreError::Conflict(_)));
    assert!(second.held_lock.is_none());
    assert_eq!(
        env.hub.lock_holder(&operator_account()).await,
        Some(first.id)
    );
}

#[tokio::test]
async fn abandon_by_other_session_keeps_holders_slot() {
    let env = TestEnv::new(1);
    let account = operator_account();
    let mut holder = env.prepared(batch("march.xlsx", 1)).await;
    let mut other = env.prepared(batch("march.xlsx", 1)).await;
    env.workflow.start_job(&mut holder, Tone::default()).await.unwrap();

    let release = env.workflow.abandon(&mut other).await;

    assert_eq!(release, SlotRelease::default());
    assert_eq!(env.hub.lock_holder(&account).await, Some(holder.id));
    assert_eq!(holder.held_lock, Some(account.clone()));
    assert_eq!(env.hub.queue_counts().await, (1, 0));

    env.store.script(vec![Ok(1)]);
    let report = env.workflow.poll_job(&mut holder).await.unwrap();
    assert_eq!(report.outcome, PollOutcome::Completed { received: 1 });
    assert_eq!(report.release, Some(BOTH));
}

#[tokio::test]
async fn too_many_reachable_numbers_rejected_before_lock() {
    let count = MAX_MESSAGES as u32 + 1;
    let env = TestEnv::new(count);
    let mut ctx = env.session();
    env.workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap();
    // Set directly: load_batch would refuse this many rows first.
    let big = batch("big.xlsx", count);
    ctx.cursor = Some(ValidationCursor::new(big.phone_list()));
    ctx.batch = Some(big);
    while !ctx.cursor.as_ref().unwrap().is_done() {
        env.workflow.validate_step(&mut ctx).await.unwrap();
    }
    assert_eq!(env.workflow.reachable_rows(&ctx).len(), count as usize);

    let err = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap_err();

    assert_matches!(err, ConsoleError::Core(CoreError::Capacity(_)));
    assert!(env.store.staged().is_empty());
    assert!(env.automation.dispatches().is_empty());
    assert!(ctx.held_lock.is_none());
    assert!(env.hub.lock_status(&operator_account()).await.available);
    assert_eq!(env.hub.queue_counts().await, (0, 0));
}

// ---------------------------------------------------------------------------
// Test: validation progress and memoization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn float_formatted_phone_stays_reachable() {
    let env = TestEnv::new(1);
    let mut sheet = batch("march.xlsx", 2);
    sheet.rows[0].phone = format!("{}.0", debtor_phone(1));
    let mut ctx = env.prepared(sheet).await;

    let reachable = env.workflow.reachable_rows(&ctx);
    assert_eq!(reachable.len(), 1);
    assert_eq!(reachable[0].client_code, "C1");
    assert_eq!(env.gateway.registry_calls()[0], "5511988880001");

    let started = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    assert_eq!(started.targets, 1);
    assert_eq!(env.store.staged()[0].1[0].client_code, "C1");
}

#[tokio::test]
async fn duplicate_numbers_are_checked_once() {
    let env = TestEnv::new(0);
    let mut ctx = env.session();
    env.workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap();
    let mut a = row(1);
    a.phone = "11988887777".to_string();
    let mut b = row(2);
    b.phone = "(11) 98888-7777".to_string();
    let duplicate = DebtorBatch {
        name: "dupes.xlsx".to_string(),
        rows: vec![a, b],
    };
    env.workflow.load_batch(&mut ctx, duplicate).unwrap();

    let report = env.workflow.validate_step(&mut ctx).await.unwrap();

    assert!(report.done);
    assert_eq!(ctx.records.len(), 1);
    assert!(ctx.records.contains("5511988887777"));
    assert_eq!(env.gateway.registry_calls(), vec!["5511988887777".to_string()]);
}

#[tokio::test]
async fn reloading_same_batch_keeps_progress() {
    let env = TestEnv::new(12);
    let mut ctx = env.session();
    env.workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap();
    env.workflow
        .load_batch(&mut ctx, batch("march.xlsx", 12))
        .unwrap();
    env.workflow.validate_step(&mut ctx).await.unwrap();
    assert_eq!(ctx.cursor.as_ref().unwrap().next_index(), 5);

    env.workflow
        .load_batch(&mut ctx, batch("march.xlsx", 12))
        .unwrap();
    assert_eq!(ctx.cursor.as_ref().unwrap().next_index(), 5);
    assert_eq!(ctx.records.len(), 5);

    env.workflow
        .load_batch(&mut ctx, batch("april.xlsx", 12))
        .unwrap();
    assert_eq!(ctx.cursor.as_ref().unwrap().next_index(), 0);
    assert!(ctx.records.is_empty());
}

#[tokio::test]
async fn validation_finishes_after_ceil_chunks() {
    let env = TestEnv::new(12);
    let mut ctx = env.session();
    env.workflow
        .check_connection(&mut ctx, OPERATOR_PHONE)
        .await
        .unwrap();
    env.workflow
        .load_batch(&mut ctx, batch("march.xlsx", 12))
        .unwrap();

    let mut steps = 0;
    while !ctx.cursor.as_ref().unwrap().is_done() {
        env.workflow.validate_step(&mut ctx).await.unwrap();
        steps += 1;
    }
    assert_eq!(steps, 3);
    assert_eq!(env.gateway.registry_calls().len(), 12);

    env.workflow.validate_step(&mut ctx).await.unwrap();
    assert_eq!(env.gateway.registry_calls().len(), 12);
}

// ---------------------------------------------------------------------------
// Test: expected count and heartbeats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_expected_count_falls_back_to_targets() {
    let env = TestEnv::new(3);
    *env.automation.expected.lock().unwrap() = Some(0);
    let mut ctx = env.prepared(batch("march.xlsx", 3)).await;

    let started = env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();

    assert_eq!(started.expected, 3);
    assert_eq!(ctx.ticket.expected(), 3);
}

#[tokio::test]
async fn polling_keeps_slot_alive() {
    let env = TestEnv::new(2);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();

    for _ in 0..4 {
        env.clock.advance_secs(200);
        env.workflow.poll_job(&mut ctx).await.unwrap();
    }
    assert!(env.hub.sweep_stale().await.is_empty());
    assert!(env.hub.is_admitted(&account).await);
    assert!(!env.hub.lock_status(&account).await.available);
}

#[tokio::test]
async fn fetch_failure_is_retried() {
    let env = TestEnv::new(2);
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![
        Ok(1),
        Err(CoreError::Transport("timeout".into())),
        Ok(2),
    ]);

    env.workflow.poll_job(&mut ctx).await.unwrap();
    let failed = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_matches!(failed.outcome, PollOutcome::FetchFailed { .. });
    assert_eq!(failed.release, None);
    assert_eq!(ctx.ticket.results().len(), 1);

    let done = env.workflow.poll_job(&mut ctx).await.unwrap();
    assert_eq!(done.release, Some(BOTH));
}

// ---------------------------------------------------------------------------
// Test: delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivery_sends_approved_and_resets_job() {
    let env = TestEnv::new(2);
    let account = operator_account();
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![Ok(2)]);
    env.workflow.poll_job(&mut ctx).await.unwrap();

    let approved = env.workflow.review(&ctx);
    let sent = env.workflow.send_approved(&mut ctx, &approved[..1]).await.unwrap();

    assert_eq!(sent, 1);
    let delivery = &env.automation.deliveries()[0];
    assert_eq!(delivery.sender, account);
    assert_eq!(delivery.interval_seconds, 21);
    assert_eq!(delivery.items.len(), 1);
    assert_eq!(delivery.items[0].name, "Client 001");
    assert_eq!(ctx.ticket.state(), JobState::Idle);
    assert!(ctx.ticket.results().is_empty());
}

#[tokio::test]
async fn empty_delivery_is_rejected() {
    let env = TestEnv::new(1);
    let mut ctx = env.prepared(batch("march.xlsx", 1)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![Ok(1)]);
    env.workflow.poll_job(&mut ctx).await.unwrap();

    let err = env.workflow.send_approved(&mut ctx, &[]).await.unwrap_err();

    assert_matches!(err, ConsoleError::EmptyDelivery);
    assert!(env.automation.deliveries().is_empty());
    assert_eq!(ctx.ticket.state(), JobState::Done);
}

#[tokio::test]
async fn rejected_delivery_keeps_results() {
    let env = TestEnv::new(2);
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![Ok(2)]);
    env.workflow.poll_job(&mut ctx).await.unwrap();
    *env.automation.deliver_error.lock().unwrap() =
        Some(CoreError::Transport("automation returned HTTP 500".into()));

    let approved = env.workflow.review(&ctx);
    let err = env.workflow.send_approved(&mut ctx, &approved).await.unwrap_err();

    assert_matches!(err, ConsoleError::Delivery(_));
    assert_eq!(ctx.ticket.state(), JobState::Done);
    assert_eq!(ctx.ticket.results().len(), 2);
}

#[tokio::test]
async fn delivery_while_generating_is_refused() {
    let env = TestEnv::new(2);
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();

    let messages = common::generated(1);
    let err = env.workflow.send_approved(&mut ctx, &messages).await.unwrap_err();
    assert_matches!(err, ConsoleError::JobNotFinished);
}

#[tokio::test]
async fn delivery_without_generated_job_is_refused() {
    let env = TestEnv::new(2);
    let mut ctx = env.prepared(batch("march.xlsx", 2)).await;

    let messages = common::generated(2);
    let err = env.workflow.send_approved(&mut ctx, &messages).await.unwrap_err();

    assert_matches!(err, ConsoleError::NothingGenerated);
    assert!(env.automation.deliveries().is_empty());
}

#[tokio::test]
async fn delivered_job_cannot_be_sent_twice() {
    let env = TestEnv::new(1);
    let mut ctx = env.prepared(batch("march.xlsx", 1)).await;
    env.workflow.start_job(&mut ctx, Tone::default()).await.unwrap();
    env.store.script(vec![Ok(1)]);
    env.workflow.poll_job(&mut ctx).await.unwrap();
    let approved = env.workflow.review(&ctx);
    env.workflow.send_approved(&mut ctx, &approved).await.unwrap();

    let err = env.workflow.send_approved(&mut ctx, &approved).await.unwrap_err();

    assert_matches!(err, ConsoleError::NothingGenerated);
    assert_eq!(env.automation.deliveries().len(), 1);
}
