//! Per-session coordination loop.
//!
//! Drives one [`JobSpec`] through the workflow by re-entering each bounded
//! step: validation chunks back to back, admission re-checks every
//! `admission_retry`, and polls spaced by the poller's interval. Cancellation
//! abandons the job and releases whatever the session holds.

use std::sync::Arc;
use std::time::Duration;

use cobra_core::dispatch::{ConnectionProbe, DeliveryDispatcher, JobDispatcher, ResultStore};
use cobra_core::error::CoreError;
use cobra_core::poller::PollOutcome;
use cobra_core::types::{AccountId, SessionId};
use cobra_core::validation::PhoneRegistry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ConsoleError, ConsoleResult};
use crate::manifest::JobSpec;
use crate::session::{SessionContext, SessionHandle};
use crate::workflow::JobWorkflow;

/// How a session run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionEnd {
    /// Messages were generated and handed to delivery.
    Delivered { sent: usize },
    /// Messages were generated and wait for operator review.
    AwaitingReview { generated: usize },
    /// The job ran past its max wait.
    GaveUp { received: usize, expected: usize },
}

/// Result of one [`run_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session: SessionId,
    pub account: AccountId,
    pub rows: usize,
    pub reachable: usize,
    pub end: SessionEnd,
}

/// Run `job` to completion on `session`.
///
/// Holds the session's mutex for the whole run; a session is driven by one
/// loop at a time.
pub async fn run_session<G, A, S>(
    workflow: Arc<JobWorkflow<G, A, S>>,
    session: SessionHandle,
    job: JobSpec,
    admission_retry: Duration,
    cancel: CancellationToken,
) -> ConsoleResult<SessionSummary>
where
    G: PhoneRegistry + ConnectionProbe,
    A: JobDispatcher + DeliveryDispatcher,
    S: ResultStore,
{
    let mut ctx = session.lock().await;
    let ctx: &mut SessionContext = &mut ctx;

    let account = workflow.check_connection(ctx, &job.operator_phone).await?;
    let summary = workflow.load_batch(ctx, job.batch)?;

    // -- validation ---------------------------------------------------------
    while !ctx.cursor.as_ref().is_some_and(|c| c.is_done()) {
        let step = tokio::select! {
            _ = cancel.cancelled() => None,
            step = workflow.validate_step(ctx) => Some(step),
        };
        let Some(step) = step else {
            return Err(ConsoleError::Cancelled);
        };
        let step = step?;
        tracing::debug!(
            account = %account,
            progress = step.progress_percent,
            queried = step.queried,
            "Validation progress",
        );
    }
    let reachable = workflow.reachable_rows(ctx).len();
    tracing::info!(
        account = %account,
        rows = summary.rows,
        reachable,
        checked = ctx.records.len(),
        "Validation complete",
    );

    // -- admission ----------------------------------------------------------
    loop {
        let admission = workflow.request_admission(ctx).await?;
        if admission.allowed {
            break;
        }
        tracing::info!(
            account = %account,
            position = ?admission.position,
            queue_size = admission.queue_size,
            "{}",
            admission.message,
        );
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(admission_retry) => false,
        };
        if cancelled {
            workflow.abandon(ctx).await;
            return Err(ConsoleError::Cancelled);
        }
    }

    // -- generation ---------------------------------------------------------
    let started = workflow.start_job(ctx, job.tone).await?;
    tracing::info!(account = %account, location = %started.location, expected = started.expected, "Waiting for generated messages");

    // The delay runs after each poll returns, so a slow fetch never shortens
    // the gap before the next one.
    let generated = loop {
        let report = workflow.poll_job(ctx).await?;
        match report.outcome {
            PollOutcome::Completed { received } => break received,
            PollOutcome::GaveUp { received, expected } => {
                return Ok(SessionSummary {
                    session: ctx.id,
                    account,
                    rows: summary.rows,
                    reachable,
                    end: SessionEnd::GaveUp { received, expected },
                });
            }
            PollOutcome::Pending { received, expected } => {
                tracing::info!(
                    account = %account,
                    received,
                    expected,
                    progress = report.progress_percent,
                    "Generation in progress",
                );
            }
            PollOutcome::FetchFailed { .. } => {}
            PollOutcome::Inactive => {
                workflow.abandon(ctx).await;
                return Err(CoreError::Internal("job stopped before completing".into()).into());
            }
        }

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(workflow.poller().interval) => false,
        };
        if cancelled {
            workflow.abandon(ctx).await;
            return Err(ConsoleError::Cancelled);
        }
    };

    // -- delivery -----------------------------------------------------------
    let end = if job.auto_send {
        let approved = workflow.review(ctx);
        let sent = workflow.send_approved(ctx, &approved).await?;
        SessionEnd::Delivered { sent }
    } else {
        SessionEnd::AwaitingReview { generated }
    };

    Ok(SessionSummary {
        session: ctx.id,
        account,
        rows: summary.rows,
        reachable,
        end,
    })
}
