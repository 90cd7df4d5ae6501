//! The operator job workflow.
//!
//! Each method performs one bounded step against a [`SessionContext`] and
//! returns. The order is connection check, batch load, validation steps,
//! admission, job start, polls, and finally delivery or abandonment. Every
//! path that fails after the instance lock was taken releases the slot
//! before the error is returned.

use std::sync::Arc;

use cobra_core::admission::Admission;
use cobra_core::batch::{BatchSummary, DebtorBatch, DebtorRow, MAX_MESSAGES};
use cobra_core::dispatch::{
    ConnectionProbe, DeliveryDispatcher, DeliveryItem, DeliveryRequest, GenerationRequest,
    JobDispatcher, ResultLocation, ResultStore, DELIVERY_INTERVAL_SECS,
};
use cobra_core::error::CoreError;
use cobra_core::job::{GeneratedMessage, JobState, Tone};
use cobra_core::poller::{JobProgressPoller, PollOutcome};
use cobra_core::types::AccountId;
use cobra_core::validation::{BatchValidator, PhoneRegistry, StepReport, ValidationCursor};

use crate::error::{ConsoleError, ConsoleResult};
use crate::session::SessionContext;
use crate::state::{CoordinationHub, SlotRelease};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of [`JobWorkflow::start_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStarted {
    pub location: ResultLocation,
    pub targets: usize,
    pub expected: usize,
}

/// Outcome of [`JobWorkflow::poll_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub outcome: PollOutcome,
    pub progress_percent: u8,
    /// Set only on the poll that ended the job.
    pub release: Option<SlotRelease>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Coordinates one operator's job against the shared hub and the external
/// services.
///
/// `G` is the WhatsApp gateway (number registry and connection state), `A`
/// the automation backend (generate and send) and `S` the result store.
pub struct JobWorkflow<G, A, S> {
    hub: Arc<CoordinationHub>,
    gateway: Arc<G>,
    automation: Arc<A>,
    store: Arc<S>,
    validator: BatchValidator,
    poller: JobProgressPoller,
    delivery_interval_secs: u64,
}

impl<G, A, S> JobWorkflow<G, A, S>
where
    G: PhoneRegistry + ConnectionProbe,
    A: JobDispatcher + DeliveryDispatcher,
    S: ResultStore,
{
    pub fn new(hub: Arc<CoordinationHub>, gateway: Arc<G>, automation: Arc<A>, store: Arc<S>) -> Self {
        Self {
            hub,
            gateway,
            automation,
            store,
            validator: BatchValidator::default(),
            poller: JobProgressPoller::default(),
            delivery_interval_secs: DELIVERY_INTERVAL_SECS,
        }
    }

    pub fn with_validator(mut self, validator: BatchValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_poller(mut self, poller: JobProgressPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_delivery_interval(mut self, secs: u64) -> Self {
        self.delivery_interval_secs = secs;
        self
    }

    pub fn hub(&self) -> &Arc<CoordinationHub> {
        &self.hub
    }

    pub fn poller(&self) -> &JobProgressPoller {
        &self.poller
    }

    // -- connection ---------------------------------------------------------

    /// Resolve the operator's phone to an account and require an open
    /// WhatsApp session for it.
    pub async fn check_connection(
        &self,
        ctx: &mut SessionContext,
        operator_phone: &str,
    ) -> ConsoleResult<AccountId> {
        let account = AccountId::from_phone(operator_phone)?;

        if ctx.held_lock.as_ref().is_some_and(|held| held != &account) {
            return Err(ConsoleError::JobInProgress);
        }

        let state = self.gateway.connection_state(&account).await?;
        if !state.is_open() {
            tracing::info!(account = %account, ?state, "Account not connected");
            return Err(ConsoleError::NotConnected { account, state });
        }

        if ctx.account.as_ref() != Some(&account) {
            tracing::info!(session = %ctx.id, account = %account, "Session connected");
            ctx.account = Some(account.clone());
        }
        Ok(account)
    }

    // -- batch --------------------------------------------------------------

    /// Load a batch into the session after checking its capacity.
    ///
    /// A batch with a new name restarts validation; reloading the same name
    /// keeps the progress made so far.
    pub fn load_batch(
        &self,
        ctx: &mut SessionContext,
        batch: DebtorBatch,
    ) -> ConsoleResult<BatchSummary> {
        if ctx.ticket.state().is_active() {
            return Err(ConsoleError::JobInProgress);
        }
        let summary = batch.check_capacity()?;

        let same_batch = ctx.batch.as_ref().is_some_and(|b| b.name == batch.name);
        if !same_batch {
            ctx.reset_validation();
        }
        if ctx.cursor.is_none() {
            ctx.cursor = Some(ValidationCursor::new(batch.phone_list()));
        }

        tracing::info!(
            session = %ctx.id,
            batch = %batch.name,
            rows = summary.rows,
            distinct_clients = summary.distinct_clients,
            resumed = same_batch,
            "Batch loaded",
        );
        ctx.batch = Some(batch);
        Ok(summary)
    }

    /// Validate the next chunk of the loaded batch.
    pub async fn validate_step(&self, ctx: &mut SessionContext) -> ConsoleResult<StepReport> {
        let account = ctx.account.clone().ok_or(ConsoleError::NoAccount)?;
        let SessionContext {
            cursor, records, ..
        } = ctx;
        let cursor = cursor.as_mut().ok_or(ConsoleError::NoBatch)?;
        Ok(self
            .validator
            .step(cursor, records, self.gateway.as_ref(), &account)
            .await)
    }

    /// Rows whose phone was validated as reachable.
    pub fn reachable_rows(&self, ctx: &SessionContext) -> Vec<DebtorRow> {
        ctx.batch
            .as_ref()
            .map(|b| {
                b.rows
                    .iter()
                    .filter(|r| ctx.records.is_reachable(&r.phone))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- admission ----------------------------------------------------------

    /// Ask the shared queue for an execution slot.
    ///
    /// A waiting answer is not an error; the caller retries later.
    pub async fn request_admission(&self, ctx: &SessionContext) -> ConsoleResult<Admission> {
        let account = ctx.account.as_ref().ok_or(ConsoleError::NoAccount)?;
        let admission = self.hub.admit(account).await;
        if !admission.allowed {
            tracing::debug!(
                account = %account,
                position = ?admission.position,
                queue_size = admission.queue_size,
                "Waiting for admission",
            );
        }
        Ok(admission)
    }

    // -- job ----------------------------------------------------------------

    /// Take the instance lock, stage the reachable rows and dispatch the
    /// generation job.
    pub async fn start_job(&self, ctx: &mut SessionContext, tone: Tone) -> ConsoleResult<JobStarted> {
        let account = ctx.account.clone().ok_or(ConsoleError::NoAccount)?;
        if ctx.ticket.state().is_active() {
            return Err(ConsoleError::JobInProgress);
        }
        if ctx.held_lock.as_ref().is_some_and(|held| held != &account) {
            return Err(ConsoleError::JobInProgress);
        }
        let cursor = ctx.cursor.as_ref().ok_or(ConsoleError::NoBatch)?;
        if !cursor.is_done() {
            return Err(ConsoleError::ValidationPending {
                progress_percent: cursor.progress_percent(),
            });
        }
        if !self.hub.is_admitted(&account).await {
            let admission = self.hub.admit(&account).await;
            if !admission.allowed {
                return Err(ConsoleError::NotAdmitted {
                    position: admission.position.unwrap_or(0),
                    queue_size: admission.queue_size,
                });
            }
        }

        let rows = self.reachable_rows(ctx);
        if rows.len() > MAX_MESSAGES {
            self.release(ctx, &account).await;
            return Err(CoreError::Capacity(format!(
                "{} reachable numbers, the limit is {MAX_MESSAGES}",
                rows.len()
            ))
            .into());
        }

        self.hub.acquire(&account, ctx.id).await?;
        ctx.held_lock = Some(account.clone());

        if rows.is_empty() {
            self.release(ctx, &account).await;
            return Err(ConsoleError::NoReachableNumbers);
        }

        let location = ResultLocation::for_account(&account);
        if let Err(e) = self.store.stage_rows(&location, &rows).await {
            tracing::error!(account = %account, error = %e, "Staging failed");
            self.release(ctx, &account).await;
            return Err(ConsoleError::Staging(e.to_string()));
        }

        let now = self.hub.now();
        let request = GenerationRequest {
            tone,
            total_targets: rows.len(),
            dispatched_at: now,
            result_location: location.clone(),
            sender: account.clone(),
        };
        let accepted = match self.automation.dispatch(&request).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(account = %account, error = %e, "Dispatch failed");
                self.release(ctx, &account).await;
                return Err(ConsoleError::Dispatch(e.to_string()));
            }
        };

        // A zero count from the backend would complete on the first poll.
        let expected = if accepted.expected_result_count == 0 {
            rows.len()
        } else {
            accepted.expected_result_count
        };
        if let Err(e) = ctx.ticket.dispatch(expected, now) {
            self.release(ctx, &account).await;
            return Err(e.into());
        }

        tracing::info!(account = %account, targets = rows.len(), expected, "Job dispatched");
        Ok(JobStarted {
            location,
            targets: rows.len(),
            expected,
        })
    }

    /// Poll the result store once for the session's job.
    ///
    /// Refreshes the queue heartbeat first. Releases the slot exactly once,
    /// on the poll that completes or gives up the job.
    pub async fn poll_job(&self, ctx: &mut SessionContext) -> ConsoleResult<PollReport> {
        let account = ctx.account.clone().ok_or(ConsoleError::NoAccount)?;
        if ctx.ticket.state().is_active() {
            self.hub.heartbeat(&account).await;
        }

        let location = ResultLocation::for_account(&account);
        let outcome = self
            .poller
            .poll_once(&mut ctx.ticket, self.store.as_ref(), &location, self.hub.now())
            .await;

        let release = if outcome.releases_slot() {
            Some(self.release(ctx, &account).await)
        } else {
            None
        };

        Ok(PollReport {
            progress_percent: ctx.ticket.progress_percent(),
            outcome,
            release,
        })
    }

    /// Abandon the session's job, or its queue position if no job started.
    ///
    /// A lock another session holds on the same account is left alone.
    pub async fn abandon(&self, ctx: &mut SessionContext) -> SlotRelease {
        let abandoned = ctx.ticket.abandon();
        let Some(account) = ctx.held_lock.clone().or_else(|| ctx.account.clone()) else {
            return SlotRelease::default();
        };
        let release = self.release(ctx, &account).await;
        if abandoned || release.freed_anything() {
            tracing::info!(account = %account, job_abandoned = abandoned, "Session abandoned");
        }
        release
    }

    // -- delivery -----------------------------------------------------------

    /// Generated messages sorted for operator review.
    pub fn review(&self, ctx: &SessionContext) -> Vec<GeneratedMessage> {
        ctx.ticket.review_list()
    }

    /// Send the approved messages and close out the job.
    ///
    /// Only a job whose generation completed can deliver.
    /// On acceptance the ticket goes back to idle and the slot is released
    /// (again, if the final poll already did). A rejected delivery keeps the
    /// results so the operator can retry.
    pub async fn send_approved(
        &self,
        ctx: &mut SessionContext,
        approved: &[GeneratedMessage],
    ) -> ConsoleResult<usize> {
        let account = ctx.account.clone().ok_or(ConsoleError::NoAccount)?;
        match ctx.ticket.state() {
            JobState::Done => {}
            state if state.is_active() => return Err(ConsoleError::JobNotFinished),
            _ => return Err(ConsoleError::NothingGenerated),
        }
        if approved.is_empty() {
            return Err(ConsoleError::EmptyDelivery);
        }

        let request = DeliveryRequest {
            sender: account.clone(),
            items: approved.iter().map(DeliveryItem::from_message).collect(),
            interval_seconds: self.delivery_interval_secs,
        };
        if let Err(e) = self.automation.deliver(&request).await {
            tracing::error!(account = %account, error = %e, "Delivery rejected");
            return Err(ConsoleError::Delivery(e.to_string()));
        }

        ctx.ticket.take_results();
        self.release(ctx, &account).await;
        tracing::info!(account = %account, sent = approved.len(), "Approved messages handed to delivery");
        Ok(approved.len())
    }

    /// Release what this session holds on `account` and clear its lock
    /// pointer.
    async fn release(&self, ctx: &mut SessionContext, account: &AccountId) -> SlotRelease {
        ctx.held_lock = None;
        self.hub.release_slot(account, ctx.id).await
    }
}
