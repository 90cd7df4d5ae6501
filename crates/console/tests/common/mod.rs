#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use cobra_console::session::SessionContext;
use cobra_console::state::CoordinationHub;
use cobra_console::workflow::JobWorkflow;
use cobra_core::admission::AdmissionConfig;
use cobra_core::batch::{DebtorBatch, DebtorRow};
use cobra_core::clock::ManualClock;
use cobra_core::dispatch::{
    ConnectionProbe, ConnectionState, DeliveryDispatcher, DeliveryRequest, GenerationAccepted,
    GenerationRequest, JobDispatcher, ResultLocation, ResultStore,
};
use cobra_core::error::CoreError;
use cobra_core::job::GeneratedMessage;
use cobra_core::phone;
use cobra_core::poller::JobProgressPoller;
use cobra_core::types::AccountId;
use cobra_core::validation::{BatchValidator, PhoneRegistry};

/// Operator phone as typed in the console; normalizes to `5511999990000`.
pub const OPERATOR_PHONE: &str = "(11) 99999-0000";

pub fn operator_account() -> AccountId {
    AccountId::from_phone(OPERATOR_PHONE).unwrap()
}

/// A distinct 13-digit account for filling queue slots.
pub fn other_account(n: u32) -> AccountId {
    AccountId::from_phone(&format!("55219{n:08}")).unwrap()
}

/// Raw debtor phone `n` as it appears in an uploaded sheet.
pub fn debtor_phone(n: u32) -> String {
    format!("1198888{n:04}")
}

pub fn row(n: u32) -> DebtorRow {
    DebtorRow {
        client_code: format!("C{n}"),
        name: format!("Client {n:03}"),
        amount: "150,00".to_string(),
        due_date: "10/03/2026".to_string(),
        phone: debtor_phone(n),
    }
}

pub fn batch(name: &str, count: u32) -> DebtorBatch {
    DebtorBatch {
        name: name.to_string(),
        rows: (1..=count).map(row).collect(),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

// ---------------------------------------------------------------------------
// Fake WhatsApp gateway
// ---------------------------------------------------------------------------

pub struct FakeGateway {
    pub registered: Mutex<HashSet<String>>,
    pub state: Mutex<ConnectionState>,
    pub registry_calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    /// Gateway where debtor phones `1..=reachable` have WhatsApp.
    pub fn new(reachable: u32) -> Self {
        Self {
            registered: Mutex::new(
                (1..=reachable)
                    .map(|n| phone::normalize(&debtor_phone(n)))
                    .collect(),
            ),
            state: Mutex::new(ConnectionState::Open),
            registry_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn registry_calls(&self) -> Vec<String> {
        lock(&self.registry_calls).clone()
    }
}

impl PhoneRegistry for FakeGateway {
    async fn is_registered(&self, _account: &AccountId, number: &str) -> Result<bool, CoreError> {
        lock(&self.registry_calls).push(number.to_string());
        Ok(lock(&self.registered).contains(number))
    }
}

impl ConnectionProbe for FakeGateway {
    async fn connection_state(&self, _account: &AccountId) -> Result<ConnectionState, CoreError> {
        Ok(*lock(&self.state))
    }
}

// ---------------------------------------------------------------------------
// Fake automation backend
// ---------------------------------------------------------------------------

pub struct FakeAutomation {
    /// Expected count returned by generate; `None` echoes the target count.
    pub expected: Mutex<Option<usize>>,
    pub dispatch_error: Mutex<Option<CoreError>>,
    pub deliver_error: Mutex<Option<CoreError>>,
    pub dispatches: Mutex<Vec<GenerationRequest>>,
    pub deliveries: Mutex<Vec<DeliveryRequest>>,
}

impl FakeAutomation {
    pub fn new() -> Self {
        Self {
            expected: Mutex::new(None),
            dispatch_error: Mutex::new(None),
            deliver_error: Mutex::new(None),
            dispatches: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn dispatches(&self) -> Vec<GenerationRequest> {
        lock(&self.dispatches).clone()
    }

    pub fn deliveries(&self) -> Vec<DeliveryRequest> {
        lock(&self.deliveries).clone()
    }
}

impl JobDispatcher for FakeAutomation {
    async fn dispatch(&self, request: &GenerationRequest) -> Result<GenerationAccepted, CoreError> {
        lock(&self.dispatches).push(request.clone());
        if let Some(e) = lock(&self.dispatch_error).clone() {
            return Err(e);
        }
        Ok(GenerationAccepted {
            expected_result_count: lock(&self.expected).unwrap_or(request.total_targets),
        })
    }
}

impl DeliveryDispatcher for FakeAutomation {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), CoreError> {
        lock(&self.deliveries).push(request.clone());
        match lock(&self.deliver_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fake result store
// ---------------------------------------------------------------------------

pub struct FakeStore {
    pub stage_error: Mutex<Option<CoreError>>,
    pub staged: Mutex<Vec<(ResultLocation, Vec<DebtorRow>)>>,
    /// Result counts returned by successive fetches; the last one repeats.
    pub script: Mutex<VecDeque<Result<usize, CoreError>>>,
    last_count: Mutex<usize>,
    pub fetches: Mutex<usize>,
    /// Delay applied to the next fetch only.
    pub slow_fetch: Mutex<Option<Duration>>,
    pub fetch_started: Mutex<Vec<tokio::time::Instant>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            stage_error: Mutex::new(None),
            staged: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            last_count: Mutex::new(0),
            fetches: Mutex::new(0),
            slow_fetch: Mutex::new(None),
            fetch_started: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, counts: Vec<Result<usize, CoreError>>) {
        *lock(&self.script) = counts.into();
    }

    pub fn staged(&self) -> Vec<(ResultLocation, Vec<DebtorRow>)> {
        lock(&self.staged).clone()
    }

    pub fn fetches(&self) -> usize {
        *lock(&self.fetches)
    }

    /// Gaps between the start times of consecutive fetches.
    pub fn fetch_gaps(&self) -> Vec<Duration> {
        lock(&self.fetch_started)
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }
}

/// `count` generated messages, named so that review order differs from
/// generation order.
pub fn generated(count: usize) -> Vec<GeneratedMessage> {
    (0..count)
        .map(|i| GeneratedMessage {
            recipient_name: format!("Client {:03}", count - i),
            recipient_phone: phone::normalize(&debtor_phone((count - i) as u32)),
            message_text: format!("Olá, cliente {}", count - i),
            client_code: format!("C{}", count - i),
        })
        .collect()
}

impl ResultStore for FakeStore {
    async fn stage_rows(&self, location: &ResultLocation, rows: &[DebtorRow]) -> Result<(), CoreError> {
        if let Some(e) = lock(&self.stage_error).clone() {
            return Err(e);
        }
        lock(&self.staged).push((location.clone(), rows.to_vec()));
        Ok(())
    }

    async fn fetch_results(&self, _location: &ResultLocation) -> Result<Vec<GeneratedMessage>, CoreError> {
        *lock(&self.fetches) += 1;
        lock(&self.fetch_started).push(tokio::time::Instant::now());
        let delay = lock(&self.slow_fetch).take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.script).pop_front();
        let count = match next {
            Some(Ok(n)) => {
                *lock(&self.last_count) = n;
                n
            }
            Some(Err(e)) => return Err(e),
            None => *lock(&self.last_count),
        };
        Ok(generated(count))
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

pub type TestWorkflow = JobWorkflow<FakeGateway, FakeAutomation, FakeStore>;

pub struct TestEnv {
    pub clock: Arc<ManualClock>,
    pub hub: Arc<CoordinationHub>,
    pub gateway: Arc<FakeGateway>,
    pub automation: Arc<FakeAutomation>,
    pub store: Arc<FakeStore>,
    pub workflow: Arc<TestWorkflow>,
}

impl TestEnv {
    /// Environment whose gateway knows debtor phones `1..=reachable`.
    pub fn new(reachable: u32) -> Self {
        Self::with_poller(reachable, JobProgressPoller::default())
    }

    pub fn with_poller(reachable: u32, poller: JobProgressPoller) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let hub = Arc::new(CoordinationHub::with_clock(
            AdmissionConfig::default(),
            clock.clone(),
        ));
        let gateway = Arc::new(FakeGateway::new(reachable));
        let automation = Arc::new(FakeAutomation::new());
        let store = Arc::new(FakeStore::new());
        let workflow = Arc::new(
            JobWorkflow::new(
                Arc::clone(&hub),
                Arc::clone(&gateway),
                Arc::clone(&automation),
                Arc::clone(&store),
            )
            .with_validator(BatchValidator {
                query_spacing: Duration::ZERO,
                ..BatchValidator::default()
            })
            .with_poller(poller),
        );
        Self {
            clock,
            hub,
            gateway,
            automation,
            store,
            workflow,
        }
    }

    pub fn session(&self) -> SessionContext {
        SessionContext::new(uuid::Uuid::new_v4(), self.hub.now())
    }

    /// Connect, load `batch` and validate it completely.
    pub async fn prepared(&self, batch: DebtorBatch) -> SessionContext {
        let mut ctx = self.session();
        self.workflow
            .check_connection(&mut ctx, OPERATOR_PHONE)
            .await
            .unwrap();
        self.workflow.load_batch(&mut ctx, batch).unwrap();
        while !ctx.cursor.as_ref().unwrap().is_done() {
            self.workflow.validate_step(&mut ctx).await.unwrap();
        }
        ctx
    }
}
