use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cobra_console::config::ConsoleConfig;
use cobra_console::session::SessionStore;
use cobra_console::state::CoordinationHub;
use cobra_console::workflow::JobWorkflow;
use cobra_console::{driver, manifest, sweeper};
use cobra_gateway::{AutomationApi, EvolutionApi, ResultStoreApi};

/// How long to wait for background tasks after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cobra_console=info,cobra_gateway=info,cobra_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ConsoleConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        max_concurrent = config.admission.max_concurrent,
        queue_timeout_secs = config.admission.timeout.num_seconds(),
        poll_interval_secs = config.poller.interval.as_secs(),
        "Loaded console configuration"
    );

    // --- External services ---
    let gateway = Arc::new(
        EvolutionApi::new(
            config.evolution_api_url.clone(),
            config.evolution_api_key.clone(),
        )
        .expect("Failed to build WhatsApp gateway client"),
    );
    let automation = Arc::new(
        AutomationApi::new(
            config.automation_generate_url.clone(),
            config.automation_send_url.clone(),
            config.automation_secret.clone(),
        )
        .expect("Failed to build automation client"),
    );
    let store = Arc::new(
        ResultStoreApi::new(&config.result_store_url).expect("Failed to build result store client"),
    );

    // --- Shared coordination state ---
    let hub = Arc::new(CoordinationHub::new(config.admission));
    let sessions = SessionStore::new();
    let workflow = Arc::new(
        JobWorkflow::new(Arc::clone(&hub), gateway, automation, store)
            .with_validator(config.validator)
            .with_poller(config.poller)
            .with_delivery_interval(config.delivery_interval_secs),
    );

    // --- Sweeper ---
    let cancel = CancellationToken::new();
    let sweeper_handle = tokio::spawn(sweeper::run(
        Arc::clone(&hub),
        config.sweep_interval,
        cancel.clone(),
    ));

    // --- Jobs ---
    let manifest = manifest::load(&config.jobs_file)
        .await
        .expect("Failed to load job manifest");

    let mut handles = Vec::with_capacity(manifest.jobs.len());
    for job in manifest.jobs {
        let session_id = uuid::Uuid::new_v4();
        let session = sessions.get_or_create(session_id, hub.now()).await;
        let handle = tokio::spawn(driver::run_session(
            Arc::clone(&workflow),
            session,
            job,
            config.admission_retry,
            cancel.child_token(),
        ));
        handles.push((session_id, handle));
    }
    tracing::info!(sessions = sessions.len().await, "Session drivers started");

    // Ctrl-C / SIGTERM cancels every driver; each abandons and releases
    // its slot before returning.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Cancelling running sessions");
        signal_cancel.cancel();
    });

    for (session_id, handle) in handles {
        match handle.await {
            Ok(Ok(summary)) => {
                tracing::info!(
                    session = %session_id,
                    summary = %serde_json::to_string(&summary).unwrap_or_default(),
                    "Session finished"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(session = %session_id, code = e.code(), error = %e, "Session failed");
            }
            Err(e) => {
                tracing::error!(session = %session_id, error = %e, "Session task panicked");
            }
        }
        if let Some(lock) = sessions.reset(session_id).await {
            hub.release_slot(&lock, session_id).await;
        }
        sessions.remove(session_id).await;
    }
    tracing::info!("All sessions finished");

    // --- Shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, sweeper_handle).await;
    let (admitted, waiting) = hub.queue_counts().await;
    tracing::info!(admitted, waiting, "Console stopped");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}
