//! Drives one simulated session, standalone or as a collector/display pair.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mindful_core::{
    ControllerParts, JsonSessionStore, LoopbackPair, Role, SessionConfig, SessionController,
    SessionError, SessionEvent, SessionPhase, SignalHub, StoreError, SystemClock,
};
use tokio::sync::broadcast;

use crate::synthetic::synthetic_hub;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    #[error("Collector did not start a session within {0:?}")]
    PeerNeverStarted(Duration),
}

pub struct RunOptions {
    pub pair: bool,
    pub seconds: u64,
    pub config: SessionConfig,
    pub store_path: PathBuf,
    pub drop_rate: f64,
    pub deny: bool,
}

pub async fn run(options: RunOptions) -> Result<(), SimError> {
    if options.pair {
        run_pair(options).await
    } else {
        run_standalone(options).await
    }
}

fn controller(
    config: &SessionConfig,
    role: Role,
    hub: SignalHub,
    transport: Option<Arc<dyn mindful_core::SyncTransport>>,
    store_path: &Path,
) -> SessionController {
    SessionController::new(ControllerParts {
        config: SessionConfig {
            role,
            ..config.clone()
        },
        hub,
        transport,
        store: Arc::new(JsonSessionStore::new(store_path)),
        clock: Arc::new(SystemClock),
    })
}

async fn run_standalone(options: RunOptions) -> Result<(), SimError> {
    let hub = synthetic_hub(&options.config.enabled(), options.drop_rate, options.deny);
    let session = controller(
        &options.config,
        Role::Standalone,
        hub,
        None,
        &options.store_path,
    );
    let printer = tokio::spawn(print_events("session", session.subscribe()));

    session.start().await?;
    track_for(options.seconds).await;
    session.stop().await?;

    finish(&session)?;
    printer.abort();
    Ok(())
}

async fn run_pair(options: RunOptions) -> Result<(), SimError> {
    tracing::info!(
        protocol_version = mindful_protocol::PROTOCOL_VERSION,
        "Pairing collector and display over loopback"
    );
    let pair = LoopbackPair::new();

    let collector = controller(
        &options.config,
        Role::Collector,
        synthetic_hub(&options.config.enabled(), options.drop_rate, options.deny),
        Some(pair.collector.clone()),
        &collector_store_path(&options.store_path),
    );
    let display = controller(
        &options.config,
        Role::Display,
        SignalHub::new(Arc::new(crate::synthetic::SimAuthorizer::new(false))),
        Some(pair.display.clone()),
        &options.store_path,
    );

    let collector_link = collector.serve(pair.collector_inbox);
    let display_link = display.serve(pair.display_inbox);
    let collector_printer = tokio::spawn(print_events("collector", collector.subscribe()));
    let display_printer = tokio::spawn(print_events("display", display.subscribe()));

    display.start().await?;
    let timing = &options.config.timing;
    let startup = Duration::from_secs_f64(
        timing.countdown_steps as f64 * timing.countdown_step_secs + 5.0,
    );
    wait_for_phase(&display, SessionPhase::Tracking, startup).await?;

    track_for(options.seconds).await;
    display.stop().await?;
    finish(&display)?;

    // Let the collector finish shipping before tearing down the link.
    let _ = wait_for_phase(&collector, SessionPhase::Summarized, Duration::from_secs(5)).await;
    collector_link.abort();
    display_link.abort();
    collector_printer.abort();
    display_printer.abort();
    Ok(())
}

fn collector_store_path(display_store: &Path) -> PathBuf {
    display_store.with_file_name("collector-sessions.json")
}

async fn track_for(seconds: u64) {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, stopping session");
        }
    }
}

async fn wait_for_phase(
    controller: &SessionController,
    phase: SessionPhase,
    limit: Duration,
) -> Result<(), SimError> {
    let deadline = tokio::time::Instant::now() + limit;
    while controller.phase() != phase {
        if tokio::time::Instant::now() >= deadline {
            return Err(SimError::PeerNeverStarted(limit));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

fn finish(controller: &SessionController) -> Result<(), SimError> {
    let snapshot = controller.snapshot();
    if let Some(outcome) = snapshot.last_handoff {
        println!("handoff: {:?}", outcome);
    }
    if let Some(summary) = snapshot.summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn print_events(label: &'static str, mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("[{}] {}", label, line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::PhaseChanged { from, to } => Some(format!("{} -> {}", from, to)),
        SessionEvent::CountdownTick { remaining } => Some(format!("starting in {}", remaining)),
        SessionEvent::LiveValue(live) => Some(format!(
            "{} {:.1} {} ({})",
            live.signal,
            live.value,
            live.signal.unit(),
            live.zone
        )),
        SessionEvent::Tick {
            elapsed_secs,
            liveness,
        } if liveness.likely_disconnected => Some(format!(
            "{:.0}s elapsed, no sensor data arriving",
            elapsed_secs
        )),
        SessionEvent::Tick { .. } => None,
        SessionEvent::SignalUnavailable { signal } => Some(format!("{} unavailable", signal)),
        SessionEvent::Error { message } => Some(format!("error: {}", message)),
        SessionEvent::SummaryReady(summary) => Some(format!(
            "summary ready: {} samples over {:.0}s",
            summary.total_samples, summary.duration_secs
        )),
        SessionEvent::LatePackageStored { session_id } => {
            Some(format!("late package stored for {}", session_id))
        }
    }
}
