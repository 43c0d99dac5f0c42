mod state;

use flowbox_stream::EngineEvent;
use state::DaemonState;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let state = DaemonState::initialize()?;
    tracing::info!(
        user = %state.identity.user_id,
        poll_secs = state.config.sync.poll_interval_secs,
        "flowbox daemon started"
    );

    let events = state.engine.subscribe();
    let logger = tokio::spawn(log_events(events));

    state.engine.set_inbox_active(&state.identity, true);
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    state.engine.set_inbox_active(&state.identity, false);
    state.engine.shutdown().await;
    logger.abort();
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &EngineEvent) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    match event {
        EngineEvent::SyncFailed { .. }
        | EngineEvent::EditRolledBack { .. }
        | EngineEvent::SendFailed { .. } => tracing::warn!(event = %payload, "engine event"),
        EngineEvent::SendTick { .. } => tracing::debug!(event = %payload, "engine event"),
        _ => tracing::info!(event = %payload, "engine event"),
    }
}
