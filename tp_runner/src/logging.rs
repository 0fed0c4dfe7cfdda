//! Structured logging setup and status-feed rendering.

use tablepilot::{
    RoundOutcome, StatusEvent, TableId,
    round::Decision,
    status::Alert,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging.
///
/// Records emitted through the `log` facade by the core library are bridged
/// into the same subscriber. Levels come from `RUST_LOG`.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tablepilot=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log one status event with structured fields
pub fn log_event(event: &StatusEvent) {
    match event {
        StatusEvent::TableUpdate(snapshot) => {
            tracing::debug!(
                table_id = snapshot.table_id,
                state = %snapshot.state,
                rounds = snapshot.next_round_number.saturating_sub(1),
                "Table update"
            );
        }
        StatusEvent::RoundCompleted { table_id, outcome } => log_round(*table_id, outcome),
        StatusEvent::Alert(alert) => log_failure(alert),
        StatusEvent::GeometryDrift { table_id, dx, dy } => {
            tracing::warn!(table_id = *table_id, dx = *dx, dy = *dy, "Table geometry drifted");
        }
        StatusEvent::SurfaceReloaded { at } => {
            tracing::warn!(at = %at, "Surface reloaded, tables paused");
        }
        StatusEvent::SurfaceRestored { at } => {
            tracing::info!(at = %at, "Surface restored, tables resumed");
        }
        StatusEvent::Throttle {
            cpu_percent,
            factor,
        } => {
            tracing::info!(cpu_percent = *cpu_percent, factor = *factor, "Cadence throttle changed");
        }
    }
}

/// Log a completed round with structured data
pub fn log_round(table_id: TableId, outcome: &RoundOutcome) {
    let decision = match outcome.decision {
        Decision::Skip => "skip",
        Decision::Blue => "blue",
        Decision::Red => "red",
    };
    tracing::info!(
        table_id = table_id,
        round = outcome.round_number,
        winner = ?outcome.winner,
        decision = decision,
        pattern = outcome.pattern_matched.as_deref(),
        correct = ?outcome.correct,
        "Round completed"
    );
}

/// Log an escalated failure with structured data
pub fn log_failure(alert: &Alert) {
    tracing::error!(
        table_id = alert.table_id,
        class = %alert.class,
        consecutive = alert.consecutive,
        at = %alert.at,
        "ALERT: {}",
        alert.context
    );
}
