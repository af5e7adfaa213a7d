use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookd_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookd_query_duration_seconds";

// ── Domain outcomes ─────────────────────────────────────────────

/// Counter: availability decisions. Labels: outcome (available, unavailable).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "bookd_availability_checks_total";

/// Counter: lifecycle results. Labels: outcome (created, updated, cancelled, rejected, failed).
pub const RESERVATIONS_TOTAL: &str = "bookd_reservations_total";

/// Counter: overlap range queries that failed. Labels: index (starts, ends).
pub const OVERLAP_QUERY_FAILURES_TOTAL: &str = "bookd_overlap_query_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "bookd_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::PlaceReservation { id: None, .. } => "create_reservation",
        Command::PlaceReservation { id: Some(_), .. } => "edit_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectReservationsBetween { .. } => "select_reservations_between",
        Command::SelectConfiguration => "select_configuration",
    }
}
