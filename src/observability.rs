use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "cadence_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "cadence_query_duration_seconds";

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: appointments written. Labels: provenance (manual, generated).
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "cadence_appointments_booked_total";

/// Counter: candidate slots rejected because they were taken.
pub const CONFLICTS_TOTAL: &str = "cadence_conflicts_total";

/// Counter: materialized occurrences. Labels: outcome.
pub const OCCURRENCES_TOTAL: &str = "cadence_occurrences_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "cadence_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "cadence_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "cadence_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "cadence_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "cadence_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "cadence_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "cadence_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
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
        Command::InsertProfessional(_) => "insert_professional",
        Command::SelectProfessionals => "select_professionals",
        Command::InsertClient(_) => "insert_client",
        Command::SelectClients { .. } => "select_clients",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::InsertRecurringRule(_) => "insert_recurring_rule",
        Command::SelectRecurringRules { .. } => "select_recurring_rules",
        Command::ReplaceSchedule { .. } => "replace_schedule",
        Command::ClearSchedule { .. } => "clear_schedule",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectOccurrences { .. } => "select_occurrences",
    }
}
