use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "reservd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "reservd_query_duration_seconds";

// ── Domain outcomes ─────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (created, unavailable).
pub const RESERVATIONS_TOTAL: &str = "reservd_reservations_total";

/// Counter: lifecycle transitions. Labels: entity, outcome.
pub const TRANSITIONS_TOTAL: &str = "reservd_transitions_total";

/// Counter: items processed by bulk transitions. Labels: outcome.
pub const BULK_ITEMS_TOTAL: &str = "reservd_bulk_items_total";

/// Gauge: overdue equipment reservations seen by the last scan.
pub const OVERDUE_RESERVATIONS: &str = "reservd_overdue_reservations";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "reservd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "reservd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "reservd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reservd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reservd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterResource { .. } => "register_resource",
        Command::UpdateResource { .. } => "update_resource",
        Command::Reserve { .. } => "reserve",
        Command::Transition { .. } => "transition",
        Command::BulkTransition { .. } => "bulk_transition",
        Command::UpdatePayment { .. } => "update_payment",
        Command::RequestRefund { .. } => "request_refund",
        Command::TransitionRefund { .. } => "transition_refund",
        Command::OpenComplaint { .. } => "open_complaint",
        Command::TransitionComplaint { .. } => "transition_complaint",
        Command::AssignComplaint { .. } => "assign_complaint",
        Command::SelectResources => "select_resources",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectReservationByCode { .. } => "select_reservation_by_code",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectOverdue => "select_overdue",
        Command::SelectRefund { .. } => "select_refund",
        Command::SelectRefundForReservation { .. } => "select_refund_for_reservation",
        Command::SelectComplaint { .. } => "select_complaint",
    }
}
