use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookd_query_duration_seconds";

/// Counter: successful slot reservations.
pub const RESERVATIONS_TOTAL: &str = "bookd_reservations_total";

/// Counter: booking attempts turned away with a full slot.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "bookd_reservations_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookd_connections_rejected_total";

/// Gauge: number of active stores (loaded engines).
pub const STORES_ACTIVE: &str = "bookd_stores_active";

/// Histogram: ledger group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: ledger group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::DefineService { .. } => "define_service",
        Command::PublishShift { .. } => "publish_shift",
        Command::RevokeShift { .. } => "revoke_shift",
        Command::PublishSlot { .. } => "publish_slot",
        Command::RevokeSlot { .. } => "revoke_slot",
        Command::Book { .. } => "book",
        Command::SetStatus { .. } => "set_status",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSlot { .. } => "select_slot",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectHistory { .. } => "select_history",
        Command::SelectNotices { .. } => "select_notices",
    }
}
