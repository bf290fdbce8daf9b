use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "staydb_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "staydb_query_duration_seconds";

/// Counter: booking requests turned away because the dates were taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "staydb_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staydb_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staydb_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staydb_connections_rejected_total";

/// Gauge: number of loaded marketplaces (one per database name).
pub const TENANTS_ACTIVE: &str = "staydb_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staydb_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staydb_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "staydb_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
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
        Command::InsertUser(_) => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::InsertProperty(_) => "insert_property",
        Command::UpdateProperty { .. } => "update_property",
        Command::DeleteProperty { .. } => "delete_property",
        Command::InsertBooking(_) => "insert_booking",
        Command::UpdateBookingStatus { .. } => "update_booking_status",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::RecordPayment { .. } => "record_payment",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::InsertReview(_) => "insert_review",
        Command::UpdateReview { .. } => "update_review",
        Command::DeleteReview { .. } => "delete_review",
        Command::MarkReviewHelpful { .. } => "mark_review_helpful",
        Command::ReportReview { .. } => "report_review",
        Command::SelectUsers { .. } => "select_users",
        Command::SelectProperties { .. } => "select_properties",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectReviews { .. } => "select_reviews",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::Search(_) => "search",
        Command::SelectBookingStats(_) => "select_booking_stats",
        Command::SelectBookingTrends(_) => "select_booking_trends",
        Command::SelectReviewStats { .. } => "select_review_stats",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
