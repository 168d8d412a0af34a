//! Prometheus metrics. The exporter is optional; when `KENNELD_METRICS_PORT`
//! is unset the `metrics` macros record into the no-op default.

use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::sql::Command;

pub const CONNECTIONS_TOTAL: &str = "kenneld_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "kenneld_connections_active";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "kenneld_connections_rejected_total";
pub const COMMANDS_TOTAL: &str = "kenneld_commands_total";
pub const COMMAND_ERRORS_TOTAL: &str = "kenneld_command_errors_total";
pub const COMMAND_DURATION_SECONDS: &str = "kenneld_command_duration_seconds";
pub const WAL_FLUSH_BATCH_SIZE: &str = "kenneld_wal_flush_batch_size";
pub const WAL_FLUSH_DURATION_SECONDS: &str = "kenneld_wal_flush_duration_seconds";
pub const TENANTS_ACTIVE: &str = "kenneld_tenants_active";
pub const WAL_COMPACTIONS_TOTAL: &str = "kenneld_wal_compactions_total";

/// Install the Prometheus exporter when a port is configured. Without one,
/// metrics macros stay no-ops.
pub fn init(port: Option<u16>) {
    let Some(port) = port else {
        return;
    };
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(%addr, "prometheus exporter listening"),
        Err(e) => tracing::error!(%addr, error = %e, "failed to start prometheus exporter"),
    }
}

/// Stable label for per-command counters and histograms.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCategory(_) => "insert_category",
        Command::UpdateCategory { .. } => "update_category",
        Command::DeleteCategory(_) => "delete_category",
        Command::SelectCategories { .. } => "select_categories",
        Command::InsertPet(_) => "insert_pet",
        Command::DeletePet(_) => "delete_pet",
        Command::SelectPets { .. } => "select_pets",
        Command::InsertRoom(_) => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::SetRoomVisibility { .. } => "set_room_visibility",
        Command::DeleteRoom(_) => "delete_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::InsertBooking(_) => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking(_) => "delete_booking",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBlocking { .. } => "select_blocking",
        Command::SelectCrossing { .. } => "select_crossing",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectFreeRanges { .. } => "select_free_ranges",
        Command::SelectFutureBookings { .. } => "select_future_bookings",
        Command::Listen(_) => "listen",
        Command::Unlisten(_) => "unlisten",
    }
}
