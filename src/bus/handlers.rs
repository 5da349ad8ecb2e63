use super::bus::MessageBus;
use super::messages::TaskMessage;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

/// Endpoint peers post bus messages to.
pub const ENDPOINT_BUS: &str = "/internal/bus";

pub async fn handle_bus_message(
    Extension(bus): Extension<Arc<MessageBus>>,
    Json(msg): Json<TaskMessage>,
) -> StatusCode {
    bus.deliver_local(msg);
    StatusCode::OK
}
