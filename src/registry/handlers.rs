use super::map::TaskRegistry;
use super::protocol::*;
use super::types::TaskId;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;
use std::time::Duration;

pub async fn handle_submit_task(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Json(req): Json<SubmitTaskRequest>,
) -> (StatusCode, Json<SubmitTaskResponse>) {
    match registry.submit(req.descriptor).await {
        Ok(task_id) => {
            tracing::info!("Task submitted successfully: {}", task_id);
            (
                StatusCode::OK,
                Json(SubmitTaskResponse {
                    task_id: Some(task_id),
                }),
            )
        }
        Err(e) => {
            tracing::error!("Failed to submit task: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitTaskResponse { task_id: None }),
            )
        }
    }
}

pub async fn handle_internal_submit(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Json(req): Json<ForwardEntryRequest>,
) -> StatusCode {
    tracing::debug!(
        "Received forwarded task {} for partition {}",
        req.entry.id,
        req.partition
    );

    if let Err(e) = registry.store_as_primary(req.partition, req.entry).await {
        tracing::error!("Failed to store forwarded task: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    StatusCode::OK
}

pub async fn handle_get_task_status(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Path(task_id_str): Path<String>,
) -> (StatusCode, Json<Option<TaskStatusResponse>>) {
    let task_id = TaskId(task_id_str);

    match registry.get(&task_id).await {
        Some(entry) => (
            StatusCode::OK,
            Json(Some(TaskStatusResponse {
                task_id,
                state: entry.state,
                owner_id: entry.owner_id,
                runtime_id: entry.runtime_id,
                transitions: entry.transitions,
            })),
        ),
        None => {
            tracing::debug!("Task not found: {}", task_id);
            (StatusCode::NOT_FOUND, Json(None))
        }
    }
}

pub async fn handle_get_task_internal(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Path(task_id_str): Path<String>,
) -> (StatusCode, Json<GetEntryResponse>) {
    let task_id = TaskId(task_id_str);

    match registry.get_local(&task_id) {
        Some(entry) => (
            StatusCode::OK,
            Json(GetEntryResponse { entry: Some(entry) }),
        ),
        None => (StatusCode::NOT_FOUND, Json(GetEntryResponse { entry: None })),
    }
}

pub async fn handle_put_entry(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Json(req): Json<PutEntryRequest>,
) -> (StatusCode, Json<PutResponse>) {
    match registry.put_with_op(req.entry, req.op_id).await {
        Ok(_) => (StatusCode::OK, Json(PutResponse { success: true })),
        Err(e) => {
            tracing::error!("Failed to apply forwarded put: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PutResponse { success: false }),
            )
        }
    }
}

pub async fn handle_replicate_entry(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Json(req): Json<ReplicateEntryRequest>,
) -> StatusCode {
    tracing::debug!(
        "Storing replicated task {} in partition {}",
        req.entry.id,
        req.partition
    );
    registry.store_replica(req.partition, req.op_id, req.entry);

    StatusCode::OK
}

pub async fn handle_partition_dump(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Path(partition): Path<u32>,
) -> (StatusCode, Json<PartitionDumpResponse>) {
    let entries = registry.dump_partition(partition);
    (
        StatusCode::OK,
        Json(PartitionDumpResponse { partition, entries }),
    )
}

/// Long-poll lock acquisition on behalf of a remote holder.
pub async fn handle_lock(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Json(req): Json<LockRequest>,
) -> (StatusCode, Json<LockResponse>) {
    let timeout = Duration::from_millis(req.timeout_ms);

    match registry.lock_local(&req.task_id, &req.holder, timeout).await {
        Ok(entry) => (
            StatusCode::OK,
            Json(LockResponse {
                granted: true,
                entry: Some(entry),
            }),
        ),
        Err(e) => {
            tracing::debug!("Lock on task {} not granted: {}", req.task_id, e);
            (
                StatusCode::OK,
                Json(LockResponse {
                    granted: false,
                    entry: None,
                }),
            )
        }
    }
}

pub async fn handle_unlock(
    Extension(registry): Extension<Arc<TaskRegistry>>,
    Json(req): Json<UnlockRequest>,
) -> StatusCode {
    registry.unlock_local(&req.task_id, &req.holder);
    StatusCode::OK
}
