use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use tracing::debug;

use super::error::SqsError;
use super::state::SqsState;
use super::types::*;

fn decode<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, SqsError> {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(raw).map_err(|e| SqsError::InvalidParameterValue(e.to_string()))
}

macro_rules! dispatch {
    ($state:expr, $body:expr, $req_type:ty, $method:ident) => {{
        let req: $req_type = decode(&$body)?;
        let resp = $state.$method(req).await?;
        Ok(Json(resp).into_response())
    }};
}

macro_rules! dispatch_empty {
    ($state:expr, $body:expr, $req_type:ty, $method:ident) => {{
        let req: $req_type = decode(&$body)?;
        $state.$method(req).await?;
        Ok(Json(serde_json::json!({})).into_response())
    }};
}

async fn handle_request(
    State(state): State<Arc<SqsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::response::Response, SqsError> {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| SqsError::MissingParameter("Missing X-Amz-Target header".into()))?;

    let action = target.strip_prefix("AmazonSQS.").ok_or_else(|| {
        SqsError::InvalidAction(format!("Invalid target: {target}"))
    })?;
    debug!(action = %action, "SQS request");

    match action {
        "CreateQueue" => dispatch!(state, body, CreateQueueRequest, create_queue),
        "DeleteQueue" => dispatch_empty!(state, body, DeleteQueueRequest, delete_queue),
        "GetQueueUrl" => dispatch!(state, body, GetQueueUrlRequest, get_queue_url),
        "ListQueues" => dispatch!(state, body, ListQueuesRequest, list_queues),
        "GetQueueAttributes" => {
            dispatch!(state, body, GetQueueAttributesRequest, get_queue_attributes)
        }
        "SetQueueAttributes" => {
            dispatch_empty!(state, body, SetQueueAttributesRequest, set_queue_attributes)
        }
        "PurgeQueue" => dispatch_empty!(state, body, PurgeQueueRequest, purge_queue),
        "SendMessage" => dispatch!(state, body, SendMessageRequest, send_message),
        "SendMessageBatch" => {
            dispatch!(state, body, SendMessageBatchRequest, send_message_batch)
        }
        "ReceiveMessage" => {
            dispatch!(state, body, ReceiveMessageRequest, receive_message)
        }
        "DeleteMessage" => {
            dispatch_empty!(state, body, DeleteMessageRequest, delete_message)
        }
        "DeleteMessageBatch" => {
            dispatch!(state, body, DeleteMessageBatchRequest, delete_message_batch)
        }
        "ChangeMessageVisibility" => {
            dispatch_empty!(
                state,
                body,
                ChangeMessageVisibilityRequest,
                change_message_visibility
            )
        }
        "ChangeMessageVisibilityBatch" => {
            dispatch!(
                state,
                body,
                ChangeMessageVisibilityBatchRequest,
                change_message_visibility_batch
            )
        }
        "ListDeadLetterSourceQueues" => {
            dispatch!(
                state,
                body,
                ListDeadLetterSourceQueuesRequest,
                list_dead_letter_source_queues
            )
        }
        _ => Err(SqsError::InvalidAction(format!(
            "Unknown action: {action}"
        ))),
    }
}

/// SDKs post either to the endpoint root or to the queue URL itself.
pub fn create_router(state: Arc<SqsState>) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .route("/{*path}", post(handle_request))
        .with_state(state)
}
