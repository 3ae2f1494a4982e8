use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::batch::BatchViolation;
use crate::error::ErrorKind;
use crate::policy::PolicyError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqsError {
    #[error("{0}")]
    QueueAlreadyExists(String),
    #[error("{0}")]
    NonExistentQueue(String),
    #[error("{0}")]
    InvalidAttributeName(String),
    #[error("{0}")]
    InvalidAttributeValue(String),
    #[error("{0}")]
    InvalidParameterValue(String),
    #[error("{0}")]
    ReceiptHandleIsInvalid(String),
    #[error("{0}")]
    MessageNotInflight(String),
    #[error("{0}")]
    EmptyBatchRequest(String),
    #[error("{0}")]
    TooManyEntriesInBatchRequest(String),
    #[error("{0}")]
    BatchEntryIdsNotDistinct(String),
    #[error("{0}")]
    InvalidBatchEntryId(String),
    #[error("{0}")]
    MissingParameter(String),
    #[error("{0}")]
    InvalidAction(String),
}

impl SqsError {
    pub fn queue_not_found() -> Self {
        SqsError::NonExistentQueue("The specified queue does not exist.".into())
    }

    pub fn code(&self) -> &str {
        match self {
            SqsError::QueueAlreadyExists(_) => "QueueAlreadyExists",
            SqsError::NonExistentQueue(_) => "AWS.SimpleQueueService.NonExistentQueue",
            SqsError::InvalidAttributeName(_) => "InvalidAttributeName",
            SqsError::InvalidAttributeValue(_) => "InvalidAttributeValue",
            SqsError::InvalidParameterValue(_) => "InvalidParameterValue",
            SqsError::ReceiptHandleIsInvalid(_) => "ReceiptHandleIsInvalid",
            SqsError::MessageNotInflight(_) => "MessageNotInflight",
            SqsError::EmptyBatchRequest(_) => "AWS.SimpleQueueService.EmptyBatchRequest",
            SqsError::TooManyEntriesInBatchRequest(_) => {
                "AWS.SimpleQueueService.TooManyEntriesInBatchRequest"
            }
            SqsError::BatchEntryIdsNotDistinct(_) => {
                "AWS.SimpleQueueService.BatchEntryIdsNotDistinct"
            }
            SqsError::InvalidBatchEntryId(_) => "AWS.SimpleQueueService.InvalidBatchEntryId",
            SqsError::MissingParameter(_) => "MissingParameter",
            SqsError::InvalidAction(_) => "InvalidAction",
        }
    }

    /// Shape name used by the JSON protocol's `__type` field.
    fn json_type(&self) -> &str {
        match self {
            SqsError::NonExistentQueue(_) => "QueueDoesNotExist",
            SqsError::EmptyBatchRequest(_) => "EmptyBatchRequest",
            SqsError::TooManyEntriesInBatchRequest(_) => "TooManyEntriesInBatchRequest",
            SqsError::BatchEntryIdsNotDistinct(_) => "BatchEntryIdsNotDistinct",
            SqsError::InvalidBatchEntryId(_) => "InvalidBatchEntryId",
            other => other.code(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SqsError::NonExistentQueue(_)
            | SqsError::ReceiptHandleIsInvalid(_)
            | SqsError::MessageNotInflight(_) => ErrorKind::NotFound,
            SqsError::QueueAlreadyExists(_) => ErrorKind::Conflict,
            _ => ErrorKind::Validation,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SqsError::QueueAlreadyExists(m)
            | SqsError::NonExistentQueue(m)
            | SqsError::InvalidAttributeName(m)
            | SqsError::InvalidAttributeValue(m)
            | SqsError::InvalidParameterValue(m)
            | SqsError::ReceiptHandleIsInvalid(m)
            | SqsError::MessageNotInflight(m)
            | SqsError::EmptyBatchRequest(m)
            | SqsError::TooManyEntriesInBatchRequest(m)
            | SqsError::BatchEntryIdsNotDistinct(m)
            | SqsError::InvalidBatchEntryId(m)
            | SqsError::MissingParameter(m)
            | SqsError::InvalidAction(m) => m,
        }
    }
}

impl From<BatchViolation> for SqsError {
    fn from(v: BatchViolation) -> Self {
        let message = v.to_string();
        match v {
            BatchViolation::Empty => SqsError::EmptyBatchRequest(message),
            BatchViolation::TooMany(_) => SqsError::TooManyEntriesInBatchRequest(message),
            BatchViolation::NotDistinct(_) => SqsError::BatchEntryIdsNotDistinct(message),
            BatchViolation::InvalidId(_) => SqsError::InvalidBatchEntryId(message),
        }
    }
}

impl From<PolicyError> for SqsError {
    fn from(e: PolicyError) -> Self {
        SqsError::InvalidAttributeValue(e.to_string())
    }
}

impl IntoResponse for SqsError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = json!({
            "__type": format!("com.amazonaws.sqs#{}", self.json_type()),
            "message": self.message(),
        });
        let query_error = format!("{};{}", self.code(), kind.fault());
        (
            kind.status_code(),
            [("x-amzn-query-error", query_error)],
            axum::Json(body),
        )
            .into_response()
    }
}
