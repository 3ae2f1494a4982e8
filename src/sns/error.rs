use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use crate::batch::BatchViolation;
use crate::error::{xml_escape, ErrorKind};
use crate::policy::PolicyError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnsError {
    #[error("{0}")]
    NonExistentTopic(String),
    #[error("{0}")]
    NonExistentSubscription(String),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    EmptyBatchRequest(String),
    #[error("{0}")]
    TooManyEntriesInBatchRequest(String),
    #[error("{0}")]
    BatchEntryIdsNotDistinct(String),
    #[error("{0}")]
    InvalidBatchEntryId(String),
    #[error("{0}")]
    InvalidAction(String),
}

impl SnsError {
    pub fn topic_not_found() -> Self {
        SnsError::NonExistentTopic("Topic does not exist".into())
    }

    pub fn subscription_not_found() -> Self {
        SnsError::NonExistentSubscription("Subscription does not exist".into())
    }

    /// Wire error code. Both missing-entity variants share AWS's `NotFound`.
    pub fn code(&self) -> &str {
        match self {
            SnsError::NonExistentTopic(_) | SnsError::NonExistentSubscription(_) => "NotFound",
            SnsError::InvalidParameter(_) => "InvalidParameter",
            SnsError::EmptyBatchRequest(_) => "EmptyBatchRequest",
            SnsError::TooManyEntriesInBatchRequest(_) => "TooManyEntriesInBatchRequest",
            SnsError::BatchEntryIdsNotDistinct(_) => "BatchEntryIdsNotDistinct",
            SnsError::InvalidBatchEntryId(_) => "InvalidBatchEntryId",
            SnsError::InvalidAction(_) => "InvalidAction",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SnsError::NonExistentTopic(_) | SnsError::NonExistentSubscription(_) => {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Validation,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SnsError::NonExistentTopic(m)
            | SnsError::NonExistentSubscription(m)
            | SnsError::InvalidParameter(m)
            | SnsError::EmptyBatchRequest(m)
            | SnsError::TooManyEntriesInBatchRequest(m)
            | SnsError::BatchEntryIdsNotDistinct(m)
            | SnsError::InvalidBatchEntryId(m)
            | SnsError::InvalidAction(m) => m,
        }
    }
}

impl From<BatchViolation> for SnsError {
    fn from(v: BatchViolation) -> Self {
        let message = v.to_string();
        match v {
            BatchViolation::Empty => SnsError::EmptyBatchRequest(message),
            BatchViolation::TooMany(_) => SnsError::TooManyEntriesInBatchRequest(message),
            BatchViolation::NotDistinct(_) => SnsError::BatchEntryIdsNotDistinct(message),
            BatchViolation::InvalidId(_) => SnsError::InvalidBatchEntryId(message),
        }
    }
}

impl From<PolicyError> for SnsError {
    fn from(e: PolicyError) -> Self {
        SnsError::InvalidParameter(e.to_string())
    }
}

impl IntoResponse for SnsError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = format!(
            r#"<ErrorResponse xmlns="http://sns.amazonaws.com/doc/2010-03-31/">
  <Error>
    <Type>{}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            kind.fault(),
            self.code(),
            xml_escape(self.message()),
            Uuid::new_v4(),
        );
        (kind.status_code(), [("content-type", "text/xml")], body).into_response()
    }
}
