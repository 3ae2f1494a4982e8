use axum::http::StatusCode;

/// Coarse failure taxonomy shared by the SQS and SNS services.
///
/// Every service error maps onto exactly one kind; the protocol adapters use
/// it to pick the HTTP status, the broker itself never looks at transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// AWS fault attribution used in error bodies.
    pub fn fault(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Receiver",
            _ => "Sender",
        }
    }
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
