use crate::http::StatusCode;

/// Failures the request pipeline turns into an error envelope.
#[derive(Debug, thiserror::Error)]
pub enum RtsError {
    #[error("Failed to parse request body: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("{0}")]
    Validation(String),
    #[error("Method not allowed. Use POST.")]
    MethodNotAllowed,
    #[error("{0}")]
    Initialization(String),
    #[error("{0}")]
    Context(String),
    #[error("{0}")]
    Service(String),
    #[error("{0}")]
    Unknown(String),
}

impl RtsError {
    pub fn status(&self) -> StatusCode {
        match self {
            RtsError::Parse(_) | RtsError::Validation(_) => StatusCode::BAD_REQUEST,
            RtsError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RtsError::Initialization(_)
            | RtsError::Context(_)
            | RtsError::Service(_)
            | RtsError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
