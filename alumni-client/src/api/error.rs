use thiserror::Error;

/// Message used when the server rejects a request without saying why.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    /// Message suitable for a notice: the server's own text when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Api(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Server { message: msg, .. } => msg.clone(),
            ApiError::Network(e) => e.to_string(),
            ApiError::Serialization(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
