use thiserror::Error;

use crate::api::{ApiError, GENERIC_FAILURE};
use crate::tree::NodeId;

pub type ThreadResult<T> = Result<T, ThreadError>;

/// Everything a thread action can fail with. None of it is fatal.
#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("{0} cannot be empty")]
    EmptyContent(&'static str),

    #[error("Please login to {0}")]
    LoginRequired(&'static str),

    #[error("You do not have permission to {action} this {noun}")]
    PermissionDenied {
        action: &'static str,
        noun: &'static str,
    },

    #[error("Maximum depth reached")]
    MaxDepthReached,

    #[error("Please wait, the previous {0} is still in progress")]
    InFlight(&'static str),

    #[error("{0} is not loaded")]
    UnknownNode(NodeId),

    #[error("{0} is not being edited")]
    NotEditing(NodeId),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ThreadError {
    /// Failures caught before any request was sent.
    pub fn is_local(&self) -> bool {
        !matches!(self, ThreadError::Api(_))
    }
}

/// Turn an error into the text shown in a notice.
pub fn categorize_error(error: &ThreadError) -> String {
    match error {
        ThreadError::EmptyContent(_) => format!("Validation Error: {}", error),
        ThreadError::LoginRequired(_) => format!("Authentication Required: {}", error),
        ThreadError::PermissionDenied { .. } => format!("Permission Error: {}", error),
        ThreadError::MaxDepthReached | ThreadError::InFlight(_) => error.to_string(),
        ThreadError::UnknownNode(_) | ThreadError::NotEditing(_) => format!("Error: {}", error),
        ThreadError::Api(api) => match api {
            ApiError::Network(_) => {
                "Network Error: Connection failed. Check your network and try again".to_string()
            }
            ApiError::Unauthorized(msg) => format!(
                "Authorization Error: {}",
                server_message(msg, "Session expired. Please log in again")
            ),
            ApiError::Forbidden(msg) => format!("Permission Error: {}", msg),
            ApiError::BadRequest(msg) => format!("Validation Error: {}", msg),
            ApiError::Server { message, .. } => format!(
                "Server Error: {}",
                server_message(message, "The server is experiencing issues. Please try again later")
            ),
            other => format!("Error: {}", other.user_message()),
        },
    }
}

/// The server's text, or `fallback` when it sent nothing useful.
fn server_message<'a>(message: &'a str, fallback: &'a str) -> &'a str {
    if message.trim().is_empty() || message == GENERIC_FAILURE {
        fallback
    } else {
        message
    }
}
