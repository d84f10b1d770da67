mod backend;
mod client;
mod error;

pub use backend::{Authenticator, CommentBackend};
pub use client::ApiClient;
pub use error::{ApiError, ApiResult, GENERIC_FAILURE};
