use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::GENERIC_FAILURE;
use super::{ApiError, ApiResult, Authenticator, CommentBackend};
use crate::logging::LogConfig;
use alumni_types::*;

/// API client for communicating with the portal server
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session_token: Option<String>,
    log_config: LogConfig,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: None,
            log_config: LogConfig::default(),
        }
    }

    /// Use the caller's logging categories for request logging.
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_session_token(&self) -> bool {
        self.session_token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Helper to add the bearer token to a request if available
    fn add_auth_header(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.session_token {
            req.bearer_auth(token)
        } else {
            req
        }
    }

    async fn send(&self, req: RequestBuilder) -> ApiResult<Response> {
        let response = self.add_auth_header(req).send().await?;
        crate::log_api_call!(self.log_config, "{} {}", response.status().as_u16(), response.url());
        Ok(response)
    }

    /// Unwrap the `{success, data, message}` envelope, requiring `data`.
    async fn handle_envelope<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let envelope: Envelope<T> = self.read_envelope(response).await?;
        envelope
            .data
            .ok_or_else(|| ApiError::Api("Server response did not include data".to_string()))
    }

    /// Unwrap an envelope whose payload the caller does not need.
    async fn handle_ack(&self, response: Response) -> ApiResult<()> {
        let _: Envelope<serde_json::Value> = self.read_envelope(response).await?;
        Ok(())
    }

    async fn read_envelope<T: DeserializeOwned>(&self, response: Response) -> ApiResult<Envelope<T>> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_text));
        }

        let body = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        if !envelope.success {
            let message = envelope
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE.to_string());
            return Err(ApiError::Api(message));
        }
        Ok(envelope)
    }
}

/// Map a non-2xx response to an error, preferring the envelope's message.
fn status_error(status: StatusCode, error_text: &str) -> ApiError {
    let envelope_message = serde_json::from_str::<Envelope<serde_json::Value>>(error_text)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty());

    // Clean up HTML error messages (e.g., from nginx 404 pages)
    let clean_error = match envelope_message {
        Some(message) => message,
        None if error_text.contains("<html>") || error_text.contains("<!DOCTYPE") => {
            format!("Server returned {} error. Please check the server URL.", status.as_u16())
        }
        None if error_text.trim().is_empty() => GENERIC_FAILURE.to_string(),
        None => error_text.to_string(),
    };

    match status.as_u16() {
        404 => ApiError::NotFound(clean_error),
        401 => ApiError::Unauthorized(clean_error),
        403 => ApiError::Forbidden(clean_error),
        400 | 422 => ApiError::BadRequest(clean_error),
        code if code >= 500 => ApiError::Server {
            status: code,
            message: clean_error,
        },
        _ => ApiError::Api(clean_error),
    }
}

#[async_trait]
impl CommentBackend for ApiClient {
    // Comment endpoints

    async fn list_comments(&self, parent: ParentRef, page: u32, limit: u32) -> ApiResult<CommentPage> {
        let url = self.url(&format!("/{}/{}/comments", parent.parent_type.as_str(), parent.id));
        let req = self.client.get(&url).query(&[("page", page), ("limit", limit)]);
        let response = self.send(req).await?;
        self.handle_envelope(response).await
    }

    async fn create_comment(&self, parent: ParentRef, content: String) -> ApiResult<Comment> {
        let url = self.url(&format!("/{}/{}/comments", parent.parent_type.as_str(), parent.id));
        let request = ContentRequest { content };
        let response = self.send(self.client.post(&url).json(&request)).await?;
        self.handle_envelope(response).await
    }

    async fn update_comment(&self, comment_id: CommentId, content: String) -> ApiResult<()> {
        let url = self.url(&format!("/comments/{}", comment_id));
        let request = ContentRequest { content };
        let response = self.send(self.client.patch(&url).json(&request)).await?;
        self.handle_ack(response).await
    }

    async fn delete_comment(&self, comment_id: CommentId) -> ApiResult<()> {
        let url = self.url(&format!("/comments/{}", comment_id));
        let response = self.send(self.client.delete(&url)).await?;
        self.handle_ack(response).await
    }

    // Reply endpoints

    async fn create_reply(
        &self,
        comment_id: CommentId,
        parent_reply_id: Option<ReplyId>,
        content: String,
    ) -> ApiResult<Reply> {
        let url = match parent_reply_id {
            Some(parent) => self.url(&format!("/replies/{}/replies", parent)),
            None => self.url(&format!("/comments/{}/replies", comment_id)),
        };
        let request = ContentRequest { content };
        let response = self.send(self.client.post(&url).json(&request)).await?;
        self.handle_envelope(response).await
    }

    async fn update_reply(&self, reply_id: ReplyId, content: String) -> ApiResult<()> {
        let url = self.url(&format!("/replies/{}", reply_id));
        let request = ContentRequest { content };
        let response = self.send(self.client.patch(&url).json(&request)).await?;
        self.handle_ack(response).await
    }

    async fn delete_reply(&self, reply_id: ReplyId) -> ApiResult<()> {
        let url = self.url(&format!("/replies/{}", reply_id));
        let response = self.send(self.client.delete(&url)).await?;
        self.handle_ack(response).await
    }

    async fn nested_replies(&self, reply_id: ReplyId, max_depth: u32) -> ApiResult<Vec<Reply>> {
        let url = self.url(&format!("/replies/{}/nested", reply_id));
        let req = self.client.get(&url).query(&[("maxDepth", max_depth)]);
        let response = self.send(req).await?;
        self.handle_envelope(response).await
    }

    // Like endpoints

    async fn toggle_like(&self, likeable_type: LikeableType, likeable_id: i64) -> ApiResult<()> {
        let url = self.url("/like");
        let request = LikeRequest {
            likeable_type,
            likeable_id,
        };
        let response = self.send(self.client.post(&url).json(&request)).await?;
        self.handle_ack(response).await
    }

    async fn like_status(&self, likeable_type: LikeableType, likeable_id: i64) -> ApiResult<LikeStatus> {
        let url = self.url(&format!("/like-status/{}/{}", likeable_type.as_str(), likeable_id));
        let response = self.send(self.client.get(&url)).await?;
        self.handle_envelope(response).await
    }
}

#[async_trait]
impl Authenticator for ApiClient {
    /// Set the bearer token for authenticated requests
    fn set_session_token(&mut self, token: Option<String>) {
        self.session_token = token;
    }

    async fn current_user(&self) -> ApiResult<CurrentUser> {
        let response = self.send(self.client.get(self.url("/auth/me"))).await?;
        self.handle_envelope(response).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_API_URL)
    }
}
