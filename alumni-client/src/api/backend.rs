use async_trait::async_trait;

use alumni_types::*;

use super::ApiResult;

/// The slice of the portal REST API the comment threads depend on.
///
/// [`super::ApiClient`] talks to the real server; tests substitute an
/// in-memory implementation.
#[async_trait]
pub trait CommentBackend: Send + Sync {
    /// `GET /{type}/{id}/comments?page&limit`
    async fn list_comments(&self, parent: ParentRef, page: u32, limit: u32) -> ApiResult<CommentPage>;

    /// `POST /{type}/{id}/comments`
    async fn create_comment(&self, parent: ParentRef, content: String) -> ApiResult<Comment>;

    /// `PATCH /comments/{id}`
    async fn update_comment(&self, comment_id: CommentId, content: String) -> ApiResult<()>;

    /// `DELETE /comments/{id}`
    async fn delete_comment(&self, comment_id: CommentId) -> ApiResult<()>;

    /// `POST /comments/{id}/replies`, or `POST /replies/{parent}/replies` when
    /// `parent_reply_id` is set.
    async fn create_reply(
        &self,
        comment_id: CommentId,
        parent_reply_id: Option<ReplyId>,
        content: String,
    ) -> ApiResult<Reply>;

    /// `PATCH /replies/{id}`
    async fn update_reply(&self, reply_id: ReplyId, content: String) -> ApiResult<()>;

    /// `DELETE /replies/{id}`
    async fn delete_reply(&self, reply_id: ReplyId) -> ApiResult<()>;

    /// `GET /replies/{id}/nested?maxDepth`
    async fn nested_replies(&self, reply_id: ReplyId, max_depth: u32) -> ApiResult<Vec<Reply>>;

    /// `POST /like`
    async fn toggle_like(&self, likeable_type: LikeableType, likeable_id: i64) -> ApiResult<()>;

    /// `GET /like-status/{type}/{id}`
    async fn like_status(&self, likeable_type: LikeableType, likeable_id: i64) -> ApiResult<LikeStatus>;
}

/// Token handling and identity lookup, used to hydrate a session.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Attach (or drop) the bearer token sent with later requests.
    fn set_session_token(&mut self, token: Option<String>);

    /// `GET /auth/me`
    async fn current_user(&self) -> ApiResult<CurrentUser>;
}
