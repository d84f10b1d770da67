use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use alumni::api::{ApiError, ApiResult, Authenticator, CommentBackend};
use alumni::auth::Session;
use alumni::config::ClientConfig;
use alumni::logging::LogConfig;
use alumni::storage::{MemoryStorageAdapter, StorageAdapter};
use alumni::tree::ChildrenState;
use alumni::{DeleteOutcome, NodeId, RowKind, ThreadController, ThreadError};
use alumni_types::*;

// In-memory stand-in for the portal API

struct StoredComment {
    id: CommentId,
    parent: ParentRef,
    author: UserId,
    content: String,
}

struct StoredReply {
    id: ReplyId,
    comment_id: CommentId,
    parent_reply_id: Option<ReplyId>,
    author: UserId,
    content: String,
}

#[derive(Default)]
struct FakeState {
    comments: Vec<StoredComment>,
    replies: Vec<StoredReply>,
    likes: HashMap<(LikeableType, i64), LikeStatus>,
    next_id: i64,
    calls: HashMap<&'static str, usize>,
    nested_for: Vec<ReplyId>,
    failing: HashSet<&'static str>,
    current_user: Option<CurrentUser>,
    token: Option<String>,
}

impl FakeState {
    fn hit(&mut self, op: &'static str) -> ApiResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.failing.contains(op) {
            return Err(ApiError::Server {
                status: 500,
                message: format!("{} exploded", op),
            });
        }
        Ok(())
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn like(&self, likeable_type: LikeableType, id: i64) -> LikeStatus {
        self.likes.get(&(likeable_type, id)).copied().unwrap_or(LikeStatus {
            like_count: 0,
            is_liked: false,
        })
    }

    fn to_reply(&self, stored: &StoredReply) -> Reply {
        let like = self.like(LikeableType::Reply, stored.id);
        Reply {
            id: stored.id,
            content: stored.content.clone(),
            created_at: timestamp(stored.id),
            user_id: stored.author,
            user: summary(stored.author),
            like_count: like.like_count,
            is_liked_by_current_user: like.is_liked,
            reply_count: self
                .replies
                .iter()
                .filter(|r| r.parent_reply_id == Some(stored.id))
                .count() as i64,
            comment_id: Some(stored.comment_id),
            parent_reply_id: stored.parent_reply_id,
        }
    }

    fn to_comment(&self, stored: &StoredComment) -> Comment {
        let like = self.like(LikeableType::Comment, stored.id);
        let replies: Vec<Reply> = self
            .replies
            .iter()
            .filter(|r| r.comment_id == stored.id && r.parent_reply_id.is_none())
            .map(|r| self.to_reply(r))
            .collect();
        Comment {
            id: stored.id,
            content: stored.content.clone(),
            created_at: timestamp(stored.id),
            user_id: stored.author,
            user: summary(stored.author),
            like_count: like.like_count,
            is_liked_by_current_user: like.is_liked,
            reply_count: replies.len() as i64,
            replies: Some(replies),
        }
    }

    fn author(&self) -> ApiResult<UserId> {
        self.current_user
            .as_ref()
            .map(|u| u.id)
            .ok_or_else(|| ApiError::Unauthorized("Please login".to_string()))
    }
}

#[derive(Clone, Default)]
struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn add_comment(&self, parent: ParentRef, author: UserId) -> CommentId {
        let mut state = self.state();
        let id = state.next_id();
        state.comments.push(StoredComment {
            id,
            parent,
            author,
            content: format!("comment {}", id),
        });
        id
    }

    fn add_reply(&self, comment_id: CommentId, parent_reply_id: Option<ReplyId>, author: UserId) -> ReplyId {
        let mut state = self.state();
        let id = state.next_id();
        state.replies.push(StoredReply {
            id,
            comment_id,
            parent_reply_id,
            author,
            content: format!("reply {}", id),
        });
        id
    }

    fn set_like(&self, likeable_type: LikeableType, id: i64, like_count: i64, is_liked: bool) {
        self.state()
            .likes
            .insert((likeable_type, id), LikeStatus { like_count, is_liked });
    }

    fn fail(&self, op: &'static str) {
        self.state().failing.insert(op);
    }

    fn heal(&self, op: &'static str) {
        self.state().failing.remove(op);
    }

    fn calls(&self, op: &'static str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    fn write_calls(&self) -> usize {
        [
            "create_comment",
            "update_comment",
            "delete_comment",
            "create_reply",
            "update_reply",
            "delete_reply",
        ]
        .iter()
        .map(|op| self.calls(op))
        .sum()
    }
}

#[async_trait]
impl CommentBackend for FakeBackend {
    async fn list_comments(&self, parent: ParentRef, page: u32, limit: u32) -> ApiResult<CommentPage> {
        let mut state = self.state();
        state.hit("list_comments")?;

        let mut roots: Vec<&StoredComment> = state.comments.iter().filter(|c| c.parent == parent).collect();
        roots.sort_by(|a, b| b.id.cmp(&a.id));
        let total_items = roots.len() as u64;
        let start = ((page.max(1) - 1) * limit) as usize;
        let comments = roots
            .iter()
            .skip(start)
            .take(limit as usize)
            .map(|c| state.to_comment(c))
            .collect();

        Ok(CommentPage {
            comments,
            total_items,
            total_pages: CommentPage::pages_for(total_items, limit),
        })
    }

    async fn create_comment(&self, parent: ParentRef, content: String) -> ApiResult<Comment> {
        let mut state = self.state();
        state.hit("create_comment")?;
        let author = state.author()?;
        let id = state.next_id();
        state.comments.push(StoredComment {
            id,
            parent,
            author,
            content,
        });
        let stored = state.comments.last().unwrap();
        Ok(state.to_comment(stored))
    }

    async fn update_comment(&self, comment_id: CommentId, content: String) -> ApiResult<()> {
        let mut state = self.state();
        state.hit("update_comment")?;
        let comment = state
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;
        comment.content = content;
        Ok(())
    }

    async fn delete_comment(&self, comment_id: CommentId) -> ApiResult<()> {
        let mut state = self.state();
        state.hit("delete_comment")?;
        state.comments.retain(|c| c.id != comment_id);
        state.replies.retain(|r| r.comment_id != comment_id);
        Ok(())
    }

    async fn create_reply(
        &self,
        comment_id: CommentId,
        parent_reply_id: Option<ReplyId>,
        content: String,
    ) -> ApiResult<Reply> {
        let mut state = self.state();
        state.hit("create_reply")?;
        let author = state.author()?;
        if !state.comments.iter().any(|c| c.id == comment_id) {
            return Err(ApiError::NotFound("Comment not found".to_string()));
        }
        let id = state.next_id();
        state.replies.push(StoredReply {
            id,
            comment_id,
            parent_reply_id,
            author,
            content,
        });
        let stored = state.replies.last().unwrap();
        Ok(state.to_reply(stored))
    }

    async fn update_reply(&self, reply_id: ReplyId, content: String) -> ApiResult<()> {
        let mut state = self.state();
        state.hit("update_reply")?;
        let reply = state
            .replies
            .iter_mut()
            .find(|r| r.id == reply_id)
            .ok_or_else(|| ApiError::NotFound("Reply not found".to_string()))?;
        reply.content = content;
        Ok(())
    }

    async fn delete_reply(&self, reply_id: ReplyId) -> ApiResult<()> {
        let mut state = self.state();
        state.hit("delete_reply")?;
        state.replies.retain(|r| r.id != reply_id);
        Ok(())
    }

    async fn nested_replies(&self, reply_id: ReplyId, _max_depth: u32) -> ApiResult<Vec<Reply>> {
        let mut state = self.state();
        state.hit("nested_replies")?;
        state.nested_for.push(reply_id);
        Ok(state
            .replies
            .iter()
            .filter(|r| r.parent_reply_id == Some(reply_id))
            .map(|r| state.to_reply(r))
            .collect())
    }

    async fn toggle_like(&self, likeable_type: LikeableType, likeable_id: i64) -> ApiResult<()> {
        let mut state = self.state();
        state.hit("toggle_like")?;
        let current = state.like(likeable_type, likeable_id);
        let next = if current.is_liked {
            LikeStatus {
                like_count: (current.like_count - 1).max(0),
                is_liked: false,
            }
        } else {
            LikeStatus {
                like_count: current.like_count + 1,
                is_liked: true,
            }
        };
        state.likes.insert((likeable_type, likeable_id), next);
        Ok(())
    }

    async fn like_status(&self, likeable_type: LikeableType, likeable_id: i64) -> ApiResult<LikeStatus> {
        let mut state = self.state();
        state.hit("like_status")?;
        Ok(state.like(likeable_type, likeable_id))
    }
}

#[async_trait]
impl Authenticator for FakeBackend {
    fn set_session_token(&mut self, token: Option<String>) {
        self.state().token = token;
    }

    async fn current_user(&self) -> ApiResult<CurrentUser> {
        let mut state = self.state();
        state.hit("current_user")?;
        match (&state.token, &state.current_user) {
            (Some(_), Some(user)) => Ok(user.clone()),
            _ => Err(ApiError::Unauthorized("Invalid session".to_string())),
        }
    }
}

// Helpers

fn timestamp(id: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(id)
}

fn summary(id: UserId) -> UserSummary {
    UserSummary {
        id,
        name: format!("alumnus {}", id),
        profile_photo: None,
    }
}

fn member(id: UserId, role: Role) -> CurrentUser {
    CurrentUser {
        id,
        name: format!("alumnus {}", id),
        role,
        profile_photo: None,
    }
}

fn post() -> ParentRef {
    ParentRef::new(ParentType::Post, 1)
}

async fn controller_with(
    backend: &FakeBackend,
    user: Option<CurrentUser>,
    config: ClientConfig,
) -> ThreadController<FakeBackend> {
    let mut backend = backend.clone();
    backend.state().current_user = user.clone();
    let storage: Box<dyn StorageAdapter> = match user {
        Some(_) => Box::new(MemoryStorageAdapter::with_token("test-session-token")),
        None => Box::new(MemoryStorageAdapter::new()),
    };
    let session = Session::hydrate(storage, &mut backend).await.unwrap();
    ThreadController::new(backend, session, post(), config).with_log_config(LogConfig::disabled())
}

async fn controller_as(backend: &FakeBackend, user: Option<CurrentUser>) -> ThreadController<FakeBackend> {
    controller_with(backend, user, ClientConfig::default()).await
}

fn last_notice(controller: &ThreadController<FakeBackend>) -> String {
    controller
        .notices()
        .latest()
        .map(|n| n.message.clone())
        .unwrap_or_default()
}

/// comment -> r0 -> r1 -> r2 -> r3 -> r4, returning (comment, [r0..r4])
fn deep_chain(backend: &FakeBackend) -> (CommentId, Vec<ReplyId>) {
    let comment = backend.add_comment(post(), 1);
    let mut replies = Vec::new();
    let mut parent = None;
    for _ in 0..5 {
        let id = backend.add_reply(comment, parent, 1);
        replies.push(id);
        parent = Some(id);
    }
    (comment, replies)
}

// Validation and auth

#[tokio::test]
async fn test_empty_comment_rejected_without_request() {
    let backend = FakeBackend::default();
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;

    let err = controller.create_comment("   \n\t").await.unwrap_err();

    assert!(matches!(err, ThreadError::EmptyContent("Comment")));
    assert_eq!(backend.calls("create_comment"), 0);
    assert_eq!(last_notice(&controller), "Validation Error: Comment cannot be empty");
}

#[tokio::test]
async fn test_empty_edit_rejected_without_request() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 1);
    let reply = backend.add_reply(comment, None, 1);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();

    let id = NodeId::Reply(reply);
    controller.begin_edit(id).unwrap();
    controller.set_draft(id, "  ").unwrap();
    let err = controller.submit_edit(id).await.unwrap_err();

    assert!(matches!(err, ThreadError::EmptyContent("Reply")));
    assert_eq!(backend.calls("update_reply"), 0);
    assert!(controller.tree().get(id).unwrap().is_editing());
}

#[tokio::test]
async fn test_anonymous_reply_requires_login() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 1);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();

    let err = controller.create_reply(comment, None, "hello").await.unwrap_err();

    assert!(matches!(err, ThreadError::LoginRequired("reply")));
    assert_eq!(backend.calls("create_reply"), 0);
    assert!(last_notice(&controller).starts_with("Authentication Required:"));
}

// Pagination and caching

#[tokio::test]
async fn test_pagination_counts_and_past_the_end() {
    let backend = FakeBackend::default();
    for _ in 0..23 {
        backend.add_comment(post(), 1);
    }
    let mut controller = controller_as(&backend, None).await;

    controller.load_comments(1).await.unwrap();
    assert_eq!(controller.total_items(), 23);
    assert_eq!(controller.total_pages(), 3);
    assert_eq!(controller.tree().roots().len(), 10);
    // Newest first
    assert_eq!(controller.tree().roots()[0], NodeId::Comment(23));

    controller.load_comments(3).await.unwrap();
    assert_eq!(controller.tree().roots().len(), 3);

    controller.load_comments(4).await.unwrap();
    assert!(controller.tree().roots().is_empty());
    assert_eq!(controller.page(), 4);
}

#[tokio::test]
async fn test_repeated_reads_are_served_from_cache() {
    let backend = FakeBackend::default();
    backend.add_comment(post(), 1);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;

    controller.load_comments(1).await.unwrap();
    controller.load_comments(1).await.unwrap();
    assert_eq!(backend.calls("list_comments"), 1);

    // A write invalidates the comment tag and the page refetches
    controller.create_comment("Great photos!").await.unwrap();
    assert_eq!(backend.calls("list_comments"), 2);
    assert_eq!(controller.tree().roots().len(), 2);
}

// Tree expansion

#[tokio::test]
async fn test_max_depth_reply_is_never_fetched() {
    let backend = FakeBackend::default();
    let (comment, replies) = deep_chain(&backend);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();

    controller.expand(NodeId::Comment(comment)).await.unwrap();
    for id in &replies[..4] {
        controller.expand(NodeId::Reply(*id)).await.unwrap();
    }

    // replies[3] sits at depth 3 and has one child server-side
    assert_eq!(backend.state().nested_for, vec![replies[0], replies[1], replies[2]]);
    let rows = controller.rows();
    let last = rows.last().unwrap();
    assert_eq!(last.node.id, NodeId::Reply(replies[3]));
    assert_eq!(last.kind, RowKind::MaxDepthReached);
    assert!(controller.tree().get(NodeId::Reply(replies[4])).is_none());
}

#[tokio::test]
async fn test_collapse_and_reexpand_reuses_cached_children() {
    let backend = FakeBackend::default();
    let (comment, replies) = deep_chain(&backend);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();
    controller.expand(NodeId::Comment(comment)).await.unwrap();

    controller.expand(NodeId::Reply(replies[0])).await.unwrap();
    controller.collapse(NodeId::Reply(replies[0])).unwrap();
    controller.expand(NodeId::Reply(replies[0])).await.unwrap();

    assert_eq!(backend.calls("nested_replies"), 1);
    assert_eq!(controller.rows().len(), 3);
}

#[tokio::test]
async fn test_failed_nested_fetch_then_try_again() {
    let backend = FakeBackend::default();
    let (comment, replies) = deep_chain(&backend);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();
    controller.expand(NodeId::Comment(comment)).await.unwrap();

    backend.fail("nested_replies");
    let err = controller.expand(NodeId::Reply(replies[0])).await.unwrap_err();
    assert!(matches!(err, ThreadError::Api(ApiError::Server { status: 500, .. })));
    let rows = controller.rows();
    assert!(matches!(rows.last().unwrap().kind, RowKind::Failed(_)));
    drop(rows);

    backend.heal("nested_replies");
    controller.try_again(NodeId::Reply(replies[0])).await.unwrap();

    let node = controller.tree().get(NodeId::Reply(replies[0])).unwrap();
    assert_eq!(node.children_state, ChildrenState::Loaded);
    assert_eq!(node.children, vec![NodeId::Reply(replies[1])]);
}

#[tokio::test]
async fn test_reload_keeps_expanded_branches() {
    let backend = FakeBackend::default();
    let (comment, replies) = deep_chain(&backend);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();
    controller.expand(NodeId::Comment(comment)).await.unwrap();
    controller.expand(NodeId::Reply(replies[0])).await.unwrap();

    controller.reload().await.unwrap();

    assert!(controller.tree().get(NodeId::Reply(replies[0])).unwrap().expanded);
    assert!(controller.tree().get(NodeId::Reply(replies[1])).is_some());
    assert_eq!(backend.calls("list_comments"), 2);
}

// Replies

#[tokio::test]
async fn test_reply_to_comment_increments_reply_count() {
    let backend = FakeBackend::default();
    for _ in 0..4 {
        backend.add_comment(post(), 2);
    }
    let comment = backend.add_comment(post(), 2);
    assert_eq!(comment, 5);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    assert_eq!(controller.tree().get(NodeId::Comment(5)).unwrap().reply_count, 0);

    let reply = controller.create_reply(5, None, "hi").await.unwrap();

    assert_eq!(reply.content, "hi");
    assert_eq!(reply.parent_reply_id, None);
    let node = controller.tree().get(NodeId::Comment(5)).unwrap();
    assert_eq!(node.reply_count, 1);
    assert!(node.children.contains(&NodeId::Reply(reply.id)));
    assert_eq!(last_notice(&controller), "Reply posted");
}

#[tokio::test]
async fn test_reply_under_expanded_leaf_appears() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let r0 = backend.add_reply(comment, None, 2);
    let r1 = backend.add_reply(comment, Some(r0), 2);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    controller.expand(NodeId::Comment(comment)).await.unwrap();
    controller.expand(NodeId::Reply(r0)).await.unwrap();
    controller.expand(NodeId::Reply(r1)).await.unwrap();

    let reply = controller.create_reply(comment, Some(r1), "nested hi").await.unwrap();

    let leaf = controller.tree().get(NodeId::Reply(r1)).unwrap();
    assert_eq!(leaf.reply_count, 1);
    assert!(leaf.expanded);
    assert_eq!(leaf.children, vec![NodeId::Reply(reply.id)]);
    let visible: Vec<NodeId> = controller.rows().iter().map(|row| row.node.id).collect();
    assert_eq!(
        visible,
        vec![
            NodeId::Comment(comment),
            NodeId::Reply(r0),
            NodeId::Reply(r1),
            NodeId::Reply(reply.id)
        ]
    );
}

#[tokio::test]
async fn test_reply_below_max_depth_is_refused_locally() {
    let backend = FakeBackend::default();
    let (comment, replies) = deep_chain(&backend);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    controller.expand(NodeId::Comment(comment)).await.unwrap();
    for id in &replies[..3] {
        controller.expand(NodeId::Reply(*id)).await.unwrap();
    }

    let err = controller
        .create_reply(comment, Some(replies[3]), "too deep")
        .await
        .unwrap_err();

    assert!(matches!(err, ThreadError::MaxDepthReached));
    assert_eq!(backend.calls("create_reply"), 0);
    assert!(!controller.affordances(NodeId::Reply(replies[3])).can_reply);
    assert!(controller.affordances(NodeId::Reply(replies[2])).can_reply);
}

// Edit and delete

#[tokio::test]
async fn test_edit_commits_after_server_confirms() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 1);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();

    let id = NodeId::Comment(comment);
    controller.begin_edit(id).unwrap();
    controller.set_draft(id, "See you at the reunion").unwrap();
    controller.submit_edit(id).await.unwrap();

    let node = controller.tree().get(id).unwrap();
    assert!(!node.is_editing());
    assert_eq!(node.content, "See you at the reunion");
}

#[tokio::test]
async fn test_failed_edit_keeps_original_and_edit_mode() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 1);
    let reply = backend.add_reply(comment, None, 1);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    backend.fail("update_reply");

    let id = NodeId::Reply(reply);
    controller.begin_edit(id).unwrap();
    controller.set_draft(id, "new text").unwrap();
    controller.submit_edit(id).await.unwrap_err();

    let node = controller.tree().get(id).unwrap();
    assert_eq!(node.content, format!("reply {}", reply));
    assert!(node.is_editing());
    assert_eq!(controller.tree().draft(id).unwrap(), "new text");
    assert!(last_notice(&controller).starts_with("Server Error:"));
}

#[tokio::test]
async fn test_declined_delete_sends_nothing() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 1);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();

    let outcome = controller
        .delete(NodeId::Comment(comment), &mut |_: &str| false)
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert_eq!(backend.write_calls(), 0);
    assert!(controller.tree().get(NodeId::Comment(comment)).is_some());
}

#[tokio::test]
async fn test_confirmed_delete_removes_subtree() {
    let backend = FakeBackend::default();
    let (comment, replies) = deep_chain(&backend);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    controller.expand(NodeId::Comment(comment)).await.unwrap();
    controller.expand(NodeId::Reply(replies[0])).await.unwrap();

    let mut prompts = Vec::new();
    let outcome = controller
        .delete(NodeId::Reply(replies[0]), &mut |p: &str| {
            prompts.push(p.to_string());
            true
        })
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert_eq!(prompts, vec!["Are you sure you want to delete this reply?".to_string()]);
    assert!(controller.tree().get(NodeId::Reply(replies[0])).is_none());
    assert!(controller.tree().get(NodeId::Reply(replies[1])).is_none());
    assert_eq!(controller.tree().get(NodeId::Comment(comment)).unwrap().reply_count, 0);
}

#[tokio::test]
async fn test_failed_delete_keeps_node() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 1);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    backend.fail("delete_comment");

    controller
        .delete(NodeId::Comment(comment), &mut |_: &str| true)
        .await
        .unwrap_err();

    assert!(controller.tree().get(NodeId::Comment(comment)).is_some());
    assert_eq!(last_notice(&controller), "Server Error: delete_comment exploded");
    // The gate is released after a failure
    backend.heal("delete_comment");
    let outcome = controller
        .delete(NodeId::Comment(comment), &mut |_: &str| true)
        .await
        .unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted);
}

// Permissions

#[tokio::test]
async fn test_stranger_gets_no_edit_or_delete_on_reply() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let reply = backend.add_reply(comment, None, 2);
    let mut controller = controller_as(&backend, Some(member(3, Role::User))).await;
    controller.load_comments(1).await.unwrap();

    let affordances = controller.affordances(NodeId::Reply(reply));
    assert!(!affordances.can_edit);
    assert!(!affordances.can_delete);
    assert!(affordances.can_reply);
    assert!(affordances.can_like);

    let err = controller.begin_edit(NodeId::Reply(reply)).unwrap_err();
    assert!(matches!(
        err,
        ThreadError::PermissionDenied {
            action: "edit",
            noun: "reply"
        }
    ));
    assert_eq!(
        last_notice(&controller),
        "Permission Error: You do not have permission to edit this reply"
    );
}

#[tokio::test]
async fn test_moderator_acts_on_comments_only() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let reply = backend.add_reply(comment, None, 2);
    let mut controller = controller_as(&backend, Some(member(3, Role::Moderator))).await;
    controller.load_comments(1).await.unwrap();

    assert!(controller.affordances(NodeId::Comment(comment)).can_delete);
    assert!(!controller.affordances(NodeId::Reply(reply)).can_delete);
}

#[tokio::test]
async fn test_admins_act_on_everything() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let reply = backend.add_reply(comment, None, 2);

    for role in [Role::Admin, Role::SuperAdmin] {
        let mut controller = controller_as(&backend, Some(member(3, role))).await;
        controller.load_comments(1).await.unwrap();
        assert!(controller.affordances(NodeId::Comment(comment)).can_edit);
        assert!(controller.affordances(NodeId::Reply(reply)).can_edit);
    }
}

#[tokio::test]
async fn test_anonymous_gets_no_affordances() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();

    let affordances = controller.affordances(NodeId::Comment(comment));
    assert_eq!(affordances, Default::default());
}

// Likes

#[tokio::test]
async fn test_double_toggle_restores_like_state() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    backend.set_like(LikeableType::Comment, comment, 3, false);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();

    let first = controller.toggle_like(LikeableType::Comment, comment).await.unwrap();
    assert_eq!(first, LikeStatus { like_count: 4, is_liked: true });

    let second = controller.toggle_like(LikeableType::Comment, comment).await.unwrap();
    assert_eq!(second, LikeStatus { like_count: 3, is_liked: false });
    assert_eq!(controller.like_status(NodeId::Comment(comment)), Some(second));
    assert_eq!(backend.calls("toggle_like"), 2);
}

#[tokio::test]
async fn test_failed_toggle_rolls_back() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let reply = backend.add_reply(comment, None, 2);
    backend.set_like(LikeableType::Reply, reply, 7, true);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    backend.fail("toggle_like");

    controller.toggle_like(LikeableType::Reply, reply).await.unwrap_err();

    assert_eq!(
        controller.like_status(NodeId::Reply(reply)),
        Some(LikeStatus { like_count: 7, is_liked: true })
    );
    assert!(last_notice(&controller).starts_with("Server Error:"));
}

#[tokio::test]
async fn test_anonymous_like_is_refused() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let mut controller = controller_as(&backend, None).await;
    controller.load_comments(1).await.unwrap();

    let err = controller.toggle_like(LikeableType::Comment, comment).await.unwrap_err();

    assert!(matches!(err, ThreadError::LoginRequired("like")));
    assert_eq!(backend.calls("toggle_like"), 0);
    assert_eq!(last_notice(&controller), "Authentication Required: Please login to like");
}

#[tokio::test]
async fn test_committed_like_survives_cached_page_read() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();

    controller.toggle_like(LikeableType::Comment, comment).await.unwrap();
    // Page is still cached with the pre-toggle count
    controller.load_comments(1).await.unwrap();

    assert_eq!(backend.calls("list_comments"), 1);
    assert_eq!(
        controller.like_status(NodeId::Comment(comment)),
        Some(LikeStatus { like_count: 1, is_liked: true })
    );
}

#[tokio::test]
async fn test_like_reconciliation_is_opt_in() {
    let backend = FakeBackend::default();
    let comment = backend.add_comment(post(), 2);

    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
    controller.load_comments(1).await.unwrap();
    controller.toggle_like(LikeableType::Comment, comment).await.unwrap();
    assert_eq!(backend.calls("like_status"), 0);

    let config = ClientConfig {
        reconcile_likes: true,
        ..ClientConfig::default()
    };
    let mut controller = controller_with(&backend, Some(member(1, Role::User)), config).await;
    controller.load_comments(1).await.unwrap();
    let status = controller.toggle_like(LikeableType::Comment, comment).await.unwrap();

    assert_eq!(backend.calls("like_status"), 1);
    assert_eq!(status, LikeStatus { like_count: 0, is_liked: false });
}

#[tokio::test]
async fn test_like_on_untracked_post_starts_from_server_state() {
    let backend = FakeBackend::default();
    backend.set_like(LikeableType::Post, 1, 10, false);
    let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;

    let status = controller.toggle_like(LikeableType::Post, 1).await.unwrap();

    assert_eq!(status, LikeStatus { like_count: 11, is_liked: true });
    assert_eq!(backend.calls("like_status"), 1);
}

// Session

#[tokio::test]
async fn test_login_and_logout_through_controller() {
    let backend = FakeBackend::default();
    let mut controller = controller_as(&backend, None).await;
    assert!(!controller.session().is_authenticated());

    backend.state().current_user = Some(member(4, Role::Admin));
    let user = controller.login("fresh-session-token".to_string()).await.unwrap();
    assert_eq!(user.role, Role::Admin);
    assert!(controller.session().is_authenticated());
    assert_eq!(controller.session().token(), Some("fresh-session-token"));

    controller.logout().unwrap();
    assert!(!controller.session().is_authenticated());
    assert_eq!(backend.state().token, None);
}

// Properties

mod properties {
    use super::*;
    use alumni::likes::toggled;
    use proptest::prelude::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn prop_whitespace_content_never_reaches_server(content in "[ \t\n\r]{0,24}") {
            let backend = FakeBackend::default();
            let comment = backend.add_comment(post(), 1);

            let (comment_err, reply_err) = runtime().block_on(async {
                let mut controller = controller_as(&backend, Some(member(1, Role::User))).await;
                controller.load_comments(1).await.unwrap();
                let comment_err = controller.create_comment(&content).await.unwrap_err();
                let reply_err = controller.create_reply(comment, None, &content).await.unwrap_err();
                (comment_err, reply_err)
            });

            prop_assert!(matches!(comment_err, ThreadError::EmptyContent(_)));
            prop_assert!(matches!(reply_err, ThreadError::EmptyContent(_)));
            prop_assert_eq!(backend.write_calls(), 0);
        }

        #[test]
        fn prop_double_toggle_is_identity(like_count in 0i64..10_000, is_liked in any::<bool>()) {
            // A liked item always counts at least its own like
            let like_count = if is_liked { like_count.max(1) } else { like_count };
            let start = LikeStatus { like_count, is_liked };

            let once = toggled(start);
            prop_assert!(once.like_count >= 0);
            prop_assert_ne!(once.is_liked, start.is_liked);
            prop_assert_eq!(toggled(once), start);
        }
    }
}
