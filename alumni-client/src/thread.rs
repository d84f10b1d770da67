//! Orchestration of one comment thread page.
//!
//! [`ThreadController`] owns the backend, the query cache, the materialized
//! tree, optimistic like state, the session and the notice queue. Every user
//! action enters here: it is validated locally, applied, sent, and on
//! success the affected cache tags are invalidated and the visible part of
//! the tree is refetched. Failures never leave partial state behind; they
//! come back as a [`ThreadError`] and as an error notice.

use std::collections::HashSet;
use std::time::Duration;

use alumni_types::*;

use crate::api::{Authenticator, CommentBackend};
use crate::auth::Session;
use crate::cache::{CacheStats, Mutation, QueryCache};
use crate::config::ClientConfig;
use crate::error::{categorize_error, ThreadError, ThreadResult};
use crate::likes::LikeRegistry;
use crate::logging::LogConfig;
use crate::notice::Notices;
use crate::tree::{CommentTree, ExpandAction, NodeId, NodeOp, Row};

/// Blocking yes/no prompt shown before destructive actions.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

/// Which actions to offer on a node for the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Affordances {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_reply: bool,
    pub can_like: bool,
}

fn noun(id: NodeId) -> &'static str {
    match id {
        NodeId::Comment(_) => "comment",
        NodeId::Reply(_) => "reply",
    }
}

/// Trim `content`, refusing empty or whitespace-only text.
pub fn validate_content(label: &'static str, content: &str) -> ThreadResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ThreadError::EmptyContent(label));
    }
    Ok(trimmed.to_string())
}

pub struct ThreadController<B: CommentBackend> {
    backend: B,
    cache: QueryCache,
    tree: CommentTree,
    likes: LikeRegistry,
    session: Session,
    notices: Notices,
    config: ClientConfig,
    log_config: LogConfig,
    parent: ParentRef,
    page: u32,
    limit: u32,
    total_items: u64,
    total_pages: u64,
}

impl<B: CommentBackend> ThreadController<B> {
    pub fn new(backend: B, session: Session, parent: ParentRef, config: ClientConfig) -> Self {
        Self {
            backend,
            cache: QueryCache::new(config.cache_capacity),
            tree: CommentTree::new(config.max_depth),
            likes: LikeRegistry::new(),
            session,
            notices: Notices::new(Duration::from_secs(config.notice_ttl_secs)),
            log_config: LogConfig::default(),
            parent,
            page: 1,
            limit: config.page_limit.max(1),
            total_items: 0,
            total_pages: 0,
            config,
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    // Accessors

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tree(&self) -> &CommentTree {
        &self.tree
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut Notices {
        &mut self.notices
    }

    pub fn parent(&self) -> ParentRef {
        self.parent
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn rows(&self) -> Vec<Row<'_>> {
        self.tree.visible_rows()
    }

    /// Like state to display for a node: optimistic if tracked, else as fetched.
    pub fn like_status(&self, id: NodeId) -> Option<LikeStatus> {
        let (likeable_type, likeable_id) = id.likeable();
        self.likes.status(likeable_type, likeable_id).or_else(|| {
            self.tree.get(id).map(|node| LikeStatus {
                like_count: node.like_count,
                is_liked: node.liked,
            })
        })
    }

    pub fn affordances(&self, id: NodeId) -> Affordances {
        let ctx = self.session.user_context();
        let Some(node) = self.tree.get(id) else {
            return Affordances::default();
        };
        let can_modify = ctx.can_modify(id.kind(), node.author_id());
        Affordances {
            can_edit: can_modify,
            can_delete: can_modify,
            can_reply: ctx.is_authenticated() && self.tree.can_reply_under(id),
            can_like: ctx.is_authenticated(),
        }
    }

    // Reads

    /// Load a page of root comments, keeping expansion of nodes that survive.
    pub async fn load_comments(&mut self, page: u32) -> ThreadResult<()> {
        self.page = page.max(1);
        let result = self.fetch_page(false).await;
        self.reported(result)
    }

    /// Force a refetch of the current page ("try again").
    pub async fn reload(&mut self) -> ThreadResult<()> {
        let result = self.fetch_page(true).await;
        self.reported(result)
    }

    async fn fetch_page(&mut self, force: bool) -> ThreadResult<()> {
        let page = self
            .cache
            .comment_page(&self.backend, self.parent, self.page, self.limit, force)
            .await?;

        crate::log_tree!(
            self.log_config,
            "{} page {}: {} comments of {}",
            self.parent,
            self.page,
            page.comments.len(),
            page.total_items
        );
        self.total_items = page.total_items;
        self.total_pages = page.total_pages;
        self.tree.replace_roots(&page.comments);

        for comment in &page.comments {
            self.seed_like(NodeId::Comment(comment.id), comment.like_count, comment.is_liked_by_current_user);
            for reply in comment.replies.iter().flatten() {
                self.seed_like(NodeId::Reply(reply.id), reply.like_count, reply.is_liked_by_current_user);
            }
        }
        Ok(())
    }

    /// Refetch the page and every open nested list, reading through the cache.
    ///
    /// Goes one level at a time: a parent's reload can give an expanded leaf
    /// its first child, and that leaf is only picked up on the next pass.
    pub async fn refresh(&mut self) -> ThreadResult<()> {
        let result = self.fetch_page(false).await;
        self.reported(result)?;

        let mut refreshed = HashSet::new();
        let mut first_error = None;
        loop {
            let pending: Vec<NodeId> = self
                .tree
                .expanded_replies()
                .into_iter()
                .filter(|id| !refreshed.contains(id))
                .collect();
            if pending.is_empty() {
                break;
            }
            for id in pending {
                refreshed.insert(id);
                if let Err(e) = self.load_children(id, false).await {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Expand a node, fetching its children when they live behind the nested endpoint.
    pub async fn expand(&mut self, id: NodeId) -> ThreadResult<()> {
        let action = self.tree.expand(id);
        match self.reported(action)? {
            ExpandAction::Ready => Ok(()),
            ExpandAction::MaxDepthReached => {
                crate::log_tree!(self.log_config, "{} is at the depth limit", id);
                Ok(())
            }
            ExpandAction::Fetch { .. } => self.load_children(id, false).await,
        }
    }

    pub fn collapse(&mut self, id: NodeId) -> ThreadResult<()> {
        let result = self.tree.collapse(id);
        self.reported(result)
    }

    /// Refetch a node's children bypassing the cache.
    pub async fn try_again(&mut self, id: NodeId) -> ThreadResult<()> {
        let action = self.tree.expand(id);
        match self.reported(action)? {
            ExpandAction::Fetch { .. } => self.load_children(id, true).await,
            // Root comments carry their replies in the page
            ExpandAction::Ready if id.kind() == NodeKind::Comment => self.reload().await,
            _ => Ok(()),
        }
    }

    async fn load_children(&mut self, id: NodeId, force: bool) -> ThreadResult<()> {
        let NodeId::Reply(reply_id) = id else {
            return Ok(());
        };
        let remaining_depth = match self.tree.get(id).and_then(|n| n.reply_depth()) {
            Some(depth) if depth < self.tree.max_depth() => self.tree.max_depth() - depth,
            _ => return Ok(()),
        };

        match self
            .cache
            .nested_replies(&self.backend, reply_id, remaining_depth, force)
            .await
        {
            Ok(replies) => {
                crate::log_tree!(self.log_config, "{}: {} children", id, replies.len());
                self.tree.reconcile_children(id, &replies);
                for reply in &replies {
                    self.seed_like(NodeId::Reply(reply.id), reply.like_count, reply.is_liked_by_current_user);
                }
                Ok(())
            }
            Err(e) => {
                let err = ThreadError::from(e);
                self.tree.fail_children(id, categorize_error(&err));
                self.fail(err)
            }
        }
    }

    fn seed_like(&mut self, id: NodeId, like_count: i64, is_liked: bool) {
        let (likeable_type, likeable_id) = id.likeable();
        self.likes
            .seed(likeable_type, likeable_id, LikeStatus { like_count, is_liked });
    }

    // Writes

    pub async fn create_comment(&mut self, content: &str) -> ThreadResult<Comment> {
        let result = self.try_create_comment(content).await;
        self.reported(result)
    }

    async fn try_create_comment(&mut self, content: &str) -> ThreadResult<Comment> {
        self.require_login("comment")?;
        let content = validate_content("Comment", content)?;

        let created = self.backend.create_comment(self.parent, content).await?;
        self.notices.success("Comment posted");
        self.after_mutation(Mutation::CreateComment).await;
        Ok(created)
    }

    /// Reply to a comment, or to one of its replies when `parent_reply_id` is set.
    pub async fn create_reply(
        &mut self,
        comment_id: CommentId,
        parent_reply_id: Option<ReplyId>,
        content: &str,
    ) -> ThreadResult<Reply> {
        let result = self.try_create_reply(comment_id, parent_reply_id, content).await;
        self.reported(result)
    }

    async fn try_create_reply(
        &mut self,
        comment_id: CommentId,
        parent_reply_id: Option<ReplyId>,
        content: &str,
    ) -> ThreadResult<Reply> {
        self.require_login("reply")?;
        let content = validate_content("Reply", content)?;

        let target = parent_reply_id.map_or(NodeId::Comment(comment_id), NodeId::Reply);
        let in_tree = self.tree.get(target).is_some();
        if in_tree {
            if !self.tree.can_reply_under(target) {
                return Err(ThreadError::MaxDepthReached);
            }
            self.tree.begin_op(target, NodeOp::Reply)?;
        }

        let result = self.backend.create_reply(comment_id, parent_reply_id, content).await;
        if in_tree {
            self.tree.finish_op(target, NodeOp::Reply, result.is_ok());
        }
        let created = result?;

        self.notices.success("Reply posted");
        self.after_mutation(Mutation::CreateReply).await;
        if in_tree && !self.tree.get(target).is_some_and(|n| n.expanded) {
            let _ = self.expand(target).await;
        }
        Ok(created)
    }

    pub fn begin_edit(&mut self, id: NodeId) -> ThreadResult<()> {
        let result = self.check_modify(id, "edit").and_then(|_| self.tree.begin_edit(id));
        self.reported(result)
    }

    pub fn set_draft(&mut self, id: NodeId, draft: impl Into<String>) -> ThreadResult<()> {
        let result = self.tree.set_draft(id, draft);
        self.reported(result)
    }

    pub fn cancel_edit(&mut self, id: NodeId) -> ThreadResult<()> {
        let result = self.tree.cancel_edit(id);
        self.reported(result)
    }

    /// Send the draft. Edit mode ends only once the server confirms; on
    /// failure the original content stays and the draft is kept for another try.
    pub async fn submit_edit(&mut self, id: NodeId) -> ThreadResult<()> {
        let result = self.try_submit_edit(id).await;
        self.reported(result)
    }

    async fn try_submit_edit(&mut self, id: NodeId) -> ThreadResult<()> {
        self.check_modify(id, "edit")?;
        let label = match id {
            NodeId::Comment(_) => "Comment",
            NodeId::Reply(_) => "Reply",
        };
        let content = validate_content(label, self.tree.draft(id)?)?;
        self.tree.begin_op(id, NodeOp::Edit)?;

        let (result, mutation) = match id {
            NodeId::Comment(comment_id) => (
                self.backend.update_comment(comment_id, content).await,
                Mutation::UpdateComment,
            ),
            NodeId::Reply(reply_id) => (
                self.backend.update_reply(reply_id, content).await,
                Mutation::UpdateReply,
            ),
        };
        self.tree.finish_op(id, NodeOp::Edit, result.is_ok());
        result?;

        self.notices.success(format!("{} updated", label));
        self.after_mutation(mutation).await;
        Ok(())
    }

    /// Delete after an explicit confirmation. Declining sends nothing.
    pub async fn delete(&mut self, id: NodeId, confirm: &mut dyn Confirm) -> ThreadResult<DeleteOutcome> {
        let result = self.try_delete(id, confirm).await;
        self.reported(result)
    }

    async fn try_delete(&mut self, id: NodeId, confirm: &mut dyn Confirm) -> ThreadResult<DeleteOutcome> {
        self.check_modify(id, "delete")?;
        if self.tree.get(id).is_some_and(|n| n.is_busy(NodeOp::Delete)) {
            return Err(ThreadError::InFlight("delete"));
        }

        let prompt = format!("Are you sure you want to delete this {}?", noun(id));
        if !confirm.confirm(&prompt) {
            crate::log_debug!(self.log_config, "delete of {} cancelled", id);
            return Ok(DeleteOutcome::Cancelled);
        }

        self.tree.begin_op(id, NodeOp::Delete)?;
        let (result, mutation) = match id {
            NodeId::Comment(comment_id) => (
                self.backend.delete_comment(comment_id).await,
                Mutation::DeleteComment,
            ),
            NodeId::Reply(reply_id) => (self.backend.delete_reply(reply_id).await, Mutation::DeleteReply),
        };
        if let Err(e) = result {
            self.tree.finish_op(id, NodeOp::Delete, false);
            return Err(e.into());
        }

        self.tree.remove(id)?;
        self.notices.success(match id {
            NodeId::Comment(_) => "Comment deleted",
            NodeId::Reply(_) => "Reply deleted",
        });
        self.after_mutation(mutation).await;
        Ok(DeleteOutcome::Deleted)
    }

    /// Flip the like state now; restore it exactly if the server refuses.
    pub async fn toggle_like(&mut self, likeable_type: LikeableType, likeable_id: i64) -> ThreadResult<LikeStatus> {
        let result = self.try_toggle_like(likeable_type, likeable_id).await;
        self.reported(result)
    }

    async fn try_toggle_like(&mut self, likeable_type: LikeableType, likeable_id: i64) -> ThreadResult<LikeStatus> {
        let ctx = self.session.user_context();
        if !ctx.is_authenticated() {
            return Err(ThreadError::LoginRequired("like"));
        }

        // Posts and gallery items are not in the tree; start from server state
        if !self.likes.contains(likeable_type, likeable_id) {
            let status = self
                .cache
                .like_status(&self.backend, likeable_type, likeable_id, false)
                .await?;
            self.likes.seed(likeable_type, likeable_id, status);
        }

        let ticket = self.likes.begin_toggle(&ctx, likeable_type, likeable_id)?;
        crate::log_likes!(
            self.log_config,
            "{} {}: {:?} -> {:?}",
            likeable_type.as_str(),
            likeable_id,
            ticket.previous,
            ticket.next
        );

        if let Err(e) = self.backend.toggle_like(likeable_type, likeable_id).await {
            self.likes.finish(&ticket, false);
            crate::log_likes!(self.log_config, "rolled back {} {}", likeable_type.as_str(), likeable_id);
            return Err(e.into());
        }
        self.likes.finish(&ticket, true);
        self.cache.invalidate_for(Mutation::ToggleLike);

        if self.config.reconcile_likes {
            match self
                .cache
                .like_status(&self.backend, likeable_type, likeable_id, false)
                .await
            {
                Ok(status) => {
                    self.likes.reconcile(likeable_type, likeable_id, status);
                }
                Err(e) => log::warn!("Like status refetch failed: {}", e),
            }
        }

        Ok(self
            .likes
            .status(likeable_type, likeable_id)
            .unwrap_or(ticket.next))
    }

    // Helpers

    async fn after_mutation(&mut self, mutation: Mutation) {
        let affected = self.cache.invalidate_for(mutation);
        crate::log_cache!(self.log_config, "{:?} invalidated {} entries", mutation, affected.len());
        // The write went through; a failed refetch is only reported
        let _ = self.refresh().await;
    }

    fn require_login(&self, action: &'static str) -> ThreadResult<()> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(ThreadError::LoginRequired(action))
        }
    }

    fn check_modify(&self, id: NodeId, action: &'static str) -> ThreadResult<()> {
        self.require_login(action)?;
        let node = self.tree.get(id).ok_or(ThreadError::UnknownNode(id))?;
        if self.session.user_context().can_modify(id.kind(), node.author_id()) {
            Ok(())
        } else {
            Err(ThreadError::PermissionDenied {
                action,
                noun: noun(id),
            })
        }
    }

    fn fail<T>(&mut self, error: ThreadError) -> ThreadResult<T> {
        let message = categorize_error(&error);
        crate::log_debug!(self.log_config, "{}", message);
        self.notices.error(message);
        Err(error)
    }

    fn reported<T>(&mut self, result: ThreadResult<T>) -> ThreadResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => self.fail(e),
        }
    }
}

impl<B: CommentBackend + Authenticator> ThreadController<B> {
    /// Sign in; like state and cached reads belonged to the previous identity.
    pub async fn login(&mut self, token: String) -> anyhow::Result<CurrentUser> {
        let user = self.session.login(token, &mut self.backend).await?.clone();
        self.cache.clear();
        self.likes.clear();
        self.notices.success(format!("Logged in as {}", user.name));
        Ok(user)
    }

    pub fn logout(&mut self) -> anyhow::Result<()> {
        self.session.logout(&mut self.backend)?;
        self.cache.clear();
        self.likes.clear();
        self.notices.info("Logged out");
        Ok(())
    }
}
