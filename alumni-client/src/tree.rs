//! Materialized portion of a page of comment threads.
//!
//! Nodes live in a flat arena keyed by [`NodeId`]; parent/child links are id
//! references. Only branches the user expanded are ever fetched, and
//! collapsing keeps what was fetched.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;

use alumni_types::*;

use crate::error::{ThreadError, ThreadResult};
use crate::optimistic::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Comment(CommentId),
    Reply(ReplyId),
}

impl NodeId {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeId::Comment(_) => NodeKind::Comment,
            NodeId::Reply(_) => NodeKind::Reply,
        }
    }

    pub fn raw(&self) -> i64 {
        match self {
            NodeId::Comment(id) | NodeId::Reply(id) => *id,
        }
    }

    pub fn likeable(&self) -> (LikeableType, i64) {
        match self {
            NodeId::Comment(id) => (LikeableType::Comment, *id),
            NodeId::Reply(id) => (LikeableType::Reply, *id),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Comment(id) => write!(f, "Comment {}", id),
            NodeId::Reply(id) => write!(f, "Reply {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildrenState {
    NotLoaded,
    Loading,
    Loaded,
    Failed(String),
}

/// Per-node mutations that are gated while in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOp {
    Edit,
    Delete,
    Reply,
}

impl NodeOp {
    fn label(&self) -> &'static str {
        match self {
            NodeOp::Edit => "edit",
            NodeOp::Delete => "delete",
            NodeOp::Reply => "reply",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub draft: String,
    pub phase: Phase,
}

#[derive(Debug, Clone)]
pub struct ThreadNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub root: CommentId,
    /// 0 for a root comment, 1 for a direct reply, and so on
    pub level: u32,
    pub author: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub like_count: i64,
    pub liked: bool,
    pub reply_count: i64,
    pub children: Vec<NodeId>,
    pub children_state: ChildrenState,
    pub expanded: bool,
    pub edit: Option<EditSession>,
    pub delete_phase: Phase,
    pub reply_phase: Phase,
}

impl ThreadNode {
    fn from_comment(comment: &Comment) -> Self {
        Self {
            id: NodeId::Comment(comment.id),
            parent: None,
            root: comment.id,
            level: 0,
            author: comment.user.clone(),
            content: comment.content.clone(),
            created_at: comment.created_at,
            like_count: comment.like_count,
            liked: comment.is_liked_by_current_user,
            reply_count: comment.reply_count,
            children: Vec::new(),
            children_state: ChildrenState::NotLoaded,
            expanded: false,
            edit: None,
            delete_phase: Phase::Idle,
            reply_phase: Phase::Idle,
        }
    }

    fn from_reply(reply: &Reply, parent: &ThreadNode) -> Self {
        Self {
            id: NodeId::Reply(reply.id),
            parent: Some(parent.id),
            root: parent.root,
            level: parent.level + 1,
            author: reply.user.clone(),
            content: reply.content.clone(),
            created_at: reply.created_at,
            like_count: reply.like_count,
            liked: reply.is_liked_by_current_user,
            reply_count: reply.reply_count,
            children: Vec::new(),
            children_state: if reply.reply_count == 0 {
                ChildrenState::Loaded
            } else {
                ChildrenState::NotLoaded
            },
            expanded: false,
            edit: None,
            delete_phase: Phase::Idle,
            reply_phase: Phase::Idle,
        }
    }

    /// Take server fields from `fresh`, keep expansion, children and edit state.
    fn refresh_from(&mut self, fresh: ThreadNode) {
        self.parent = fresh.parent;
        self.root = fresh.root;
        self.level = fresh.level;
        self.author = fresh.author;
        self.content = fresh.content;
        self.created_at = fresh.created_at;
        self.like_count = fresh.like_count;
        self.liked = fresh.liked;
        self.reply_count = fresh.reply_count;
    }

    pub fn author_id(&self) -> UserId {
        self.author.id
    }

    /// Depth as a reply (0 = direct reply to the comment); None for the comment itself.
    pub fn reply_depth(&self) -> Option<u32> {
        match self.id {
            NodeId::Comment(_) => None,
            NodeId::Reply(_) => Some(self.level.saturating_sub(1)),
        }
    }

    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    fn phase_mut(&mut self, op: NodeOp) -> Option<&mut Phase> {
        match op {
            NodeOp::Edit => self.edit.as_mut().map(|e| &mut e.phase),
            NodeOp::Delete => Some(&mut self.delete_phase),
            NodeOp::Reply => Some(&mut self.reply_phase),
        }
    }

    pub fn is_busy(&self, op: NodeOp) -> bool {
        match op {
            NodeOp::Edit => self.edit.as_ref().is_some_and(|e| e.phase.is_pending()),
            NodeOp::Delete => self.delete_phase.is_pending(),
            NodeOp::Reply => self.reply_phase.is_pending(),
        }
    }
}

/// What the caller must do after expanding a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandAction {
    /// Nothing to fetch
    Ready,
    /// Fetch the direct children of `reply_id`
    Fetch { reply_id: ReplyId, remaining_depth: u32 },
    /// Children exist server-side but are beyond the depth limit
    MaxDepthReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    Node,
    Loading,
    Failed(String),
    MaxDepthReached,
}

/// One line of the flattened thread. Marker rows point at the node they belong to.
#[derive(Debug, Clone)]
pub struct Row<'a> {
    pub node: &'a ThreadNode,
    pub level: u32,
    pub kind: RowKind,
}

pub struct CommentTree {
    nodes: HashMap<NodeId, ThreadNode>,
    roots: Vec<NodeId>,
    max_depth: u32,
}

impl CommentTree {
    pub fn new(max_depth: u32) -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn get(&self, id: NodeId) -> Option<&ThreadNode> {
        self.nodes.get(&id)
    }

    fn node_mut(&mut self, id: NodeId) -> ThreadResult<&mut ThreadNode> {
        self.nodes.get_mut(&id).ok_or(ThreadError::UnknownNode(id))
    }

    fn node(&self, id: NodeId) -> ThreadResult<&ThreadNode> {
        self.nodes.get(&id).ok_or(ThreadError::UnknownNode(id))
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ThreadNode> {
        self.nodes.values()
    }

    /// Replies may be created under a comment, or under a reply above the depth limit.
    pub fn can_reply_under(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|node| node.reply_depth().map_or(true, |d| d < self.max_depth))
    }

    /// Install a freshly fetched page of root comments.
    ///
    /// Nodes that are still present keep their expansion, edit state and
    /// fetched subtrees; nodes that disappeared are dropped with their subtrees.
    pub fn replace_roots(&mut self, comments: &[Comment]) {
        let fresh_ids: HashSet<NodeId> = comments.iter().map(|c| NodeId::Comment(c.id)).collect();
        let stale: Vec<NodeId> = self
            .roots
            .iter()
            .filter(|id| !fresh_ids.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.remove_subtree(id);
        }

        self.roots.clear();
        for comment in comments {
            let fresh = ThreadNode::from_comment(comment);
            let id = fresh.id;
            match self.nodes.get_mut(&id) {
                Some(existing) => existing.refresh_from(fresh),
                None => {
                    self.nodes.insert(id, fresh);
                }
            }
            self.roots.push(id);

            match &comment.replies {
                Some(replies) => self.reconcile_children(id, replies),
                None if comment.reply_count == 0 => self.reconcile_children(id, &[]),
                None => {}
            }
        }
    }

    /// Replace the children of `parent` with `replies`, keeping the state of
    /// children that survive. Entries addressed to some other parent are skipped.
    pub fn reconcile_children(&mut self, parent: NodeId, replies: &[Reply]) {
        let Some(parent_node) = self.nodes.get(&parent) else {
            log::debug!(target: "tree", "dropping children for unknown {}", parent);
            return;
        };
        let parent_node = parent_node.clone();

        let direct: Vec<&Reply> = replies
            .iter()
            .filter(|r| match parent {
                NodeId::Comment(_) => r.parent_reply_id.is_none(),
                NodeId::Reply(id) => r.parent_reply_id.map_or(true, |p| p == id),
            })
            .collect();
        if direct.len() != replies.len() {
            log::debug!(
                target: "tree",
                "{}: ignored {} replies addressed to other parents",
                parent,
                replies.len() - direct.len()
            );
        }

        let fresh_ids: HashSet<NodeId> = direct.iter().map(|r| NodeId::Reply(r.id)).collect();
        let gone: Vec<NodeId> = parent_node
            .children
            .iter()
            .filter(|id| !fresh_ids.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.remove_subtree(id);
        }

        let mut children = Vec::with_capacity(direct.len());
        for reply in direct {
            let fresh = ThreadNode::from_reply(reply, &parent_node);
            let id = fresh.id;
            match self.nodes.get_mut(&id) {
                Some(existing) => existing.refresh_from(fresh),
                None => {
                    self.nodes.insert(id, fresh);
                }
            }
            children.push(id);
        }

        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children = children;
            node.children_state = ChildrenState::Loaded;
        }
    }

    /// Expand a node and report whether its children must be fetched.
    pub fn expand(&mut self, id: NodeId) -> ThreadResult<ExpandAction> {
        let max_depth = self.max_depth;
        let node = self.node_mut(id)?;
        node.expanded = true;

        let Some(depth) = node.reply_depth() else {
            return Ok(ExpandAction::Ready);
        };
        if depth >= max_depth {
            return Ok(ExpandAction::MaxDepthReached);
        }
        if node.reply_count == 0 && node.children.is_empty() {
            node.children_state = ChildrenState::Loaded;
            return Ok(ExpandAction::Ready);
        }
        if node.children_state != ChildrenState::Loaded {
            node.children_state = ChildrenState::Loading;
        }
        Ok(ExpandAction::Fetch {
            reply_id: id.raw(),
            remaining_depth: max_depth - depth,
        })
    }

    /// Collapse without discarding anything fetched.
    pub fn collapse(&mut self, id: NodeId) -> ThreadResult<()> {
        self.node_mut(id)?.expanded = false;
        Ok(())
    }

    /// Record a failed child fetch. Children fetched earlier are kept.
    pub fn fail_children(&mut self, id: NodeId, message: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.children.is_empty() {
                node.children_state = ChildrenState::Failed(message.into());
            } else {
                node.children_state = ChildrenState::Loaded;
            }
        }
    }

    /// Remove a node and everything under it.
    pub fn remove(&mut self, id: NodeId) -> ThreadResult<()> {
        let parent = self.node(id)?.parent;
        match parent {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|c| *c != id);
                    parent.reply_count = (parent.reply_count - 1).max(0);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
        self.remove_subtree(id);
        Ok(())
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }

    // Edit mode

    pub fn begin_edit(&mut self, id: NodeId) -> ThreadResult<()> {
        let node = self.node_mut(id)?;
        if node.edit.is_none() {
            node.edit = Some(EditSession {
                draft: node.content.clone(),
                phase: Phase::Idle,
            });
        }
        Ok(())
    }

    pub fn set_draft(&mut self, id: NodeId, draft: impl Into<String>) -> ThreadResult<()> {
        let node = self.node_mut(id)?;
        match node.edit.as_mut() {
            Some(edit) if !edit.phase.is_pending() => {
                edit.draft = draft.into();
                Ok(())
            }
            Some(_) => Err(ThreadError::InFlight("edit")),
            None => Err(ThreadError::NotEditing(id)),
        }
    }

    pub fn cancel_edit(&mut self, id: NodeId) -> ThreadResult<()> {
        let node = self.node_mut(id)?;
        if node.is_busy(NodeOp::Edit) {
            return Err(ThreadError::InFlight("edit"));
        }
        node.edit = None;
        Ok(())
    }

    pub fn draft(&self, id: NodeId) -> ThreadResult<&str> {
        let node = self.node(id)?;
        node.edit
            .as_ref()
            .map(|e| e.draft.as_str())
            .ok_or(ThreadError::NotEditing(id))
    }

    // In-flight gating

    /// Mark `op` as in flight on `id`, refusing if it already is.
    pub fn begin_op(&mut self, id: NodeId, op: NodeOp) -> ThreadResult<()> {
        let node = self.node_mut(id)?;
        let phase = node.phase_mut(op).ok_or(ThreadError::NotEditing(id))?;
        if phase.is_pending() {
            return Err(ThreadError::InFlight(op.label()));
        }
        *phase = Phase::Pending;
        Ok(())
    }

    /// Settle an in-flight `op`. A successful edit applies the draft and leaves edit mode;
    /// a failed one keeps the original content and stays in edit mode.
    pub fn finish_op(&mut self, id: NodeId, op: NodeOp, ok: bool) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if op == NodeOp::Edit && ok {
            if let Some(edit) = node.edit.take() {
                node.content = edit.draft.trim().to_string();
            }
            return;
        }
        if let Some(phase) = node.phase_mut(op) {
            *phase = if ok { Phase::Committed } else { Phase::RolledBack };
        }
    }

    // Traversal

    /// Flatten the visible part of the forest, depth first, without recursion.
    pub fn visible_rows(&self) -> Vec<Row<'_>> {
        let mut rows = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            rows.push(Row {
                node,
                level: node.level,
                kind: RowKind::Node,
            });
            if !node.expanded {
                continue;
            }

            let marker_level = node.level + 1;
            if node.reply_depth().is_some_and(|d| d >= self.max_depth) {
                if node.reply_count > 0 {
                    rows.push(Row {
                        node,
                        level: marker_level,
                        kind: RowKind::MaxDepthReached,
                    });
                }
                continue;
            }

            match &node.children_state {
                ChildrenState::Loading if node.children.is_empty() => rows.push(Row {
                    node,
                    level: marker_level,
                    kind: RowKind::Loading,
                }),
                ChildrenState::Failed(msg) => rows.push(Row {
                    node,
                    level: marker_level,
                    kind: RowKind::Failed(msg.clone()),
                }),
                _ => {}
            }
            stack.extend(node.children.iter().rev().copied());
        }

        rows
    }

    /// Expanded replies whose children are on screen, in display order.
    pub fn expanded_replies(&self) -> Vec<NodeId> {
        self.visible_rows()
            .into_iter()
            .filter(|row| row.kind == RowKind::Node)
            .map(|row| row.node)
            .filter(|node| {
                node.expanded
                    && node.reply_depth().is_some_and(|d| d < self.max_depth)
                    && node.children_state == ChildrenState::Loaded
                    && (node.reply_count > 0 || !node.children.is_empty())
            })
            .map(|node| node.id)
            .collect()
    }
}
