use serde::{Deserialize, Serialize};

use crate::enums::Role;
use crate::models::{CurrentUser, UserId};

/// Which kind of node an action targets; moderators only act on root comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Comment,
    Reply,
}

/// Who is acting, used for edit/delete/reply affordances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum UserContext {
    #[default]
    Anonymous,
    Member { user_id: UserId, role: Role },
}

impl UserContext {
    /// Create a context for a signed-in user
    pub fn member(user: &CurrentUser) -> Self {
        Self::Member {
            user_id: user.id,
            role: user.role,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, UserContext::Member { .. })
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            UserContext::Anonymous => None,
            UserContext::Member { user_id, .. } => Some(*user_id),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            UserContext::Anonymous => None,
            UserContext::Member { role, .. } => Some(*role),
        }
    }

    /// Author, admin or super admin; moderators additionally for root comments.
    pub fn can_modify(&self, kind: NodeKind, author_id: UserId) -> bool {
        match self {
            UserContext::Anonymous => false,
            UserContext::Member { user_id, role } => {
                *user_id == author_id
                    || role.is_admin()
                    || (kind == NodeKind::Comment && *role == Role::Moderator)
            }
        }
    }
}
