use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{LikeableType, ParentType, Role};

pub type CommentId = i64;
pub type ReplyId = i64;
pub type UserId = i64;

// Custom serde module for DateTime to ensure RFC3339 string format
mod datetime_format {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = date.to_rfc3339();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<DateTime<Utc>>().map_err(serde::de::Error::custom)
    }
}

/// Response envelope every endpoint wraps its payload in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Author block embedded in comments and replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    #[serde(rename = "profilePhoto", default)]
    pub profile_photo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    #[serde(rename = "createdAt", with = "datetime_format")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub user: UserSummary,
    #[serde(default)]
    pub like_count: i64,
    #[serde(rename = "isLikedByCurrentUser", default)]
    pub is_liked_by_current_user: bool,
    /// Direct replies only
    #[serde(default)]
    pub reply_count: i64,
    /// Depth-0 replies, when the list endpoint embeds them
    #[serde(default)]
    pub replies: Option<Vec<Reply>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub content: String,
    #[serde(rename = "createdAt", with = "datetime_format")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub user: UserSummary,
    #[serde(default)]
    pub like_count: i64,
    #[serde(rename = "isLikedByCurrentUser", default)]
    pub is_liked_by_current_user: bool,
    #[serde(default)]
    pub reply_count: i64,
    /// Root comment of the thread
    #[serde(rename = "commentId", default)]
    pub comment_id: Option<CommentId>,
    /// Immediate parent reply, None when replying to the comment itself
    #[serde(rename = "parentReplyId", default)]
    pub parent_reply_id: Option<ReplyId>,
}

/// One page of root comments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    #[serde(rename = "totalItems", default)]
    pub total_items: u64,
    #[serde(rename = "totalPages", default)]
    pub total_pages: u64,
}

impl CommentPage {
    /// Number of pages needed for `total_items` at `limit` per page.
    pub fn pages_for(total_items: u64, limit: u32) -> u64 {
        if limit == 0 {
            return 0;
        }
        total_items.div_ceil(u64::from(limit))
    }
}

/// Like state of one item for the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeStatus {
    #[serde(rename = "likeCount", alias = "like_count")]
    pub like_count: i64,
    #[serde(rename = "isLiked", alias = "is_liked")]
    pub is_liked: bool,
}

/// The user a session token belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(rename = "profilePhoto", default)]
    pub profile_photo: Option<String>,
}

/// Post or gallery item that owns a comment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub parent_type: ParentType,
    pub id: i64,
}

impl ParentRef {
    pub fn new(parent_type: ParentType, id: i64) -> Self {
        Self { parent_type, id }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.parent_type.as_str(), self.id)
    }
}

// Request types for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ContentRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeRequest {
    pub likeable_type: LikeableType,
    pub likeable_id: i64,
}
