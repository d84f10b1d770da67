use serde::{Deserialize, Serialize};

/// Entity a root comment hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentType {
    Post,
    Gallery,
}

impl ParentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentType::Post => "post",
            ParentType::Gallery => "gallery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "post" | "posts" => Some(ParentType::Post),
            "gallery" | "galleries" => Some(ParentType::Gallery),
            _ => None,
        }
    }
}

/// Anything the like endpoint accepts as `likeable_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LikeableType {
    Post,
    Gallery,
    Comment,
    Reply,
}

impl LikeableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LikeableType::Post => "post",
            LikeableType::Gallery => "gallery",
            LikeableType::Comment => "comment",
            LikeableType::Reply => "reply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "post" => Some(LikeableType::Post),
            "gallery" => Some(LikeableType::Gallery),
            "comment" => Some(LikeableType::Comment),
            "reply" => Some(LikeableType::Reply),
            _ => None,
        }
    }
}

impl From<ParentType> for LikeableType {
    fn from(parent: ParentType) -> Self {
        match parent {
            ParentType::Post => LikeableType::Post,
            ParentType::Gallery => LikeableType::Gallery,
        }
    }
}

/// Portal role of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Unknown role names fall back to a plain user.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "moderator" => Role::Moderator,
            "admin" => Role::Admin,
            "super_admin" | "superadmin" => Role::SuperAdmin,
            _ => Role::User,
        }
    }

    /// Admins and super admins may moderate anything.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::parse(&s)
    }
}
