use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
    pub nickname: Option<String>,
    pub invite_code: Option<String>,
}

impl UserRow {
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Clone, FromRow)]
pub struct WorkRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub password_hash: Option<String>,
    pub stored_name: String,
    pub original_name: String,
    pub content_type: String,
    pub file_size: i64,
    pub created_at: DateTime<Utc>,
    /// Nickname or username of the owner; `None` once the owner is deleted.
    pub owner_name: Option<String>,
}

impl WorkRow {
    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn owner_label(&self) -> &str {
        self.owner_name.as_deref().unwrap_or("已删除用户")
    }
}

#[derive(Clone, FromRow)]
pub struct ArchiveRow {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub work_count: i64,
}

/// Node of the rendered archive hierarchy.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ArchiveNode {
    pub id: i64,
    pub name: String,
    pub work_count: i64,
    pub children: Vec<ArchiveNode>,
}
