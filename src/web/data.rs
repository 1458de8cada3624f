use sqlx::SqlitePool;

use super::models::{ArchiveRow, UserRow, WorkRow};

const WORK_SELECT: &str = "SELECT works.id, works.user_id, works.title, works.password_hash, works.stored_name, works.original_name, works.content_type, works.file_size, works.created_at, COALESCE(users.nickname, users.username) AS owner_name FROM works LEFT JOIN users ON users.id = works.user_id";

const ARCHIVE_SELECT: &str = "SELECT archives.id, archives.name, archives.parent_id, archives.owner_id, (SELECT COUNT(*) FROM work_archives WHERE work_archives.archive_id = archives.id) AS work_count FROM archives";

pub async fn fetch_users(pool: &SqlitePool) -> sqlx::Result<Vec<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, is_admin, nickname, invite_code FROM users ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_user(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, is_admin, nickname, invite_code FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_works(pool: &SqlitePool) -> sqlx::Result<Vec<WorkRow>> {
    sqlx::query_as::<_, WorkRow>(&format!("{WORK_SELECT} ORDER BY works.id DESC"))
        .fetch_all(pool)
        .await
}

pub async fn fetch_works_owned_by(pool: &SqlitePool, user_id: i64) -> sqlx::Result<Vec<WorkRow>> {
    sqlx::query_as::<_, WorkRow>(&format!(
        "{WORK_SELECT} WHERE works.user_id = ? ORDER BY works.id DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_work(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<WorkRow>> {
    sqlx::query_as::<_, WorkRow>(&format!("{WORK_SELECT} WHERE works.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_work_by_share_key(
    pool: &SqlitePool,
    share_key: &str,
) -> sqlx::Result<Option<WorkRow>> {
    sqlx::query_as::<_, WorkRow>(&format!(
        "{WORK_SELECT} JOIN share_links ON share_links.work_id = works.id WHERE share_links.share_key = ?"
    ))
    .bind(share_key)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_works_in_archive(
    pool: &SqlitePool,
    archive_id: i64,
) -> sqlx::Result<Vec<WorkRow>> {
    sqlx::query_as::<_, WorkRow>(&format!(
        "{WORK_SELECT} JOIN work_archives ON work_archives.work_id = works.id WHERE work_archives.archive_id = ? ORDER BY works.title"
    ))
    .bind(archive_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_archives(pool: &SqlitePool) -> sqlx::Result<Vec<ArchiveRow>> {
    sqlx::query_as::<_, ArchiveRow>(&format!("{ARCHIVE_SELECT} ORDER BY archives.name, archives.id"))
        .fetch_all(pool)
        .await
}

pub async fn fetch_archive(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<ArchiveRow>> {
    sqlx::query_as::<_, ArchiveRow>(&format!("{ARCHIVE_SELECT} WHERE archives.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_archives_for_work(
    pool: &SqlitePool,
    work_id: i64,
) -> sqlx::Result<Vec<ArchiveRow>> {
    sqlx::query_as::<_, ArchiveRow>(&format!(
        "{ARCHIVE_SELECT} JOIN work_archives AS wa ON wa.archive_id = archives.id WHERE wa.work_id = ? ORDER BY archives.name"
    ))
    .bind(work_id)
    .fetch_all(pool)
    .await
}

pub async fn archive_exists(pool: &SqlitePool, id: i64) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM archives WHERE id = ?)")
        .bind(id)
        .fetch_one(pool)
        .await
}
