use std::borrow::Cow;

use axum::{
    extract::{Form, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};

use crate::web::{
    AppState, AuthUser,
    archives::archive_path_labels,
    auth::{self, hash_password, verify_password},
    data::{archive_exists, fetch_archives, fetch_archives_for_work, fetch_work, fetch_works},
    escape_html,
    flash::FlashQuery,
    models::{ArchiveRow, WorkRow},
    responses::{self, server_error},
    storage,
    templates::{NavUser, PageLayout, format_file_size, render_page},
    uploads::{FileFieldConfig, UploadOutcome, process_upload_form},
};

/// Extensions accepted for works: images, office documents, text, web text, audio and video.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "svg", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    "txt", "md", "html", "htm", "css", "js", "json", "xml", "mp4", "mpeg", "mpg", "mov", "mp3",
    "wav", "ogg",
];

const FILE_FIELD: &str = "file";

#[derive(Deserialize)]
pub struct WorkPasswordForm {
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct EditWorkForm {
    #[serde(default)]
    pub title: String,
    /// `keep` (default), `set` or `clear`.
    #[serde(default)]
    pub password_action: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// What an edit does to the access password.
enum PasswordChange<'a> {
    Keep,
    Set(&'a str),
    Clear,
}

impl EditWorkForm {
    fn password_change(&self) -> Result<PasswordChange<'_>, &'static str> {
        match self.password_action.as_deref().map(str::trim) {
            None | Some("") | Some("keep") => Ok(PasswordChange::Keep),
            Some("clear") => Ok(PasswordChange::Clear),
            Some("set") => {
                let password = self.password.as_deref().unwrap_or_default();
                if password.trim().is_empty() {
                    Err("work_password_missing")
                } else {
                    Ok(PasswordChange::Set(password))
                }
            }
            Some(_) => Err("unknown_action"),
        }
    }
}

pub async fn upload_page(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Response> {
    let user = auth::require_user_redirect(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    let archives = fetch_archives(state.pool_ref()).await.map_err(|err| {
        error!(?err, "failed to load archives for upload form");
        server_error()
    })?;

    Ok(Html(render_upload_page(
        &user,
        &archives,
        state.config().max_upload_bytes,
        None,
    )))
}

pub async fn process_upload(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let field = FileFieldConfig::new(
        FILE_FIELD,
        ALLOWED_EXTENSIONS,
        state.config().max_upload_bytes,
    );
    let outcome = match process_upload_form(multipart, state.upload_dir(), &[field]).await {
        Ok(outcome) => outcome,
        Err(err) => return upload_rejected(&state, &user, err.message()).await,
    };

    match store_work(&state, &user, &outcome).await {
        Ok(Ok(work_id)) => {
            info!(work_id, user_id = user.id, "stored uploaded work");
            Redirect::to("/works?status=uploaded").into_response()
        }
        Ok(Err(message)) => {
            outcome.discard().await;
            upload_rejected(&state, &user, message).await
        }
        Err(err) => {
            outcome.discard().await;
            error!(?err, user_id = user.id, "failed to record uploaded work");
            server_error()
        }
    }
}

/// Validates the non-file fields and records the work. The inner `Err` carries a
/// message for the user; the outer one is a database failure.
async fn store_work(
    state: &AppState,
    user: &AuthUser,
    outcome: &UploadOutcome,
) -> sqlx::Result<Result<i64, &'static str>> {
    let Some(title) = outcome.trimmed_text("title") else {
        return Ok(Err("请填写作品标题"));
    };
    let Some(saved) = outcome.first_file_for(FILE_FIELD) else {
        return Ok(Err("请选择要上传的文件"));
    };

    let archive_id = match outcome.trimmed_text("archive_id") {
        None => None,
        Some(raw) => {
            let Ok(id) = raw.parse::<i64>() else {
                return Ok(Err("所选归档不存在"));
            };
            if !archive_exists(state.pool_ref(), id).await? {
                return Ok(Err("所选归档不存在"));
            }
            Some(id)
        }
    };

    let password_hash = match outcome.first_text("password").filter(|p| !p.is_empty()) {
        Some(password) => match hash_password(password) {
            Ok(hash) => Some(hash),
            Err(err) => {
                error!(?err, "failed to hash work password");
                return Ok(Err("处理访问密码时出错，请重试"));
            }
        },
        None => None,
    };

    let mut tx = state.pool_ref().begin().await?;

    let work_id = sqlx::query(
        "INSERT INTO works (user_id, title, password_hash, stored_name, original_name, content_type, file_size, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.id)
    .bind(title)
    .bind(password_hash)
    .bind(&saved.stored_name)
    .bind(&saved.original_name)
    .bind(&saved.content_type)
    .bind(saved.file_size as i64)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    if let Some(archive_id) = archive_id {
        sqlx::query("INSERT INTO work_archives (work_id, archive_id) VALUES (?, ?)")
            .bind(work_id)
            .bind(archive_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(Ok(work_id))
}

async fn upload_rejected(state: &AppState, user: &AuthUser, message: &str) -> Response {
    let archives = fetch_archives(state.pool_ref()).await.unwrap_or_else(|err| {
        error!(?err, "failed to load archives for upload form");
        Vec::new()
    });

    (
        StatusCode::BAD_REQUEST,
        Html(render_upload_page(
            user,
            &archives,
            state.config().max_upload_bytes,
            Some(message),
        )),
    )
        .into_response()
}

pub async fn works_list(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<FlashQuery>,
) -> Result<Html<String>, Response> {
    let user = auth::require_user_redirect(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    let works = fetch_works(state.pool_ref()).await.map_err(|err| {
        error!(?err, "failed to load works");
        server_error()
    })?;

    let rows = if works.is_empty() {
        r#"<tr><td colspan="6">暂无作品。</td></tr>"#.to_string()
    } else {
        works
            .iter()
            .map(|work| {
                let access = if work.is_protected() {
                    r#"<span class="lock">已加密</span>"#
                } else {
                    "公开"
                };
                format!(
                    r#"<tr><td>{id}</td><td><a href="/work/{id}">{title}</a></td><td>{owner}</td><td>{size}</td><td>{access}</td><td>{created}</td></tr>"#,
                    id = work.id,
                    title = escape_html(&work.title),
                    owner = escape_html(work.owner_label()),
                    size = format_file_size(work.file_size),
                    access = access,
                    created = work.created_at.format("%Y-%m-%d %H:%M"),
                )
            })
            .collect::<String>()
    };

    let body_html = format!(
        r#"        <section class="panel">
            <h2>全部作品</h2>
            <table>
                <thead><tr><th>编号</th><th>标题</th><th>作者</th><th>大小</th><th>访问</th><th>上传时间</th></tr></thead>
                <tbody>{rows}</tbody>
            </table>
        </section>"#,
        rows = rows,
    );

    Ok(Html(render_page(PageLayout {
        meta_title: "作品列表",
        page_heading: "作品列表",
        nav_user: Some(nav_for(&user)),
        flash_html: Cow::Owned(params.render()),
        body_html: Cow::Owned(body_html),
    })))
}

pub async fn work_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(work_id): Path<i64>,
) -> Response {
    let (user, work) = match load_work_for_user(&state, &jar, work_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if !viewer_bypasses_password(&work, Some(&user)) {
        let action = format!("/work/{}", work.id);
        return password_prompt(Some(&user), &work, &action, None);
    }

    let context = WorkViewContext::direct(&work, &user, None);
    render_work_response(&state, Some(&user), &work, context).await
}

pub async fn unlock_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(work_id): Path<i64>,
    Form(form): Form<WorkPasswordForm>,
) -> Response {
    let (user, work) = match load_work_for_user(&state, &jar, work_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if viewer_bypasses_password(&work, Some(&user)) {
        let context = WorkViewContext::direct(&work, &user, None);
        return render_work_response(&state, Some(&user), &work, context).await;
    }

    let action = format!("/work/{}", work.id);
    if !password_matches(&work, &form.password) {
        return password_prompt(Some(&user), &work, &action, Some("密码错误"));
    }

    let context = WorkViewContext::direct(&work, &user, Some(&form.password));
    render_work_response(&state, Some(&user), &work, context).await
}

pub async fn download_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(work_id): Path<i64>,
) -> Response {
    let (user, work) = match load_work_for_user(&state, &jar, work_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if !viewer_bypasses_password(&work, Some(&user)) {
        let action = format!("/work/{}", work.id);
        return password_prompt(Some(&user), &work, &action, None);
    }

    storage::stream_work(state.upload_dir(), &work).await
}

pub async fn download_work_with_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(work_id): Path<i64>,
    Form(form): Form<WorkPasswordForm>,
) -> Response {
    let (user, work) = match load_work_for_user(&state, &jar, work_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if !viewer_bypasses_password(&work, Some(&user)) && !password_matches(&work, &form.password) {
        let action = format!("/work/{}", work.id);
        return password_prompt(Some(&user), &work, &action, Some("密码错误"));
    }

    storage::stream_work(state.upload_dir(), &work).await
}

pub async fn delete_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(work_id): Path<i64>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let work = match fetch_work(state.pool_ref(), work_id).await {
        Ok(Some(work)) => work,
        Ok(None) => return Redirect::to("/works?error=work_missing").into_response(),
        Err(err) => {
            error!(?err, work_id, "failed to load work for deletion");
            return server_error();
        }
    };

    if !can_manage(&work, &user) {
        return Redirect::to("/works?error=forbidden").into_response();
    }

    if let Err(err) = sqlx::query("DELETE FROM works WHERE id = ?")
        .bind(work.id)
        .execute(state.pool_ref())
        .await
    {
        error!(?err, work_id, "failed to delete work");
        return server_error();
    }

    storage::remove_stored_file(state.upload_dir(), &work.stored_name).await;
    info!(work_id, user_id = user.id, "deleted work");

    Redirect::to("/works?status=work_deleted").into_response()
}

pub async fn edit_work(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(work_id): Path<i64>,
    Form(form): Form<EditWorkForm>,
) -> Response {
    let user = match auth::require_user_redirect(&state, &jar).await {
        Ok(user) => user,
        Err(redirect) => return redirect.into_response(),
    };

    let work = match fetch_work(state.pool_ref(), work_id).await {
        Ok(Some(work)) => work,
        Ok(None) => return Redirect::to("/works?error=work_missing").into_response(),
        Err(err) => {
            error!(?err, work_id, "failed to load work for editing");
            return server_error();
        }
    };

    if !can_manage(&work, &user) {
        return Redirect::to("/works?error=forbidden").into_response();
    }

    let title = form.title.trim();
    if title.is_empty() {
        return Redirect::to("/works?error=work_title_missing").into_response();
    }

    let password_hash = match form.password_change() {
        Ok(PasswordChange::Keep) => work.password_hash.clone(),
        Ok(PasswordChange::Clear) => None,
        Ok(PasswordChange::Set(password)) => match hash_password(password) {
            Ok(hash) => Some(hash),
            Err(err) => {
                error!(?err, work_id, "failed to hash work password");
                return Redirect::to("/works?error=unknown").into_response();
            }
        },
        Err(code) => return Redirect::to(&format!("/works?error={code}")).into_response(),
    };

    if let Err(err) = sqlx::query("UPDATE works SET title = ?, password_hash = ? WHERE id = ?")
        .bind(title)
        .bind(password_hash)
        .bind(work.id)
        .execute(state.pool_ref())
        .await
    {
        error!(?err, work_id, "failed to update work");
        return server_error();
    }

    info!(work_id, user_id = user.id, "updated work");
    Redirect::to("/works?status=work_updated").into_response()
}

async fn load_work_for_user(
    state: &AppState,
    jar: &CookieJar,
    work_id: i64,
) -> Result<(AuthUser, WorkRow), Response> {
    let user = auth::require_user_redirect(state, jar)
        .await
        .map_err(IntoResponse::into_response)?;

    match fetch_work(state.pool_ref(), work_id).await {
        Ok(Some(work)) => Ok((user, work)),
        Ok(None) => Err(responses::not_found("作品不存在。")),
        Err(err) => {
            error!(?err, work_id, "failed to load work");
            Err(server_error())
        }
    }
}

/// Public works are open to everyone; protected ones only to admins without a password.
pub fn viewer_bypasses_password(work: &WorkRow, viewer: Option<&AuthUser>) -> bool {
    !work.is_protected() || viewer.is_some_and(|user| user.is_admin)
}

pub fn password_matches(work: &WorkRow, candidate: &str) -> bool {
    match work.password_hash.as_deref() {
        Some(hash) => verify_password(candidate, hash),
        None => true,
    }
}

pub fn can_manage(work: &WorkRow, user: &AuthUser) -> bool {
    user.is_admin || work.user_id == user.id
}

pub fn nav_for(user: &AuthUser) -> NavUser<'_> {
    NavUser {
        username: &user.username,
        is_admin: user.is_admin,
    }
}

/// Where the rendered work page sends downloads and which actions it offers.
pub struct WorkViewContext<'a> {
    pub download_action: String,
    /// Password the viewer just unlocked the work with, replayed on download.
    pub unlock_password: Option<&'a str>,
    pub show_manage_actions: bool,
}

impl<'a> WorkViewContext<'a> {
    fn direct(work: &WorkRow, user: &AuthUser, unlock_password: Option<&'a str>) -> Self {
        Self {
            download_action: format!("/work/{}/file", work.id),
            unlock_password,
            show_manage_actions: can_manage(work, user),
        }
    }
}

pub async fn render_work_response(
    state: &AppState,
    viewer: Option<&AuthUser>,
    work: &WorkRow,
    context: WorkViewContext<'_>,
) -> Response {
    let archives = match fetch_archives_for_work(state.pool_ref(), work.id).await {
        Ok(archives) => archives,
        Err(err) => {
            error!(?err, work_id = work.id, "failed to load archives for work");
            return server_error();
        }
    };

    Html(render_work_view(viewer, work, &archives, &context)).into_response()
}

fn render_work_view(
    viewer: Option<&AuthUser>,
    work: &WorkRow,
    archives: &[ArchiveRow],
    context: &WorkViewContext<'_>,
) -> String {
    let archive_links = if archives.is_empty() {
        "未归档".to_string()
    } else {
        archives
            .iter()
            .map(|archive| {
                format!(
                    r#"<a href="/archives/{id}">{name}</a>"#,
                    id = archive.id,
                    name = escape_html(&archive.name),
                )
            })
            .collect::<Vec<_>>()
            .join("、")
    };

    let download_html = match context.unlock_password {
        Some(password) => format!(
            r#"<form method="post" action="{action}">
                <input type="hidden" name="password" value="{password}">
                <button type="submit">下载作品</button>
            </form>"#,
            action = escape_html(&context.download_action),
            password = escape_html(password),
        ),
        None => format!(
            r#"<p><a href="{action}">下载作品</a></p>"#,
            action = escape_html(&context.download_action),
        ),
    };

    let manage_html = if context.show_manage_actions {
        format!(
            r#"<section class="panel">
            <h2>管理</h2>
            <p><a href="/share/{id}">生成分享链接</a></p>
            <form method="post" action="/work/{id}/edit">
                <label for="edit-title">标题</label>
                <input id="edit-title" type="text" name="title" value="{title}" required>
                <label for="edit-password-action">访问密码</label>
                <select id="edit-password-action" name="password_action">
                    <option value="keep">保持不变</option>
                    <option value="set">设置新密码</option>
                    <option value="clear">取消密码</option>
                </select>
                <label for="edit-password">新密码</label>
                <input id="edit-password" type="password" name="password">
                <button type="submit">保存修改</button>
            </form>
            <form method="post" action="/work/{id}/delete" onsubmit="return confirm('确认删除该作品？');">
                <button type="submit" class="danger">删除作品</button>
            </form>
        </section>"#,
            id = work.id,
            title = escape_html(&work.title),
        )
    } else {
        String::new()
    };

    let body_html = format!(
        r#"        <section class="panel">
            <h2>{title}</h2>
            <table>
                <tbody>
                    <tr><th>作者</th><td>{owner}</td></tr>
                    <tr><th>文件名</th><td>{original}</td></tr>
                    <tr><th>大小</th><td>{size}</td></tr>
                    <tr><th>类型</th><td>{content_type}</td></tr>
                    <tr><th>访问</th><td>{access}</td></tr>
                    <tr><th>上传时间</th><td>{created}</td></tr>
                    <tr><th>所属归档</th><td>{archives}</td></tr>
                </tbody>
            </table>
            {download_html}
        </section>
        {manage_html}"#,
        title = escape_html(&work.title),
        owner = escape_html(work.owner_label()),
        original = escape_html(&work.original_name),
        size = format_file_size(work.file_size),
        content_type = escape_html(&work.content_type),
        access = if work.is_protected() { "密码保护" } else { "公开" },
        created = work.created_at.format("%Y-%m-%d %H:%M"),
        archives = archive_links,
        download_html = download_html,
        manage_html = manage_html,
    );

    render_page(PageLayout {
        meta_title: &work.title,
        page_heading: "作品详情",
        nav_user: viewer.map(nav_for),
        flash_html: Cow::Borrowed(""),
        body_html: Cow::Owned(body_html),
    })
}

/// Password prompt for a protected work; `action` is where the form posts back to.
pub fn password_prompt(
    viewer: Option<&AuthUser>,
    work: &WorkRow,
    action: &str,
    error: Option<&str>,
) -> Response {
    let status = if error.is_some() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };
    let flash_html = error
        .map(|message| format!(r#"<div class="flash error">{}</div>"#, escape_html(message)))
        .unwrap_or_default();

    let body_html = format!(
        r#"        <section class="panel">
            <h2>{title}</h2>
            <p class="note">该作品受密码保护，请输入作品访问密码。</p>
            <form method="post" action="{action}">
                <label for="password">访问密码</label>
                <input id="password" type="password" name="password" required>
                <button type="submit">查看作品</button>
            </form>
        </section>"#,
        title = escape_html(&work.title),
        action = escape_html(action),
    );

    let html = render_page(PageLayout {
        meta_title: "需要密码",
        page_heading: "作品受密码保护",
        nav_user: viewer.map(nav_for),
        flash_html: Cow::Owned(flash_html),
        body_html: Cow::Owned(body_html),
    });

    (status, Html(html)).into_response()
}

fn render_upload_page(
    user: &AuthUser,
    archives: &[ArchiveRow],
    max_upload_bytes: usize,
    error: Option<&str>,
) -> String {
    let flash_html = error
        .map(|message| format!(r#"<div class="flash error">{}</div>"#, escape_html(message)))
        .unwrap_or_default();

    let archive_options = archive_path_labels(archives)
        .into_iter()
        .map(|(id, label)| {
            format!(
                r#"<option value="{id}">{label}</option>"#,
                id = id,
                label = escape_html(&label),
            )
        })
        .collect::<String>();

    let accept = ALLOWED_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",");

    let body_html = format!(
        r#"        <section class="panel">
            <h2>上传新作品</h2>
            <form method="post" action="/upload" enctype="multipart/form-data">
                <label for="title">作品标题</label>
                <input id="title" type="text" name="title" required>
                <label for="password">访问密码（可选，留空则公开）</label>
                <input id="password" type="password" name="password">
                <label for="archive_id">归档（可选）</label>
                <select id="archive_id" name="archive_id">
                    <option value="">不归档</option>
                    {archive_options}
                </select>
                <label for="file">文件</label>
                <input id="file" type="file" name="file" accept="{accept}" required>
                <button type="submit">上传</button>
            </form>
            <p class="note">单个文件最大 {max_size}。</p>
        </section>"#,
        archive_options = archive_options,
        accept = accept,
        max_size = format_file_size(max_upload_bytes as i64),
    );

    render_page(PageLayout {
        meta_title: "上传作品",
        page_heading: "上传作品",
        nav_user: Some(nav_for(user)),
        flash_html: Cow::Owned(flash_html),
        body_html: Cow::Owned(body_html),
    })
}
